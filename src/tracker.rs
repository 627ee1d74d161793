// tracker.rs: pure computation layer for the event tracker
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - message transport and image encoding
//   - file I/O
//
// It takes calibration, seed poses, reset signals and event batches in, and produces
// tracked poses and debug frames out. The single `Tracker` value exclusively owns the
// estimator, so it can be driven by one task, by a replay loop, or directly from tests.

use serde::Serialize;

use crate::camera::{CameraIntrinsics, Undistorter};
use crate::config::TrackerConfig;
use crate::debug_raster::{DebugFrame, DebugRaster};
use crate::error::TrackResult;
use crate::filters::{EstimatorState, PoseEkf};
use crate::map_match::MapModel;
use crate::types::{Event, RawEvent, SeedPose, TrackedPose};

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Idle,
    Tracking,
}

/// Single-slot, last-write-wins seed pose holder
#[derive(Clone, Debug, Default)]
pub struct SeedPoseMailbox {
    slot: Option<SeedPose>,
}

impl SeedPoseMailbox {
    /// Overwrite the slot; returns true if it was empty
    pub fn post(&mut self, pose: SeedPose) -> bool {
        self.slot.replace(pose).is_none()
    }

    pub fn latest(&self) -> Option<&SeedPose> {
        self.slot.as_ref()
    }
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum TrackerOutput {
    Pose(TrackedPose),
    DebugImage(DebugFrame),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrackerCounters {
    /// Events delivered in batches while tracking
    pub events_received: u64,
    /// Events kept after subsampling
    pub events_processed: u64,
    pub events_matched: u64,
    pub events_unmatched: u64,
    pub updates: u64,
    /// Events whose timestamp went backwards
    pub events_out_of_order: u64,
    /// Events whose distance or update step failed
    pub events_failed: u64,
    /// Events delivered while idle
    pub events_ignored: u64,
}

// ─── Tracker output snapshot ─────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct TrackerSnapshot {
    pub state: LifecycleState,
    pub calibrated: bool,
    pub has_seed: bool,
    pub last_timestamp: Option<f64>,
    pub position: [f64; 3],
    /// Quaternion (w, x, y, z)
    pub orientation: [f64; 4],
    pub covariance_trace: f64,
    pub counters: TrackerCounters,
}

// ─── The tracker ─────────────────────────────────────────────────────────────

pub struct Tracker {
    config: TrackerConfig,
    state: LifecycleState,

    // ── Inputs cached until needed ──
    undistorter: Option<Undistorter>,
    seed: SeedPoseMailbox,

    // ── Owned estimation state ──
    estimator: PoseEkf,
    map: MapModel,
    last_timestamp: Option<f64>,

    raster: Option<DebugRaster>,
    counters: TrackerCounters,
}

impl Tracker {
    /// Build an idle tracker; fails if `config` does not validate
    pub fn new(config: TrackerConfig) -> TrackResult<Self> {
        config.validate()?;
        let map = MapModel::from_config(&config.target);
        let raster = config
            .debug
            .enabled
            .then(|| DebugRaster::new(config.debug.clone()));
        Ok(Self {
            estimator: PoseEkf::new(config.ekf.clone()),
            map,
            raster,
            config,
            state: LifecycleState::Idle,
            undistorter: None,
            seed: SeedPoseMailbox::default(),
            last_timestamp: None,
            counters: TrackerCounters::default(),
        })
    }

    // ── Inputs ───────────────────────────────────────────────────────────

    /// Accept the first calibration; later ones are ignored. Returns true if accepted.
    pub fn handle_camera_info(&mut self, intrinsics: CameraIntrinsics) -> bool {
        if self.undistorter.is_some() {
            log::debug!("Camera calibration already set, ignoring update");
            return false;
        }
        log::info!(
            "Camera calibration received: fx={:.2} fy={:.2} u0={:.2} v0={:.2} k=({:.4}, {:.4}, {:.4})",
            intrinsics.fx,
            intrinsics.fy,
            intrinsics.u0,
            intrinsics.v0,
            intrinsics.k1,
            intrinsics.k2,
            intrinsics.k3
        );
        self.undistorter = Some(Undistorter::new(intrinsics));
        true
    }

    /// Overwrite the cached seed pose; only read at the next reset-to-true
    pub fn handle_seed_pose(&mut self, pose: SeedPose) {
        if self.seed.post(pose) {
            log::info!(
                "Seed pose received: position=({:.3}, {:.3}, {:.3})",
                pose.position.x,
                pose.position.y,
                pose.position.z
            );
        } else {
            log::debug!("Seed pose updated");
        }
    }

    /// `true` (re)initialises from the latest seed and starts tracking, `false` stops.
    /// Returns the resulting lifecycle state.
    pub fn handle_reset(&mut self, value: bool) -> LifecycleState {
        if !value {
            if self.state == LifecycleState::Tracking {
                log::info!("Reset to idle");
            }
            self.state = LifecycleState::Idle;
            return self.state;
        }

        let (Some(undistorter), Some(seed)) = (&self.undistorter, self.seed.latest()) else {
            log::warn!(
                "Reset requested but calibration ({}) or seed pose ({}) is missing; staying idle",
                if self.undistorter.is_some() { "ok" } else { "missing" },
                if self.seed.latest().is_some() { "ok" } else { "missing" },
            );
            self.state = LifecycleState::Idle;
            return self.state;
        };

        let initial = EstimatorState::from_seed(seed);
        self.estimator.init(initial);
        self.last_timestamp = None;
        if let Some(raster) = &mut self.raster {
            raster.clear();
        }
        self.map
            .project_all(&initial.position, &initial.orientation, undistorter.intrinsics());
        self.state = LifecycleState::Tracking;

        log::info!(
            "Tracking started from position=({:.3}, {:.3}, {:.3})",
            initial.position.x,
            initial.position.y,
            initial.position.z
        );
        self.state
    }

    /// Process one event batch in order, subsampled by a fixed stride when it exceeds the
    /// event budget
    pub fn handle_events(&mut self, events: &[RawEvent]) -> Vec<TrackerOutput> {
        let mut outputs = Vec::new();
        if self.state != LifecycleState::Tracking {
            self.counters.events_ignored += events.len() as u64;
            log::trace!("Ignoring {} events while idle", events.len());
            return outputs;
        }

        let stride = self.stride(events.len());
        let mut processed = 0u64;
        for raw in events.iter().step_by(stride) {
            self.process_event(raw, &mut outputs);
            processed += 1;
        }

        self.counters.events_received += events.len() as u64;
        self.counters.events_processed += processed;
        log::debug!(
            "Batch of {} events, stride {}, {} outputs",
            events.len(),
            stride,
            outputs.len()
        );
        outputs
    }

    /// Subsampling stride for a batch of `len` events
    pub fn stride(&self, len: usize) -> usize {
        len / self.config.event_budget + 1
    }

    fn process_event(&mut self, raw: &RawEvent, outputs: &mut Vec<TrackerOutput>) {
        let Some(undistorter) = &self.undistorter else {
            return;
        };
        let raw_event = Event::from_raw(raw);
        let event = Event {
            position: undistorter.undistort(&raw_event.position),
            ..raw_event
        };
        let intrinsics = undistorter.intrinsics().clone();

        // ── Prediction ──
        let Some(last) = self.last_timestamp else {
            self.last_timestamp = Some(event.timestamp);
            return;
        };
        if event.timestamp < last {
            log::warn!(
                "Dropping out-of-order event at {:.6}s (last {:.6}s)",
                event.timestamp,
                last
            );
            self.counters.events_out_of_order += 1;
            return;
        }
        let dt = event.timestamp - last;
        if dt > 0.0 {
            if let Err(e) = self.estimator.predict(dt) {
                log::warn!("Prediction failed: {}", e);
                self.counters.events_failed += 1;
                return;
            }
        }
        self.last_timestamp = Some(event.timestamp);

        // ── Association ──
        let matching = &self.config.matching;
        let Some(id) =
            self.map
                .get_nearest(&event.position, matching.distance_threshold, matching.min_margin)
        else {
            self.counters.events_unmatched += 1;
            self.record_debug(&event, false, outputs);
            return;
        };
        self.counters.events_matched += 1;
        self.record_debug(&event, true, outputs);

        // ── Update ──
        let state = *self.estimator.state();
        let measurement = self
            .map
            .project(id, &state.position, &state.orientation, &intrinsics)
            .and_then(|()| {
                self.map.get_distance(
                    &event.position,
                    id,
                    &state.position,
                    &state.orientation,
                    &intrinsics,
                )
            });
        let updated = measurement.and_then(|m| {
            self.estimator
                .update(-m.distance, &m.pose_jacobian())
        });

        match updated {
            Ok(()) => {
                self.counters.updates += 1;
                let state = self.estimator.state();
                outputs.push(TrackerOutput::Pose(TrackedPose::new(
                    event.timestamp,
                    &self.config.frame_id,
                    &state.position,
                    &state.orientation,
                )));
            }
            Err(e) => {
                log::warn!("Skipping event at {:.6}s on segment {}: {}", event.timestamp, id, e);
                self.counters.events_failed += 1;
            }
        }
    }

    fn record_debug(&mut self, event: &Event, used: bool, outputs: &mut Vec<TrackerOutput>) {
        let (Some(raster), Some(undistorter)) = (&mut self.raster, &self.undistorter) else {
            return;
        };
        if !raster.record(&event.position, used) {
            return;
        }

        let state = self.estimator.state();
        let frame = raster.render(
            event.timestamp,
            &self.map,
            &state.position,
            &state.orientation,
            &self.estimator.pose_covariance(),
            undistorter.intrinsics(),
        );
        raster.clear();
        outputs.push(TrackerOutput::DebugImage(frame));
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn lifecycle(&self) -> LifecycleState {
        self.state
    }

    pub fn estimator(&self) -> &PoseEkf {
        &self.estimator
    }

    pub fn map(&self) -> &MapModel {
        &self.map
    }

    pub fn intrinsics(&self) -> Option<&CameraIntrinsics> {
        self.undistorter.as_ref().map(|u| u.intrinsics())
    }

    pub fn seed_pose(&self) -> Option<&SeedPose> {
        self.seed.latest()
    }

    pub fn counters(&self) -> &TrackerCounters {
        &self.counters
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.estimator.state();
        let q = &state.orientation;
        TrackerSnapshot {
            state: self.state,
            calibrated: self.undistorter.is_some(),
            has_seed: self.seed.latest().is_some(),
            last_timestamp: self.last_timestamp,
            position: [state.position.x, state.position.y, state.position.z],
            orientation: [q.w, q.i, q.j, q.k],
            covariance_trace: self.estimator.covariance_trace(),
            counters: self.counters.clone(),
        }
    }
}
