//! Async transport around the tracker.
//!
//! One task owns the `Tracker` outright. Calibration, recorded seed poses, resets and event
//! batches arrive in order on one channel. A live seed source (a detector running beside the
//! tracker) publishes through a last-value `watch` slot instead. Outputs leave on two channels;
//! debug frames are fire-and-forget, so a full or closed sink drops them.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::camera::CameraIntrinsics;
use crate::debug_raster::DebugFrame;
use crate::tracker::{Tracker, TrackerOutput, TrackerSnapshot};
use crate::types::{RawEvent, SeedPose, TrackedPose};

/// Ordered inputs serialized onto the tracker task
#[derive(Clone, Debug)]
pub enum TrackerInput {
    CameraInfo(CameraIntrinsics),
    /// Seed pose ordered against resets and events
    SeedPose(SeedPose),
    Reset(bool),
    Events(Vec<RawEvent>),
}

/// Drive `tracker` until the input channel closes; returns the final snapshot
pub async fn run_tracker(
    mut tracker: Tracker,
    mut inputs: mpsc::Receiver<TrackerInput>,
    mut seed_rx: watch::Receiver<Option<SeedPose>>,
    pose_tx: mpsc::Sender<TrackedPose>,
    debug_tx: mpsc::Sender<DebugFrame>,
) -> TrackerSnapshot {
    let initial_seed = *seed_rx.borrow_and_update();
    if let Some(seed) = initial_seed {
        tracker.handle_seed_pose(seed);
    }

    let mut seed_open = true;
    let mut debug_dropped = 0u64;

    loop {
        tokio::select! {
            biased;

            changed = seed_rx.changed(), if seed_open => {
                match changed {
                    Ok(()) => {
                        let seed = *seed_rx.borrow_and_update();
                        if let Some(seed) = seed {
                            tracker.handle_seed_pose(seed);
                        }
                    }
                    Err(_) => {
                        log::debug!("Seed pose publisher closed");
                        seed_open = false;
                    }
                }
            }

            input = inputs.recv() => {
                let Some(input) = input else {
                    break;
                };
                let outputs = match input {
                    TrackerInput::CameraInfo(intrinsics) => {
                        tracker.handle_camera_info(intrinsics);
                        Vec::new()
                    }
                    TrackerInput::SeedPose(seed) => {
                        tracker.handle_seed_pose(seed);
                        Vec::new()
                    }
                    TrackerInput::Reset(value) => {
                        tracker.handle_reset(value);
                        Vec::new()
                    }
                    TrackerInput::Events(batch) => tracker.handle_events(&batch),
                };

                for output in outputs {
                    match output {
                        TrackerOutput::Pose(pose) => {
                            if pose_tx.send(pose).await.is_err() {
                                log::trace!("Pose sink closed");
                            }
                        }
                        TrackerOutput::DebugImage(frame) => match debug_tx.try_send(frame) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                debug_dropped += 1;
                                log::debug!("Debug sink full, dropped frame ({} total)", debug_dropped);
                            }
                            Err(TrySendError::Closed(_)) => {
                                debug_dropped += 1;
                                log::trace!("Debug sink closed, dropped frame");
                            }
                        },
                    }
                }
            }
        }
    }

    log::info!("Tracker input closed, {} debug frames dropped", debug_dropped);
    tracker.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::tracker::LifecycleState;
    use nalgebra::{UnitQuaternion, Vector3};

    fn config() -> TrackerConfig {
        let mut config = TrackerConfig::default();
        config.target.side_length = 0.4;
        config.debug.publish_every = 1;
        config
    }

    fn seed_at(z: f64) -> SeedPose {
        SeedPose::new(Vector3::new(0.0, 0.0, z), UnitQuaternion::identity())
    }

    fn edge_events() -> Vec<RawEvent> {
        (0..5)
            .map(|i| RawEvent {
                x: 120,
                y: 50,
                ts: i as f64 * 1e-3,
                polarity: true,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_node_tracks_and_drops_debug_frames() {
        let (input_tx, input_rx) = mpsc::channel(16);
        let (seed_tx, seed_rx) = watch::channel(None);
        let (pose_tx, mut pose_rx) = mpsc::channel(64);
        // Never drained: every frame past the first is dropped
        let (debug_tx, _debug_rx) = mpsc::channel(1);

        seed_tx.send(Some(seed_at(-1.0))).unwrap();
        let node = tokio::spawn(run_tracker(
            Tracker::new(config()).unwrap(),
            input_rx,
            seed_rx,
            pose_tx,
            debug_tx,
        ));

        let intrinsics = CameraIntrinsics::new(120.0, 90.0, 200.0, 200.0);
        input_tx.send(TrackerInput::CameraInfo(intrinsics)).await.unwrap();
        input_tx.send(TrackerInput::Reset(true)).await.unwrap();
        input_tx.send(TrackerInput::Events(edge_events())).await.unwrap();
        drop(input_tx);

        let snapshot = node.await.unwrap();
        assert_eq!(snapshot.state, LifecycleState::Tracking);
        assert_eq!(snapshot.counters.updates, 4);

        let mut poses = Vec::new();
        while let Ok(pose) = pose_rx.try_recv() {
            poses.push(pose);
        }
        assert_eq!(poses.len(), 4);
        assert!(poses.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(poses.iter().all(|p| p.frame_id == "map"));
    }

    #[tokio::test]
    async fn test_reset_sees_latest_seed() {
        let (input_tx, input_rx) = mpsc::channel(16);
        let (seed_tx, seed_rx) = watch::channel(None);
        let (pose_tx, _pose_rx) = mpsc::channel(16);
        let (debug_tx, _debug_rx) = mpsc::channel(16);

        seed_tx.send(Some(seed_at(-2.0))).unwrap();
        let node = tokio::spawn(run_tracker(
            Tracker::new(config()).unwrap(),
            input_rx,
            seed_rx,
            pose_tx,
            debug_tx,
        ));

        input_tx
            .send(TrackerInput::CameraInfo(CameraIntrinsics::new(120.0, 90.0, 200.0, 200.0)))
            .await
            .unwrap();
        seed_tx.send(Some(seed_at(-1.5))).unwrap();
        input_tx.send(TrackerInput::Reset(true)).await.unwrap();
        drop(input_tx);

        let snapshot = node.await.unwrap();
        assert_eq!(snapshot.state, LifecycleState::Tracking);
        assert_eq!(snapshot.position, [0.0, 0.0, -1.5]);
    }

    #[tokio::test]
    async fn test_ordered_seed_applies_to_following_reset_only() {
        let (input_tx, input_rx) = mpsc::channel(16);
        let (_seed_tx, seed_rx) = watch::channel(None);
        let (pose_tx, _pose_rx) = mpsc::channel(16);
        let (debug_tx, _debug_rx) = mpsc::channel(16);

        let node = tokio::spawn(run_tracker(
            Tracker::new(config()).unwrap(),
            input_rx,
            seed_rx,
            pose_tx,
            debug_tx,
        ));

        input_tx.send(TrackerInput::SeedPose(seed_at(-1.0))).await.unwrap();
        input_tx
            .send(TrackerInput::CameraInfo(CameraIntrinsics::new(120.0, 90.0, 200.0, 200.0)))
            .await
            .unwrap();
        input_tx.send(TrackerInput::Reset(true)).await.unwrap();
        input_tx
            .send(TrackerInput::SeedPose(SeedPose::new(
                Vector3::new(9.0, 9.0, -9.0),
                UnitQuaternion::identity(),
            )))
            .await
            .unwrap();
        drop(input_tx);

        let snapshot = node.await.unwrap();
        assert_eq!(snapshot.state, LifecycleState::Tracking);
        assert_eq!(snapshot.position, [0.0, 0.0, -1.0]);
        assert!(snapshot.has_seed);
    }

    #[tokio::test]
    async fn test_reset_without_seed_stays_idle() {
        let (input_tx, input_rx) = mpsc::channel(16);
        let (seed_tx, seed_rx) = watch::channel(None);
        let (pose_tx, _pose_rx) = mpsc::channel(16);
        let (debug_tx, _debug_rx) = mpsc::channel(16);
        drop(seed_tx);

        let node = tokio::spawn(run_tracker(
            Tracker::new(config()).unwrap(),
            input_rx,
            seed_rx,
            pose_tx,
            debug_tx,
        ));
        input_tx
            .send(TrackerInput::CameraInfo(CameraIntrinsics::new(120.0, 90.0, 200.0, 200.0)))
            .await
            .unwrap();
        input_tx.send(TrackerInput::Reset(true)).await.unwrap();
        input_tx.send(TrackerInput::Events(edge_events())).await.unwrap();
        drop(input_tx);

        let snapshot = node.await.unwrap();
        assert_eq!(snapshot.state, LifecycleState::Idle);
        assert_eq!(snapshot.counters.events_ignored, 5);
    }
}
