use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::{mpsc, watch};

use event_tracker_rs::config::TrackerConfig;
use event_tracker_rs::debug_raster::DebugFrame;
use event_tracker_rs::node::{run_tracker, TrackerInput};
use event_tracker_rs::recording::{load_recording, RecordedMessage};
use event_tracker_rs::track_init::estimate_seed_pose;
use event_tracker_rs::types::{SeedPose, TrackedPose};
use event_tracker_rs::Tracker;

#[derive(Parser, Debug)]
#[command(name = "event_tracker")]
#[command(about = "Replay a recorded event stream through the EKF pose tracker", long_about = None)]
struct Args {
    /// Path to a recording (.json or .json.gz)
    #[arg(long)]
    recording: PathBuf,

    /// JSON configuration file (partial files override defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Grayscale frame of the target; its detected pose is published as the seed before replay.
    /// Detection failures are logged and the replay continues without it.
    #[arg(long)]
    seed_image: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = "event_tracker_sessions")]
    output_dir: PathBuf,

    /// Do not write debug frames
    #[arg(long)]
    no_debug_images: bool,

    /// Capacity of the debug frame channel; frames beyond it are dropped
    #[arg(long, default_value = "8")]
    debug_queue: usize,
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Run the initial-pose detector on a frame, using the recording's calibration.
///
/// Any failure is logged and yields no seed.
fn seed_from_image(
    path: &Path,
    messages: &[RecordedMessage],
    config: &TrackerConfig,
) -> Option<SeedPose> {
    match detect_seed(path, messages, config) {
        Ok(Some(seed)) => Some(seed),
        Ok(None) => {
            log::warn!("No square found in {}", path.display());
            None
        }
        Err(e) => {
            log::warn!("No seed pose from {}: {:#}", path.display(), e);
            None
        }
    }
}

fn detect_seed(
    path: &Path,
    messages: &[RecordedMessage],
    config: &TrackerConfig,
) -> Result<Option<SeedPose>> {
    let intrinsics = messages
        .iter()
        .find_map(|m| m.intrinsics())
        .context("recording has no camera_info message to calibrate the seed image")?;
    let gray = image::open(path)
        .with_context(|| format!("failed to open seed image {}", path.display()))?
        .to_luma8();
    Ok(estimate_seed_pose(
        &gray,
        &config.init,
        config.target.side_length,
        &intrinsics,
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    let recording = load_recording(&args.recording)?;

    let session_dir = args.output_dir.join(format!("session_{}", ts_now_clean()));
    std::fs::create_dir_all(&session_dir)?;
    log::info!("Writing session to {}", session_dir.display());

    let (input_tx, input_rx) = mpsc::channel::<TrackerInput>(64);
    let (seed_tx, seed_rx) = watch::channel::<Option<SeedPose>>(None);
    let (pose_tx, mut pose_rx) = mpsc::channel::<TrackedPose>(1024);
    let (debug_tx, mut debug_rx) = mpsc::channel::<DebugFrame>(args.debug_queue.max(1));

    if let Some(path) = &args.seed_image {
        if let Some(seed) = seed_from_image(path, &recording.messages, &config) {
            seed_tx.send_replace(Some(seed));
        }
    }

    let node = tokio::spawn(run_tracker(
        Tracker::new(config)?,
        input_rx,
        seed_rx,
        pose_tx,
        debug_tx,
    ));

    // Poses as JSON lines
    let pose_path = session_dir.join("poses.jsonl");
    let pose_writer = tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut writer = BufWriter::new(File::create(&pose_path)?);
        let mut count = 0;
        while let Some(pose) = pose_rx.blocking_recv() {
            serde_json::to_writer(&mut writer, &pose)?;
            writer.write_all(b"\n")?;
            count += 1;
        }
        writer.flush()?;
        Ok(count)
    });

    // Debug frames as PNG
    let debug_dir = session_dir.join("debug");
    let write_debug = !args.no_debug_images;
    if write_debug {
        std::fs::create_dir_all(&debug_dir)?;
    }
    let debug_writer = tokio::task::spawn_blocking(move || -> usize {
        let mut count = 0;
        while let Some(frame) = debug_rx.blocking_recv() {
            if !write_debug {
                continue;
            }
            let path = debug_dir.join(format!("frame_{:06}_{:.6}.png", count, frame.timestamp));
            match frame.image.save(&path) {
                Ok(()) => count += 1,
                Err(e) => log::warn!("Dropping debug frame {}: {}", path.display(), e),
            }
        }
        count
    });

    // Replay in recorded order
    for message in recording.messages {
        match message {
            RecordedMessage::CameraPose { .. } => {
                if let Some(seed) = message.seed_pose() {
                    input_tx.send(TrackerInput::SeedPose(seed)).await?;
                }
            }
            RecordedMessage::CameraInfo { .. } => {
                if let Some(intrinsics) = message.intrinsics() {
                    input_tx.send(TrackerInput::CameraInfo(intrinsics)).await?;
                }
            }
            RecordedMessage::Reset { value } => input_tx.send(TrackerInput::Reset(value)).await?,
            RecordedMessage::Events { events } => input_tx.send(TrackerInput::Events(events)).await?,
        }
    }
    drop(input_tx);

    let snapshot = node.await?;
    let poses_written = pose_writer.await??;
    let frames_written = debug_writer.await?;

    let summary_path = session_dir.join("summary.json");
    serde_json::to_writer_pretty(File::create(&summary_path)?, &snapshot)?;

    log::info!(
        "Replay finished: {} poses, {} debug frames, {} of {} events matched",
        poses_written,
        frames_written,
        snapshot.counters.events_matched,
        snapshot.counters.events_processed
    );
    Ok(())
}
