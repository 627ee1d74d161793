use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use image::Rgb;
use imageproc::drawing::draw_line_segment_mut;
use serde_json::json;

use event_tracker_rs::camera::CameraIntrinsics;
use event_tracker_rs::config::TrackerConfig;
use event_tracker_rs::track_init::{find_square, solve_square_pose, sort_by_centroid_angle};

#[derive(Parser, Debug)]
#[command(name = "track_init")]
#[command(about = "Detect the square target in a grayscale frame and print the camera seed pose", long_about = None)]
struct Args {
    /// Input frame (any format the image crate reads; converted to grayscale)
    image: PathBuf,

    /// Camera calibration JSON: { "u0", "v0", "fx", "fy", "k1", "k2", "k3" }
    #[arg(long)]
    intrinsics: PathBuf,

    /// JSON configuration file (target size and detection parameters)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the input frame with the detected square drawn on it
    #[arg(long)]
    annotated: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    let intrinsics: CameraIntrinsics = serde_json::from_str(
        &std::fs::read_to_string(&args.intrinsics)
            .with_context(|| format!("failed to read {}", args.intrinsics.display()))?,
    )?;
    let gray = image::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?
        .to_luma8();

    let Some(mut corners) = find_square(&gray, &config.init) else {
        log::info!("No square found");
        return Ok(());
    };
    sort_by_centroid_angle(&mut corners);
    for (i, c) in corners.iter().enumerate() {
        log::info!("P{} [{:.0}, {:.0}]", i + 1, c.x, c.y);
    }

    if let Some(path) = &args.annotated {
        let mut rgb = image::DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
        for i in 0..4 {
            let (a, b) = (corners[i], corners[(i + 1) % 4]);
            draw_line_segment_mut(
                &mut rgb,
                (a.x as f32, a.y as f32),
                (b.x as f32, b.y as f32),
                Rgb([255, 0, 0]),
            );
        }
        rgb.save(path)?;
    }

    let pose = solve_square_pose(&corners, config.target.side_length, &intrinsics)?;
    let q = pose.orientation;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "position": [pose.position.x, pose.position.y, pose.position.z],
            "orientation": [q.w, q.i, q.j, q.k],
            "corners": corners.iter().map(|c| [c.x, c.y]).collect::<Vec<_>>(),
        }))?
    );
    Ok(())
}
