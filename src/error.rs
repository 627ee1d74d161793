use thiserror::Error;

/// Event tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Prediction requires dt > 0, got {0}")]
    NonPositiveDt(f64),

    #[error("Degenerate innovation covariance: {0}")]
    DegenerateInnovation(f64),

    #[error("Unknown map segment: {0}")]
    UnknownSegment(usize),

    #[error("Map segment {0} has not been projected for the current pose")]
    SegmentNotProjected(usize),

    #[error("Map segment {0} is behind the camera")]
    SegmentBehindCamera(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Pose solve failed: {0}")]
    PoseSolve(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type for tracker operations
pub type TrackResult<T> = Result<T, TrackerError>;
