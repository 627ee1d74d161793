//! Recorded input streams for offline replay.
//!
//! A recording is a JSON document (optionally gzip-compressed, `.json.gz`) holding an ordered
//! list of tagged messages:
//!
//! ```json
//! { "messages": [
//!     { "type": "camera_info", "k": [200, 0, 120, 0, 200, 90, 0, 0, 1], "d": [0, 0, 0, 0, 0] },
//!     { "type": "camera_pose", "position": [0, 0, -1], "orientation": [1, 0, 0, 0] },
//!     { "type": "reset", "value": true },
//!     { "type": "events", "events": [ { "x": 120, "y": 50, "ts": 0.0, "polarity": true } ] }
//! ] }
//! ```
//!
//! Messages that fail to decode are logged and skipped; the rest of the stream is kept.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::camera::CameraIntrinsics;
use crate::error::TrackResult;
use crate::types::{RawEvent, SeedPose};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedMessage {
    /// Row-major camera matrix and plumb-bob coefficients `[k1, k2, p1, p2, k3]`
    CameraInfo {
        k: [f64; 9],
        #[serde(default)]
        d: Vec<f64>,
    },
    /// Seed pose; orientation is (w, x, y, z)
    CameraPose {
        position: [f64; 3],
        orientation: [f64; 4],
    },
    Reset {
        value: bool,
    },
    Events {
        events: Vec<RawEvent>,
    },
}

impl RecordedMessage {
    pub fn intrinsics(&self) -> Option<CameraIntrinsics> {
        match self {
            Self::CameraInfo { k, d } => Some(CameraIntrinsics::from_camera_info(*k, d)),
            _ => None,
        }
    }

    pub fn seed_pose(&self) -> Option<SeedPose> {
        match self {
            Self::CameraPose {
                position,
                orientation,
            } => Some(SeedPose::from_wxyz(*position, *orientation)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Recording {
    pub messages: Vec<RecordedMessage>,
    /// Messages dropped because they failed to decode
    #[serde(skip)]
    pub skipped: usize,
}

#[derive(Deserialize)]
struct RawRecording {
    messages: Vec<Value>,
}

impl Recording {
    pub fn from_reader(reader: impl Read) -> TrackResult<Self> {
        let raw: RawRecording = serde_json::from_reader(reader)?;
        let mut recording = Recording::default();
        for (index, value) in raw.messages.into_iter().enumerate() {
            match serde_json::from_value::<RecordedMessage>(value) {
                Ok(message) => recording.messages.push(message),
                Err(e) => {
                    log::warn!("Skipping undecodable message #{}: {}", index, e);
                    recording.skipped += 1;
                }
            }
        }
        Ok(recording)
    }

    pub fn event_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| match m {
                RecordedMessage::Events { events } => events.len(),
                _ => 0,
            })
            .sum()
    }
}

/// Load a `.json` or `.json.gz` recording
pub fn load_recording(path: &Path) -> TrackResult<Recording> {
    let file = File::open(path)?;
    let recording = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Recording::from_reader(BufReader::new(GzDecoder::new(file)))?
    } else {
        Recording::from_reader(BufReader::new(file))?
    };
    log::info!(
        "Loaded {} messages ({} events, {} skipped) from {}",
        recording.messages.len(),
        recording.event_count(),
        recording.skipped,
        path.display()
    );
    Ok(recording)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SAMPLE: &str = r#"{ "messages": [
        { "type": "camera_info", "k": [200, 0, 120, 0, 200, 90, 0, 0, 1], "d": [-0.1, 0.01, 0, 0, 0] },
        { "type": "camera_pose", "position": [0, 0, -1], "orientation": [1, 0, 0, 0] },
        { "type": "reset", "value": true },
        { "type": "events", "events": [ { "x": 120, "y": 50, "ts": 0.0, "polarity": true }, { "x": 121, "y": 50, "ts": 0.001 } ] },
        { "type": "imu", "data": [] }
    ] }"#;

    #[test]
    fn test_parse_tagged_messages() {
        let recording = Recording::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(recording.messages.len(), 4);
        assert_eq!(recording.skipped, 1);
        assert_eq!(recording.event_count(), 2);

        let intrinsics = recording.messages[0].intrinsics().unwrap();
        assert_eq!(intrinsics.fx, 200.0);
        assert_eq!(intrinsics.k1, -0.1);

        let seed = recording.messages[1].seed_pose().unwrap();
        assert_eq!(seed.position.z, -1.0);
        assert_eq!(recording.messages[2], RecordedMessage::Reset { value: true });

        match &recording.messages[3] {
            RecordedMessage::Events { events } => {
                assert_eq!(events[1].x, 121);
                assert!(!events[1].polarity);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_load_gzip_recording() {
        let path = std::env::temp_dir().join(format!("event_tracker_rec_{}.json.gz", std::process::id()));
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let recording = load_recording(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(recording.messages.len(), 4);
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(Recording::from_reader("{ not json".as_bytes()).is_err());
    }
}
