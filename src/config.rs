//! Runtime configuration for the tracker, the debug raster and the initial-pose module.
//!
//! Every section is `#[serde(default)]`, so a JSON file only needs the keys it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TrackResult, TrackerError};

// ─── Estimator ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkfConfig {
    // ── Process noise (per axis, per unit time) ──
    pub sigma_v: f64,
    pub sigma_w: f64,

    // ── Measurement noise [px] ──
    pub sigma_d: f64,

    // ── Initial uncertainty (standard deviations) ──
    pub initial_position_std: f64,
    pub initial_orientation_std: f64,
    pub initial_velocity_std: f64,
    pub initial_angular_velocity_std: f64,

    // ── dt logging thresholds [s] ──
    pub huge_dt_warning: f64,
    pub big_dt_debug: f64,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            sigma_v: 2.0,
            sigma_w: 0.5,
            sigma_d: 1.0,
            initial_position_std: 0.05,
            initial_orientation_std: 0.05,
            initial_velocity_std: 0.5,
            initial_angular_velocity_std: 0.5,
            huge_dt_warning: 1e-2,
            big_dt_debug: 1e-4,
        }
    }
}

// ─── Data association ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Maximum event-to-segment distance [px]
    pub distance_threshold: f64,
    /// Minimum gap between the best and second-best segment distances [px]
    pub min_margin: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 5.0,
            min_margin: 10.0,
        }
    }
}

// ─── Debug raster ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    /// Publish (and clear) after this many recorded events
    pub publish_every: usize,
    /// Scale of the drawn covariance ellipses
    pub covariance_sigma: f64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 240,
            height: 180,
            publish_every: 500,
            covariance_sigma: 3.0,
        }
    }
}

// ─── Target geometry ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Side of the square target centred on the origin in the z = 0 plane [m]
    pub side_length: f64,
    /// Explicit segments `[[x, y, z], [x, y, z]]`; replaces the square when present
    pub segments: Option<Vec<[[f64; 3]; 2]>>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            side_length: 0.2,
            segments: None,
        }
    }
}

// ─── Initial-pose detection ──────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Pixels darker than this are foreground
    pub threshold: u8,
    /// Minimum contour area as a fraction of the image
    pub min_area_fraction: f64,
    /// Polygon approximation tolerance as a fraction of the contour arc length
    pub approx_tolerance: f64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            threshold: 40,
            min_area_fraction: 0.01,
            approx_tolerance: 0.01,
        }
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub ekf: EkfConfig,
    pub matching: MatchingConfig,
    /// Events processed per batch before subsampling kicks in
    pub event_budget: usize,
    pub debug: DebugConfig,
    pub target: TargetConfig,
    pub init: InitConfig,
    /// Frame label attached to published poses
    pub frame_id: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ekf: EkfConfig::default(),
            matching: MatchingConfig::default(),
            event_budget: 2000,
            debug: DebugConfig::default(),
            target: TargetConfig::default(),
            init: InitConfig::default(),
            frame_id: "map".to_string(),
        }
    }
}

impl TrackerConfig {
    /// Read a (partial) JSON configuration file and validate it
    pub fn load(path: impl AsRef<Path>) -> TrackResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        log::info!("Loaded tracker configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> TrackResult<()> {
        let positive = [
            ("ekf.sigma_v", self.ekf.sigma_v),
            ("ekf.sigma_w", self.ekf.sigma_w),
            ("ekf.sigma_d", self.ekf.sigma_d),
            ("ekf.initial_position_std", self.ekf.initial_position_std),
            ("ekf.initial_orientation_std", self.ekf.initial_orientation_std),
            ("ekf.initial_velocity_std", self.ekf.initial_velocity_std),
            ("ekf.initial_angular_velocity_std", self.ekf.initial_angular_velocity_std),
            ("matching.distance_threshold", self.matching.distance_threshold),
            ("target.side_length", self.target.side_length),
            ("init.min_area_fraction", self.init.min_area_fraction),
            ("init.approx_tolerance", self.init.approx_tolerance),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(TrackerError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.matching.min_margin < 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "matching.min_margin must be non-negative, got {}",
                self.matching.min_margin
            )));
        }
        if self.event_budget == 0 {
            return Err(TrackerError::InvalidConfig("event_budget must be > 0".into()));
        }
        if self.debug.width == 0 || self.debug.height == 0 || self.debug.publish_every == 0 {
            return Err(TrackerError::InvalidConfig(
                "debug raster size and publish_every must be > 0".into(),
            ));
        }
        if matches!(&self.target.segments, Some(segments) if segments.is_empty()) {
            return Err(TrackerError::InvalidConfig(
                "target.segments must not be empty when given".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.event_budget, 2000);
        assert_eq!(config.matching.distance_threshold, 5.0);
        assert_eq!(config.matching.min_margin, 10.0);
        assert_eq!(config.debug.publish_every, 500);
        assert_eq!(config.frame_id, "map");
    }

    #[test]
    fn test_partial_json_overrides_only_named_keys() {
        let json = r#"{ "ekf": { "sigma_d": 2.5 }, "event_budget": 100, "frame_id": "target" }"#;
        let config: TrackerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ekf.sigma_d, 2.5);
        assert_eq!(config.ekf.sigma_v, 2.0);
        assert_eq!(config.event_budget, 100);
        assert_eq!(config.frame_id, "target");
        assert_eq!(config.debug, DebugConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TrackerConfig::default();
        config.ekf.sigma_d = 0.0;
        assert!(matches!(config.validate(), Err(TrackerError::InvalidConfig(_))));

        let mut config = TrackerConfig::default();
        config.event_budget = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.debug.publish_every = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.target.segments = Some(Vec::new());
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.matching.min_margin = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("event_tracker_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "matching": { "min_margin": 4.0 } }"#).unwrap();
        let config = TrackerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.matching.min_margin, 4.0);
        assert_eq!(config.matching.distance_threshold, 5.0);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!("event_tracker_bad_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "event_budget": 0 }"#).unwrap();
        let result = TrackerConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
