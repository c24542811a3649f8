//! Engine configuration loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::breakline::BreakLineConfig;
use crate::bvh::BvhConfig;
use crate::error::ConfigError;
use crate::pathfind::PathConfig;
use crate::profile::ProfileConfig;

/// All tunables of the engine. Missing sections and fields take their
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bvh: BvhConfig,
    pub break_lines: BreakLineConfig,
    pub profile: ProfileConfig,
    pub path: PathConfig,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values the algorithms cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bvh.max_leaf_size == 0 {
            return Err(invalid("bvh.max_leaf_size", "must be at least 1"));
        }
        let angle = self.break_lines.angle_threshold_deg;
        if !angle.is_finite() || !(0.0..=180.0).contains(&angle) {
            return Err(invalid("break_lines.angle_threshold_deg", format!("{} is outside 0..=180", angle)));
        }
        if self.break_lines.key_decimals > 12 {
            return Err(invalid("break_lines.key_decimals", "at most 12 decimals are supported"));
        }
        let p = &self.profile;
        if p.distance_decimals > 12 {
            return Err(invalid("profile.distance_decimals", "at most 12 decimals are supported"));
        }
        for (field, value) in [
            ("profile.elevation_merge", p.elevation_merge),
            ("profile.boundary_tolerance", p.boundary_tolerance),
            ("profile.plane_tolerance", p.plane_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("{} must be finite and non-negative", value)));
            }
        }
        if p.chunk_size == 0 {
            return Err(invalid("profile.chunk_size", "must be at least 1"));
        }
        let path = &self.path;
        if !path.initial_width.is_finite() || path.initial_width <= 0.0 {
            return Err(invalid("path.initial_width", format!("{} must be finite and positive", path.initial_width)));
        }
        if !path.growth_factor.is_finite() || path.growth_factor <= 1.0 {
            return Err(invalid("path.growth_factor", format!("{} must be greater than 1", path.growth_factor)));
        }
        if path.max_attempts == 0 {
            return Err(invalid("path.max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}
