use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::geometry::LocalProjection;

/// Trajectory cleaning thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub rounds: usize,
    /// A smoothing repair is accepted only below this residual turn
    pub repair_max_turn_deg: f64,
    pub max_speed_mps: f64,
    pub max_gap_secs: i64,
    /// Latest ping older than this makes a trip unpredictable
    pub stale_after_secs: i64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        CleaningConfig {
            rounds: 5,
            repair_max_turn_deg: 90.0,
            max_speed_mps: 28.0, // ~100 km/h
            max_gap_secs: 30,
            stale_after_secs: 60,
        }
    }
}

/// Spatial matching radii and projection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub stop_radius_m: f64,
    pub projection: LocalProjection,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            stop_radius_m: 50.0,
            projection: LocalProjection::default(),
        }
    }
}

/// Analog selection and aggregation tunables.
///
/// The asymmetric caps (5 linear, 1 circular) and the pool size are
/// carried forward as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub position_radius_m: f64,
    pub lookback_days: i64,
    pub candidate_pool: usize,
    pub linear_analogs: usize,
    pub circular_analogs: usize,
    /// Below this many analogs the plain mean is used
    pub trim_min_samples: usize,
    pub exclude_self: bool,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        PredictorConfig {
            position_radius_m: 20.0,
            lookback_days: 30,
            candidate_pool: 20,
            linear_analogs: 5,
            circular_analogs: 1,
            trim_min_samples: 3,
            exclude_self: true,
        }
    }
}

/// Operating-trip window and worker pool sizing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub operating_margin_mins: i64,
    pub workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            operating_margin_mins: 15,
            workers: 5,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cleaning: CleaningConfig,
    pub matcher: MatcherConfig,
    pub predictor: PredictorConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
