//! Bus arrival prediction from historical GPS trajectories
//!
//! Live trips are matched against comparable past trips on the same route;
//! per-stop travel times from those analogs give the predicted arrivals,
//! republished per trip every cycle.

pub mod api;
pub mod cleaning;
pub mod config;
pub mod error;
pub mod geometry;
pub mod orchestrator;
pub mod predictor;
pub mod repository;
pub mod snapshot;
pub mod spatial;
pub mod types;

pub use cleaning::{CleanedSegment, DataQuality, TrajectoryCleaner};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use orchestrator::{CycleReport, Orchestrator, TaskOutcome};
pub use predictor::{PredictionFailure, PredictionResult, Predictor};

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod test_support;
