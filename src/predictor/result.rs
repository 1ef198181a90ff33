use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cleaning::DataQuality;
use crate::types::{StopId, TripId};

/// Why a trip has no prediction this cycle. Expected outcomes, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionFailure {
    NoPings,
    InsufficientRecentPings,
    StaleData,
    InsufficientHistory,
}

impl PredictionFailure {
    pub fn from_quality(quality: DataQuality) -> Option<Self> {
        match quality {
            DataQuality::NoPings => Some(PredictionFailure::NoPings),
            DataQuality::InsufficientRecentPings => Some(PredictionFailure::InsufficientRecentPings),
            DataQuality::StaleData => Some(PredictionFailure::StaleData),
            DataQuality::Valid => None,
        }
    }
}

impl fmt::Display for PredictionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PredictionFailure::NoPings => "No prediction: No trip pings at all",
            PredictionFailure::InsufficientRecentPings => {
                "No prediction: Insufficient latest trip pings for prediction"
            }
            PredictionFailure::StaleData => {
                "No prediction: The latest ping is more than 1 minute from now; prediction will be inaccurate"
            }
            PredictionFailure::InsufficientHistory => {
                "No prediction: Insufficient historical data for prediction."
            }
        };
        f.write_str(msg)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StopPrediction {
    Arrival(DateTime<Utc>),
    Unavailable(PredictionFailure),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopEstimate {
    pub stop_id: StopId,
    pub prediction: StopPrediction,
}

/// One cycle's predictions for one trip, in stop order.
///
/// Either every stop has an arrival or every stop carries the same
/// failure; the constructors keep it that way.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub trip_id: TripId,
    pub reference_time: DateTime<Utc>,
    stops: Vec<StopEstimate>,
}

impl PredictionResult {
    pub fn predicted(
        trip_id: TripId,
        reference_time: DateTime<Utc>,
        arrivals: impl IntoIterator<Item = (StopId, DateTime<Utc>)>,
    ) -> Self {
        PredictionResult {
            trip_id,
            reference_time,
            stops: arrivals
                .into_iter()
                .map(|(stop_id, time)| StopEstimate {
                    stop_id,
                    prediction: StopPrediction::Arrival(time),
                })
                .collect(),
        }
    }

    pub fn failed(
        trip_id: TripId,
        reference_time: DateTime<Utc>,
        stop_ids: &[StopId],
        failure: PredictionFailure,
    ) -> Self {
        PredictionResult {
            trip_id,
            reference_time,
            stops: stop_ids
                .iter()
                .map(|stop_id| StopEstimate {
                    stop_id: *stop_id,
                    prediction: StopPrediction::Unavailable(failure),
                })
                .collect(),
        }
    }

    pub fn stops(&self) -> &[StopEstimate] {
        &self.stops
    }

    pub fn get(&self, stop_id: StopId) -> Option<&StopPrediction> {
        self.stops
            .iter()
            .find(|s| s.stop_id == stop_id)
            .map(|s| &s.prediction)
    }

    /// The shared failure, if this result carries no arrivals
    pub fn failure(&self) -> Option<PredictionFailure> {
        match self.stops.first().map(|s| &s.prediction) {
            Some(StopPrediction::Unavailable(failure)) => Some(*failure),
            _ => None,
        }
    }

    /// Arrival times in stop order; empty for a failed result
    pub fn arrivals(&self) -> Vec<(StopId, DateTime<Utc>)> {
        self.stops
            .iter()
            .filter_map(|s| match s.prediction {
                StopPrediction::Arrival(time) => Some((s.stop_id, time)),
                StopPrediction::Unavailable(_) => None,
            })
            .collect()
    }
}
