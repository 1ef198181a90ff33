//! Arrival prediction from historical analog trips
//!
//! # Pipeline
//! 1. Quality gate on the live trip's cleaned pings
//! 2. Candidate analogs: same route, recent past days, matching stop shape
//! 3. Per analog: match the live position, read off per-stop durations
//! 4. Aggregate durations per stop, add to the live ping time
//!
//! Data problems and missing history are returned as [`PredictionFailure`]
//! inside the result; only collaborator failures surface as errors.

pub mod aggregate;
pub mod analogs;
pub mod result;

pub use aggregate::Aggregation;
pub use analogs::LivePosition;
pub use result::{PredictionFailure, PredictionResult, StopEstimate, StopPrediction};

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::config::{EngineConfig, PredictorConfig};
use crate::error::{EngineError, Result};
use crate::repository::Repository;
use crate::spatial::{ArtifactCache, NearestPingMap, SpatialMatcher};
use crate::types::{is_circular, service_date, stop_sequence, StopId, Trip, TripId, TripShape, TripStop};

pub struct Predictor {
    config: PredictorConfig,
    matcher: SpatialMatcher,
}

impl Predictor {
    pub fn new(config: PredictorConfig, matcher: SpatialMatcher) -> Self {
        Predictor { config, matcher }
    }

    pub fn from_config(config: &EngineConfig, cache: Option<ArtifactCache>) -> Self {
        Predictor::new(
            config.predictor.clone(),
            SpatialMatcher::new(config.cleaning.clone(), config.matcher.clone(), cache),
        )
    }

    pub fn matcher(&self) -> &SpatialMatcher {
        &self.matcher
    }

    pub fn predict(
        &self,
        repo: &dyn Repository,
        trip_id: TripId,
        reference_time: DateTime<Utc>,
    ) -> Result<PredictionResult> {
        let trip = repo.trip(trip_id)?.ok_or(EngineError::UnknownTrip(trip_id))?;
        let tripstops = repo.tripstops(trip_id)?;
        let shape = self.resolve_shape(repo, &trip, &tripstops)?;
        let stop_ids = shape.stops().to_vec();

        let cleaner = self.matcher.cleaner();
        let raw = repo.pings(trip_id, reference_time)?;
        let segments = cleaner.clean(&raw);
        let quality = cleaner.quality_of(&segments, &raw, reference_time);
        if let Some(failure) = PredictionFailure::from_quality(quality) {
            debug!("trip {}: {:?}", trip_id, quality);
            return Ok(PredictionResult::failed(trip_id, reference_time, &stop_ids, failure));
        }

        let live = match (segments.last(), tripstops.first()) {
            (Some(segment), Some(origin)) => {
                LivePosition::from_segment(segment.pings(), origin.scheduled_time)
            }
            _ => None,
        };
        let Some(live) = live else {
            return Ok(PredictionResult::failed(
                trip_id,
                reference_time,
                &stop_ids,
                PredictionFailure::InsufficientHistory,
            ));
        };

        let rows = self.analog_durations(repo, &trip, &shape, &live, reference_time)?;
        if rows.is_empty() {
            debug!("trip {}: no usable analogs", trip_id);
            return Ok(PredictionResult::failed(
                trip_id,
                reference_time,
                &stop_ids,
                PredictionFailure::InsufficientHistory,
            ));
        }

        let aggregation = match shape {
            TripShape::Linear { .. } => Aggregation::TrimmedMean {
                min_samples: self.config.trim_min_samples,
            },
            TripShape::Circular { .. } => Aggregation::Median,
        };
        let durations = aggregate::aggregate(&rows, aggregation);

        let mut arrivals: Vec<_> = stop_ids
            .iter()
            .zip(&durations)
            .map(|(stop_id, secs)| {
                let offset = Duration::milliseconds((secs * 1000.0).round() as i64);
                (*stop_id, live.ping.time + offset)
            })
            .collect();

        if let Some(scheduled) = first_scheduled(&tripstops, &shape) {
            hold_until_departure(&mut arrivals, live.ping.time, scheduled);
        }

        Ok(PredictionResult::predicted(trip_id, reference_time, arrivals))
    }

    /// Circularity comes from the route's stop path when the route lists
    /// one, otherwise from the trip's own tripstops
    fn resolve_shape(&self, repo: &dyn Repository, trip: &Trip, tripstops: &[TripStop]) -> Result<TripShape> {
        let sequence = stop_sequence(tripstops);
        let circular = match repo.route(trip.route_id)? {
            Some(route) if !route.stop_ids.is_empty() => is_circular(&route.stop_ids),
            _ => is_circular(&sequence),
        };
        Ok(TripShape::with_kind(&sequence, circular))
    }

    /// Duration vectors of usable analogs, most recent first
    fn analog_durations(
        &self,
        repo: &dyn Repository,
        trip: &Trip,
        shape: &TripShape,
        live: &LivePosition,
        reference_time: DateTime<Utc>,
    ) -> Result<Vec<Vec<f64>>> {
        let reference_date = service_date(reference_time);
        let from = reference_date - Duration::days(self.config.lookback_days);
        let cap = match shape {
            TripShape::Linear { .. } => self.config.linear_analogs,
            TripShape::Circular { .. } => self.config.circular_analogs,
        };

        let candidates = repo
            .trips_for_route(trip.route_id, from, reference_date)?
            .into_iter()
            .filter(|t| !(self.config.exclude_self && t.id == trip.id))
            .take(self.config.candidate_pool);

        let mut rows = Vec::new();
        for analog in candidates {
            if rows.len() >= cap {
                break;
            }
            match self.analog_row(repo, analog.id, shape, live, reference_time)? {
                Some(row) => rows.push(row),
                None => debug!("trip {}: analog {} skipped", trip.id, analog.id),
            }
        }
        Ok(rows)
    }

    fn analog_row(
        &self,
        repo: &dyn Repository,
        analog_id: TripId,
        shape: &TripShape,
        live: &LivePosition,
        reference_time: DateTime<Utc>,
    ) -> Result<Option<Vec<f64>>> {
        let tripstops = repo.tripstops(analog_id)?;
        if !shape.accepts(&stop_sequence(&tripstops)) {
            return Ok(None);
        }
        let Some(origin) = tripstops.first().map(|ts| ts.scheduled_time) else {
            return Ok(None);
        };

        let index = self.matcher.ping_index(repo, analog_id, reference_time)?;
        let Some(matched) = analogs::match_position(
            &index,
            origin,
            live,
            self.config.position_radius_m,
            shape.is_circular(),
        ) else {
            return Ok(None);
        };

        let row = match self
            .matcher
            .nearest_pings_from(repo, analog_id, shape, &index, reference_time)?
        {
            NearestPingMap::Linear(nearest) => analogs::linear_durations(&nearest, &tripstops, matched),
            NearestPingMap::Circular(passes) => Some(analogs::circular_durations(&passes, shape.stops(), matched)),
        };
        Ok(row)
    }
}

/// Floor the first stop at its scheduled time while the bus has yet to
/// reach it; stops predicted after it move by the same delay
fn hold_until_departure(
    arrivals: &mut [(StopId, DateTime<Utc>)],
    live_time: DateTime<Utc>,
    scheduled: DateTime<Utc>,
) {
    let Some(&(_, first)) = arrivals.first() else {
        return;
    };
    if first < live_time || first >= scheduled {
        return;
    }
    let delay = scheduled - first;
    for arrival in arrivals.iter_mut() {
        if arrival.1 >= first {
            arrival.1 += delay;
        }
    }
}

/// Scheduled time of the first stop a prediction is produced for
fn first_scheduled(tripstops: &[TripStop], shape: &TripShape) -> Option<DateTime<Utc>> {
    let first_stop = shape.stops().first()?;
    tripstops
        .iter()
        .find(|ts| ts.stop_id == *first_stop)
        .map(|ts| ts.scheduled_time)
}
