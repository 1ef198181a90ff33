//! Per-cycle fan-out of predictions over operating trips
//!
//! # Architecture
//! - Jobs (one trip id each) go onto a bounded crossbeam channel
//! - A fixed pool of scoped worker threads drains it, each holding its
//!   own [`Dataset`] handle taken at the start of the cycle
//! - Results come back on a second channel; a failing or panicking task
//!   is reported and never takes its siblings down
//!
//! The periodic driver lives in the binary; this module supplies the
//! cadence arithmetic and replay offsets it uses.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use crossbeam::channel;
use log::{debug, error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::OrchestratorConfig;
use crate::error::{EngineError, Result};
use crate::predictor::{PredictionFailure, Predictor};
use crate::repository::{DataSource, Dataset, InMemoryRepository, Repository};
use crate::snapshot::SnapshotStore;
use crate::types::{service_date, TripId};

#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    Predicted,
    Unavailable(PredictionFailure),
    /// Infrastructure failure; no snapshot was written
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TripReport {
    pub trip_id: TripId,
    pub outcome: TaskOutcome,
}

#[derive(Clone, Debug)]
pub struct CycleReport {
    pub reference_time: DateTime<Utc>,
    /// Ascending trip id
    pub trips: Vec<TripReport>,
    pub elapsed: std::time::Duration,
}

impl CycleReport {
    pub fn predicted(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Predicted))
    }

    pub fn unavailable(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Unavailable(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Failed(_)))
    }

    pub fn outcome(&self, trip_id: TripId) -> Option<&TaskOutcome> {
        self.trips
            .iter()
            .find(|t| t.trip_id == trip_id)
            .map(|t| &t.outcome)
    }

    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.trips.iter().filter(|t| pred(&t.outcome)).count()
    }
}

pub struct Orchestrator {
    predictor: Predictor,
    repository: Arc<InMemoryRepository>,
    snapshots: SnapshotStore,
    config: OrchestratorConfig,
    source: Option<Box<dyn DataSource>>,
    reference_loaded_on: Mutex<Option<NaiveDate>>,
}

impl Orchestrator {
    pub fn new(
        predictor: Predictor,
        repository: Arc<InMemoryRepository>,
        snapshots: SnapshotStore,
        config: OrchestratorConfig,
    ) -> Self {
        Orchestrator {
            predictor,
            repository,
            snapshots,
            config,
            source: None,
            reference_loaded_on: Mutex::new(None),
        }
    }

    /// Reload from `source`: pings every cycle, reference data once per
    /// service day
    pub fn with_source(mut self, source: Box<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn repository(&self) -> &Arc<InMemoryRepository> {
        &self.repository
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn refresh(&self, reference_time: DateTime<Utc>) -> Result<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };

        let today = service_date(reference_time);
        let mut loaded_on = match self.reference_loaded_on.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *loaded_on != Some(today) {
            self.repository.refresh_reference(source.load_reference()?);
            *loaded_on = Some(today);
        }
        drop(loaded_on);

        let pings = source.load_pings()?;
        debug!("pings refreshed: {}", pings.len());
        self.repository.refresh_pings(pings);
        Ok(())
    }

    /// Predict every operating trip at `reference_time` and publish the
    /// snapshots
    pub fn run_cycle(&self, reference_time: DateTime<Utc>) -> Result<CycleReport> {
        let started = Instant::now();
        let margin = Duration::minutes(self.config.operating_margin_mins);
        let trip_ids = self.repository.handle().operating_trip_ids(reference_time, margin)?;
        info!("cycle at {}: {} operating trips", reference_time, trip_ids.len());

        let workers = self.config.workers.max(1).min(trip_ids.len().max(1));
        let (job_tx, job_rx) = channel::bounded::<TripId>(workers);
        let (result_tx, result_rx) = channel::unbounded::<TripReport>();

        let mut trips = crossbeam::thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let dataset = self.repository.handle();
                s.spawn(move |_| {
                    for trip_id in job_rx.iter() {
                        let outcome = self.run_task(&dataset, trip_id, reference_time);
                        debug!("trip {}: {:?}", trip_id, outcome);
                        if result_tx.send(TripReport { trip_id, outcome }).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for trip_id in trip_ids {
                if job_tx.send(trip_id).is_err() {
                    break;
                }
            }
            drop(job_tx);

            result_rx.iter().collect::<Vec<_>>()
        })
        .map_err(|_| EngineError::Worker("worker thread panicked outside a task".into()))?;

        trips.sort_by_key(|t| t.trip_id);
        let report = CycleReport {
            reference_time,
            trips,
            elapsed: started.elapsed(),
        };
        info!(
            "cycle at {} done in {:.2?}: {} predicted, {} unavailable, {} failed",
            reference_time,
            report.elapsed,
            report.predicted(),
            report.unavailable(),
            report.failed()
        );
        Ok(report)
    }

    fn run_task(&self, dataset: &Dataset, trip_id: TripId, reference_time: DateTime<Utc>) -> TaskOutcome {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            self.predictor.predict(dataset, trip_id, reference_time)
        }));

        let prediction = match attempt {
            Ok(Ok(prediction)) => prediction,
            Ok(Err(e)) => {
                error!("trip {}: prediction failed: {}", trip_id, e);
                return TaskOutcome::Failed(e.to_string());
            }
            Err(_) => {
                error!("trip {}: prediction panicked", trip_id);
                return TaskOutcome::Failed("prediction panicked".into());
            }
        };

        if let Err(e) = self.snapshots.write(&prediction) {
            error!("trip {}: snapshot write failed: {}", trip_id, e);
            return TaskOutcome::Failed(e.to_string());
        }

        match prediction.failure() {
            Some(failure) => TaskOutcome::Unavailable(failure),
            None => TaskOutcome::Predicted,
        }
    }
}

/// Time until the next multiple of `cadence` since the epoch
pub fn next_boundary_delay(now: DateTime<Utc>, cadence: std::time::Duration) -> std::time::Duration {
    let cadence_ms = cadence.as_millis().max(1) as i64;
    let into_cycle = now.timestamp_millis().rem_euclid(cadence_ms);
    std::time::Duration::from_millis((cadence_ms - into_cycle) as u64)
}

/// How far behind the wall clock replayed reference times run
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReplayOffset {
    Live,
    Fixed(Duration),
    /// Track the newest stored ping, trailing it by `lag`
    BehindLatestPing { lag: Duration },
}

impl ReplayOffset {
    /// Offset to subtract from now; None when replay has no pings to track
    pub fn resolve(&self, now: DateTime<Utc>, latest_ping_time: Option<DateTime<Utc>>) -> Option<Duration> {
        match self {
            ReplayOffset::Live => Some(Duration::zero()),
            ReplayOffset::Fixed(offset) => Some(*offset),
            ReplayOffset::BehindLatestPing { lag } => latest_ping_time.map(|latest| now - latest + *lag),
        }
    }
}
