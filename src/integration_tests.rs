//! End-to-end prediction scenarios over synthetic data

use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{EngineConfig, OrchestratorConfig};
use crate::error::Result;
use crate::orchestrator::{Orchestrator, TaskOutcome};
use crate::predictor::{PredictionFailure, PredictionResult, Predictor};
use crate::repository::{DataSource, PingData, ReferenceData};
use crate::snapshot::SnapshotStore;
use crate::spatial::ArtifactCache;
use crate::test_support::{corridor_stops, day, local_time, scratch_dir, Fixture, CORRIDOR_LNG, STEP_DEG};
use crate::types::StopId;

const LNG: f64 = CORRIDOR_LNG;

fn departure(d: u32) -> DateTime<Utc> {
    local_time(day(d), 8, 0, 0)
}

fn predictor() -> Predictor {
    Predictor::from_config(&EngineConfig::default(), None)
}

/// Three full runs of route 1 on the previous days at slightly different
/// speeds, plus a short working that stops early
fn corridor_history(f: &mut Fixture) {
    let stops = corridor_stops(4);
    for (trip_id, d, step) in [(11, 9, 0.0001), (12, 8, 0.00009), (13, 7, 0.00011)] {
        f.trip(trip_id, 1, day(d), departure(d), &stops, 2);
        f.drive(trip_id, departure(d), &[(1.2995, LNG), (1.3065, LNG)], step);
    }
    f.trip(14, 1, day(6), departure(6), &stops[..3], 2);
    f.drive(14, departure(6), &[(1.2995, LNG), (1.3045, LNG)], STEP_DEG);
}

/// Live run of route 1 today, currently between the first two stops.
/// Returns the time of its latest ping.
fn live_corridor_trip(f: &mut Fixture, trip_id: i64) -> DateTime<Utc> {
    f.trip(trip_id, 1, day(10), departure(10), &corridor_stops(4), 2);
    f.drive(trip_id, departure(10), &[(1.2995, LNG), (1.3010, LNG)], STEP_DEG)
}

/// Live run whose newest two pings come after a 31s gap
fn live_trip_with_fragment(f: &mut Fixture, trip_id: i64) -> DateTime<Utc> {
    f.trip(trip_id, 1, day(10), departure(10), &corridor_stops(4), 2);
    let last = f.drive(trip_id, departure(10), &[(1.2995, LNG), (1.3005, LNG)], STEP_DEG);
    f.ping_at(trip_id, last + Duration::seconds(31), (1.3006, LNG));
    f.ping_at(trip_id, last + Duration::seconds(34), (1.3007, LNG));
    last + Duration::seconds(34)
}

fn assert_all_failed(result: &PredictionResult, stops: &[StopId], failure: PredictionFailure) {
    let ids: Vec<StopId> = result.stops().iter().map(|s| s.stop_id).collect();
    assert_eq!(ids, stops);
    assert_eq!(result.failure(), Some(failure));
    assert!(result.arrivals().is_empty());
}

#[test]
fn test_scenario_a_linear_trip_with_history() {
    let mut f = Fixture::new();
    corridor_history(&mut f);
    let last = live_corridor_trip(&mut f, 20);
    let reference_time = last + Duration::seconds(10);

    let result = predictor().predict(&f.dataset(), 20, reference_time).unwrap();
    let arrivals = result.arrivals();

    let stop_ids: Vec<StopId> = arrivals.iter().map(|(id, _)| *id).collect();
    assert_eq!(stop_ids, vec![1000, 1001, 1002, 1003]);
    assert!(arrivals.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(arrivals[0].1 >= departure(10));

    // Analogs take 40s, 50s and 65s to the next stop; the trimmed mean
    // keeps the middle one
    assert_eq!(arrivals[1].1, last + Duration::seconds(50));
}

#[test]
fn test_scenario_b_trailing_two_ping_segment() {
    let mut f = Fixture::new();
    corridor_history(&mut f);
    let last = live_trip_with_fragment(&mut f, 30);

    let result = predictor()
        .predict(&f.dataset(), 30, last + Duration::seconds(1))
        .unwrap();
    assert_all_failed(&result, &[1000, 1001, 1002, 1003], PredictionFailure::InsufficientRecentPings);
}

#[test]
fn test_scenario_c_stale_data() {
    let mut f = Fixture::new();
    corridor_history(&mut f);
    let last = live_corridor_trip(&mut f, 20);

    let result = predictor()
        .predict(&f.dataset(), 20, last + Duration::seconds(90))
        .unwrap();
    assert_all_failed(&result, &[1000, 1001, 1002, 1003], PredictionFailure::StaleData);
}

#[test]
fn test_no_pings_yet() {
    let mut f = Fixture::new();
    corridor_history(&mut f);
    f.trip(20, 1, day(10), departure(10), &corridor_stops(4), 2);

    let result = predictor().predict(&f.dataset(), 20, departure(10)).unwrap();
    assert_all_failed(&result, &[1000, 1001, 1002, 1003], PredictionFailure::NoPings);
}

#[test]
fn test_scenario_d_no_matching_history() {
    let mut f = Fixture::new();
    // Route 2 history only ever ran three of the four stops
    let stops = corridor_stops(4);
    for (trip_id, d) in [(41, 9), (42, 8)] {
        f.trip(trip_id, 2, day(d), departure(d), &stops[..3], 2);
        f.drive(trip_id, departure(d), &[(1.2995, LNG), (1.3045, LNG)], STEP_DEG);
    }
    f.trip(40, 2, day(10), departure(10), &stops, 2);
    let last = f.drive(40, departure(10), &[(1.2995, LNG), (1.3010, LNG)], STEP_DEG);

    let result = predictor()
        .predict(&f.dataset(), 40, last + Duration::seconds(10))
        .unwrap();
    assert_all_failed(&result, &[1000, 1001, 1002, 1003], PredictionFailure::InsufficientHistory);
}

#[test]
fn test_history_outside_lookback_is_ignored() {
    let mut f = Fixture::new();
    let stops = corridor_stops(4);
    // 40 days before the live trip
    let old = local_time(day(1), 8, 0, 0) - Duration::days(31);
    f.trip(11, 1, crate::types::service_date(old), old, &stops, 2);
    f.drive(11, old, &[(1.2995, LNG), (1.3065, LNG)], STEP_DEG);
    let last = live_corridor_trip(&mut f, 20);

    let result = predictor()
        .predict(&f.dataset(), 20, last + Duration::seconds(10))
        .unwrap();
    assert_eq!(result.failure(), Some(PredictionFailure::InsufficientHistory));
}

#[test]
fn test_scenario_e_circular_trip_single_analog() {
    let a = (1.3000, 103.8000);
    let b = (1.3020, 103.8000);
    let c = (1.3020, 103.8020);
    let d = (1.3000, 103.8020);
    let loop_stops = [(3000, a), (3001, b), (3002, c), (3003, d), (3000, a)];

    let mut f = Fixture::new();
    f.trip(50, 3, day(9), departure(9), &loop_stops, 2);
    f.drive(50, departure(9), &[a, b, c, d, a], STEP_DEG);
    f.trip(51, 3, day(10), departure(10), &loop_stops, 2);
    let last = f.drive(51, departure(10), &[a, (1.3008, 103.8000)], STEP_DEG);

    let result = predictor()
        .predict(&f.dataset(), 51, last + Duration::seconds(10))
        .unwrap();
    let arrivals = result.arrivals();

    // One lap of the cycle; each stop at the analog's first later ping
    // inside the stop radius
    assert_eq!(
        arrivals,
        vec![
            (3000, last + Duration::seconds(340)),
            (3001, last + Duration::seconds(40)),
            (3002, last + Duration::seconds(140)),
            (3003, last + Duration::seconds(240)),
        ]
    );
    assert!(arrivals.iter().all(|(_, t)| *t >= last));
}

#[test]
fn test_scenario_f_waiting_at_origin_before_departure() {
    let stops = corridor_stops(4);
    let mut f = Fixture::new();
    f.trip(60, 4, day(9), departure(9), &stops, 2);
    f.drive(60, departure(9), &[(1.2990, LNG), (1.3065, LNG)], STEP_DEG);

    // Arrives at the first stop four minutes early
    f.trip(61, 4, day(10), departure(10), &stops, 2);
    let start = departure(10) - Duration::seconds(290);
    let last = f.drive(61, start, &[(1.2990, LNG), stops[0].1], STEP_DEG);
    assert!(last < departure(10));

    let result = predictor()
        .predict(&f.dataset(), 61, last + Duration::seconds(10))
        .unwrap();
    let arrivals = result.arrivals();

    assert_eq!(arrivals.len(), 4);
    assert_eq!(arrivals[0], (1000, departure(10)));
    // The 235s hold at the origin carries down the line
    assert_eq!(arrivals[1], (1001, departure(10) + Duration::seconds(100)));
    assert!(arrivals.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[test]
fn test_unknown_trip_is_an_error() {
    let f = Fixture::new();
    assert!(predictor().predict(&f.dataset(), 404, departure(10)).is_err());
}

#[test]
fn test_closed_analogs_are_cached() {
    let dir = scratch_dir("integration_cache");
    let mut f = Fixture::new();
    corridor_history(&mut f);
    let last = live_corridor_trip(&mut f, 20);
    let reference_time = last + Duration::seconds(10);

    let cached = Predictor::from_config(&EngineConfig::default(), Some(ArtifactCache::new(&dir).unwrap()));
    let first = cached.predict(&f.dataset(), 20, reference_time).unwrap();

    assert!(dir.join("ping-index-11.json.gz").exists());
    assert!(dir.join("nearest-pings-11.json.gz").exists());
    // The live trip is still running
    assert!(!dir.join("ping-index-20.json.gz").exists());

    let second = cached.predict(&f.dataset(), 20, reference_time).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, predictor().predict(&f.dataset(), 20, reference_time).unwrap());

    fs::remove_dir_all(&dir).unwrap();
}

fn cycle_fixture() -> (Fixture, DateTime<Utc>) {
    let mut f = Fixture::new();
    corridor_history(&mut f);
    let last = live_corridor_trip(&mut f, 20);
    live_trip_with_fragment(&mut f, 30);

    // Scheduled but missing from the trips table
    f.trip(99, 1, day(10), departure(10), &corridor_stops(4), 2);
    f.trips.retain(|t| t.id != 99);

    (f, last + Duration::seconds(10))
}

fn orchestrator(f: &Fixture, dir: &std::path::Path) -> Orchestrator {
    Orchestrator::new(
        predictor(),
        Arc::new(f.repository()),
        SnapshotStore::new(dir).unwrap(),
        OrchestratorConfig::default(),
    )
}

#[test]
fn test_cycle_isolates_failed_tasks() {
    let dir = scratch_dir("integration_cycle");
    let (f, reference_time) = cycle_fixture();
    let orchestrator = orchestrator(&f, &dir);

    // Left over from an earlier cycle
    let earlier = PredictionResult::failed(99, departure(10), &[1000], PredictionFailure::StaleData);
    orchestrator.snapshots().write(&earlier).unwrap();

    let report = orchestrator.run_cycle(reference_time).unwrap();

    let ids: Vec<i64> = report.trips.iter().map(|t| t.trip_id).collect();
    assert_eq!(ids, vec![20, 30, 99]);
    assert_eq!(report.outcome(20), Some(&TaskOutcome::Predicted));
    assert_eq!(
        report.outcome(30),
        Some(&TaskOutcome::Unavailable(PredictionFailure::InsufficientRecentPings))
    );
    assert!(matches!(report.outcome(99), Some(TaskOutcome::Failed(_))));

    let snapshots = orchestrator.snapshots();
    assert_eq!(snapshots.read(20).unwrap().unwrap().arrivals().len(), 4);
    assert_eq!(
        snapshots.read(30).unwrap().unwrap().failure(),
        Some(PredictionFailure::InsufficientRecentPings)
    );
    assert_eq!(snapshots.read(99).unwrap(), Some(earlier));

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_cycle_outside_service_hours_is_empty() {
    let dir = scratch_dir("integration_idle");
    let (f, _) = cycle_fixture();
    let orchestrator = orchestrator(&f, &dir);

    let report = orchestrator.run_cycle(local_time(day(10), 3, 0, 0)).unwrap();
    assert!(report.trips.is_empty());
    assert!(orchestrator.snapshots().list().unwrap().is_empty());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_cycle_with_single_worker_matches_pool() {
    let dir = scratch_dir("integration_single");
    let (f, reference_time) = cycle_fixture();
    let pooled = orchestrator(&f, &dir).run_cycle(reference_time).unwrap();

    let single = Orchestrator::new(
        predictor(),
        Arc::new(f.repository()),
        SnapshotStore::new(&dir).unwrap(),
        OrchestratorConfig {
            workers: 1,
            ..OrchestratorConfig::default()
        },
    )
    .run_cycle(reference_time)
    .unwrap();

    assert_eq!(pooled.trips, single.trips);

    fs::remove_dir_all(&dir).unwrap();
}

struct FixtureSource {
    reference: Fixture,
    reference_loads: Arc<AtomicUsize>,
}

impl DataSource for FixtureSource {
    fn load_reference(&self) -> Result<ReferenceData> {
        self.reference_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.reference.reference_data())
    }

    fn load_pings(&self) -> Result<PingData> {
        Ok(PingData::new(self.reference.pings.clone()))
    }
}

#[test]
fn test_refresh_reloads_reference_once_per_service_day() {
    let dir = scratch_dir("integration_refresh");
    let (f, reference_time) = cycle_fixture();
    let loads = Arc::new(AtomicUsize::new(0));

    let orchestrator = Orchestrator::new(
        predictor(),
        Arc::new(Fixture::new().repository()),
        SnapshotStore::new(&dir).unwrap(),
        OrchestratorConfig::default(),
    )
    .with_source(Box::new(FixtureSource {
        reference: f,
        reference_loads: loads.clone(),
    }));

    assert!(orchestrator.run_cycle(reference_time).unwrap().trips.is_empty());

    orchestrator.refresh(reference_time).unwrap();
    orchestrator.refresh(reference_time + Duration::minutes(1)).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    let report = orchestrator.run_cycle(reference_time).unwrap();
    assert_eq!(report.outcome(20), Some(&TaskOutcome::Predicted));

    orchestrator.refresh(reference_time + Duration::days(1)).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);

    fs::remove_dir_all(&dir).unwrap();
}
