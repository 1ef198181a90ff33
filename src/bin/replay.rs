use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use log::{info, warn};
use serde_json::json;

use bus_eta::config::EngineConfig;
use bus_eta::orchestrator::{Orchestrator, TaskOutcome};
use bus_eta::repository::{load_pings, load_reference, InMemoryRepository, Repository};
use bus_eta::snapshot::SnapshotStore;
use bus_eta::spatial::{ArtifactCache, NearestPingMap, SpatialMatcher};
use bus_eta::types::{stop_sequence, StopId, TripId, TripShape};
use bus_eta::Predictor;

/// Replay stored pings through full prediction cycles and score the
/// arrivals against what the buses actually did
#[derive(Parser, Debug)]
#[command(name = "replay")]
struct Args {
    /// Directory holding routes/trips/tripstops/pings (.json or .json.gz)
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Snapshots written during replay
    #[arg(long, default_value = "replay_results")]
    results_dir: PathBuf,

    /// Derived index cache (shared with the live predictor is fine)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Engine tunables (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// First reference time (RFC 3339)
    #[arg(long)]
    start: DateTime<Utc>,

    /// Last reference time (RFC 3339)
    #[arg(long)]
    end: DateTime<Utc>,

    /// Seconds between replayed cycles
    #[arg(long, default_value = "60")]
    step_secs: i64,

    /// Worker threads per cycle (overrides the config file)
    #[arg(long)]
    workers: Option<usize>,
}

/// Observed stop passes of one trip, from its whole trajectory
type Actuals = HashMap<StopId, Vec<DateTime<Utc>>>;

fn actual_arrivals(orchestrator: &Orchestrator, matcher: &SpatialMatcher, trip_id: TripId) -> anyhow::Result<Actuals> {
    let repo = orchestrator.repository().handle();
    let tripstops = repo.tripstops(trip_id)?;
    let shape = TripShape::resolve(&stop_sequence(&tripstops));
    // A day past the newest ping sees every ping of the trip
    let horizon = repo.latest_ping_time().unwrap_or_else(Utc::now) + Duration::days(1);

    let mut actuals = Actuals::new();
    match matcher.nearest_pings(&repo, trip_id, &shape, horizon)? {
        NearestPingMap::Linear(nearest) => {
            for n in nearest {
                actuals.entry(n.stop_id).or_default().push(n.time);
            }
        }
        NearestPingMap::Circular(passes) => {
            for stop in passes {
                actuals
                    .entry(stop.stop_id)
                    .or_default()
                    .extend(stop.pings.iter().map(|p| p.time));
            }
        }
    }
    Ok(actuals)
}

fn rmse_pairs(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::INFINITY;
    }
    let sum_sq: f64 = pairs.iter().map(|(a, b)| (a - b).powi(2)).sum();
    (sum_sq / pairs.len() as f64).sqrt()
}

fn mae_pairs(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::INFINITY;
    }
    pairs.iter().map(|(a, b)| (a - b).abs()).sum::<f64>() / pairs.len() as f64
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    anyhow::ensure!(args.start <= args.end, "--start must not be after --end");
    anyhow::ensure!(args.step_secs > 0, "--step-secs must be positive");

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.orchestrator.workers = workers;
    }

    let repository = Arc::new(InMemoryRepository::new(
        load_reference(&args.data_dir)?,
        load_pings(&args.data_dir)?,
    ));
    let cache = args.cache_dir.as_ref().map(ArtifactCache::new).transpose()?;
    let orchestrator = Orchestrator::new(
        Predictor::from_config(&config, cache.clone()),
        repository,
        SnapshotStore::new(&args.results_dir)?,
        config.orchestrator.clone(),
    );
    let truth = SpatialMatcher::new(config.cleaning.clone(), config.matcher.clone(), cache);

    let mut actuals: HashMap<TripId, Actuals> = HashMap::new();
    let mut pairs: Vec<(f64, f64)> = Vec::new();
    let (mut cycles, mut unavailable, mut failed) = (0usize, 0usize, 0usize);

    let mut reference_time = args.start;
    while reference_time <= args.end {
        let report = orchestrator.run_cycle(reference_time)?;
        cycles += 1;
        unavailable += report.unavailable();
        failed += report.failed();

        for trip in report.trips.iter().filter(|t| t.outcome == TaskOutcome::Predicted) {
            let Some(result) = orchestrator.snapshots().read(trip.trip_id)? else {
                continue;
            };
            if !actuals.contains_key(&trip.trip_id) {
                match actual_arrivals(&orchestrator, &truth, trip.trip_id) {
                    Ok(a) => {
                        actuals.insert(trip.trip_id, a);
                    }
                    Err(e) => {
                        warn!("trip {}: no ground truth: {}", trip.trip_id, e);
                        continue;
                    }
                }
            }
            let Some(observed) = actuals.get(&trip.trip_id) else {
                continue;
            };

            for (stop_id, predicted) in result.arrivals() {
                // Score only stops the bus had yet to reach
                let actual = observed
                    .get(&stop_id)
                    .and_then(|times| times.iter().filter(|t| **t >= reference_time).min());
                if let Some(actual) = actual {
                    let predicted_secs = (predicted - reference_time).num_milliseconds() as f64 / 1000.0;
                    let actual_secs = (*actual - reference_time).num_milliseconds() as f64 / 1000.0;
                    pairs.push((predicted_secs, actual_secs));
                }
            }
        }

        reference_time += Duration::seconds(args.step_secs);
    }

    info!("replayed {} cycles, {} scored arrivals", cycles, pairs.len());
    let summary = json!({
        "data_dir": args.data_dir.display().to_string(),
        "start": args.start.to_rfc3339(),
        "end": args.end.to_rfc3339(),
        "step_secs": args.step_secs,
        "cycles": cycles,
        "scored_arrivals": pairs.len(),
        "unavailable": unavailable,
        "failed": failed,
        "mae_secs": mae_pairs(&pairs),
        "rmse_secs": rmse_pairs(&pairs),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
