use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::sleep;

use bus_eta::config::EngineConfig;
use bus_eta::orchestrator::{next_boundary_delay, CycleReport, Orchestrator, ReplayOffset};
use bus_eta::repository::{DatasetDir, InMemoryRepository};
use bus_eta::snapshot::{DirectoryMirror, SnapshotStore};
use bus_eta::spatial::ArtifactCache;
use bus_eta::Predictor;

#[derive(Parser, Debug)]
#[command(name = "bus_eta")]
#[command(about = "Periodic bus arrival prediction for operating trips", long_about = None)]
struct Args {
    /// Directory holding routes/trips/tripstops/pings (.json or .json.gz)
    #[arg(long, env = "BUS_ETA_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Derived per-trip index cache
    #[arg(long, env = "BUS_ETA_CACHE_DIR", default_value = "preprocessed")]
    cache_dir: PathBuf,

    /// Disable the derived index cache
    #[arg(long)]
    no_cache: bool,

    /// Where prediction snapshots are published
    #[arg(long, env = "BUS_ETA_RESULTS_DIR", default_value = "results")]
    results_dir: PathBuf,

    /// Optional second copy of every snapshot
    #[arg(long, env = "BUS_ETA_MIRROR_DIR")]
    mirror_dir: Option<PathBuf>,

    /// Engine tunables (JSON)
    #[arg(long, env = "BUS_ETA_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between cycles
    #[arg(long, env = "BUS_ETA_CADENCE_SECS", default_value = "60")]
    cadence_secs: u64,

    /// Worker threads per cycle (overrides the config file)
    #[arg(long, env = "BUS_ETA_WORKERS")]
    workers: Option<usize>,

    /// Replay: run this many seconds behind the wall clock
    #[arg(long, env = "BUS_ETA_OFFSET_SECS", conflicts_with = "replay_lag_mins")]
    offset_secs: Option<i64>,

    /// Replay: trail the newest stored ping by this many minutes
    #[arg(long, env = "BUS_ETA_REPLAY_LAG_MINS")]
    replay_lag_mins: Option<i64>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Reference time for a single cycle (RFC 3339); implies --once
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

impl Args {
    fn replay_offset(&self) -> ReplayOffset {
        match (self.offset_secs, self.replay_lag_mins) {
            (Some(secs), _) => ReplayOffset::Fixed(Duration::seconds(secs)),
            (None, Some(mins)) => ReplayOffset::BehindLatestPing {
                lag: Duration::minutes(mins),
            },
            (None, None) => ReplayOffset::Live,
        }
    }
}

async fn run_cycle(orchestrator: Arc<Orchestrator>, reference_time: DateTime<Utc>) -> Result<CycleReport> {
    tokio::task::spawn_blocking(move || -> Result<CycleReport> {
        orchestrator
            .refresh(reference_time)
            .context("dataset refresh failed")?;
        Ok(orchestrator.run_cycle(reference_time)?)
    })
    .await?
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.orchestrator.workers = workers;
    }

    info!("bus_eta starting");
    info!("  data dir: {}", args.data_dir.display());
    info!("  results dir: {}", args.results_dir.display());
    info!("  cadence: {}s, workers: {}", args.cadence_secs, config.orchestrator.workers);

    let cache = if args.no_cache {
        None
    } else {
        Some(ArtifactCache::new(&args.cache_dir)?)
    };

    let mut snapshots = SnapshotStore::new(&args.results_dir)
        .with_context(|| format!("failed to open results dir {}", args.results_dir.display()))?;
    if let Some(dir) = &args.mirror_dir {
        snapshots = snapshots.with_mirror(Box::new(DirectoryMirror::new(dir)?));
    }

    let orchestrator = Arc::new(
        Orchestrator::new(
            Predictor::from_config(&config, cache),
            Arc::new(InMemoryRepository::default()),
            snapshots,
            config.orchestrator.clone(),
        )
        .with_source(Box::new(DatasetDir::new(&args.data_dir))),
    );

    if let Some(at) = args.at {
        run_cycle(orchestrator, at).await?;
        return Ok(());
    }

    // Initial load, so a replay offset can see the stored pings
    let now = Utc::now();
    let loader = Arc::clone(&orchestrator);
    tokio::task::spawn_blocking(move || loader.refresh(now))
        .await?
        .context("initial dataset load failed")?;

    let offset = args
        .replay_offset()
        .resolve(now, orchestrator.repository().latest_ping_time())
        .context("replay needs at least one stored ping")?;
    if offset != Duration::zero() {
        info!("  replaying {} behind wall clock", offset);
    }

    let cadence = std::time::Duration::from_secs(args.cadence_secs.max(1));
    loop {
        let reference_time = Utc::now() - offset;
        if let Err(e) = run_cycle(Arc::clone(&orchestrator), reference_time).await {
            if args.once {
                return Err(e);
            }
            error!("cycle at {} failed: {:#}", reference_time, e);
        }
        if args.once {
            return Ok(());
        }
        sleep(next_boundary_delay(Utc::now(), cadence)).await;
    }
}
