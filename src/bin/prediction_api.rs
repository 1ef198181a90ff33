use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;

use bus_eta::api;
use bus_eta::snapshot::SnapshotStore;

#[derive(Parser, Debug)]
#[command(name = "prediction_api")]
#[command(about = "Serve published arrival predictions", long_about = None)]
struct Args {
    /// Directory the predictor publishes snapshots into
    #[arg(long, env = "BUS_ETA_RESULTS_DIR", default_value = "results")]
    results_dir: PathBuf,

    /// Port to serve on
    #[arg(long, env = "BUS_ETA_API_PORT", default_value = "5000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let snapshots = SnapshotStore::new(&args.results_dir)
        .with_context(|| format!("failed to open results dir {}", args.results_dir.display()))?;
    let app = api::router(Arc::new(snapshots));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("prediction API listening on http://{}", addr);
    info!("serving snapshots from {}", args.results_dir.display());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}
