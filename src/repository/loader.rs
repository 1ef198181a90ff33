//! Dataset files on disk
//!
//! A data directory holds `routes`, `trips`, `tripstops` and `pings`, each
//! a JSON array in `<name>.json` or gzip-compressed `<name>.json.gz`.

use flate2::read::GzDecoder;
use log::info;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::memory::{PingData, ReferenceData};
use crate::error::{EngineError, Result};
use crate::types::{Ping, Route, Trip, TripStop};

/// Where refreshed datasets come from
pub trait DataSource: Send + Sync {
    fn load_reference(&self) -> Result<ReferenceData>;
    fn load_pings(&self) -> Result<PingData>;
}

/// A data directory re-read on every refresh
#[derive(Clone, Debug)]
pub struct DatasetDir {
    dir: PathBuf,
}

impl DatasetDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DatasetDir { dir: dir.into() }
    }
}

impl DataSource for DatasetDir {
    fn load_reference(&self) -> Result<ReferenceData> {
        load_reference(&self.dir)
    }

    fn load_pings(&self) -> Result<PingData> {
        load_pings(&self.dir)
    }
}

pub fn load_reference(data_dir: &Path) -> Result<ReferenceData> {
    let routes: Vec<Route> = load_table(data_dir, "routes")?;
    let trips: Vec<Trip> = load_table(data_dir, "trips")?;
    let tripstops: Vec<TripStop> = load_table(data_dir, "tripstops")?;
    info!(
        "loaded {} routes, {} trips, {} tripstops from {}",
        routes.len(),
        trips.len(),
        tripstops.len(),
        data_dir.display()
    );
    Ok(ReferenceData::new(routes, trips, tripstops))
}

pub fn load_pings(data_dir: &Path) -> Result<PingData> {
    let pings: Vec<Ping> = load_table(data_dir, "pings")?;
    Ok(PingData::new(pings))
}

fn table_path(data_dir: &Path, name: &str) -> Result<PathBuf> {
    let gz = data_dir.join(format!("{}.json.gz", name));
    if gz.exists() {
        return Ok(gz);
    }
    let plain = data_dir.join(format!("{}.json", name));
    if plain.exists() {
        return Ok(plain);
    }
    Err(EngineError::Dataset(format!(
        "no {}.json or {}.json.gz in {}",
        name,
        name,
        data_dir.display()
    )))
}

fn load_table<T: DeserializeOwned>(data_dir: &Path, name: &str) -> Result<Vec<T>> {
    let path = table_path(data_dir, name)?;
    let file = File::open(&path)?;
    let rows = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))
    } else {
        serde_json::from_reader(BufReader::new(file))
    };
    rows.map_err(|e| EngineError::Dataset(format!("{}: {}", path.display(), e)))
}
