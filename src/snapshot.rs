//! Per-trip prediction snapshots on disk
//!
//! One `prediction-{trip_id}.json` per trip, overwritten wholesale each
//! cycle. Readers (the API) only ever see a complete file.

use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::predictor::PredictionResult;
use crate::types::TripId;

const PREFIX: &str = "prediction-";
const SUFFIX: &str = ".json";

/// Secondary copy of every published snapshot
pub trait SnapshotMirror: Send + Sync {
    fn mirror(&self, trip_id: TripId, json: &str) -> Result<()>;
}

/// Mirrors snapshots into another directory, e.g. a mounted bucket
pub struct DirectoryMirror {
    root: PathBuf,
}

impl DirectoryMirror {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DirectoryMirror { root })
    }
}

impl SnapshotMirror for DirectoryMirror {
    fn mirror(&self, trip_id: TripId, json: &str) -> Result<()> {
        write_atomic(&self.root.join(file_name(trip_id)), json)
    }
}

pub struct SnapshotStore {
    dir: PathBuf,
    mirror: Option<Box<dyn SnapshotMirror>>,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(SnapshotStore { dir, mirror: None })
    }

    pub fn with_mirror(mut self, mirror: Box<dyn SnapshotMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replace the trip's snapshot. A failed mirror is logged; the local
    /// snapshot is what the API serves.
    pub fn write(&self, result: &PredictionResult) -> Result<()> {
        let json = serde_json::to_string_pretty(result)?;
        write_atomic(&self.path(result.trip_id), &json)?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.mirror(result.trip_id, &json) {
                warn!("mirror of trip {} snapshot failed: {}", result.trip_id, e);
            }
        }
        Ok(())
    }

    /// None when there is no snapshot for the trip
    pub fn read(&self, trip_id: TripId) -> Result<Option<PredictionResult>> {
        let path = self.path(trip_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        let result = serde_json::from_str(&json)
            .map_err(|e| EngineError::Snapshot(format!("{}: {}", path.display(), e)))?;
        Ok(Some(result))
    }

    /// Trip ids with a snapshot, ascending
    pub fn list(&self) -> Result<Vec<TripId>> {
        let mut ids: Vec<TripId> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_file_name(&entry.file_name().to_string_lossy()))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Remove every snapshot
    pub fn clear(&self) -> Result<usize> {
        let ids = self.list()?;
        for trip_id in &ids {
            fs::remove_file(self.path(*trip_id))?;
        }
        Ok(ids.len())
    }

    fn path(&self, trip_id: TripId) -> PathBuf {
        self.dir.join(file_name(trip_id))
    }
}

fn file_name(trip_id: TripId) -> String {
    format!("{}{}{}", PREFIX, trip_id, SUFFIX)
}

fn parse_file_name(name: &str) -> Option<TripId> {
    name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?.parse().ok()
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
        .map_err(|e| EngineError::Snapshot(format!("failed to publish {}: {}", path.display(), e)))
}
