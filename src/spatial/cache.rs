use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EngineError, Result};
use crate::types::{service_date, TripId};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Derived per-trip artifacts that may be persisted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    PingIndex,
    NearestPings,
}

impl ArtifactKind {
    fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::PingIndex => "ping-index",
            ArtifactKind::NearestPings => "nearest-pings",
        }
    }
}

/// Outcome of a cache lookup, decided before any file is touched
#[derive(Debug, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    /// Trip is closed; compute and persist the result
    MissRecomputeAndCache,
    /// Trip is still open; compute and discard
    MissRecomputeNoCache,
}

/// A trip is closed once its latest ping falls on an earlier service day
/// than the reference time. Trips with no pings are never closed.
pub fn is_closed(last_ping_time: Option<DateTime<Utc>>, reference_time: DateTime<Utc>) -> bool {
    match last_ping_time {
        Some(last) => service_date(last) < service_date(reference_time),
        None => false,
    }
}

/// On-disk store of derived per-trip artifacts
///
/// # File Format
/// Cache files: `{cache_dir}/{kind}-{trip_id}.json.gz`
/// - gzip-compressed JSON of the artifact
/// - written to a temp file and renamed into place, so concurrent
///   workers recomputing the same trip never leave a torn file
///
/// Open trips are never read from or written to the cache.
#[derive(Clone, Debug)]
pub struct ArtifactCache {
    cache_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).map_err(|e| {
            EngineError::Cache(format!(
                "failed to create cache dir {}: {}",
                cache_dir.display(),
                e
            ))
        })?;
        Ok(ArtifactCache { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn lookup<T: DeserializeOwned>(
        &self,
        kind: ArtifactKind,
        trip_id: TripId,
        closed: bool,
    ) -> CacheLookup<T> {
        if !closed {
            return CacheLookup::MissRecomputeNoCache;
        }

        let path = self.artifact_path(kind, trip_id);
        if !path.exists() {
            return CacheLookup::MissRecomputeAndCache;
        }

        match load_gz_json(&path) {
            Ok(value) => {
                debug!("cache hit {}", path.display());
                CacheLookup::Hit(value)
            }
            Err(e) => {
                warn!("discarding unreadable cache file {}: {}", path.display(), e);
                CacheLookup::MissRecomputeAndCache
            }
        }
    }

    pub fn store<T: Serialize + ?Sized>(&self, kind: ArtifactKind, trip_id: TripId, value: &T) -> Result<()> {
        let path = self.artifact_path(kind, trip_id);
        let tmp = path.with_extension(format!(
            "gz.{}.{}.tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let json = serde_json::to_vec(value)?;
        let file = File::create(&tmp)
            .map_err(|e| EngineError::Cache(format!("failed to create {}: {}", tmp.display(), e)))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish().map(|_| ()))
            .map_err(|e| EngineError::Cache(format!("failed to compress {}: {}", tmp.display(), e)))?;

        fs::rename(&tmp, &path)
            .map_err(|e| EngineError::Cache(format!("failed to move {} into place: {}", path.display(), e)))?;
        Ok(())
    }

    /// Store, logging rather than propagating a failed write
    pub fn store_or_warn<T: Serialize + ?Sized>(&self, kind: ArtifactKind, trip_id: TripId, value: &T) {
        if let Err(e) = self.store(kind, trip_id, value) {
            warn!("cache write for trip {} failed: {}", trip_id, e);
        }
    }

    fn artifact_path(&self, kind: ArtifactKind, trip_id: TripId) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}.json.gz", kind.prefix(), trip_id))
    }
}

fn load_gz_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    Ok(serde_json::from_reader(decoder)?)
}
