use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cache::{is_closed, ArtifactCache, ArtifactKind, CacheLookup};
use super::ping_tree::{IndexedPing, PingTree};
use crate::cleaning::TrajectoryCleaner;
use crate::config::{CleaningConfig, MatcherConfig};
use crate::error::Result;
use crate::repository::Repository;
use crate::types::{PingId, StopId, TripId, TripShape, TripStop, TripStopId};

/// Nearest cleaned ping to one tripstop of a linear trip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearestPing {
    pub tripstop_id: TripStopId,
    pub stop_id: StopId,
    pub ping_id: PingId,
    pub time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PingRef {
    pub ping_id: PingId,
    pub time: DateTime<Utc>,
}

/// Every pass of a circular trip near one cycle stop
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopPasses {
    pub stop_id: StopId,
    /// Time order
    pub pings: Vec<PingRef>,
}

/// Where a trip's trajectory came close to each of its stops.
///
/// Linear trips record one nearest ping per tripstop (tripstops with no
/// ping in range are absent). Circular trips record every ping in range of
/// each cycle stop, since the bus passes each stop once per lap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NearestPingMap {
    Linear(Vec<NearestPing>),
    Circular(Vec<StopPasses>),
}

impl NearestPingMap {
    pub fn linear(&self) -> Option<&[NearestPing]> {
        match self {
            NearestPingMap::Linear(entries) => Some(entries),
            NearestPingMap::Circular(_) => None,
        }
    }

    pub fn circular(&self) -> Option<&[StopPasses]> {
        match self {
            NearestPingMap::Circular(entries) => Some(entries),
            NearestPingMap::Linear(_) => None,
        }
    }
}

/// Builds and queries per-trip spatial indexes over cleaned pings
///
/// # Architecture
/// - Pings come from the repository, bounded by the reference time
/// - Cleaning and projection happen once per trip per query
/// - Closed trips (see [`is_closed`]) are served from and written to the
///   artifact cache; open trips are always recomputed
///
/// # Usage
/// ```no_run
/// # fn demo(repo: &dyn bus_eta::repository::Repository) -> bus_eta::error::Result<()> {
/// use bus_eta::config::{CleaningConfig, MatcherConfig};
/// use bus_eta::spatial::SpatialMatcher;
/// use bus_eta::types::TripShape;
///
/// let matcher = SpatialMatcher::new(CleaningConfig::default(), MatcherConfig::default(), None);
/// let now = chrono::Utc::now();
/// let index = matcher.ping_index(repo, 42, now)?;
/// let nearest = matcher.nearest_pings(repo, 42, &TripShape::resolve(&[1, 2, 3]), now)?;
/// # Ok(())
/// # }
/// ```
pub struct SpatialMatcher {
    cleaner: TrajectoryCleaner,
    config: MatcherConfig,
    cache: Option<ArtifactCache>,
}

impl SpatialMatcher {
    pub fn new(cleaning: CleaningConfig, config: MatcherConfig, cache: Option<ArtifactCache>) -> Self {
        SpatialMatcher {
            cleaner: TrajectoryCleaner::new(cleaning),
            config,
            cache,
        }
    }

    pub fn cleaner(&self) -> &TrajectoryCleaner {
        &self.cleaner
    }

    /// Spatial index over the trip's cleaned pings up to `reference_time`
    pub fn ping_index(
        &self,
        repo: &dyn Repository,
        trip_id: TripId,
        reference_time: DateTime<Utc>,
    ) -> Result<PingTree> {
        let closed = self.trip_closed(repo, trip_id, reference_time)?;
        self.index_for(repo, trip_id, reference_time, closed)
    }

    /// Where the trip came nearest each of its stops, up to `reference_time`
    pub fn nearest_pings(
        &self,
        repo: &dyn Repository,
        trip_id: TripId,
        shape: &TripShape,
        reference_time: DateTime<Utc>,
    ) -> Result<NearestPingMap> {
        let closed = self.trip_closed(repo, trip_id, reference_time)?;
        let persist = match self.lookup(ArtifactKind::NearestPings, trip_id, closed) {
            CacheLookup::Hit(map) => return Ok(map),
            CacheLookup::MissRecomputeAndCache => true,
            CacheLookup::MissRecomputeNoCache => false,
        };

        let index = self.index_for(repo, trip_id, reference_time, closed)?;
        self.nearest_in(repo, trip_id, shape, &index, persist)
    }

    /// Same as [`nearest_pings`](Self::nearest_pings), computed from an
    /// index the caller already built for `reference_time`
    pub fn nearest_pings_from(
        &self,
        repo: &dyn Repository,
        trip_id: TripId,
        shape: &TripShape,
        index: &PingTree,
        reference_time: DateTime<Utc>,
    ) -> Result<NearestPingMap> {
        let closed = self.trip_closed(repo, trip_id, reference_time)?;
        let persist = match self.lookup(ArtifactKind::NearestPings, trip_id, closed) {
            CacheLookup::Hit(map) => return Ok(map),
            CacheLookup::MissRecomputeAndCache => true,
            CacheLookup::MissRecomputeNoCache => false,
        };
        self.nearest_in(repo, trip_id, shape, index, persist)
    }

    /// For each tripstop, the nearest ping within the stop radius; equal
    /// distances resolve to the earlier ping
    pub fn nearest_per_tripstop(&self, index: &PingTree, tripstops: &[TripStop]) -> Vec<NearestPing> {
        tripstops
            .iter()
            .filter_map(|ts| {
                let (ping, _) = *index
                    .within_sorted(ts.position(), self.config.stop_radius_m)
                    .first()?;
                Some(NearestPing {
                    tripstop_id: ts.id,
                    stop_id: ts.stop_id,
                    ping_id: ping.id,
                    time: ping.time,
                })
            })
            .collect()
    }

    /// For each cycle stop, every ping within the stop radius
    pub fn passes_per_stop(&self, index: &PingTree, tripstops: &[TripStop], cycle: &[StopId]) -> Vec<StopPasses> {
        cycle
            .iter()
            .filter_map(|stop_id| {
                let stop = tripstops.iter().find(|ts| ts.stop_id == *stop_id)?;
                let pings = index
                    .within(stop.position(), self.config.stop_radius_m)
                    .into_iter()
                    .map(|idx| {
                        let p = &index.pings()[idx];
                        PingRef {
                            ping_id: p.id,
                            time: p.time,
                        }
                    })
                    .collect();
                Some(StopPasses {
                    stop_id: *stop_id,
                    pings,
                })
            })
            .collect()
    }

    fn nearest_in(
        &self,
        repo: &dyn Repository,
        trip_id: TripId,
        shape: &TripShape,
        index: &PingTree,
        persist: bool,
    ) -> Result<NearestPingMap> {
        let tripstops = repo.tripstops(trip_id)?;
        let map = match shape {
            TripShape::Linear { .. } => NearestPingMap::Linear(self.nearest_per_tripstop(index, &tripstops)),
            TripShape::Circular { cycle } => {
                NearestPingMap::Circular(self.passes_per_stop(index, &tripstops, cycle))
            }
        };

        if let (true, Some(cache)) = (persist, &self.cache) {
            cache.store_or_warn(ArtifactKind::NearestPings, trip_id, &map);
        }
        Ok(map)
    }

    fn trip_closed(&self, repo: &dyn Repository, trip_id: TripId, reference_time: DateTime<Utc>) -> Result<bool> {
        if self.cache.is_none() {
            return Ok(false);
        }
        let last = repo.pings(trip_id, reference_time)?.last().map(|p| p.time);
        Ok(is_closed(last, reference_time))
    }

    fn index_for(
        &self,
        repo: &dyn Repository,
        trip_id: TripId,
        reference_time: DateTime<Utc>,
        closed: bool,
    ) -> Result<PingTree> {
        let persist = match self.lookup::<Vec<IndexedPing>>(ArtifactKind::PingIndex, trip_id, closed) {
            CacheLookup::Hit(pings) => return Ok(PingTree::from_indexed(pings, self.config.projection)),
            CacheLookup::MissRecomputeAndCache => true,
            CacheLookup::MissRecomputeNoCache => false,
        };

        let raw = repo.pings(trip_id, reference_time)?;
        let cleaned = self.cleaner.cleaned_pings(&raw);
        let tree = PingTree::build(&cleaned, &self.config.projection);

        if let (true, Some(cache)) = (persist, &self.cache) {
            cache.store_or_warn(ArtifactKind::PingIndex, trip_id, tree.pings());
        }
        Ok(tree)
    }

    fn lookup<T: serde::de::DeserializeOwned>(
        &self,
        kind: ArtifactKind,
        trip_id: TripId,
        closed: bool,
    ) -> CacheLookup<T> {
        match &self.cache {
            Some(cache) => cache.lookup(kind, trip_id, closed),
            None => CacheLookup::MissRecomputeNoCache,
        }
    }
}
