use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::Repository;
use crate::error::Result;
use crate::types::{Ping, Route, RouteId, Trip, TripId, TripStop};

/// Routes, trips and tripstops, indexed for lookup. Immutable once built.
#[derive(Debug, Default)]
pub struct ReferenceData {
    routes: HashMap<RouteId, Route>,
    trips: HashMap<TripId, Trip>,
    /// Most recent first, ties by id
    trips_by_route: HashMap<RouteId, Vec<TripId>>,
    /// Boarding stops only, scheduled order
    tripstops: HashMap<TripId, Vec<TripStop>>,
    /// First and last scheduled time over all tripstops
    schedule_spans: HashMap<TripId, (DateTime<Utc>, DateTime<Utc>)>,
}

impl ReferenceData {
    pub fn new(routes: Vec<Route>, trips: Vec<Trip>, tripstops: Vec<TripStop>) -> Self {
        let mut schedule_spans: HashMap<TripId, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
        let mut by_trip: HashMap<TripId, Vec<TripStop>> = HashMap::new();

        for ts in tripstops {
            schedule_spans
                .entry(ts.trip_id)
                .and_modify(|(first, last)| {
                    *first = (*first).min(ts.scheduled_time);
                    *last = (*last).max(ts.scheduled_time);
                })
                .or_insert((ts.scheduled_time, ts.scheduled_time));
            if ts.can_board {
                by_trip.entry(ts.trip_id).or_default().push(ts);
            }
        }
        for stops in by_trip.values_mut() {
            stops.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time).then(a.id.cmp(&b.id)));
        }

        let mut trips_by_route: HashMap<RouteId, Vec<TripId>> = HashMap::new();
        for trip in &trips {
            trips_by_route.entry(trip.route_id).or_default().push(trip.id);
        }
        let trips: HashMap<TripId, Trip> = trips.into_iter().map(|t| (t.id, t)).collect();
        for ids in trips_by_route.values_mut() {
            ids.sort_by(|a, b| trips[b].date.cmp(&trips[a].date).then(a.cmp(b)));
        }

        ReferenceData {
            routes: routes.into_iter().map(|r| (r.id, r)).collect(),
            trips,
            trips_by_route,
            tripstops: by_trip,
            schedule_spans,
        }
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

/// Pings grouped per trip, oldest first
#[derive(Debug, Default)]
pub struct PingData {
    by_trip: HashMap<TripId, Vec<Ping>>,
    latest: Option<DateTime<Utc>>,
}

impl PingData {
    pub fn new(pings: Vec<Ping>) -> Self {
        let latest = pings.iter().map(|p| p.time).max();
        let mut by_trip: HashMap<TripId, Vec<Ping>> = HashMap::new();
        for ping in pings {
            by_trip.entry(ping.trip_id).or_default().push(ping);
        }
        for pings in by_trip.values_mut() {
            pings.sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
        }
        PingData { by_trip, latest }
    }

    /// Newest ping time across all trips
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.latest
    }

    pub fn len(&self) -> usize {
        self.by_trip.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_trip.is_empty()
    }
}

/// A consistent view of reference data and pings.
///
/// Cheap to clone; every worker holds its own.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    reference: Arc<ReferenceData>,
    pings: Arc<PingData>,
}

impl Dataset {
    pub fn new(reference: ReferenceData, pings: PingData) -> Self {
        Dataset {
            reference: Arc::new(reference),
            pings: Arc::new(pings),
        }
    }

    pub fn latest_ping_time(&self) -> Option<DateTime<Utc>> {
        self.pings.latest()
    }
}

impl Repository for Dataset {
    fn route(&self, route_id: RouteId) -> Result<Option<Route>> {
        Ok(self.reference.routes.get(&route_id).cloned())
    }

    fn trip(&self, trip_id: TripId) -> Result<Option<Trip>> {
        Ok(self.reference.trips.get(&trip_id).cloned())
    }

    fn trips_for_route(
        &self,
        route_id: RouteId,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<Trip>> {
        let Some(ids) = self.reference.trips_by_route.get(&route_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.reference.trips.get(id))
            .filter(|t| t.date >= from && t.date < until)
            .cloned()
            .collect())
    }

    fn tripstops(&self, trip_id: TripId) -> Result<Vec<TripStop>> {
        Ok(self
            .reference
            .tripstops
            .get(&trip_id)
            .cloned()
            .unwrap_or_default())
    }

    fn pings(&self, trip_id: TripId, until: DateTime<Utc>) -> Result<Vec<Ping>> {
        let Some(pings) = self.pings.by_trip.get(&trip_id) else {
            return Ok(Vec::new());
        };
        let end = pings.partition_point(|p| p.time <= until);
        Ok(pings[..end].to_vec())
    }

    fn operating_trip_ids(&self, at: DateTime<Utc>, margin: Duration) -> Result<Vec<TripId>> {
        let mut ids: Vec<TripId> = self
            .reference
            .schedule_spans
            .iter()
            .filter(|(_, (first, last))| *first - margin <= at && at <= *last + margin)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Shared repository whose contents are replaced wholesale on refresh.
///
/// Readers take a [`Dataset`] handle and keep using it for the rest of
/// their task; a concurrent refresh never changes what they see.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    reference: RwLock<Arc<ReferenceData>>,
    pings: RwLock<Arc<PingData>>,
}

impl InMemoryRepository {
    pub fn new(reference: ReferenceData, pings: PingData) -> Self {
        InMemoryRepository {
            reference: RwLock::new(Arc::new(reference)),
            pings: RwLock::new(Arc::new(pings)),
        }
    }

    pub fn handle(&self) -> Dataset {
        Dataset {
            reference: read_arc(&self.reference),
            pings: read_arc(&self.pings),
        }
    }

    pub fn refresh_reference(&self, reference: ReferenceData) {
        info!("reference data refreshed: {} trips", reference.trip_count());
        swap_arc(&self.reference, reference);
    }

    pub fn refresh_pings(&self, pings: PingData) {
        swap_arc(&self.pings, pings);
    }

    pub fn latest_ping_time(&self) -> Option<DateTime<Utc>> {
        read_arc(&self.pings).latest()
    }
}

// Writers only ever replace the whole Arc, so a poisoned lock still holds
// a complete dataset.
fn read_arc<T>(lock: &RwLock<Arc<T>>) -> Arc<T> {
    match lock.read() {
        Ok(guard) => Arc::clone(&guard),
        Err(poisoned) => Arc::clone(&poisoned.into_inner()),
    }
}

fn swap_arc<T>(lock: &RwLock<Arc<T>>, value: T) {
    let value = Arc::new(value);
    match lock.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}
