//! Synthetic routes, trips and GPS traces for tests

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::repository::{Dataset, InMemoryRepository, PingData, ReferenceData};
use crate::types::{Ping, Route, RouteId, StopId, Trip, TripId, TripStop, SERVICE_UTC_OFFSET_SECS};

pub const PING_INTERVAL_SECS: i64 = 5;
/// ~11m per ping, ~2.2 m/s
pub const STEP_DEG: f64 = 0.0001;
pub const CORRIDOR_LNG: f64 = 103.80;

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 3, d).unwrap()
}

/// Service-local wall clock time on `date`
pub fn local_time(date: NaiveDate, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    let naive = date.and_hms_opt(h, m, s).unwrap();
    Utc.from_utc_datetime(&naive) - Duration::seconds(SERVICE_UTC_OFFSET_SECS)
}

/// Stops 1000, 1001, ... every 0.002 deg (~222m) north along one street
pub fn corridor_stops(count: i64) -> Vec<(StopId, (f64, f64))> {
    (0..count)
        .map(|k| (1000 + k, (1.300 + k as f64 * 0.002, CORRIDOR_LNG)))
        .collect()
}

#[derive(Default)]
pub struct Fixture {
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
    pub tripstops: Vec<TripStop>,
    pub pings: Vec<Ping>,
    next_ping_id: i64,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, id: RouteId, stop_ids: &[StopId]) -> &mut Self {
        self.routes.push(Route {
            id,
            stop_ids: stop_ids.to_vec(),
        });
        self
    }

    /// A trip calling at `stops` every `spacing_mins` from `departure`.
    /// Tripstop ids are `trip_id * 100 + index`.
    pub fn trip(
        &mut self,
        id: TripId,
        route_id: RouteId,
        date: NaiveDate,
        departure: DateTime<Utc>,
        stops: &[(StopId, (f64, f64))],
        spacing_mins: i64,
    ) -> &mut Self {
        self.trips.push(Trip { id, route_id, date });
        for (idx, (stop_id, (lat, lng))) in stops.iter().enumerate() {
            self.tripstops.push(TripStop {
                id: id * 100 + idx as i64,
                trip_id: id,
                stop_id: *stop_id,
                can_board: true,
                can_alight: idx > 0,
                scheduled_time: departure + Duration::minutes(spacing_mins * idx as i64),
                lat: *lat,
                lng: *lng,
            });
        }
        self
    }

    /// Drive through `waypoints` in straight legs, moving `step_deg` per
    /// ping. Returns the time of the final ping, which sits on the last
    /// waypoint.
    pub fn drive(
        &mut self,
        trip_id: TripId,
        start: DateTime<Utc>,
        waypoints: &[(f64, f64)],
        step_deg: f64,
    ) -> DateTime<Utc> {
        let mut time = start;
        for leg in waypoints.windows(2) {
            let (a, b) = (leg[0], leg[1]);
            let span = (b.0 - a.0).abs().max((b.1 - a.1).abs());
            let steps = (span / step_deg).round().max(1.0) as usize;
            for i in 0..steps {
                let f = i as f64 / steps as f64;
                self.ping_at(trip_id, time, (a.0 + (b.0 - a.0) * f, a.1 + (b.1 - a.1) * f));
                time += Duration::seconds(PING_INTERVAL_SECS);
            }
        }
        if let Some(last) = waypoints.last() {
            self.ping_at(trip_id, time, *last);
        }
        time
    }

    pub fn ping_at(&mut self, trip_id: TripId, time: DateTime<Utc>, position: (f64, f64)) {
        self.next_ping_id += 1;
        self.pings.push(Ping {
            id: self.next_ping_id,
            trip_id,
            lat: position.0,
            lng: position.1,
            time,
        });
    }

    pub fn reference_data(&self) -> ReferenceData {
        ReferenceData::new(self.routes.clone(), self.trips.clone(), self.tripstops.clone())
    }

    pub fn dataset(&self) -> Dataset {
        Dataset::new(self.reference_data(), PingData::new(self.pings.clone()))
    }

    pub fn repository(&self) -> InMemoryRepository {
        InMemoryRepository::new(self.reference_data(), PingData::new(self.pings.clone()))
    }
}

/// Unique scratch directory under the system temp dir
pub fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("bus_eta_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
