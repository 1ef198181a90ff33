pub mod shape;

pub use shape::*;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

pub type PingId = i64;
pub type TripId = i64;
pub type TripStopId = i64;
pub type StopId = i64;
pub type RouteId = i64;

/// Service-local offset from UTC (UTC+8). Calendar-day decisions and
/// rendered timestamps use this fixed offset.
pub const SERVICE_UTC_OFFSET_SECS: i64 = 8 * 3600;

pub fn service_offset() -> FixedOffset {
    FixedOffset::east_opt(SERVICE_UTC_OFFSET_SECS as i32).unwrap_or_else(|| Utc.fix())
}

/// Calendar date of an instant in service-local time.
pub fn service_date(time: DateTime<Utc>) -> NaiveDate {
    time.with_timezone(&service_offset()).date_naive()
}

/// One GPS observation for a trip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub id: PingId,
    pub trip_id: TripId,
    pub lat: f64,
    pub lng: f64,
    pub time: DateTime<Utc>,
}

impl Ping {
    pub fn position(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

/// A scheduled stop visit within a trip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TripStop {
    pub id: TripStopId,
    pub trip_id: TripId,
    pub stop_id: StopId,
    pub can_board: bool,
    pub can_alight: bool,
    pub scheduled_time: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
}

impl TripStop {
    pub fn position(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub route_id: RouteId,
    /// Service-local operating date
    pub date: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    /// Ordered stop ids; repeats mean the route loops
    #[serde(default)]
    pub stop_ids: Vec<StopId>,
}

/// Stop ids of boarding tripstops in scheduled order
pub fn stop_sequence(tripstops: &[TripStop]) -> Vec<StopId> {
    tripstops.iter().map(|ts| ts.stop_id).collect()
}
