//! Read access to routes, trips, tripstops and pings
//!
//! Every component takes a `&dyn Repository`; nothing reaches for global
//! state. The in-memory implementation swaps whole datasets on refresh.

pub mod loader;
pub mod memory;

pub use loader::{load_pings, load_reference, DataSource, DatasetDir};
pub use memory::{Dataset, InMemoryRepository, PingData, ReferenceData};

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::Result;
use crate::types::{Ping, Route, RouteId, Trip, TripId, TripStop};

pub trait Repository: Send + Sync {
    fn route(&self, route_id: RouteId) -> Result<Option<Route>>;

    fn trip(&self, trip_id: TripId) -> Result<Option<Trip>>;

    /// Trips on a route with `from <= date < until`, most recent first
    fn trips_for_route(&self, route_id: RouteId, from: NaiveDate, until: NaiveDate)
        -> Result<Vec<Trip>>;

    /// Boarding tripstops in scheduled order
    fn tripstops(&self, trip_id: TripId) -> Result<Vec<TripStop>>;

    /// Pings recorded at or before `until`, oldest first
    fn pings(&self, trip_id: TripId, until: DateTime<Utc>) -> Result<Vec<Ping>>;

    /// Trips whose scheduled span, widened by `margin` both ways, covers `at`
    fn operating_trip_ids(&self, at: DateTime<Utc>, margin: Duration) -> Result<Vec<TripId>>;
}
