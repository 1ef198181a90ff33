use chrono::{DateTime, Utc};
use geo::{EuclideanDistance, Point};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::geometry::LocalProjection;
use crate::types::{Ping, PingId};

/// A cleaned ping with its projected planar coordinates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedPing {
    pub id: PingId,
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    /// Metres east/north of the projection origin
    pub xy: [f64; 2],
}

impl IndexedPing {
    pub fn position(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

type TreeEntry = GeomWithData<[f64; 2], usize>;

/// R-Tree over one trip's cleaned pings
///
/// # Architecture
/// - Pings are kept in time order; the tree stores indices into that list
/// - Radius queries run in the projected frame, so metres in, metres out
/// - Rebuilt from the serialized ping list when loaded from cache
///
/// # Usage
/// ```no_run
/// use bus_eta::geometry::LocalProjection;
/// use bus_eta::spatial::PingTree;
///
/// let pings = vec![/* cleaned pings */];
/// let tree = PingTree::build(&pings, &LocalProjection::default());
///
/// // Pings within 50m of a stop, nearest first
/// let hits = tree.within_sorted((1.3521, 103.8198), 50.0);
/// ```
pub struct PingTree {
    pings: Vec<IndexedPing>,
    tree: RTree<TreeEntry>,
    projection: LocalProjection,
}

impl PingTree {
    pub fn build(pings: &[Ping], projection: &LocalProjection) -> Self {
        let indexed = pings
            .iter()
            .map(|p| IndexedPing {
                id: p.id,
                time: p.time,
                lat: p.lat,
                lng: p.lng,
                xy: projection.project(p.position()),
            })
            .collect();
        Self::from_indexed(indexed, *projection)
    }

    /// Rebuild the tree over an already-projected ping list
    pub fn from_indexed(mut pings: Vec<IndexedPing>, projection: LocalProjection) -> Self {
        pings.sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
        let entries: Vec<TreeEntry> = pings
            .iter()
            .enumerate()
            .map(|(idx, p)| GeomWithData::new(p.xy, idx))
            .collect();

        PingTree {
            pings,
            tree: RTree::bulk_load(entries),
            projection,
        }
    }

    /// All indexed pings in time order
    pub fn pings(&self) -> &[IndexedPing] {
        &self.pings
    }

    pub fn len(&self) -> usize {
        self.pings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pings.is_empty()
    }

    pub fn last(&self) -> Option<&IndexedPing> {
        self.pings.last()
    }

    /// Indices (time order) of pings within `radius_m` of a (lat, lng) point
    pub fn within(&self, position: (f64, f64), radius_m: f64) -> Vec<usize> {
        let query = self.projection.project(position);
        let mut hits: Vec<usize> = self
            .tree
            .locate_within_distance(query, radius_m * radius_m)
            .map(|entry| entry.data)
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Pings within `radius_m`, nearest first; equal distances go to the
    /// earlier ping
    pub fn within_sorted(&self, position: (f64, f64), radius_m: f64) -> Vec<(&IndexedPing, f64)> {
        let [qx, qy] = self.projection.project(position);
        let query = Point::new(qx, qy);

        let mut hits: Vec<(&IndexedPing, f64)> = self
            .within(position, radius_m)
            .into_iter()
            .map(|idx| {
                let ping = &self.pings[idx];
                let dist = query.euclidean_distance(&Point::new(ping.xy[0], ping.xy[1]));
                (ping, dist)
            })
            .collect();

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.time.cmp(&b.0.time)));
        hits
    }
}
