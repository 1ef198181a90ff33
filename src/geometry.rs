//! Distance, bearing and turn-angle math on (lat, lng) pairs
//!
//! Everything here is a planar equirectangular approximation scaled by the
//! mean Earth radius. Good to well under a metre over the few kilometres a
//! bus covers between stops; not geodesically exact.

use geo::{EuclideanDistance, Point};
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Absolute bearing change above which a turn counts as sharp
pub const SHARP_TURN_DEG: f64 = 120.0;

/// Distance in metres between two (lat, lng) points
pub fn distance_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = offset_m(a, b);
    (dx * dx + dy * dy).sqrt()
}

/// Compass bearing from `a` to `b` in degrees, [0, 360)
pub fn bearing_deg(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = offset_m(a, b);
    let theta = dx.atan2(dy).to_degrees();
    if theta < 0.0 {
        theta + 360.0
    } else {
        theta
    }
}

/// Signed change from `from` to `to`, wrapped into (-180, 180]
pub fn delta_angle(from: f64, to: f64) -> f64 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

pub fn is_sharp_turn(from: f64, to: f64) -> bool {
    delta_angle(from, to).abs() > SHARP_TURN_DEG
}

/// East/north offset in metres from `a` to `b`, using the mean latitude
fn offset_m(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    let mean_lat = (0.5 * (a.0 + b.0)).to_radians();
    let dx = (b.1 - a.1).to_radians() * mean_lat.cos() * EARTH_RADIUS_M;
    let dy = (b.0 - a.0).to_radians() * EARTH_RADIUS_M;
    (dx, dy)
}

/// Fixed local planar frame (metres east/north of an origin).
///
/// Every trip is projected through the same origin so positions from
/// different trips are directly comparable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalProjection {
    pub origin_lat: f64,
    pub origin_lng: f64,
}

impl LocalProjection {
    pub fn new(origin_lat: f64, origin_lng: f64) -> Self {
        LocalProjection {
            origin_lat,
            origin_lng,
        }
    }

    /// Project (lat, lng) to [x, y] metres
    pub fn project(&self, position: (f64, f64)) -> [f64; 2] {
        let (lat, lng) = position;
        let x = EARTH_RADIUS_M
            * (lng - self.origin_lng).to_radians()
            * self.origin_lat.to_radians().cos();
        let y = EARTH_RADIUS_M * (lat - self.origin_lat).to_radians();
        [x, y]
    }

    /// Straight-line distance in the projected frame
    pub fn planar_distance(&self, a: (f64, f64), b: (f64, f64)) -> f64 {
        let [ax, ay] = self.project(a);
        let [bx, by] = self.project(b);
        Point::new(ax, ay).euclidean_distance(&Point::new(bx, by))
    }
}

impl Default for LocalProjection {
    /// Singapore (SVY21 datum origin)
    fn default() -> Self {
        LocalProjection::new(1.366_666, 103.833_333)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_one_millidegree_north() {
        let d = distance_m((1.3000, 103.8000), (1.3010, 103.8000));
        // 0.001 deg latitude = 111.19 m
        assert_relative_eq!(d, 111.19, epsilon = 0.05);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = (1.3521, 103.8198);
        let b = (1.3600, 103.8300);
        assert_relative_eq!(distance_m(a, b), distance_m(b, a), epsilon = 1e-9);
    }

    #[test]
    fn test_cardinal_bearings() {
        let origin = (1.3, 103.8);
        assert_relative_eq!(bearing_deg(origin, (1.301, 103.8)), 0.0, epsilon = 1e-6);
        assert_relative_eq!(bearing_deg(origin, (1.3, 103.801)), 90.0, epsilon = 1e-6);
        assert_relative_eq!(bearing_deg(origin, (1.299, 103.8)), 180.0, epsilon = 1e-6);
        assert_relative_eq!(bearing_deg(origin, (1.3, 103.799)), 270.0, epsilon = 1e-6);
    }

    #[test]
    fn test_delta_angle_wraps() {
        assert_relative_eq!(delta_angle(350.0, 10.0), 20.0);
        assert_relative_eq!(delta_angle(10.0, 350.0), -20.0);
        assert_relative_eq!(delta_angle(0.0, 180.0), 180.0);
        assert_relative_eq!(delta_angle(180.0, 0.0), 180.0);
        assert_relative_eq!(delta_angle(90.0, 90.0), 0.0);
    }

    #[test]
    fn test_sharp_turn_threshold() {
        assert!(!is_sharp_turn(0.0, 120.0));
        assert!(is_sharp_turn(0.0, 121.0));
        assert!(is_sharp_turn(10.0, 200.0));
        assert!(!is_sharp_turn(350.0, 100.0));
    }

    #[test]
    fn test_sharp_turn_symmetric() {
        let mut a = 0.0;
        while a < 360.0 {
            let mut b = 0.0;
            while b < 360.0 {
                assert_eq!(is_sharp_turn(a, b), is_sharp_turn(b, a), "a={} b={}", a, b);
                b += 7.5;
            }
            a += 7.5;
        }
    }

    #[test]
    fn test_projection_matches_distance() {
        let projection = LocalProjection::default();
        let a = (1.3521, 103.8198);
        let b = (1.3525, 103.8203);
        let planar = projection.planar_distance(a, b);
        assert_relative_eq!(planar, distance_m(a, b), max_relative = 0.01);
    }

    #[test]
    fn test_projection_origin_is_zero() {
        let projection = LocalProjection::new(1.3, 103.8);
        let [x, y] = projection.project((1.3, 103.8));
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, 0.0);
    }
}
