//! Matching a live trip's position against a historical trip

use chrono::{DateTime, Utc};

use crate::geometry::{bearing_deg, is_sharp_turn};
use crate::spatial::{IndexedPing, NearestPing, PingTree, StopPasses};
use crate::types::{Ping, StopId, TripStop};

/// Where the live trip is right now
#[derive(Clone, Debug)]
pub struct LivePosition {
    pub ping: Ping,
    /// Heading over the last two cleaned pings
    pub bearing: Option<f64>,
    /// Seconds since the trip's first scheduled stop
    pub elapsed_secs: f64,
}

impl LivePosition {
    /// From the live trip's most recent cleaned segment
    pub fn from_segment(segment: &[Ping], origin: DateTime<Utc>) -> Option<Self> {
        let ping = segment.last()?.clone();
        let bearing = match segment {
            [.., prev, last] => Some(bearing_deg(prev.position(), last.position())),
            _ => None,
        };
        let elapsed_secs = seconds_between(origin, ping.time);
        Some(LivePosition {
            ping,
            bearing,
            elapsed_secs,
        })
    }
}

/// The analog ping matching the live position.
///
/// Candidates lie within `radius_m` of the live ping; the one whose
/// elapsed time since its own trip's first scheduled stop is nearest the
/// live elapsed time wins; equal gaps go to the earlier ping. With
/// `check_heading`, candidates heading the opposite way to the live trip
/// are skipped.
pub fn match_position<'a>(
    analog: &'a PingTree,
    analog_origin: DateTime<Utc>,
    live: &LivePosition,
    radius_m: f64,
    check_heading: bool,
) -> Option<&'a IndexedPing> {
    let pings = analog.pings();

    analog
        .within(live.ping.position(), radius_m)
        .into_iter()
        .filter(|&idx| {
            if !check_heading {
                return true;
            }
            match (live.bearing, local_bearing(pings, idx)) {
                (Some(live_bearing), Some(local)) => !is_sharp_turn(live_bearing, local),
                _ => true,
            }
        })
        .map(|idx| {
            let candidate = &pings[idx];
            let gap = (seconds_between(analog_origin, candidate.time) - live.elapsed_secs).abs();
            (candidate, gap)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.time.cmp(&b.0.time)))
        .map(|(candidate, _)| candidate)
}

/// Heading of the analog trajectory at `idx`: towards the next ping, or
/// from the previous one at the end of the trajectory
fn local_bearing(pings: &[IndexedPing], idx: usize) -> Option<f64> {
    if let Some(next) = pings.get(idx + 1) {
        return Some(bearing_deg(pings[idx].position(), next.position()));
    }
    let prev = pings.get(idx.checked_sub(1)?)?;
    Some(bearing_deg(prev.position(), pings[idx].position()))
}

/// Seconds from the matched position to each tripstop of a linear analog.
///
/// None unless the analog came near every tripstop, in stop order, with
/// non-decreasing times.
pub fn linear_durations(
    nearest: &[NearestPing],
    tripstops: &[TripStop],
    matched: &IndexedPing,
) -> Option<Vec<f64>> {
    if nearest.len() != tripstops.len() {
        return None;
    }
    let in_order = nearest
        .iter()
        .zip(tripstops)
        .all(|(n, ts)| n.tripstop_id == ts.id);
    if !in_order {
        return None;
    }
    if nearest.windows(2).any(|w| w[1].time < w[0].time) {
        return None;
    }

    Some(
        nearest
            .iter()
            .map(|n| seconds_between(matched.time, n.time))
            .collect(),
    )
}

/// Seconds from the matched position to the next pass of each cycle stop;
/// zero for a stop with no later pass
pub fn circular_durations(passes: &[StopPasses], cycle: &[StopId], matched: &IndexedPing) -> Vec<f64> {
    cycle
        .iter()
        .map(|stop_id| {
            passes
                .iter()
                .filter(|p| p.stop_id == *stop_id)
                .flat_map(|p| p.pings.iter())
                .map(|ping| seconds_between(matched.time, ping.time))
                .filter(|d| *d > 0.0)
                .min_by(f64::total_cmp)
                .unwrap_or(0.0)
        })
        .collect()
}

pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
