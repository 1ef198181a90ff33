//! Trajectory cleaning
//!
//! Turns a raw chronological ping sequence into contiguous, physically
//! plausible segments. Each round runs three passes over the segment list:
//!
//! 1. smoothing: remove zig-zag spikes (two consecutive sharp turns)
//! 2. speed split: break after any edge faster than `max_speed_mps`
//! 3. time split: break after any edge longer than `max_gap_secs`
//!
//! Segments with two pings or fewer are dropped after every split pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CleaningConfig;
use crate::geometry::{bearing_deg, delta_angle, distance_m, is_sharp_turn};
use crate::types::Ping;

/// Minimum pings a segment must hold to survive a round
const MIN_SEGMENT_LEN: usize = 3;

/// Ordered run of pings believed to be one continuous path.
///
/// Strictly ascending time; every edge within the time and speed limits.
#[derive(Clone, Debug, PartialEq)]
pub struct CleanedSegment {
    pings: Vec<Ping>,
}

impl CleanedSegment {
    pub fn pings(&self) -> &[Ping] {
        &self.pings
    }

    pub fn len(&self) -> usize {
        self.pings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pings.is_empty()
    }

    pub fn last(&self) -> Option<&Ping> {
        self.pings.last()
    }

    pub fn into_pings(self) -> Vec<Ping> {
        self.pings
    }
}

/// Whether a trip's pings can support a prediction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataQuality {
    NoPings,
    InsufficientRecentPings,
    StaleData,
    Valid,
}

pub struct TrajectoryCleaner {
    config: CleaningConfig,
}

impl TrajectoryCleaner {
    pub fn new(config: CleaningConfig) -> Self {
        TrajectoryCleaner { config }
    }

    /// Clean raw pings into segments.
    ///
    /// Input is re-sorted by time; pings sharing a timestamp keep only the
    /// first occurrence.
    pub fn clean(&self, raw_pings: &[Ping]) -> Vec<CleanedSegment> {
        let mut pings = raw_pings.to_vec();
        pings.sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
        pings.dedup_by(|later, earlier| later.time == earlier.time);

        if pings.is_empty() {
            return Vec::new();
        }

        let mut segments = vec![pings];
        for _ in 0..self.config.rounds {
            segments = segments.into_iter().map(|s| self.smooth(s)).collect();
            segments = split_after(segments, |a, b| self.too_fast(a, b));
            segments = split_after(segments, |a, b| self.too_slow(a, b));
        }

        segments
            .into_iter()
            .map(|pings| CleanedSegment { pings })
            .collect()
    }

    /// Flattened cleaned pings in time order
    pub fn cleaned_pings(&self, raw_pings: &[Ping]) -> Vec<Ping> {
        self.clean(raw_pings)
            .into_iter()
            .flat_map(CleanedSegment::into_pings)
            .collect()
    }

    /// Quality of the most recent cleaned segment at `reference_time`.
    ///
    /// When the newest raw ping did not survive cleaning, the latest run of
    /// pings was a fragment too short to keep, which counts as
    /// insufficient recent data.
    pub fn check_quality(&self, raw_pings: &[Ping], reference_time: DateTime<Utc>) -> DataQuality {
        self.quality_of(&self.clean(raw_pings), raw_pings, reference_time)
    }

    /// As [`check_quality`](Self::check_quality), over segments already
    /// cleaned from `raw_pings`
    pub fn quality_of(
        &self,
        segments: &[CleanedSegment],
        raw_pings: &[Ping],
        reference_time: DateTime<Utc>,
    ) -> DataQuality {
        let Some(last) = segments.last().and_then(|s| s.last()) else {
            return DataQuality::NoPings;
        };

        let newest_raw = raw_pings.iter().map(|p| p.time).max();
        let trailing_fragment = newest_raw.map(|t| t > last.time).unwrap_or(false);
        let last_len = segments.last().map(|s| s.len()).unwrap_or(0);

        if trailing_fragment || last_len < MIN_SEGMENT_LEN {
            return DataQuality::InsufficientRecentPings;
        }

        if (reference_time - last.time).num_milliseconds() >= self.config.stale_after_secs * 1000 {
            return DataQuality::StaleData;
        }

        DataQuality::Valid
    }

    /// Remove pings that create consecutive sharp turns.
    ///
    /// Window is pings i-3..=i. When the turns at i-2 and i-1 are both
    /// sharp, keep whichever single removal leaves the straighter path,
    /// provided it bends less than the repair limit; otherwise drop both.
    fn smooth(&self, mut pings: Vec<Ping>) -> Vec<Ping> {
        let limit = self.config.repair_max_turn_deg;

        let mut i = 3;
        while i < pings.len() {
            let b0 = bearing_deg(pings[i - 3].position(), pings[i - 2].position());
            let b1 = bearing_deg(pings[i - 2].position(), pings[i - 1].position());
            let b2 = bearing_deg(pings[i - 1].position(), pings[i].position());

            if is_sharp_turn(b0, b1) && is_sharp_turn(b1, b2) {
                let without_second = turn_through(&pings[i - 3], &pings[i - 1], &pings[i]);
                let without_third = turn_through(&pings[i - 3], &pings[i - 2], &pings[i]);

                if without_third < without_second.min(limit) {
                    pings.remove(i - 1);
                } else if without_second < without_third.min(limit) {
                    pings.remove(i - 2);
                } else {
                    pings.drain(i - 2..i);
                }
            }
            i += 1;
        }

        pings
    }

    fn too_fast(&self, a: &Ping, b: &Ping) -> bool {
        let secs = (b.time - a.time).num_milliseconds() as f64 / 1000.0;
        if secs <= 0.0 {
            return false;
        }
        distance_m(a.position(), b.position()) / secs > self.config.max_speed_mps
    }

    fn too_slow(&self, a: &Ping, b: &Ping) -> bool {
        (b.time - a.time).num_milliseconds() > self.config.max_gap_secs * 1000
    }
}

impl Default for TrajectoryCleaner {
    fn default() -> Self {
        Self::new(CleaningConfig::default())
    }
}

/// Absolute bearing change at `b` along a -> b -> c
fn turn_through(a: &Ping, b: &Ping, c: &Ping) -> f64 {
    let first = bearing_deg(a.position(), b.position());
    let second = bearing_deg(b.position(), c.position());
    delta_angle(first, second).abs()
}

/// Split every segment after each ping whose edge to the next ping
/// satisfies `breaks`, then drop short pieces.
fn split_after<F>(segments: Vec<Vec<Ping>>, breaks: F) -> Vec<Vec<Ping>>
where
    F: Fn(&Ping, &Ping) -> bool,
{
    let mut out = Vec::with_capacity(segments.len());

    for segment in segments {
        let mut current: Vec<Ping> = Vec::with_capacity(segment.len());
        let mut iter = segment.into_iter().peekable();
        while let Some(ping) = iter.next() {
            let split_here = iter.peek().map(|next| breaks(&ping, next)).unwrap_or(false);
            current.push(ping);
            if split_here {
                out.push(std::mem::take(&mut current));
            }
        }
        out.push(current);
    }

    out.retain(|s| s.len() >= MIN_SEGMENT_LEN);
    out
}
