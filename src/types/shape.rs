//! Linear vs circular trip shapes
//!
//! A trip is circular when any stop id recurs in its route's stop path, or
//! in its own stop sequence when the route lists no path. The shape is
//! resolved once per trip and dispatched on explicitly.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::StopId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripShape {
    Linear { stop_sequence: Vec<StopId> },
    Circular { cycle: Vec<StopId> },
}

impl TripShape {
    pub fn resolve(stop_ids: &[StopId]) -> Self {
        Self::with_kind(stop_ids, is_circular(stop_ids))
    }

    /// Shape of `stop_ids` when circularity is known from elsewhere (the
    /// route's own stop path)
    pub fn with_kind(stop_ids: &[StopId], circular: bool) -> Self {
        if circular {
            TripShape::Circular {
                cycle: canonical_cycle(stop_ids),
            }
        } else {
            TripShape::Linear {
                stop_sequence: stop_ids.to_vec(),
            }
        }
    }

    pub fn is_circular(&self) -> bool {
        matches!(self, TripShape::Circular { .. })
    }

    /// Stops a prediction is produced for, in order
    pub fn stops(&self) -> &[StopId] {
        match self {
            TripShape::Linear { stop_sequence } => stop_sequence,
            TripShape::Circular { cycle } => cycle,
        }
    }

    /// Whether another trip's stop sequence is comparable to this shape
    pub fn accepts(&self, other_stop_ids: &[StopId]) -> bool {
        match self {
            TripShape::Linear { stop_sequence } => stop_sequence.as_slice() == other_stop_ids,
            TripShape::Circular { cycle } => canonical_cycle(other_stop_ids) == *cycle,
        }
    }
}

pub fn is_circular(stop_ids: &[StopId]) -> bool {
    let mut seen = HashSet::with_capacity(stop_ids.len());
    stop_ids.iter().any(|id| !seen.insert(*id))
}

/// Index at which the first stop id recurs, or None if it never does
pub fn cycle_length(stop_ids: &[StopId]) -> Option<usize> {
    let first = stop_ids.first()?;
    stop_ids
        .iter()
        .skip(1)
        .position(|id| id == first)
        .map(|idx| idx + 1)
}

/// Minimal repeating prefix of a circular stop sequence.
///
/// Sequences whose first stop never recurs (a loop that starts on a
/// spur) have no repeating prefix; the whole sequence is used instead.
pub fn canonical_cycle(stop_ids: &[StopId]) -> Vec<StopId> {
    match cycle_length(stop_ids) {
        Some(len) => stop_ids[..len].to_vec(),
        None => stop_ids.to_vec(),
    }
}
