//! Per-stop aggregation of analog durations

use log::debug;

/// How per-stop durations from several analogs are combined
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Aggregation {
    /// Drop min and max when at least `min_samples` values exist, then mean
    TrimmedMean { min_samples: usize },
    Median,
}

/// Combine one duration vector per analog into one duration per stop.
///
/// All rows must have the same length; returns an empty vector for no rows.
pub fn aggregate(rows: &[Vec<f64>], aggregation: Aggregation) -> Vec<f64> {
    transpose(rows)
        .iter()
        .enumerate()
        .map(|(stop_idx, column)| match aggregation {
            Aggregation::TrimmedMean { min_samples } => {
                let (mean, std_dev) = trimmed_mean(column, min_samples);
                debug!("stop {}: mean {:.1}s sd {:.1}s over {} analogs", stop_idx, mean, std_dev, column.len());
                mean
            }
            Aggregation::Median => median(column),
        })
        .collect()
}

/// Columns of `rows`, truncated to the shortest row
pub fn transpose(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let width = rows.iter().map(Vec::len).min().unwrap_or(0);
    (0..width)
        .map(|col| rows.iter().map(|row| row[col]).collect())
        .collect()
}

/// Mean and population standard deviation, after trimming the extremes
/// when there are at least `min_samples` values
pub fn trimmed_mean(values: &[f64], min_samples: usize) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let kept = if sorted.len() >= min_samples && sorted.len() > 2 {
        &sorted[1..sorted.len() - 1]
    } else {
        &sorted[..]
    };

    let n = kept.len() as f64;
    let mean = kept.iter().sum::<f64>() / n;
    let variance = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}
