//! Segmented linear regression of fill-level readings.
//!
//! A molok's fill history is a saw-tooth: the level climbs until the molok is
//! emptied, then starts over. The series is cut at every emptying event into
//! [`GrowthSegment`]s, each fitted by ordinary least squares against seconds
//! since the segment's first reading.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::MolokId;

/// One fill-level observation fed to the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillSample {
    pub reading_id: u64,
    pub fill_pct: f64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl FillSample {
    pub fn new(reading_id: u64, fill_pct: f64, timestamp: f64) -> Self {
        Self {
            reading_id,
            fill_pct,
            timestamp,
        }
    }
}

/// When a reading starts a new segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResetRule {
    /// Any reading lower than the one before it.
    #[default]
    OnDecrease,
    /// Only a reading of exactly zero, as written when a molok is marked emptied.
    OnZero,
}

impl ResetRule {
    #[inline]
    fn is_reset(self, previous: f64, current: f64) -> bool {
        match self {
            ResetRule::OnDecrease => current < previous,
            ResetRule::OnZero => current == 0.0,
        }
    }
}

/// A fitted run of readings between two emptying events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthSegment {
    /// Growth in percentage points per second.
    pub slope: f64,
    /// Fitted fill percentage at `start`.
    pub intercept: f64,
    /// Timestamp of the first reading.
    pub start: f64,
    /// Timestamp of the last reading.
    pub end: f64,
    pub reading_ids: Vec<u64>,
    /// Coefficient of determination of the fit. `1.0` for a perfect line.
    pub r_squared: f64,
}

impl GrowthSegment {
    /// True if `[start, end]` and `[from, to]` share at least one instant.
    #[inline]
    pub fn overlaps(&self, from: f64, to: f64) -> bool {
        self.start <= to && from <= self.end
    }
}

/// Error type for growth estimation.
#[derive(Debug, Clone, PartialEq)]
pub enum EstimationError {
    /// No segment with at least two readings could be fitted.
    EmptySeries,
    /// No fitted segment intersects the requested window.
    NoOverlappingSegment { start: f64, end: f64 },
}

impl fmt::Display for EstimationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationError::EmptySeries => write!(f, "Not enough readings to fit a growth segment"),
            EstimationError::NoOverlappingSegment { start, end } => write!(
                f,
                "No growth segment overlaps the window [{}, {}]",
                start, end
            ),
        }
    }
}

impl std::error::Error for EstimationError {}

/// Splits a time-ordered series into runs separated by emptying events.
///
/// ```
/// use molok_planner::growth::{split_runs, FillSample, ResetRule};
///
/// let samples: Vec<FillSample> = [10.0, 40.0, 70.0, 5.0, 30.0]
///     .iter()
///     .enumerate()
///     .map(|(i, &fill)| FillSample::new(i as u64, fill, i as f64 * 3600.0))
///     .collect();
///
/// let runs = split_runs(&samples, ResetRule::OnDecrease);
/// assert_eq!(runs.len(), 2);
/// assert_eq!(runs[0].len(), 3);
/// assert_eq!(runs[1].len(), 2);
/// ```
pub fn split_runs(samples: &[FillSample], rule: ResetRule) -> Vec<&[FillSample]> {
    let mut runs = Vec::new();
    let mut run_start = 0;

    for i in 1..samples.len() {
        if rule.is_reset(samples[i - 1].fill_pct, samples[i].fill_pct) {
            runs.push(&samples[run_start..i]);
            run_start = i;
        }
    }
    if run_start < samples.len() {
        runs.push(&samples[run_start..]);
    }
    runs
}

/// Fits `fill = slope * (t - t0) + intercept` by ordinary least squares.
///
/// Returns `None` for fewer than two points or when all timestamps coincide.
pub fn fit_segment(run: &[FillSample]) -> Option<GrowthSegment> {
    if run.len() < 2 {
        return None;
    }

    let t0 = run[0].timestamp;
    let n = run.len() as f64;
    let mean_x = run.iter().map(|s| s.timestamp - t0).sum::<f64>() / n;
    let mean_y = run.iter().map(|s| s.fill_pct).sum::<f64>() / n;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for s in run {
        let dx = s.timestamp - t0 - mean_x;
        let dy = s.fill_pct - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx <= f64::EPSILON {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy <= f64::EPSILON {
        1.0
    } else {
        (sxy * sxy) / (sxx * syy)
    };

    Some(GrowthSegment {
        slope,
        intercept,
        start: t0,
        end: run[run.len() - 1].timestamp,
        reading_ids: run.iter().map(|s| s.reading_id).collect(),
        r_squared,
    })
}

/// Splits a series and fits every run that has enough points.
pub fn segment_series(samples: &[FillSample], rule: ResetRule) -> Vec<GrowthSegment> {
    split_runs(samples, rule)
        .into_iter()
        .filter_map(fit_segment)
        .collect()
}

/// Unweighted mean slope of all segments intersecting `[start, end]`.
///
/// ```
/// use molok_planner::growth::{average_growth_rate, GrowthSegment};
///
/// let seg = |slope: f64, start: f64, end: f64| GrowthSegment {
///     slope, intercept: 0.0, start, end, reading_ids: vec![], r_squared: 1.0,
/// };
/// let segments = vec![seg(1.0, 0.0, 10.0), seg(3.0, 20.0, 30.0), seg(100.0, 40.0, 50.0)];
///
/// assert_eq!(average_growth_rate(&segments, 5.0, 25.0).unwrap(), 2.0);
/// assert!(average_growth_rate(&segments, 60.0, 70.0).is_err());
/// ```
pub fn average_growth_rate(
    segments: &[GrowthSegment],
    start: f64,
    end: f64,
) -> Result<f64, EstimationError> {
    let slopes: Vec<f64> = segments
        .iter()
        .filter(|seg| seg.overlaps(start, end))
        .map(|seg| seg.slope)
        .collect();

    if slopes.is_empty() {
        return Err(EstimationError::NoOverlappingSegment { start, end });
    }
    Ok(slopes.iter().sum::<f64>() / slopes.len() as f64)
}

/// Segments `samples` and averages the slopes over `[start, end]`.
pub fn estimate_growth_rate(
    samples: &[FillSample],
    rule: ResetRule,
    start: f64,
    end: f64,
) -> Result<f64, EstimationError> {
    let segments = segment_series(samples, rule);
    if segments.is_empty() {
        return Err(EstimationError::EmptySeries);
    }
    average_growth_rate(&segments, start, end)
}

/// Estimates growth rates for many moloks in parallel.
///
/// Results keep the order of `histories`.
pub fn estimate_many(
    histories: &[(MolokId, Vec<FillSample>)],
    rule: ResetRule,
    start: f64,
    end: f64,
) -> Vec<(MolokId, Result<f64, EstimationError>)> {
    histories
        .par_iter()
        .map(|(id, samples)| (*id, estimate_growth_rate(samples, rule, start, end)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(fills: &[f64], step: f64) -> Vec<FillSample> {
        fills
            .iter()
            .enumerate()
            .map(|(i, &fill)| FillSample::new(i as u64 + 1, fill, 1_000.0 + i as f64 * step))
            .collect()
    }

    #[test]
    fn test_segment_splitting() {
        let samples = series(&[10.0, 40.0, 70.0, 5.0, 30.0], 3600.0);
        let segments = segment_series(&samples, ResetRule::OnDecrease);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].reading_ids, vec![1, 2, 3]);
        assert_eq!(segments[1].reading_ids, vec![4, 5]);
    }

    #[test]
    fn test_on_zero_rule_ignores_small_dips() {
        let samples = series(&[10.0, 40.0, 35.0, 0.0, 30.0], 3600.0);

        assert_eq!(split_runs(&samples, ResetRule::OnDecrease).len(), 3);
        let runs = split_runs(&samples, ResetRule::OnZero);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].len(), 3);
    }

    #[test]
    fn test_regression_round_trip() {
        let (a, b) = (0.0025, 12.5);
        let samples: Vec<FillSample> = (0..8)
            .map(|i| {
                let t = i as f64 * 900.0;
                FillSample::new(i, a * t + b, 50_000.0 + t)
            })
            .collect();

        let seg = fit_segment(&samples).unwrap();
        assert!((seg.slope - a).abs() < 1e-12);
        assert!((seg.intercept - b).abs() < 1e-9);
        assert!((seg.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(seg.start, 50_000.0);
        assert_eq!(seg.end, 50_000.0 + 7.0 * 900.0);
    }

    #[test]
    fn test_single_point_runs_are_skipped() {
        let samples = series(&[10.0, 40.0, 5.0], 60.0);
        let segments = segment_series(&samples, ResetRule::OnDecrease);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].reading_ids, vec![1, 2]);
    }

    #[test]
    fn test_identical_timestamps_are_skipped() {
        let samples = vec![FillSample::new(1, 10.0, 5.0), FillSample::new(2, 20.0, 5.0)];
        assert!(fit_segment(&samples).is_none());
        assert_eq!(
            estimate_growth_rate(&samples, ResetRule::OnDecrease, 0.0, 10.0),
            Err(EstimationError::EmptySeries)
        );
    }

    #[test]
    fn test_window_without_overlap_is_an_error() {
        let samples = series(&[10.0, 20.0, 30.0], 100.0);
        let err = estimate_growth_rate(&samples, ResetRule::OnDecrease, 0.0, 500.0).unwrap_err();
        assert_eq!(
            err,
            EstimationError::NoOverlappingSegment {
                start: 0.0,
                end: 500.0
            }
        );
    }

    #[test]
    fn test_estimate_many_keeps_order() {
        let histories = vec![
            (MolokId(3), series(&[0.0, 10.0], 100.0)),
            (MolokId(1), series(&[50.0], 100.0)),
            (MolokId(2), series(&[0.0, 20.0], 100.0)),
        ];
        let results = estimate_many(&histories, ResetRule::OnDecrease, 0.0, 10_000.0);

        assert_eq!(results[0].0, MolokId(3));
        assert!((results[0].1.clone().unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(results[1].1, Err(EstimationError::EmptySeries));
        assert!((results[2].1.clone().unwrap() - 0.2).abs() < 1e-12);
    }
}
