//! Travel-time and travel-distance matrices.
//!
//! Index 0 is always the depot, index `i >= 1` is the `i - 1`th molok of the
//! input. Distances are great-circle meters. Travel times are seconds and
//! include the emptying duration of the origin node, so the depot row is the
//! only place where emptying is not charged:
//!
//! `time[0][j] == time[j][0] - emptying_secs`

use crate::domain::{Location, AVERAGE_SPEED_KMPH};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for matrix construction.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoError {
    /// A coordinate is not finite or out of range.
    InvalidCoordinate { index: usize, latitude: f64, longitude: f64 },
    /// Speed must be finite and positive.
    InvalidSpeed(f64),
    /// Emptying duration must not be negative.
    NegativeEmptyingDuration(i64),
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoError::InvalidCoordinate {
                index,
                latitude,
                longitude,
            } => write!(
                f,
                "Invalid coordinate at node {}: ({}, {})",
                index, latitude, longitude
            ),
            GeoError::InvalidSpeed(speed) => write!(f, "Invalid travel speed: {} km/h", speed),
            GeoError::NegativeEmptyingDuration(secs) => {
                write!(f, "Emptying duration must not be negative: {}s", secs)
            }
        }
    }
}

impl std::error::Error for GeoError {}

/// Dense row-major square matrix of integer costs.
///
/// ```
/// use molok_planner::geometry::SquareMatrix;
///
/// let mut m = SquareMatrix::zeros(3);
/// m.set(1, 2, 7);
/// assert_eq!(m.get(1, 2), 7);
/// assert_eq!(m.get(2, 1), 0);
/// assert_eq!(m.size(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareMatrix {
    size: usize,
    data: Vec<i64>,
}

impl SquareMatrix {
    /// Creates an `n x n` matrix of zeros.
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            data: vec![0; size * size],
        }
    }

    /// Builds a matrix from nested rows. Returns `None` if the rows are not square.
    ///
    /// ```
    /// use molok_planner::geometry::SquareMatrix;
    ///
    /// let m = SquareMatrix::from_rows(vec![vec![0, 1], vec![2, 0]]).unwrap();
    /// assert_eq!(m.get(1, 0), 2);
    /// assert!(SquareMatrix::from_rows(vec![vec![0, 1]]).is_none());
    /// ```
    pub fn from_rows(rows: Vec<Vec<i64>>) -> Option<Self> {
        let size = rows.len();
        if rows.iter().any(|row| row.len() != size) {
            return None;
        }
        Some(Self {
            size,
            data: rows.into_iter().flatten().collect(),
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn get(&self, from: usize, to: usize) -> i64 {
        self.data[from * self.size + to]
    }

    #[inline]
    pub fn set(&mut self, from: usize, to: usize, value: i64) {
        self.data[from * self.size + to] = value;
    }

    #[inline]
    pub fn row(&self, from: usize) -> &[i64] {
        &self.data[from * self.size..(from + 1) * self.size]
    }

    /// Smallest entry, or `None` for an empty matrix.
    pub fn min_value(&self) -> Option<i64> {
        self.data.iter().copied().min()
    }

    /// Row sums over the non-depot block (rows and columns `1..n`).
    ///
    /// Element `k` is the sum for node `k + 1`. This is the product of the
    /// molok-to-molok sub-matrix with an all-ones vector.
    ///
    /// ```
    /// use molok_planner::geometry::SquareMatrix;
    ///
    /// let m = SquareMatrix::from_rows(vec![
    ///     vec![0, 9, 9],
    ///     vec![9, 0, 4],
    ///     vec![9, 4, 0],
    /// ]).unwrap();
    /// assert_eq!(m.row_sums_excluding_depot(), vec![4, 4]);
    /// ```
    pub fn row_sums_excluding_depot(&self) -> Vec<i64> {
        (1..self.size)
            .map(|i| self.row(i)[1..].iter().sum())
            .collect()
    }
}

/// Parameters that turn distances into travel times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSettings {
    /// Time spent emptying one molok, in seconds.
    pub emptying_secs: i64,
    /// Assumed average travel speed in km/h.
    pub speed_kmph: f64,
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            emptying_secs: 0,
            speed_kmph: AVERAGE_SPEED_KMPH,
        }
    }
}

impl MatrixSettings {
    pub fn new(emptying_secs: i64, speed_kmph: f64) -> Self {
        Self {
            emptying_secs,
            speed_kmph,
        }
    }

    /// Speed in meters per second.
    #[inline]
    fn speed_mps(&self) -> f64 {
        self.speed_kmph * 1000.0 / 3600.0
    }
}

/// Travel time (seconds) and distance (meters) between every pair of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelMatrices {
    pub time: SquareMatrix,
    pub distance: SquareMatrix,
}

impl TravelMatrices {
    /// Number of nodes, depot included.
    #[inline]
    pub fn size(&self) -> usize {
        self.distance.size()
    }
}

/// Builds the travel-time and travel-distance matrices for a depot and its moloks.
///
/// Distances are rounded to whole meters. Travel times are
/// `distance / speed + emptying`, rounded to whole seconds, except that
/// leaving the depot charges no emptying.
///
/// # Examples
///
/// ```
/// use molok_planner::domain::Location;
/// use molok_planner::geometry::{build_matrices, MatrixSettings};
///
/// let depot = Location::new(45.0, 10.0);
/// let moloks = [Location::new(45.0, 11.0), Location::new(44.0, 10.0)];
/// let settings = MatrixSettings::new(600, 50.0);
///
/// let m = build_matrices(&depot, &moloks, &settings).unwrap();
/// assert_eq!(m.size(), 3);
/// assert_eq!(m.time.get(0, 1), m.time.get(1, 0) - 600);
/// assert_eq!(m.distance.get(1, 2), m.distance.get(2, 1));
/// ```
pub fn build_matrices(
    depot: &Location,
    moloks: &[Location],
    settings: &MatrixSettings,
) -> Result<TravelMatrices, GeoError> {
    if !(settings.speed_kmph.is_finite() && settings.speed_kmph > 0.0) {
        return Err(GeoError::InvalidSpeed(settings.speed_kmph));
    }
    if settings.emptying_secs < 0 {
        return Err(GeoError::NegativeEmptyingDuration(settings.emptying_secs));
    }

    let locations: Vec<&Location> = std::iter::once(depot).chain(moloks.iter()).collect();
    if let Some((index, loc)) = locations.iter().enumerate().find(|(_, l)| !l.is_valid()) {
        return Err(GeoError::InvalidCoordinate {
            index,
            latitude: loc.latitude,
            longitude: loc.longitude,
        });
    }

    let n = locations.len();
    let speed = settings.speed_mps();
    let emptying = settings.emptying_secs;
    let mut time = SquareMatrix::zeros(n);
    let mut distance = SquareMatrix::zeros(n);

    // Upper triangle only, then mirror
    for i in 0..n {
        for j in (i + 1)..n {
            let meters = locations[i].distance_meters(locations[j]);
            let drive = (meters / speed + emptying as f64).round() as i64;

            distance.set(i, j, meters.round() as i64);
            distance.set(j, i, meters.round() as i64);
            time.set(i, j, drive);
            time.set(j, i, drive);
        }
    }

    // Nothing has been emptied yet when leaving the depot
    for j in 1..n {
        time.set(0, j, time.get(j, 0) - emptying);
    }

    Ok(TravelMatrices { time, distance })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> (Location, Vec<Location>) {
        (
            Location::new(45.0, 10.0),
            vec![
                Location::new(45.0, 11.0),
                Location::new(44.0, 10.0),
                Location::new(44.0, 11.0),
            ],
        )
    }

    #[test]
    fn test_symmetry_away_from_depot() {
        let (depot, moloks) = scenario();
        let m = build_matrices(&depot, &moloks, &MatrixSettings::new(600, 50.0)).unwrap();

        for i in 0..m.size() {
            for j in 0..m.size() {
                assert_eq!(m.distance.get(i, j), m.distance.get(j, i));
                if i != 0 && j != 0 {
                    assert_eq!(m.time.get(i, j), m.time.get(j, i));
                }
            }
        }
    }

    #[test]
    fn test_depot_row_skips_emptying() {
        let (depot, moloks) = scenario();
        let m = build_matrices(&depot, &moloks, &MatrixSettings::new(600, 50.0)).unwrap();

        for j in 1..m.size() {
            assert_eq!(m.time.get(0, j), m.time.get(j, 0) - 600);
        }
    }

    #[test]
    fn test_diagonal_is_zero() {
        let (depot, moloks) = scenario();
        let m = build_matrices(&depot, &moloks, &MatrixSettings::new(600, 50.0)).unwrap();
        for i in 0..m.size() {
            assert_eq!(m.time.get(i, i), 0);
            assert_eq!(m.distance.get(i, i), 0);
        }
    }

    #[test]
    fn test_travel_time_matches_speed() {
        let depot = Location::new(44.0, 10.0);
        let moloks = vec![Location::new(45.0, 10.0)];
        let m = build_matrices(&depot, &moloks, &MatrixSettings::new(0, 50.0)).unwrap();

        // ~111.2 km at 50 km/h is ~8006 s
        let t = m.time.get(0, 1);
        assert!((t - 8006).abs() <= 2, "got {}", t);
        assert!((m.distance.get(0, 1) - 111_195).abs() < 100);
    }

    #[test]
    fn test_invalid_coordinate_is_rejected() {
        let depot = Location::new(45.0, 10.0);
        let moloks = vec![Location::new(45.0, 11.0), Location::new(f64::NAN, 0.0)];
        let err = build_matrices(&depot, &moloks, &MatrixSettings::default()).unwrap_err();
        assert!(matches!(err, GeoError::InvalidCoordinate { index: 2, .. }));
    }

    #[test]
    fn test_invalid_speed_is_rejected() {
        let depot = Location::new(45.0, 10.0);
        let err = build_matrices(&depot, &[], &MatrixSettings::new(0, 0.0)).unwrap_err();
        assert_eq!(err, GeoError::InvalidSpeed(0.0));
    }

    #[test]
    fn test_depot_only() {
        let depot = Location::new(45.0, 10.0);
        let m = build_matrices(&depot, &[], &MatrixSettings::default()).unwrap();
        assert_eq!(m.size(), 1);
        assert!(m.distance.row_sums_excluding_depot().is_empty());
    }
}
