//! Domain model for molok collection planning.
//!
//! # Overview
//!
//! - Geographic [`Location`]s with haversine distance calculation
//! - The [`Depot`] every truck starts from and returns to
//! - [`Molok`] containers whose fill level grows over time
//! - A homogeneous [`TruckFleet`]
//! - Raw fill-level [`Reading`]s as delivered by telemetry
//!
//! # Units
//!
//! Times of day and durations are seconds. Growth rates are percentage
//! points per second. Distances are meters, truck range is kilometers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Average driving speed in km/h for travel time estimation.
pub const AVERAGE_SPEED_KMPH: f64 = 50.0;

/// Converts minutes to seconds.
///
/// ```
/// use molok_planner::domain::minutes;
///
/// assert_eq!(minutes(10), 600);
/// ```
#[inline]
pub const fn minutes(n: i64) -> i64 {
    n * 60
}

/// Seconds added before truncating a deadline.
///
/// Float division can land just below a whole second, e.g.
/// 23999.999999999996 for an exact 24000.
const DEADLINE_ROUNDING_TOLERANCE_SECS: f64 = 1e-6;

/// Earth radius in meters for haversine calculation.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geographic location with latitude and longitude.
///
/// # Examples
///
/// ```
/// use molok_planner::domain::Location;
///
/// let aalborg = Location::new(57.0483, 9.9153);
/// let aarhus = Location::new(56.1629, 10.2039);
///
/// // Distance is approximately 100 km
/// let distance = aalborg.distance_meters(&aarhus);
/// assert!(distance > 95_000.0 && distance < 105_000.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl Location {
    /// Creates a new location.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns true if both coordinates are finite and within range.
    ///
    /// ```
    /// use molok_planner::domain::Location;
    ///
    /// assert!(Location::new(45.0, 10.0).is_valid());
    /// assert!(!Location::new(91.0, 10.0).is_valid());
    /// assert!(!Location::new(f64::NAN, 10.0).is_valid());
    /// ```
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Calculates the great-circle distance in meters using the haversine formula.
    ///
    /// # Examples
    ///
    /// ```
    /// use molok_planner::domain::Location;
    ///
    /// let a = Location::new(0.0, 0.0);
    /// let b = Location::new(0.0, 1.0);
    ///
    /// // 1 degree of longitude at equator is about 111 km
    /// let dist = a.distance_meters(&b);
    /// assert!(dist > 110_000.0 && dist < 112_000.0);
    /// ```
    pub fn distance_meters(&self, other: &Location) -> f64 {
        if self.latitude == other.latitude && self.longitude == other.longitude {
            return 0.0;
        }

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let lon1 = self.longitude.to_radians();
        let lon2 = other.longitude.to_radians();

        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_M * c
    }
}

/// Stable identifier of a molok, independent of its position in any problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MolokId(pub u32);

impl fmt::Display for MolokId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "molok-{}", self.0)
    }
}

/// The single depot of a planning run. Always node 0 of a problem.
///
/// ```
/// use molok_planner::domain::{Depot, Location};
///
/// let depot = Depot::new(Location::new(45.0, 10.0), 6 * 3600, 22 * 3600);
/// assert_eq!(depot.window_secs(), 16 * 3600);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depot {
    pub location: Location,
    /// Opening time (seconds since midnight).
    pub open_secs: i64,
    /// Closing time (seconds since midnight).
    pub close_secs: i64,
}

impl Depot {
    pub fn new(location: Location, open_secs: i64, close_secs: i64) -> Self {
        Self {
            location,
            open_secs,
            close_secs,
        }
    }

    /// Length of the opening window in seconds.
    #[inline]
    pub fn window_secs(&self) -> i64 {
        self.close_secs - self.open_secs
    }
}

/// A waste container with a linearly growing fill level.
///
/// # Examples
///
/// ```
/// use molok_planner::domain::{Location, Molok, MolokId};
///
/// // 80% full, 500 kg capacity, growing 0.05 percentage points per minute
/// let molok = Molok::new(MolokId(7), Location::new(45.0, 11.0), 80.0, 500.0)
///     .with_growth_per_minute(0.05);
///
/// assert_eq!(molok.demand_kg(), 400);
/// // 20 points left at 0.05/min = 400 minutes
/// assert_eq!(molok.deadline_secs(), Some(400 * 60));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Molok {
    pub id: MolokId,
    pub location: Location,
    /// Last known fill percentage. Values above 100 mean already overflowing.
    pub fill_pct: f64,
    /// Capacity in kilograms.
    pub capacity_kg: f64,
    /// Estimated growth in percentage points per second.
    #[serde(default)]
    pub growth_rate: f64,
}

impl Molok {
    /// Creates a molok with zero growth.
    pub fn new(id: MolokId, location: Location, fill_pct: f64, capacity_kg: f64) -> Self {
        Self {
            id,
            location,
            fill_pct,
            capacity_kg,
            growth_rate: 0.0,
        }
    }

    /// Sets the growth rate in percentage points per second.
    pub fn with_growth_rate(mut self, pct_per_sec: f64) -> Self {
        self.growth_rate = pct_per_sec;
        self
    }

    /// Sets the growth rate in percentage points per minute.
    pub fn with_growth_per_minute(mut self, pct_per_min: f64) -> Self {
        self.growth_rate = pct_per_min / 60.0;
        self
    }

    /// Current content weight in kilograms, rounded to the nearest integer.
    ///
    /// ```
    /// use molok_planner::domain::{Location, Molok, MolokId};
    ///
    /// let molok = Molok::new(MolokId(1), Location::new(0.0, 0.0), 33.3, 200.0);
    /// assert_eq!(molok.demand_kg(), 67); // 66.6 rounds up
    /// ```
    #[inline]
    pub fn demand_kg(&self) -> i64 {
        (self.fill_pct / 100.0 * self.capacity_kg).round() as i64
    }

    /// Seconds from route start until the molok reaches 100%.
    ///
    /// Already-full moloks get `Some(0)`. Moloks that never fill (no positive
    /// growth) get `None`.
    ///
    /// ```
    /// use molok_planner::domain::{Location, Molok, MolokId};
    ///
    /// let loc = Location::new(0.0, 0.0);
    /// let full = Molok::new(MolokId(1), loc, 104.0, 200.0).with_growth_per_minute(0.1);
    /// assert_eq!(full.deadline_secs(), Some(0));
    ///
    /// let idle = Molok::new(MolokId(2), loc, 40.0, 200.0);
    /// assert_eq!(idle.deadline_secs(), None);
    /// ```
    pub fn deadline_secs(&self) -> Option<i64> {
        if self.fill_pct >= 100.0 {
            return Some(0);
        }
        if !(self.growth_rate.is_finite() && self.growth_rate > 0.0) {
            return None;
        }
        let secs =
            ((100.0 - self.fill_pct) / self.growth_rate + DEADLINE_ROUNDING_TOLERANCE_SECS).floor();
        Some(secs.max(0.0) as i64)
    }

    /// Extrapolated fill percentage `secs` seconds after route start.
    #[inline]
    pub fn fill_after(&self, secs: i64) -> f64 {
        self.fill_pct + self.growth_rate * secs as f64
    }
}

/// A homogeneous fleet of collection trucks.
///
/// ```
/// use molok_planner::domain::TruckFleet;
///
/// let fleet = TruckFleet::new(2, 3000, 150.0, 6 * 3600, 14 * 3600);
/// assert_eq!(fleet.shift_secs(), 8 * 3600);
/// assert_eq!(fleet.range_meters(), 150_000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruckFleet {
    /// Number of trucks.
    pub count: usize,
    /// Per-truck capacity in kilograms.
    pub capacity_kg: i64,
    /// Maximum driving distance per truck in kilometers.
    pub range_km: f64,
    /// Shift start (seconds since midnight).
    pub shift_start_secs: i64,
    /// Shift stop (seconds since midnight).
    pub shift_end_secs: i64,
}

impl TruckFleet {
    pub fn new(
        count: usize,
        capacity_kg: i64,
        range_km: f64,
        shift_start_secs: i64,
        shift_end_secs: i64,
    ) -> Self {
        Self {
            count,
            capacity_kg,
            range_km,
            shift_start_secs,
            shift_end_secs,
        }
    }

    #[inline]
    pub fn shift_secs(&self) -> i64 {
        self.shift_end_secs - self.shift_start_secs
    }

    #[inline]
    pub fn range_meters(&self) -> i64 {
        (self.range_km * 1000.0).round() as i64
    }
}

/// One persisted fill-level reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Storage-assigned id, strictly increasing in insertion order.
    pub id: u64,
    pub molok: MolokId,
    pub fill_pct: f64,
    pub location: Option<Location>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}
