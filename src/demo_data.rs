//! Demo data generators for molok collection planning.
//!
//! Provides two datasets:
//! - The three-molok scenario (2 trucks, moloks one degree around the depot)
//! - Aalborg (seeded, moloks normally distributed around the city depot)
//!
//! [`FillSimulator`] produces synthetic sensor readings for the Aalborg
//! moloks so the telemetry path can be exercised without hardware.

use chrono::{NaiveDateTime, TimeDelta};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::domain::{minutes, Depot, Location, Molok, MolokId, TruckFleet, AVERAGE_SPEED_KMPH};
use crate::planner::PlanningRequest;
use crate::telemetry::IncomingReading;

/// 2023-04-17 06:00:00 UTC, the start of every demo route.
const DEMO_ROUTE_START_UNIX: i64 = 1_681_711_200;

/// Aalborg depot coordinates.
const AALBORG_DEPOT: (f64, f64) = (57.048_301_687_573_87, 9.915_331_444_926_698);

/// Standard deviation of molok positions, about 550 meters.
const AALBORG_SPREAD_DEG: f64 = 0.002_501_628_166_776_015_4;

/// Daily growth distribution in percentage points per day.
const DAILY_GROWTH_MEAN: f64 = 10.0;
const DAILY_GROWTH_STD: f64 = 3.0;

/// Per-sample deviation applied to the daily growth.
const SAMPLE_DEVIATION_MEAN: f64 = 1.0;
const SAMPLE_DEVIATION_STD: f64 = 0.1;

const SECS_PER_DAY: f64 = 86_400.0;

/// Capacity of an Aalborg molok in kilograms.
pub const AALBORG_MOLOK_CAPACITY_KG: f64 = 500.0;

/// Route start shared by all demo requests.
pub fn demo_route_start() -> NaiveDateTime {
    NaiveDateTime::default() + TimeDelta::seconds(DEMO_ROUTE_START_UNIX)
}

/// Draws from `N(mean, std)`.
fn normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std * z
}

/// Depot open 06:00-22:00 with a fleet working 06:00-14:00.
fn day_shift(location: Location, trucks: usize, capacity_kg: i64, range_km: f64) -> (Depot, TruckFleet) {
    (
        Depot::new(location, 6 * 3600, 22 * 3600),
        TruckFleet::new(trucks, capacity_kg, range_km, 6 * 3600, 14 * 3600),
    )
}

/// Three moloks around a depot at (45, 10), served by two 3000 kg trucks.
///
/// # Examples
///
/// ```
/// use molok_planner::demo_data::three_container_scenario;
///
/// let request = three_container_scenario();
/// assert_eq!(request.moloks.len(), 3);
/// assert_eq!(request.fleet.count, 2);
/// assert_eq!(request.emptying_secs, 600);
/// ```
pub fn three_container_scenario() -> PlanningRequest {
    let (depot, fleet) = day_shift(Location::new(45.0, 10.0), 2, 3000, 400.0);
    let moloks = vec![
        Molok::new(MolokId(1), Location::new(45.0, 11.0), 80.0, 500.0).with_growth_per_minute(0.05),
        Molok::new(MolokId(2), Location::new(44.0, 10.0), 90.0, 500.0).with_growth_per_minute(0.04),
        Molok::new(MolokId(3), Location::new(44.0, 11.0), 75.0, 500.0).with_growth_per_minute(0.06),
    ];

    PlanningRequest {
        depot,
        moloks,
        fleet,
        emptying_secs: minutes(10),
        speed_kmph: AVERAGE_SPEED_KMPH,
        route_start: demo_route_start(),
    }
}

/// Molok ids and positions normally distributed around the Aalborg depot.
///
/// ```
/// use molok_planner::demo_data::aalborg_sites;
///
/// let sites = aalborg_sites(7, 25);
/// assert_eq!(sites.len(), 25);
/// assert_eq!(sites, aalborg_sites(7, 25));
/// ```
pub fn aalborg_sites(seed: u64, count: usize) -> Vec<(MolokId, Location)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let lat = normal(&mut rng, AALBORG_DEPOT.0, AALBORG_SPREAD_DEG);
            let lng = normal(&mut rng, AALBORG_DEPOT.1, AALBORG_SPREAD_DEG);
            (MolokId(i as u32 + 1), Location::new(lat, lng))
        })
        .collect()
}

/// Generates an Aalborg request with `count` moloks.
///
/// Initial fill is uniform in 0-50%, growth is drawn from the daily growth
/// distribution.
///
/// # Examples
///
/// ```
/// use molok_planner::demo_data::generate_aalborg;
///
/// let request = generate_aalborg(42, 30);
/// assert_eq!(request.moloks.len(), 30);
/// assert!(request.moloks.iter().all(|m| (0.0..=50.0).contains(&m.fill_pct)));
/// assert!(request.moloks.iter().all(|m| m.growth_rate > 0.0));
/// ```
pub fn generate_aalborg(seed: u64, count: usize) -> PlanningRequest {
    let simulator = FillSimulator::new(seed, &aalborg_sites(seed, count));
    aalborg_request(simulator.moloks(AALBORG_MOLOK_CAPACITY_KG))
}

/// The Aalborg depot and fleet serving `moloks`.
pub fn aalborg_request(moloks: Vec<Molok>) -> PlanningRequest {
    let (depot, fleet) = day_shift(Location::new(AALBORG_DEPOT.0, AALBORG_DEPOT.1), 2, 3000, 100.0);
    PlanningRequest {
        depot,
        moloks,
        fleet,
        emptying_secs: minutes(10),
        speed_kmph: AVERAGE_SPEED_KMPH,
        route_start: demo_route_start(),
    }
}

#[derive(Debug, Clone)]
struct SimulatedMolok {
    id: MolokId,
    location: Location,
    fill_pct: f64,
    /// Percentage points per day.
    daily_growth: f64,
}

/// Seeded generator of synthetic sensor readings.
///
/// Each molok fills at its own daily rate with a small per-sample deviation.
/// A molok reaching 100% is emptied and reports zero.
///
/// ```
/// use molok_planner::demo_data::{aalborg_sites, FillSimulator};
///
/// let mut sim = FillSimulator::new(1, &aalborg_sites(1, 4));
/// let readings = sim.run(0.0, 86_400.0, 3_600.0);
/// assert_eq!(readings.len(), 4 * 25);
/// ```
#[derive(Debug, Clone)]
pub struct FillSimulator {
    rng: StdRng,
    moloks: Vec<SimulatedMolok>,
}

impl FillSimulator {
    pub fn new(seed: u64, sites: &[(MolokId, Location)]) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let moloks = sites
            .iter()
            .map(|&(id, location)| SimulatedMolok {
                id,
                location,
                fill_pct: rng.gen_range(0.0..=50.0),
                daily_growth: normal(&mut rng, DAILY_GROWTH_MEAN, DAILY_GROWTH_STD).max(1.0),
            })
            .collect();
        Self { rng, moloks }
    }

    /// Current state as planning moloks with growth in points per second.
    pub fn moloks(&self, capacity_kg: f64) -> Vec<Molok> {
        self.moloks
            .iter()
            .map(|m| {
                Molok::new(m.id, m.location, m.fill_pct, capacity_kg)
                    .with_growth_rate(m.daily_growth / SECS_PER_DAY)
            })
            .collect()
    }

    /// Advances every molok by `elapsed_secs` and reports one reading each.
    pub fn step(&mut self, timestamp: f64, elapsed_secs: f64) -> Vec<IncomingReading> {
        let days = elapsed_secs / SECS_PER_DAY;
        let mut readings = Vec::with_capacity(self.moloks.len());
        for m in &mut self.moloks {
            let deviation = normal(&mut self.rng, SAMPLE_DEVIATION_MEAN, SAMPLE_DEVIATION_STD);
            m.fill_pct += m.daily_growth * days * deviation.max(0.0);
            if m.fill_pct >= 100.0 {
                m.fill_pct = 0.0;
            }
            readings.push(IncomingReading::new(m.id, m.fill_pct, Some(m.location), timestamp));
        }
        readings
    }

    /// Readings every `interval_secs` from `start` to `end` inclusive.
    pub fn run(&mut self, start: f64, end: f64, interval_secs: f64) -> Vec<IncomingReading> {
        let mut readings = Vec::new();
        if interval_secs <= 0.0 {
            return readings;
        }
        let mut t = start;
        let mut elapsed = 0.0;
        while t <= end {
            readings.extend(self.step(t, elapsed));
            elapsed = interval_secs;
            t += interval_secs;
        }
        readings
    }
}

/// Returns all available demo dataset names.
pub fn available_datasets() -> &'static [&'static str] {
    &["THREE_CONTAINER", "AALBORG"]
}

/// Generates demo data by name.
///
/// # Examples
///
/// ```
/// use molok_planner::demo_data::generate_by_name;
///
/// let request = generate_by_name("aalborg").unwrap();
/// assert_eq!(request.moloks.len(), 40);
///
/// assert!(generate_by_name("UNKNOWN").is_none());
/// ```
pub fn generate_by_name(name: &str) -> Option<PlanningRequest> {
    match name.to_uppercase().as_str() {
        "THREE_CONTAINER" => Some(three_container_scenario()),
        "AALBORG" => Some(generate_aalborg(0, 40)),
        _ => None,
    }
}
