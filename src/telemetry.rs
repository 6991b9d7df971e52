//! Fill-level readings: storage, ingestion and molok assembly.
//!
//! Sensors report continuously. Readings are drained into a [`ReadingStore`]
//! by a background task so the planner never waits on telemetry; it only
//! reads a consistent snapshot when it assembles the moloks for a run.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{Location, Molok, MolokId, Reading};
use crate::growth::{estimate_many, EstimationError, FillSample, ResetRule};

/// Depth of a standard molok in centimeters.
pub const DEFAULT_MOLOK_DEPTH_CM: f64 = 200.0;

/// Growth is estimated over the last week by default.
pub const DEFAULT_ESTIMATION_WINDOW_SECS: f64 = 7.0 * 86_400.0;

/// Converts a measuring device's distance to the waste surface into a fill
/// percentage.
///
/// ```
/// use molok_planner::telemetry::fill_pct_from_distance;
///
/// assert_eq!(fill_pct_from_distance(50.0, 200.0), 75.0);
/// assert_eq!(fill_pct_from_distance(200.0, 200.0), 0.0);
/// ```
#[inline]
pub fn fill_pct_from_distance(distance_cm: f64, depth_cm: f64) -> f64 {
    100.0 * (1.0 - distance_cm / depth_cm)
}

/// A reading as it arrives from a sensor, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingReading {
    pub molok: MolokId,
    pub fill_pct: f64,
    pub location: Option<Location>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl IncomingReading {
    pub fn new(molok: MolokId, fill_pct: f64, location: Option<Location>, timestamp: f64) -> Self {
        Self {
            molok,
            fill_pct,
            location,
            timestamp,
        }
    }

    /// Builds a reading from a raw distance measurement.
    pub fn from_distance(
        molok: MolokId,
        distance_cm: f64,
        depth_cm: f64,
        location: Option<Location>,
        timestamp: f64,
    ) -> Self {
        Self::new(molok, fill_pct_from_distance(distance_cm, depth_cm), location, timestamp)
    }
}

/// Persistence of fill-level readings.
pub trait ReadingStore: Send + Sync {
    /// Stores a reading and returns it with its assigned id.
    fn record(&self, reading: IncomingReading) -> Reading;

    /// The newest reading of every molok, taken as one consistent view.
    fn latest_snapshot(&self) -> Vec<Reading>;

    /// All readings of one molok, oldest first.
    fn history(&self, molok: MolokId) -> Vec<Reading>;

    /// Writes a zero-fill reading for every molok at `at` (Unix seconds).
    /// Returns the number of moloks marked.
    fn mark_emptied(&self, moloks: &[MolokId], at: f64) -> usize;
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: u64,
    by_molok: BTreeMap<MolokId, Vec<Reading>>,
}

impl StoreInner {
    fn insert(&mut self, incoming: IncomingReading) -> Reading {
        self.next_id += 1;
        let reading = Reading {
            id: self.next_id,
            molok: incoming.molok,
            fill_pct: incoming.fill_pct,
            location: incoming.location,
            timestamp: incoming.timestamp,
        };
        let readings = self.by_molok.entry(reading.molok).or_default();
        // Equal timestamps keep arrival order
        let at = readings.partition_point(|r| r.timestamp.total_cmp(&reading.timestamp).is_le());
        readings.insert(at, reading.clone());
        reading
    }

    fn last_location(&self, molok: MolokId) -> Option<Location> {
        self.by_molok
            .get(&molok)?
            .iter()
            .rev()
            .find_map(|r| r.location)
    }
}

/// In-process [`ReadingStore`].
///
/// Ids increase strictly in insertion order. Each molok's readings are kept
/// sorted by timestamp, so a late reading lands in place and the newest
/// reading is the one with the latest timestamp.
///
/// ```
/// use molok_planner::domain::{Location, MolokId};
/// use molok_planner::telemetry::{InMemoryReadingStore, IncomingReading, ReadingStore};
///
/// let store = InMemoryReadingStore::new();
/// let here = Some(Location::new(57.05, 9.92));
/// store.record(IncomingReading::new(MolokId(1), 20.0, here, 1_000.0));
/// store.record(IncomingReading::new(MolokId(1), 35.0, None, 2_000.0));
///
/// let snapshot = store.latest_snapshot();
/// assert_eq!(snapshot.len(), 1);
/// assert_eq!(snapshot[0].fill_pct, 35.0);
///
/// store.mark_emptied(&[MolokId(1)], 3_000.0);
/// let history = store.history(MolokId(1));
/// assert_eq!(history.last().unwrap().fill_pct, 0.0);
/// assert_eq!(history.last().unwrap().location, here);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryReadingStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_molok.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReadingStore for InMemoryReadingStore {
    fn record(&self, reading: IncomingReading) -> Reading {
        self.inner.write().insert(reading)
    }

    fn latest_snapshot(&self) -> Vec<Reading> {
        let inner = self.inner.read();
        inner
            .by_molok
            .values()
            .filter_map(|readings| {
                readings
                    .iter()
                    .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
                    .cloned()
            })
            .collect()
    }

    fn history(&self, molok: MolokId) -> Vec<Reading> {
        self.inner
            .read()
            .by_molok
            .get(&molok)
            .cloned()
            .unwrap_or_default()
    }

    fn mark_emptied(&self, moloks: &[MolokId], at: f64) -> usize {
        let mut inner = self.inner.write();
        for &molok in moloks {
            let location = inner.last_location(molok);
            inner.insert(IncomingReading::new(molok, 0.0, location, at));
        }
        debug!(moloks = moloks.len(), at, "Marked moloks emptied");
        moloks.len()
    }
}

/// Drains `rx` into `store` until every sender is dropped.
///
/// The task resolves to the number of readings stored. Readings with a
/// non-finite fill level or timestamp are discarded.
pub fn spawn_ingestion<S>(store: Arc<S>, mut rx: mpsc::Receiver<IncomingReading>) -> JoinHandle<usize>
where
    S: ReadingStore + 'static,
{
    tokio::spawn(async move {
        let mut stored = 0usize;
        while let Some(reading) = rx.recv().await {
            if !(reading.fill_pct.is_finite() && reading.timestamp.is_finite()) {
                warn!(molok = %reading.molok, "Discarding malformed reading");
                continue;
            }
            let reading = store.record(reading);
            debug!(id = reading.id, molok = %reading.molok, fill_pct = reading.fill_pct, "Stored reading");
            stored += 1;
        }
        info!(stored, "Ingestion finished");
        stored
    })
}

/// Why a molok could not be turned into a planning input.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// No reading of the molok ever carried a position.
    MissingPosition,
    Estimation(EstimationError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingPosition => write!(f, "No known position"),
            SkipReason::Estimation(e) => write!(f, "{}", e),
        }
    }
}

/// Moloks ready for planning plus the ones that had to be left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyReport {
    pub moloks: Vec<Molok>,
    pub skipped: Vec<(MolokId, SkipReason)>,
}

/// Builds planning moloks from the latest snapshot and each molok's history.
///
/// Growth rates are averaged over segments overlapping `[start, end]`
/// (Unix seconds). Every molok gets the same `capacity_kg`.
pub fn assemble_moloks<S: ReadingStore + ?Sized>(
    store: &S,
    capacity_kg: f64,
    rule: ResetRule,
    start: f64,
    end: f64,
) -> AssemblyReport {
    let snapshot = store.latest_snapshot();
    let histories: Vec<(MolokId, Vec<Reading>)> = snapshot
        .iter()
        .map(|latest| (latest.molok, store.history(latest.molok)))
        .collect();

    let samples: Vec<(MolokId, Vec<FillSample>)> = histories
        .iter()
        .map(|(id, readings)| {
            let samples = readings
                .iter()
                .map(|r| FillSample::new(r.id, r.fill_pct, r.timestamp))
                .collect();
            (*id, samples)
        })
        .collect();
    let rates = estimate_many(&samples, rule, start, end);

    let mut report = AssemblyReport::default();
    for ((latest, (_, readings)), (id, rate)) in snapshot.iter().zip(&histories).zip(rates) {
        let location = latest
            .location
            .or_else(|| readings.iter().rev().find_map(|r| r.location));
        let Some(location) = location else {
            report.skipped.push((id, SkipReason::MissingPosition));
            continue;
        };
        match rate {
            Ok(rate) => report.moloks.push(
                Molok::new(id, location, latest.fill_pct, capacity_kg).with_growth_rate(rate),
            ),
            Err(e) => report.skipped.push((id, SkipReason::Estimation(e))),
        }
    }

    if !report.skipped.is_empty() {
        warn!(
            assembled = report.moloks.len(),
            skipped = report.skipped.len(),
            "Some moloks could not be assembled"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(store: &InMemoryReadingStore, molok: u32, fills: &[f64], location: Option<Location>) {
        for (i, &fill) in fills.iter().enumerate() {
            store.record(IncomingReading::new(MolokId(molok), fill, location, i as f64 * 3600.0));
        }
    }

    #[test]
    fn test_ids_increase_in_insertion_order() {
        let store = InMemoryReadingStore::new();
        let a = store.record(IncomingReading::new(MolokId(2), 10.0, None, 5.0));
        let b = store.record(IncomingReading::new(MolokId(1), 10.0, None, 1.0));
        assert!(b.id > a.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_has_one_row_per_molok() {
        let store = InMemoryReadingStore::new();
        feed(&store, 1, &[10.0, 20.0, 30.0], None);
        feed(&store, 2, &[50.0, 60.0], None);
        let mut snapshot = store.latest_snapshot();
        snapshot.sort_by_key(|r| r.molok);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].fill_pct, 30.0);
        assert_eq!(snapshot[1].fill_pct, 60.0);
    }

    #[test]
    fn test_late_reading_is_ordered_by_timestamp() {
        let store = InMemoryReadingStore::new();
        for (hours, fill) in [(0.0, 10.0), (1.0, 20.0), (3.0, 40.0), (2.0, 30.0)] {
            store.record(IncomingReading::new(MolokId(1), fill, None, hours * 3600.0));
        }

        let history = store.history(MolokId(1));
        let timestamps: Vec<f64> = history.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![0.0, 3600.0, 7200.0, 10800.0]);
        let fills: Vec<f64> = history.iter().map(|r| r.fill_pct).collect();
        assert_eq!(fills, vec![10.0, 20.0, 30.0, 40.0]);

        let snapshot = store.latest_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].fill_pct, 40.0);
        assert_eq!(snapshot[0].timestamp, 10800.0);
    }

    #[test]
    fn test_assemble_estimates_growth() {
        let store = InMemoryReadingStore::new();
        let here = Some(Location::new(57.0, 10.0));
        // 3.6 points per hour = 0.001 per second
        feed(&store, 1, &[10.0, 13.6, 17.2, 20.8], here);

        let report = assemble_moloks(&store, 500.0, ResetRule::OnDecrease, 0.0, 4.0 * 3600.0);
        assert!(report.skipped.is_empty());
        let molok = &report.moloks[0];
        assert!((molok.growth_rate - 0.001).abs() < 1e-9);
        assert_eq!(molok.fill_pct, 20.8);
        assert_eq!(molok.location, Location::new(57.0, 10.0));
    }

    #[test]
    fn test_assemble_reports_skipped_moloks() {
        let store = InMemoryReadingStore::new();
        feed(&store, 1, &[10.0, 20.0], None);
        feed(&store, 2, &[10.0], Some(Location::new(57.0, 10.0)));

        let report = assemble_moloks(&store, 500.0, ResetRule::OnDecrease, 0.0, 1e9);
        assert!(report.moloks.is_empty());
        assert_eq!(report.skipped[0], (MolokId(1), SkipReason::MissingPosition));
        assert_eq!(
            report.skipped[1],
            (MolokId(2), SkipReason::Estimation(EstimationError::EmptySeries))
        );
    }

    #[test]
    fn test_emptied_molok_starts_new_segment() {
        let store = InMemoryReadingStore::new();
        let here = Some(Location::new(57.0, 10.0));
        feed(&store, 1, &[40.0, 80.0], here);
        store.mark_emptied(&[MolokId(1)], 7200.0);
        store.record(IncomingReading::new(MolokId(1), 10.0, None, 10_800.0));

        let report = assemble_moloks(&store, 500.0, ResetRule::OnZero, 7200.0, 10_800.0);
        let molok = &report.moloks[0];
        assert_eq!(molok.location, Location::new(57.0, 10.0));
        assert!((molok.growth_rate - 10.0 / 3600.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ingestion_drains_channel() {
        let store = Arc::new(InMemoryReadingStore::new());
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_ingestion(store.clone(), rx);

        tx.send(IncomingReading::from_distance(MolokId(1), 100.0, DEFAULT_MOLOK_DEPTH_CM, None, 1.0))
            .await
            .unwrap();
        tx.send(IncomingReading::new(MolokId(1), f64::NAN, None, 2.0))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(store.history(MolokId(1))[0].fill_pct, 50.0);
    }
}
