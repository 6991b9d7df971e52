//! Problem instances built fresh for every planning attempt.
//!
//! A [`ProblemInstance`] is an immutable snapshot: the surviving moloks,
//! their re-enumerated node indices, the matrices, demands, time windows and
//! the [`RoutingModel`] declaring them. The planner never edits an instance,
//! it builds the next one from its own molok list and slack.

use std::fmt;
use tracing::debug;

use crate::domain::{Depot, Molok, MolokId, TruckFleet};
use crate::engine::{Assignment, DimensionIndex, ModelError, RoutingModel};
use crate::geometry::{build_matrices, GeoError, MatrixSettings, TravelMatrices};

pub const TIME_DIMENSION: &str = "Time";
pub const CAPACITY_DIMENSION: &str = "Capacity";
pub const DISTANCE_DIMENSION: &str = "Distance";

/// Error type for instance construction.
#[derive(Debug, Clone, PartialEq)]
pub enum ProblemError {
    Geo(GeoError),
    Model(ModelError),
}

impl fmt::Display for ProblemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemError::Geo(e) => write!(f, "Matrix construction failed: {}", e),
            ProblemError::Model(e) => write!(f, "Invalid model: {}", e),
        }
    }
}

impl std::error::Error for ProblemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProblemError::Geo(e) => Some(e),
            ProblemError::Model(e) => Some(e),
        }
    }
}

impl From<GeoError> for ProblemError {
    fn from(e: GeoError) -> Self {
        ProblemError::Geo(e)
    }
}

impl From<ModelError> for ProblemError {
    fn from(e: ModelError) -> Self {
        ProblemError::Model(e)
    }
}

/// Contiguous mapping between node indices and molok ids.
///
/// Node 0 is the depot, node `i >= 1` is `ids[i - 1]`.
///
/// ```
/// use molok_planner::domain::MolokId;
/// use molok_planner::problem::NodeIndex;
///
/// let index = NodeIndex::new(vec![MolokId(7), MolokId(3)]);
/// assert_eq!(index.node_of(MolokId(3)), Some(2));
/// assert_eq!(index.molok_at(1), Some(MolokId(7)));
/// assert_eq!(index.molok_at(0), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIndex {
    ids: Vec<MolokId>,
}

impl NodeIndex {
    pub fn new(ids: Vec<MolokId>) -> Self {
        Self { ids }
    }

    pub fn node_of(&self, id: MolokId) -> Option<usize> {
        self.ids.iter().position(|&m| m == id).map(|p| p + 1)
    }

    pub fn molok_at(&self, node: usize) -> Option<MolokId> {
        node.checked_sub(1).and_then(|i| self.ids.get(i).copied())
    }

    /// Number of moloks (nodes minus the depot).
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Customer nodes `1..=len`.
    pub fn nodes(&self) -> std::ops::RangeInclusive<usize> {
        1..=self.ids.len()
    }

    pub fn ids(&self) -> &[MolokId] {
        &self.ids
    }
}

/// Everything one solve call needs, built for one attempt.
#[derive(Debug, Clone)]
pub struct ProblemInstance {
    /// Attempt this instance was built for.
    pub version: u32,
    pub slack_secs: i64,
    pub index: NodeIndex,
    pub matrices: TravelMatrices,
    /// Demand per node in kilograms, depot first.
    pub demands: Vec<i64>,
    /// Allowed arrival window per node in seconds from route start.
    pub time_windows: Vec<(i64, i64)>,
    pub vehicle_capacities: Vec<i64>,
    pub range_m: i64,
    pub shift_secs: i64,
    pub model: RoutingModel,
    pub time_dimension: DimensionIndex,
    pub capacity_dimension: DimensionIndex,
    pub distance_dimension: DimensionIndex,
}

/// Builds the instance for the current moloks and slack.
///
/// # Examples
///
/// ```
/// use molok_planner::demo_data::three_container_scenario;
/// use molok_planner::geometry::MatrixSettings;
/// use molok_planner::problem::build_instance;
///
/// let request = three_container_scenario();
/// let settings = MatrixSettings::new(request.emptying_secs, request.speed_kmph);
/// let instance = build_instance(&request.depot, &request.moloks, &request.fleet, &settings, 0, 1)
///     .unwrap();
///
/// assert_eq!(instance.demands, vec![0, 400, 450, 375]);
/// // 20 points at 0.05 %/min
/// assert_eq!(instance.time_windows[1], (0, 24_000));
/// ```
pub fn build_instance(
    depot: &Depot,
    moloks: &[Molok],
    fleet: &TruckFleet,
    settings: &MatrixSettings,
    slack_secs: i64,
    version: u32,
) -> Result<ProblemInstance, ProblemError> {
    let locations: Vec<_> = moloks.iter().map(|m| m.location).collect();
    let matrices = build_matrices(&depot.location, &locations, settings)?;
    let horizon = depot.window_secs();

    let demands: Vec<i64> = std::iter::once(0)
        .chain(moloks.iter().map(Molok::demand_kg))
        .collect();

    let time_windows: Vec<(i64, i64)> = std::iter::once((0, horizon))
        .chain(moloks.iter().map(|m| {
            let deadline = m.deadline_secs().unwrap_or(horizon);
            (0, deadline.saturating_add(slack_secs))
        }))
        .collect();

    let vehicle_capacities = vec![fleet.capacity_kg; fleet.count];
    let range_m = fleet.range_meters();
    let shift_secs = fleet.shift_secs();

    let mut model = RoutingModel::new(moloks.len() + 1, fleet.count);

    let time = model.register_transit_matrix(matrices.time.clone());
    model.set_arc_cost_evaluator(time);
    let time_dimension = model.add_dimension(time, 0, shift_secs, true, TIME_DIMENSION)?;
    for (node, &(lo, hi)) in time_windows.iter().enumerate() {
        model.set_cumul_range(time_dimension, node, lo, hi)?;
    }

    let demand = model.register_unary_transit(demands.clone());
    let capacity_dimension = model.add_dimension_with_vehicle_capacity(
        demand,
        0,
        vehicle_capacities.clone(),
        true,
        CAPACITY_DIMENSION,
    )?;

    let distance = model.register_transit_matrix(matrices.distance.clone());
    let distance_dimension = model.add_dimension(distance, 0, range_m, true, DISTANCE_DIMENSION)?;

    debug!(
        version,
        moloks = moloks.len(),
        slack_secs,
        "Built problem instance"
    );

    Ok(ProblemInstance {
        version,
        slack_secs,
        index: NodeIndex::new(moloks.iter().map(|m| m.id).collect()),
        matrices,
        demands,
        time_windows,
        vehicle_capacities,
        range_m,
        shift_secs,
        model,
        time_dimension,
        capacity_dimension,
        distance_dimension,
    })
}

impl ProblemInstance {
    /// The molok with the largest summed distance to all other moloks.
    ///
    /// Ties go to the lowest node index. Returns the id and its row sum.
    pub fn most_isolated(&self) -> Option<(MolokId, i64)> {
        let sums = self.matrices.distance.row_sums_excluding_depot();
        let mut best: Option<(usize, i64)> = None;
        for (k, &sum) in sums.iter().enumerate() {
            if best.map_or(true, |(_, s)| sum > s) {
                best = Some((k, sum));
            }
        }
        best.and_then(|(k, sum)| self.index.molok_at(k + 1).map(|id| (id, sum)))
    }

    /// Translates routes of molok ids into this instance's node indices.
    ///
    /// Ids that are no longer part of the instance are skipped.
    pub fn local_routes(&self, routes: &[Vec<MolokId>]) -> Vec<Vec<usize>> {
        routes
            .iter()
            .take(self.model.num_vehicles())
            .map(|route| route.iter().filter_map(|&id| self.index.node_of(id)).collect())
            .collect()
    }

    /// Translates an assignment back to molok ids, one route per vehicle.
    pub fn molok_routes(&self, assignment: &Assignment) -> Vec<Vec<MolokId>> {
        assignment
            .routes
            .iter()
            .map(|r| {
                r.stops()
                    .iter()
                    .filter_map(|&node| self.index.molok_at(node))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_data::three_container_scenario;
    use crate::domain::Location;
    use crate::engine::VehicleRoute;

    fn build(slack: i64) -> ProblemInstance {
        let request = three_container_scenario();
        let settings = MatrixSettings::new(request.emptying_secs, request.speed_kmph);
        build_instance(
            &request.depot,
            &request.moloks,
            &request.fleet,
            &settings,
            slack,
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_depot_window_and_demand() {
        let instance = build(0);
        assert_eq!(instance.demands[0], 0);
        assert_eq!(instance.time_windows[0], (0, 16 * 3600));
        assert_eq!(instance.vehicle_capacities, vec![3000, 3000]);
        assert_eq!(instance.range_m, 400_000);
        assert_eq!(instance.shift_secs, 8 * 3600);
        assert!(instance.model.validate().is_ok());
    }

    #[test]
    fn test_slack_shifts_every_deadline() {
        let base = build(0);
        let relaxed = build(1800);
        for node in base.index.nodes() {
            assert_eq!(
                relaxed.time_windows[node].1,
                base.time_windows[node].1 + 1800
            );
        }
        assert_eq!(relaxed.time_windows[0], base.time_windows[0]);
    }

    #[test]
    fn test_full_molok_gets_zero_width_window() {
        let request = three_container_scenario();
        let mut moloks = request.moloks.clone();
        moloks[0].fill_pct = 120.0;
        let instance = build_instance(
            &request.depot,
            &moloks,
            &request.fleet,
            &MatrixSettings::new(600, 50.0),
            0,
            1,
        )
        .unwrap();
        assert_eq!(instance.time_windows[1], (0, 0));
    }

    #[test]
    fn test_most_isolated_molok() {
        let request = three_container_scenario();
        let mut moloks = request.moloks.clone();
        moloks[1].location = Location::new(50.0, 10.0);
        let instance = build_instance(
            &request.depot,
            &moloks,
            &request.fleet,
            &MatrixSettings::new(600, 50.0),
            0,
            1,
        )
        .unwrap();
        let (id, _) = instance.most_isolated().unwrap();
        assert_eq!(id, moloks[1].id);
    }

    #[test]
    fn test_route_translation_skips_unknown_ids() {
        let instance = build(0);
        let ids = instance.index.ids().to_vec();
        let routes = vec![vec![ids[2], MolokId(999), ids[0]], vec![ids[1]]];
        assert_eq!(instance.local_routes(&routes), vec![vec![3, 1], vec![2]]);
    }

    #[test]
    fn test_dropping_molok_renumbers_nodes() {
        let request = three_container_scenario();
        let mut moloks = request.moloks.clone();
        moloks.push(Molok::new(MolokId(4), Location::new(44.5, 10.5), 60.0, 500.0));
        let settings = MatrixSettings::new(request.emptying_secs, request.speed_kmph);
        let before = build_instance(&request.depot, &moloks, &request.fleet, &settings, 0, 1).unwrap();
        assert_eq!(before.index.nodes(), 1..=4);

        let removed = moloks.remove(1).id;
        let after = build_instance(&request.depot, &moloks, &request.fleet, &settings, 0, 2).unwrap();

        assert_eq!(after.index.nodes(), 1..=3);
        let surviving: Vec<MolokId> = after.index.nodes().filter_map(|n| after.index.molok_at(n)).collect();
        assert_eq!(surviving, vec![MolokId(1), MolokId(3), MolokId(4)]);
        assert_eq!(after.index.node_of(removed), None);
        assert_eq!(after.index.molok_at(4), None);
        assert_eq!(after.model.num_nodes(), 4);

        // Routes from the earlier attempt still name the removed molok
        let previous = vec![vec![MolokId(1), removed], vec![MolokId(3), MolokId(4)]];
        assert_eq!(after.local_routes(&previous), vec![vec![1], vec![2, 3]]);

        let route = |vehicle, nodes: Vec<usize>| VehicleRoute {
            vehicle,
            nodes,
            cumuls: Vec::new(),
            cost: 0,
        };
        let assignment = Assignment {
            routes: vec![route(0, vec![0, 3, 1, 0]), route(1, vec![0, 2, 0])],
            objective: 0,
        };
        assert_eq!(
            after.molok_routes(&assignment),
            vec![vec![MolokId(4), MolokId(1)], vec![MolokId(3)]]
        );
    }

    #[test]
    fn test_invalid_coordinates_propagate() {
        let request = three_container_scenario();
        let mut moloks = request.moloks.clone();
        moloks[2].location = Location::new(123.0, 0.0);
        let err = build_instance(
            &request.depot,
            &moloks,
            &request.fleet,
            &MatrixSettings::default(),
            0,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, ProblemError::Geo(GeoError::InvalidCoordinate { index: 3, .. })));
    }
}
