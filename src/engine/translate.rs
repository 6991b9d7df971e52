//! Translation of a [`RoutingModel`] into u-routing problem data.
//!
//! Every arc dimension becomes one evaluation layer: its transit matrix, its
//! cumul ranges as customer time windows and its vehicle capacity as a
//! maximum route duration (windowed dimensions) or distance. The unary
//! dimension, if any, becomes customer demand and vehicle capacity on every
//! layer. The arc cost gets a layer of its own without limits.
//!
//! Transits already include any service time at the node being left, so
//! customers are built with zero service duration and u-routing's departure
//! times equal the model's cumuls.

use u_routing::constructive::{clarke_wright_savings, nearest_neighbor_tw, solomon_i1};
use u_routing::distance::DistanceMatrix;
use u_routing::evaluation::RouteEvaluator;
use u_routing::local_search::{relocate_improve, route_distance};
use u_routing::models::{Customer, Solution, TimeWindow, Vehicle};

use super::model::{Dimension, ModelError, RoutingModel, Transit, DEPOT};
use super::FirstSolutionStrategy;
use crate::geometry::SquareMatrix;

/// Per-vehicle node sequences with the depot stripped.
pub type Routes = Vec<Vec<usize>>;

/// Cumul range that does not constrain a node.
const UNBOUNDED: (i64, i64) = (0, i64::MAX);

/// A u-routing constructive heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    /// Time-window aware nearest neighbour, one route per vehicle.
    NearestNeighbor,
    /// Solomon I1 sequential insertion.
    Insertion,
    /// Clarke-Wright savings.
    Savings,
}

impl Heuristic {
    /// Heuristics tried for `strategy`, preferred first.
    pub fn chain(strategy: FirstSolutionStrategy) -> [Heuristic; 3] {
        use Heuristic::*;
        match strategy {
            FirstSolutionStrategy::Automatic => [Insertion, NearestNeighbor, Savings],
            FirstSolutionStrategy::PathCheapestArc => [NearestNeighbor, Insertion, Savings],
            FirstSolutionStrategy::Savings => [Savings, Insertion, NearestNeighbor],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Heuristic::NearestNeighbor => "nearest_neighbor_tw",
            Heuristic::Insertion => "solomon_i1",
            Heuristic::Savings => "clarke_wright_savings",
        }
    }
}

#[derive(Debug, Clone)]
struct Layer {
    matrix: DistanceMatrix,
    customers: Vec<Customer>,
    vehicles: Vec<Vehicle>,
}

impl Layer {
    fn evaluator(&self, vehicle: usize) -> RouteEvaluator<'_> {
        RouteEvaluator::new(&self.customers, &self.matrix, &self.vehicles[vehicle])
    }
}

/// Where a dimension's cumuls are read from.
#[derive(Debug, Clone, Copy)]
enum CumulSource {
    /// Departure times on the layer with this index.
    Layer(usize),
    /// Load on arrival.
    Load,
}

/// A [`RoutingModel`] expressed as u-routing layers.
#[derive(Debug, Clone)]
pub struct Translation {
    num_nodes: usize,
    num_vehicles: usize,
    cost: Layer,
    layers: Vec<Layer>,
    /// Layer the constructive heuristics run on: the first windowed one.
    primary: Option<usize>,
    cumuls: Vec<CumulSource>,
}

fn unsupported(dim: &Dimension, reason: &str) -> ModelError {
    ModelError::Unsupported(format!("dimension '{}': {}", dim.name, reason))
}

fn to_distance_matrix(matrix: &SquareMatrix) -> DistanceMatrix {
    let n = matrix.size();
    let mut out = DistanceMatrix::new(n);
    for from in 0..n {
        for (to, &value) in matrix.row(from).iter().enumerate() {
            out.set(from, to, value as f64);
        }
    }
    out
}

#[inline]
fn saturating_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

#[inline]
fn to_i64(value: f64) -> i64 {
    value.round() as i64
}

impl Translation {
    /// Translates a validated model.
    ///
    /// Fails with [`ModelError::Unsupported`] for constructs u-routing cannot
    /// evaluate: more than one unary dimension, demand at the depot, ranges
    /// on a unary dimension, a positive depot start, or a lower bound that
    /// needs more waiting than the dimension's slack allows.
    pub fn new(model: &RoutingModel) -> Result<Self, ModelError> {
        let num_nodes = model.num_nodes();
        let num_vehicles = model.num_vehicles();

        let mut demands = vec![0i32; num_nodes];
        let mut capacities = vec![i32::MAX; num_vehicles];
        let mut has_load = false;
        for dim in model.dimensions() {
            let Transit::Unary(values) = model.transit(dim.transit) else {
                continue;
            };
            if std::mem::replace(&mut has_load, true) {
                return Err(unsupported(dim, "only one unary dimension is supported"));
            }
            if values[DEPOT] != 0 {
                return Err(unsupported(dim, "the depot carries a non-zero value"));
            }
            if dim.cumul_ranges.iter().skip(1).any(|&r| r != UNBOUNDED) {
                return Err(unsupported(dim, "per-node ranges on a unary dimension"));
            }
            for (slot, &value) in demands.iter_mut().zip(values) {
                *slot = i32::try_from(value)
                    .map_err(|_| unsupported(dim, "value does not fit 32 bits"))?;
            }
            let depot_hi = dim.range(DEPOT).1;
            for (slot, &capacity) in capacities.iter_mut().zip(&dim.vehicle_capacities) {
                *slot = saturating_i32(capacity.min(depot_hi));
            }
        }

        let plain_customers: Vec<Customer> = (0..num_nodes)
            .map(|node| Customer::new(node, 0.0, 0.0, demands[node], 0.0))
            .collect();

        let mut layers = Vec::new();
        let mut cumuls = Vec::with_capacity(model.dimensions().len());
        let mut primary = None;
        for dim in model.dimensions() {
            let matrix = match model.transit(dim.transit) {
                Transit::Unary(_) => {
                    cumuls.push(CumulSource::Load);
                    continue;
                }
                Transit::Arc(matrix) => matrix,
            };

            let (depot_lo, depot_hi) = dim.range(DEPOT);
            if depot_lo > 0 {
                return Err(unsupported(dim, "routes must start at zero"));
            }
            // u-routing waits without bound, which only matches when the slack covers every wait
            if dim.cumul_ranges.iter().skip(1).any(|&(lo, _)| lo > dim.slack_max) {
                return Err(unsupported(dim, "a lower bound exceeds the slack"));
            }

            let windowed = dim.cumul_ranges.iter().skip(1).any(|&r| r != UNBOUNDED);
            let mut customers = plain_customers.clone();
            if windowed {
                for (node, customer) in customers.iter_mut().enumerate().skip(1) {
                    let (lo, hi) = dim.range(node);
                    if (lo, hi) == UNBOUNDED {
                        continue;
                    }
                    let window = TimeWindow::new(lo as f64, hi as f64).ok_or(
                        ModelError::EmptyCumulRange {
                            dimension: dim.name.clone(),
                            node,
                            lo,
                            hi,
                        },
                    )?;
                    *customer = customer.clone().with_time_window(window);
                }
            }

            let vehicles = (0..num_vehicles)
                .map(|v| {
                    let limit = dim.vehicle_capacities[v].min(depot_hi) as f64;
                    let vehicle = Vehicle::new(v, capacities[v]);
                    if windowed {
                        vehicle.with_max_duration(limit)
                    } else {
                        vehicle.with_max_distance(limit)
                    }
                })
                .collect();

            if windowed && primary.is_none() {
                primary = Some(layers.len());
            }
            cumuls.push(CumulSource::Layer(layers.len()));
            layers.push(Layer {
                matrix: to_distance_matrix(matrix),
                customers,
                vehicles,
            });
        }

        let cost_matrix = match model.arc_cost_transit().map(|t| model.transit(t)) {
            Some(Transit::Arc(matrix)) => to_distance_matrix(matrix),
            Some(Transit::Unary(_)) => {
                return Err(ModelError::Unsupported(
                    "the arc cost must be an arc transit".to_string(),
                ))
            }
            None => return Err(ModelError::MissingArcCost),
        };
        let cost = Layer {
            matrix: cost_matrix,
            customers: plain_customers,
            vehicles: (0..num_vehicles).map(|v| Vehicle::new(v, capacities[v])).collect(),
        };

        Ok(Self {
            num_nodes,
            num_vehicles,
            cost,
            layers,
            primary,
            cumuls,
        })
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    #[inline]
    pub fn num_vehicles(&self) -> usize {
        self.num_vehicles
    }

    /// The arc-cost matrix.
    pub fn cost_matrix(&self) -> &DistanceMatrix {
        &self.cost.matrix
    }

    /// `true` if no layer reports a violation for `stops` on `vehicle`.
    pub fn is_feasible(&self, vehicle: usize, stops: &[usize]) -> bool {
        self.layers
            .iter()
            .chain(std::iter::once(&self.cost))
            .all(|layer| layer.evaluator(vehicle).build_route(stops).1.is_empty())
    }

    /// Arc cost of one closed route.
    pub fn route_cost(&self, stops: &[usize]) -> i64 {
        to_i64(route_distance(stops, DEPOT, &self.cost.matrix))
    }

    /// Total cost, or `None` unless `routes` visits every customer exactly
    /// once with one feasible route per vehicle.
    pub fn evaluate(&self, routes: &Routes) -> Option<i64> {
        if routes.len() != self.num_vehicles || !self.covers_all(routes) {
            return None;
        }
        let mut total = 0i64;
        for (vehicle, stops) in routes.iter().enumerate() {
            if !self.is_feasible(vehicle, stops) {
                return None;
            }
            total = total.saturating_add(self.route_cost(stops));
        }
        Some(total)
    }

    fn covers_all(&self, routes: &Routes) -> bool {
        let mut seen = vec![false; self.num_nodes];
        for &node in routes.iter().flatten() {
            if node == DEPOT || node >= self.num_nodes || std::mem::replace(&mut seen[node], true) {
                return false;
            }
        }
        seen.iter().skip(1).all(|&s| s)
    }

    /// A customer that no vehicle can serve on its own.
    pub fn unservable_node(&self) -> Option<usize> {
        (1..self.num_nodes)
            .find(|&node| !(0..self.num_vehicles).any(|v| self.is_feasible(v, &[node])))
    }

    /// Runs one constructive heuristic.
    ///
    /// Returns `None` when it leaves customers unassigned or opens more
    /// routes than there are vehicles. Feasibility is not checked here.
    pub fn construct(&self, heuristic: Heuristic) -> Option<Routes> {
        let layer = self.primary.map_or(&self.cost, |i| &self.layers[i]);
        let solution = match heuristic {
            Heuristic::NearestNeighbor => {
                nearest_neighbor_tw(&layer.customers, &layer.matrix, &layer.vehicles)
            }
            Heuristic::Insertion => solomon_i1(&layer.customers, &layer.matrix, &layer.vehicles[0]),
            Heuristic::Savings => {
                clarke_wright_savings(&layer.customers, &layer.matrix, &layer.vehicles[0])
            }
        };
        if solution.num_unassigned() > 0 || solution.num_routes() > self.num_vehicles {
            return None;
        }
        let mut routes: Routes = solution.routes().iter().map(|r| r.customer_ids()).collect();
        routes.resize(self.num_vehicles, Vec::new());
        Some(routes)
    }

    /// Inter-route relocation on `matrix`, capacity-checked only.
    pub fn relocate(&self, routes: &Routes, matrix: &DistanceMatrix) -> Routes {
        let mut solution = Solution::new();
        for (vehicle, stops) in routes.iter().enumerate() {
            let evaluator =
                RouteEvaluator::new(&self.cost.customers, matrix, &self.cost.vehicles[vehicle]);
            solution.add_route(evaluator.build_route(stops).0);
        }
        let improved =
            relocate_improve(&solution, &self.cost.customers, matrix, &self.cost.vehicles[0]);
        let mut out: Routes = improved.routes().iter().map(|r| r.customer_ids()).collect();
        out.resize(self.num_vehicles, Vec::new());
        out
    }

    /// Cumul of every dimension at every position, depot included at both ends.
    ///
    /// `result[position][dimension]`.
    pub fn cumuls(&self, vehicle: usize, stops: &[usize]) -> Vec<Vec<i64>> {
        let per_layer: Vec<Vec<i64>> = self
            .layers
            .iter()
            .map(|layer| {
                let (route, _) = layer.evaluator(vehicle).build_route(stops);
                std::iter::once(0)
                    .chain(route.visits().iter().map(|v| to_i64(v.departure_time)))
                    .chain(std::iter::once(to_i64(route.total_duration())))
                    .collect()
            })
            .collect();

        let (route, _) = self.cost.evaluator(vehicle).build_route(stops);
        let load: Vec<i64> = [0, 0]
            .into_iter()
            .chain(route.visits().iter().map(|v| i64::from(v.load_after)))
            .collect();

        (0..stops.len() + 2)
            .map(|position| {
                self.cumuls
                    .iter()
                    .map(|source| match *source {
                        CumulSource::Layer(i) => per_layer[i][position],
                        CumulSource::Load => load[position],
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Line 0 - 1 - 2 with unit steps, demand 1 per customer.
    fn line_model(capacity: i64, horizon: i64) -> RoutingModel {
        let time = SquareMatrix::from_rows(vec![
            vec![0, 1, 2],
            vec![1, 0, 1],
            vec![2, 1, 0],
        ])
        .unwrap();
        let mut model = RoutingModel::new(3, 1);
        let t = model.register_transit_matrix(time);
        model.set_arc_cost_evaluator(t);
        model.add_dimension(t, 0, horizon, true, "Time").unwrap();
        let d = model.register_unary_transit(vec![0, 1, 1]);
        model.add_dimension(d, 0, capacity, true, "Capacity").unwrap();
        model
    }

    #[test]
    fn test_cost_and_cumuls() {
        let model = line_model(5, 100);
        let translation = Translation::new(&model).unwrap();

        assert_eq!(translation.evaluate(&vec![vec![1, 2]]), Some(4));
        // positions: depot, 1, 2, depot; dims: time, load
        assert_eq!(
            translation.cumuls(0, &[1, 2]),
            vec![vec![0, 0], vec![1, 0], vec![2, 1], vec![4, 2]]
        );
    }

    #[test]
    fn test_capacity_violation() {
        let translation = Translation::new(&line_model(1, 100)).unwrap();
        assert!(!translation.is_feasible(0, &[1, 2]));
        assert!(translation.is_feasible(0, &[2]));
    }

    #[test]
    fn test_time_window_violation() {
        let mut model = line_model(5, 100);
        model.set_cumul_range(0, 1, 0, 1).unwrap();
        let translation = Translation::new(&model).unwrap();

        assert!(!translation.is_feasible(0, &[2, 1]));
        assert!(translation.is_feasible(0, &[1, 2]));
    }

    #[test]
    fn test_horizon_caps_route_duration() {
        let translation = Translation::new(&line_model(5, 3)).unwrap();
        assert!(!translation.is_feasible(0, &[1, 2]));
        assert!(translation.is_feasible(0, &[1]));
    }

    #[test]
    fn test_unwindowed_dimension_limits_distance() {
        let mut model = line_model(5, 100);
        let distance = SquareMatrix::from_rows(vec![
            vec![0, 10, 20],
            vec![10, 0, 10],
            vec![20, 10, 0],
        ])
        .unwrap();
        let d = model.register_transit_matrix(distance);
        model.add_dimension(d, 0, 30, true, "Distance").unwrap();
        let translation = Translation::new(&model).unwrap();

        assert!(!translation.is_feasible(0, &[1, 2]));
        assert!(translation.is_feasible(0, &[1]));
        assert_eq!(translation.cumuls(0, &[1])[2], vec![2, 1, 20]);
    }

    #[test]
    fn test_incomplete_routes_do_not_evaluate() {
        let translation = Translation::new(&line_model(5, 100)).unwrap();
        assert_eq!(translation.evaluate(&vec![vec![1]]), None);
        assert_eq!(translation.evaluate(&vec![vec![1, 1, 2]]), None);
    }

    #[test]
    fn test_waiting_beyond_slack_is_unsupported() {
        let mut model = line_model(5, 100);
        model.set_cumul_range(0, 1, 3, 10).unwrap();
        assert!(matches!(
            Translation::new(&model),
            Err(ModelError::Unsupported(_))
        ));
    }

    #[test]
    fn test_every_heuristic_places_all_customers() {
        let translation = Translation::new(&line_model(5, 100)).unwrap();
        for heuristic in Heuristic::chain(FirstSolutionStrategy::Automatic) {
            let routes = translation.construct(heuristic).unwrap();
            assert_eq!(translation.evaluate(&routes), Some(4), "{}", heuristic.as_str());
        }
    }

    #[test]
    fn test_empty_route_is_free() {
        let translation = Translation::new(&line_model(5, 100)).unwrap();
        assert_eq!(translation.route_cost(&[]), 0);
        assert_eq!(translation.cumuls(0, &[]).len(), 2);
    }
}
