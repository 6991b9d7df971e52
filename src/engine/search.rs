//! The bundled [`RoutingEngine`] backend over the u-routing crate.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use u_routing::distance::DistanceMatrix;
use u_routing::local_search::{or_opt_improve, route_distance, two_opt_improve};

use super::meta::Policy;
use super::model::{RoutingModel, Transit, DEPOT};
use super::translate::{Heuristic, Routes, Translation};
use super::{
    Assignment, RoutingEngine, SearchParameters, SolveOutcome, SolveResult, SolveStatistics,
    VehicleRoute,
};

/// Candidate budget when neither a time nor a solution limit is given.
const DEFAULT_SOLUTION_LIMIT: u64 = 20_000;

/// Random relocations tried per perturbation.
const PERTURBATION_TRIES: usize = 32;

/// Smallest cost decrease counted as an improvement.
const IMPROVEMENT_EPSILON: f64 = 1e-9;

/// u-routing's intra-route operators share this shape.
type IntraRouteOperator = fn(&[usize], usize, &DistanceMatrix) -> (Vec<usize>, f64);

/// Wall-clock and candidate-count limits of one solve call.
#[derive(Debug, Clone)]
struct SearchLimits {
    start: Instant,
    time_limit: Option<Duration>,
    solution_limit: Option<u64>,
    evaluated: u64,
}

impl SearchLimits {
    fn new(time_limit: Option<Duration>, solution_limit: Option<u64>) -> Self {
        Self {
            start: Instant::now(),
            time_limit,
            solution_limit,
            evaluated: 0,
        }
    }

    #[inline]
    fn record(&mut self, candidates: u64) {
        self.evaluated = self.evaluated.saturating_add(candidates);
    }

    #[inline]
    fn time_exceeded(&self) -> bool {
        self.time_limit
            .is_some_and(|limit| self.start.elapsed() >= limit)
    }

    #[inline]
    fn should_stop(&self) -> bool {
        self.solution_limit
            .is_some_and(|limit| self.evaluated >= limit)
            || self.time_exceeded()
    }
}

/// A complete, feasible set of routes and its arc cost.
#[derive(Debug, Clone)]
struct Candidate {
    routes: Routes,
    cost: i64,
}

/// u-routing construction followed by policy-guided local search.
///
/// # Examples
///
/// ```
/// use molok_planner::engine::{
///     RoutingEngine, RoutingModel, SearchParameters, SolveResult, URoutingEngine,
/// };
/// use molok_planner::geometry::SquareMatrix;
///
/// let cost = SquareMatrix::from_rows(vec![
///     vec![0, 2, 4, 3],
///     vec![2, 0, 2, 4],
///     vec![4, 2, 0, 2],
///     vec![3, 4, 2, 0],
/// ]).unwrap();
///
/// let mut model = RoutingModel::new(4, 1);
/// let t = model.register_transit_matrix(cost);
/// model.set_arc_cost_evaluator(t);
///
/// let mut engine = URoutingEngine::new();
/// let outcome = engine.solve(&model, &SearchParameters::default(), None);
/// match outcome.result {
///     SolveResult::Solved(assignment) => {
///         assert_eq!(assignment.num_visits(), 3);
///         assert_eq!(assignment.objective, 9);
///     }
///     other => panic!("unexpected {}", other),
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct URoutingEngine {
    _private: (),
}

impl URoutingEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingEngine for URoutingEngine {
    fn name(&self) -> &str {
        "u-routing"
    }

    fn solve(
        &mut self,
        model: &RoutingModel,
        params: &SearchParameters,
        initial_routes: Option<&[Vec<usize>]>,
    ) -> SolveOutcome {
        let mut stats = SolveStatistics::default();
        let solution_limit = match (params.time_limit, params.solution_limit) {
            (None, None) => Some(DEFAULT_SOLUTION_LIMIT),
            (_, limit) => limit,
        };
        let mut limits = SearchLimits::new(params.time_limit, solution_limit);

        let result = run(model, params, initial_routes, &mut limits, &mut stats);
        stats.elapsed = limits.start.elapsed();
        stats.candidates_evaluated = limits.evaluated;

        info!(
            engine = self.name(),
            result = result.as_str(),
            elapsed_ms = stats.elapsed.as_millis() as u64,
            candidates = stats.candidates_evaluated,
            improvements = stats.improvements,
            "Solve finished"
        );

        SolveOutcome {
            result,
            statistics: stats,
        }
    }
}

fn run(
    model: &RoutingModel,
    params: &SearchParameters,
    initial_routes: Option<&[Vec<usize>]>,
    limits: &mut SearchLimits,
    stats: &mut SolveStatistics,
) -> SolveResult {
    if let Err(err) = model.validate() {
        return SolveResult::InvalidModel(err);
    }
    if let Some(routes) = initial_routes {
        if let Err(err) = model.validate_routes(routes) {
            return SolveResult::InvalidModel(err);
        }
    }
    let translation = match Translation::new(model) {
        Ok(translation) => translation,
        Err(err) => return SolveResult::InvalidModel(err),
    };

    if let Some(node) = translation.unservable_node() {
        debug!(node, "Node cannot be served by any vehicle on its own");
        return SolveResult::NoSolutionFound;
    }
    if exceeds_total_capacity(model) {
        debug!("Unary demand exceeds total fleet capacity");
        return SolveResult::NoSolutionFound;
    }

    let initial = match first_solution(&translation, params, initial_routes, limits, stats) {
        Ok(candidate) => candidate,
        Err(result) => return result,
    };

    let mut rng = StdRng::seed_from_u64(params.seed);
    let best = improve(&translation, params, initial, limits, stats, &mut rng);
    SolveResult::Solved(to_assignment(&translation, &best))
}

fn exceeds_total_capacity(model: &RoutingModel) -> bool {
    model.dimensions().iter().any(|dim| match model.transit(dim.transit) {
        Transit::Unary(values) => {
            let demand: i64 = values.iter().sum();
            let capacity: i64 = dim.vehicle_capacities.iter().sum();
            demand > capacity
        }
        Transit::Arc(_) => false,
    })
}

/// A feasible warm start, else the strategy's heuristics in order.
fn first_solution(
    translation: &Translation,
    params: &SearchParameters,
    initial_routes: Option<&[Vec<usize>]>,
    limits: &mut SearchLimits,
    stats: &mut SolveStatistics,
) -> Result<Candidate, SolveResult> {
    if let Some(routes) = initial_routes {
        let mut padded = routes.to_vec();
        padded.resize(translation.num_vehicles(), Vec::new());
        stats.construction_attempts += 1;
        limits.record(1);
        match translation.evaluate(&padded) {
            Some(cost) => {
                return Ok(Candidate {
                    routes: padded,
                    cost,
                })
            }
            None => debug!("Warm start is incomplete or infeasible, constructing from scratch"),
        }
    }

    for heuristic in Heuristic::chain(params.first_solution_strategy) {
        if limits.time_exceeded() {
            return Err(SolveResult::TimedOut);
        }
        stats.construction_attempts += 1;
        limits.record(1);

        let Some(routes) = translation.construct(heuristic) else {
            debug!(heuristic = heuristic.as_str(), "Construction left customers unplaced");
            continue;
        };
        match translation.evaluate(&routes) {
            Some(cost) => {
                debug!(heuristic = heuristic.as_str(), cost, "First solution found");
                return Ok(Candidate { routes, cost });
            }
            None => debug!(heuristic = heuristic.as_str(), "Construction breaks a limit"),
        }
    }

    if limits.time_exceeded() {
        Err(SolveResult::TimedOut)
    } else {
        Err(SolveResult::NoSolutionFound)
    }
}

fn total_on(routes: &Routes, matrix: &DistanceMatrix) -> f64 {
    routes
        .iter()
        .map(|stops| route_distance(stops, DEPOT, matrix))
        .sum()
}

/// Applies u-routing's operators on `matrix` until none yields a feasible improvement.
fn descend(
    translation: &Translation,
    mut routes: Routes,
    matrix: &DistanceMatrix,
    limits: &mut SearchLimits,
) -> Routes {
    let intra: [IntraRouteOperator; 2] = [two_opt_improve, or_opt_improve];
    loop {
        let mut improved = false;

        for vehicle in 0..routes.len() {
            for operator in intra {
                let (candidate, candidate_cost) = operator(&routes[vehicle], DEPOT, matrix);
                limits.record(1);
                let current_cost = route_distance(&routes[vehicle], DEPOT, matrix);
                if candidate_cost + IMPROVEMENT_EPSILON < current_cost
                    && translation.is_feasible(vehicle, &candidate)
                {
                    routes[vehicle] = candidate;
                    improved = true;
                }
            }
        }

        // Relocation only checks capacity, the translation checks the rest
        let candidate = translation.relocate(&routes, matrix);
        limits.record(1);
        if total_on(&candidate, matrix) + IMPROVEMENT_EPSILON < total_on(&routes, matrix)
            && translation.evaluate(&candidate).is_some()
        {
            routes = candidate;
            improved = true;
        }

        if !improved || limits.should_stop() {
            return routes;
        }
    }
}

/// Moves a few random customers to random feasible positions.
fn perturb(
    translation: &Translation,
    routes: &Routes,
    rng: &mut StdRng,
    limits: &mut SearchLimits,
) -> Option<Routes> {
    let moves = 1 + translation.num_nodes() / 10;
    let mut out = routes.clone();
    let mut applied = 0;
    for _ in 0..PERTURBATION_TRIES {
        if applied == moves {
            break;
        }
        let from = rng.gen_range(0..out.len());
        if out[from].is_empty() {
            continue;
        }
        let position = rng.gen_range(0..out[from].len());
        let to = rng.gen_range(0..out.len());

        let mut trial = out.clone();
        let node = trial[from].remove(position);
        let at = rng.gen_range(0..=trial[to].len());
        trial[to].insert(at, node);
        limits.record(1);

        if translation.is_feasible(from, &trial[from]) && translation.is_feasible(to, &trial[to]) {
            out = trial;
            applied += 1;
        }
    }
    (applied > 0).then_some(out)
}

fn improve(
    translation: &Translation,
    params: &SearchParameters,
    initial: Candidate,
    limits: &mut SearchLimits,
    stats: &mut SolveStatistics,
    rng: &mut StdRng,
) -> Candidate {
    let cost = translation.cost_matrix();
    let descended = descend(translation, initial.routes.clone(), cost, limits);
    let mut current = match translation.evaluate(&descended) {
        Some(total) if total < initial.cost => {
            stats.improvements += 1;
            Candidate {
                routes: descended,
                cost: total,
            }
        }
        _ => initial,
    };
    let mut best = current.clone();

    let mut policy = Policy::for_strategy(params.metaheuristic, translation.num_nodes());
    if policy.is_descent() || translation.num_nodes() <= 2 {
        return best;
    }
    policy.start(cost, &current.routes);

    let mut iteration = 0u64;
    while !limits.should_stop() {
        iteration += 1;
        policy.on_local_optimum(cost, &current.routes);

        let Some(perturbed) = perturb(translation, &current.routes, rng, limits) else {
            break;
        };
        let augmented = policy.matrix(cost);
        let routes = descend(translation, perturbed, augmented.as_ref().unwrap_or(cost), limits);
        let Some(total) = translation.evaluate(&routes) else {
            continue;
        };

        if policy.accept(rng, current.cost, &routes, total) {
            stats.moves_accepted += 1;
            current = Candidate {
                routes,
                cost: total,
            };
            if current.cost < best.cost {
                best = current.clone();
                stats.improvements += 1;
            }
        }
    }

    debug!(
        policy = policy.name(),
        iterations = iteration,
        objective = best.cost,
        "Local search finished"
    );
    best
}

fn to_assignment(translation: &Translation, best: &Candidate) -> Assignment {
    let routes = best
        .routes
        .iter()
        .enumerate()
        .map(|(vehicle, stops)| VehicleRoute {
            vehicle,
            nodes: std::iter::once(DEPOT)
                .chain(stops.iter().copied())
                .chain(std::iter::once(DEPOT))
                .collect(),
            cumuls: translation.cumuls(vehicle, stops),
            cost: translation.route_cost(stops),
        })
        .collect();

    Assignment {
        routes,
        objective: best.cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FirstSolutionStrategy, LocalSearchMetaheuristic, ModelError};
    use crate::geometry::SquareMatrix;

    /// Four customers at the corners of a square around the depot.
    fn square_model(vehicles: usize, capacity: i64, horizon: i64) -> RoutingModel {
        let pos = [(0i64, 0i64), (10, 10), (10, -10), (-10, -10), (-10, 10)];
        let rows = pos
            .iter()
            .map(|a| {
                pos.iter()
                    .map(|b| (a.0 - b.0).abs() + (a.1 - b.1).abs())
                    .collect()
            })
            .collect();
        let time = SquareMatrix::from_rows(rows).unwrap();

        let mut model = RoutingModel::new(5, vehicles);
        let t = model.register_transit_matrix(time);
        model.set_arc_cost_evaluator(t);
        model.add_dimension(t, 0, horizon, true, "Time").unwrap();
        let d = model.register_unary_transit(vec![0, 1, 1, 1, 1]);
        model.add_dimension(d, 0, capacity, true, "Capacity").unwrap();
        model
    }

    fn solved(outcome: SolveOutcome) -> Assignment {
        match outcome.result {
            SolveResult::Solved(a) => a,
            other => panic!("expected a solution, got {}", other),
        }
    }

    fn all_visited(assignment: &Assignment, n: usize) {
        let mut seen: Vec<usize> = assignment
            .routes
            .iter()
            .flat_map(|r| r.stops().to_vec())
            .collect();
        seen.sort();
        assert_eq!(seen, (1..n).collect::<Vec<_>>());
    }

    #[test]
    fn test_every_strategy_combination_solves() {
        let model = square_model(2, 3, 1_000);
        let strategies = [
            FirstSolutionStrategy::Automatic,
            FirstSolutionStrategy::PathCheapestArc,
            FirstSolutionStrategy::Savings,
        ];
        let metas = [
            None,
            Some(LocalSearchMetaheuristic::Automatic),
            Some(LocalSearchMetaheuristic::GuidedLocalSearch),
            Some(LocalSearchMetaheuristic::SimulatedAnnealing),
            Some(LocalSearchMetaheuristic::TabuSearch),
        ];

        for strategy in strategies {
            for metaheuristic in metas {
                let params = SearchParameters {
                    first_solution_strategy: strategy,
                    metaheuristic,
                    solution_limit: Some(2_000),
                    ..Default::default()
                };
                let assignment = solved(URoutingEngine::new().solve(&model, &params, None));
                all_visited(&assignment, 5);
                assert_eq!(assignment.routes.len(), 2);
                for route in &assignment.routes {
                    let end = route.nodes.len() - 1;
                    assert!(route.cumul(end, 1) <= 3);
                    assert!(route.cumul(end, 0) <= 1_000);
                }
            }
        }
    }

    #[test]
    fn test_insertion_finds_square_tour() {
        let model = square_model(1, 10, 1_000);
        let assignment = solved(URoutingEngine::new().solve(
            &model,
            &SearchParameters::default(),
            None,
        ));
        // 20 out, 20 back, three edges of 20 around the square
        assert_eq!(assignment.objective, 100);
    }

    #[test]
    fn test_same_seed_same_result() {
        let model = square_model(2, 3, 1_000);
        let params = SearchParameters {
            metaheuristic: Some(LocalSearchMetaheuristic::SimulatedAnnealing),
            solution_limit: Some(2_000),
            seed: 42,
            ..Default::default()
        };
        let a = solved(URoutingEngine::new().solve(&model, &params, None));
        let b = solved(URoutingEngine::new().solve(&model, &params, None));
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_model_is_reported() {
        let model = RoutingModel::new(3, 0);
        let outcome = URoutingEngine::new().solve(&model, &SearchParameters::default(), None);
        assert_eq!(outcome.result, SolveResult::InvalidModel(ModelError::NoVehicles));
    }

    #[test]
    fn test_untranslatable_model_is_invalid() {
        let mut model = square_model(2, 3, 1_000);
        let extra = model.register_unary_transit(vec![0, 2, 2, 2, 2]);
        model.add_dimension(extra, 0, 10, true, "Volume").unwrap();
        let outcome = URoutingEngine::new().solve(&model, &SearchParameters::default(), None);
        assert!(matches!(
            outcome.result,
            SolveResult::InvalidModel(ModelError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unreachable_node_is_infeasible() {
        let mut model = square_model(2, 3, 1_000);
        model.set_cumul_range(0, 3, 0, 5).unwrap();
        let outcome = URoutingEngine::new().solve(&model, &SearchParameters::default(), None);
        assert_eq!(outcome.result, SolveResult::NoSolutionFound);
    }

    #[test]
    fn test_total_capacity_shortfall_is_infeasible() {
        let model = square_model(1, 3, 1_000);
        let outcome = URoutingEngine::new().solve(&model, &SearchParameters::default(), None);
        assert_eq!(outcome.result, SolveResult::NoSolutionFound);
    }

    #[test]
    fn test_feasible_warm_start_is_never_worsened() {
        let model = square_model(2, 3, 1_000);
        // 0-1-3-0 crosses the square: 20 + 40 + 20 on each route
        let warm = vec![vec![1, 3], vec![2, 4]];
        let assignment = solved(URoutingEngine::new().solve(
            &model,
            &SearchParameters::default(),
            Some(&warm),
        ));
        all_visited(&assignment, 5);
        assert!(assignment.objective <= 160);
    }

    #[test]
    fn test_partial_warm_start_falls_back_to_construction() {
        let model = square_model(2, 3, 1_000);
        let warm = vec![vec![2, 1], vec![]];
        let assignment = solved(URoutingEngine::new().solve(
            &model,
            &SearchParameters::default(),
            Some(&warm),
        ));
        all_visited(&assignment, 5);
    }

    #[test]
    fn test_warm_start_with_depot_is_invalid() {
        let model = square_model(2, 3, 1_000);
        let warm = vec![vec![0, 1]];
        let outcome =
            URoutingEngine::new().solve(&model, &SearchParameters::default(), Some(&warm));
        assert!(matches!(
            outcome.result,
            SolveResult::InvalidModel(ModelError::InvalidWarmStart(_))
        ));
    }

    #[test]
    fn test_time_limit_is_respected() {
        let model = square_model(2, 3, 1_000);
        let params = SearchParameters {
            metaheuristic: Some(LocalSearchMetaheuristic::GuidedLocalSearch),
            time_limit: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let outcome = URoutingEngine::new().solve(&model, &params, None);
        assert!(matches!(outcome.result, SolveResult::Solved(_)));
        assert!(outcome.statistics.elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_cumuls_follow_time_matrix() {
        let model = square_model(1, 10, 1_000);
        let assignment = solved(URoutingEngine::new().solve(
            &model,
            &SearchParameters::default(),
            None,
        ));
        let route = &assignment.routes[0];
        for p in 1..route.nodes.len() {
            let (a, b) = (route.nodes[p - 1], route.nodes[p]);
            let leg = model.arc_cost(a, b);
            assert_eq!(route.cumul(p, 0), route.cumul(p - 1, 0) + leg);
        }
    }
}
