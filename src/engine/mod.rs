//! Vehicle routing solving capability.
//!
//! The planner never searches itself. It declares a [`RoutingModel`], hands it
//! to a [`RoutingEngine`] together with [`SearchParameters`] and an optional
//! warm start, and interprets the returned [`SolveResult`].
//!
//! [`URoutingEngine`] is the bundled backend. It translates the model into
//! u-routing layers, builds a first solution with u-routing's constructive
//! heuristics and refines it with its 2-opt, Or-opt and relocate operators
//! under an acceptance [`Policy`](meta::Policy).

pub mod meta;
pub mod model;
mod search;
pub mod translate;

pub use model::{
    Dimension, DimensionIndex, ModelError, RoutingModel, Transit, TransitIndex, DEPOT,
};
pub use search::URoutingEngine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Construction heuristic for the first solution.
///
/// Each strategy names the heuristic tried first. The others follow as
/// fallbacks when it leaves customers unplaced or breaks a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FirstSolutionStrategy {
    /// Solomon I1 sequential insertion.
    #[default]
    Automatic,
    /// Time-window aware nearest neighbour: extend each route by its cheapest arc.
    PathCheapestArc,
    /// Clarke-Wright savings.
    Savings,
}

impl FirstSolutionStrategy {
    /// ```
    /// use molok_planner::engine::FirstSolutionStrategy;
    ///
    /// assert_eq!(FirstSolutionStrategy::PathCheapestArc.as_str(), "PATH_CHEAPEST_ARC");
    /// ```
    pub fn as_str(self) -> &'static str {
        match self {
            FirstSolutionStrategy::Automatic => "AUTOMATIC",
            FirstSolutionStrategy::PathCheapestArc => "PATH_CHEAPEST_ARC",
            FirstSolutionStrategy::Savings => "SAVINGS",
        }
    }
}

/// Refinement strategy applied after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalSearchMetaheuristic {
    /// Guided local search.
    Automatic,
    GuidedLocalSearch,
    SimulatedAnnealing,
    TabuSearch,
}

impl LocalSearchMetaheuristic {
    pub fn as_str(self) -> &'static str {
        match self {
            LocalSearchMetaheuristic::Automatic => "AUTOMATIC",
            LocalSearchMetaheuristic::GuidedLocalSearch => "GUIDED_LOCAL_SEARCH",
            LocalSearchMetaheuristic::SimulatedAnnealing => "SIMULATED_ANNEALING",
            LocalSearchMetaheuristic::TabuSearch => "TABU_SEARCH",
        }
    }
}

/// Limits and strategies for one solve call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParameters {
    pub first_solution_strategy: FirstSolutionStrategy,
    /// `None` stops at the first local optimum.
    pub metaheuristic: Option<LocalSearchMetaheuristic>,
    /// Wall-clock limit for the whole call.
    pub time_limit: Option<Duration>,
    /// Maximum number of candidate solutions evaluated.
    pub solution_limit: Option<u64>,
    pub seed: u64,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            first_solution_strategy: FirstSolutionStrategy::Automatic,
            metaheuristic: None,
            time_limit: None,
            solution_limit: None,
            seed: 0,
        }
    }
}

/// One vehicle's route with per-stop cumuls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRoute {
    pub vehicle: usize,
    /// Node sequence including the depot at both ends.
    pub nodes: Vec<usize>,
    /// `cumuls[position][dimension]`, aligned with `nodes`.
    pub cumuls: Vec<Vec<i64>>,
    pub cost: i64,
}

impl VehicleRoute {
    /// Nodes without the depot.
    pub fn stops(&self) -> &[usize] {
        match self.nodes.len() {
            0..=2 => &[],
            n => &self.nodes[1..n - 1],
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stops().is_empty()
    }

    #[inline]
    pub fn cumul(&self, position: usize, dimension: DimensionIndex) -> i64 {
        self.cumuls[position][dimension]
    }
}

/// Routes returned by a successful solve, one per vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub routes: Vec<VehicleRoute>,
    pub objective: i64,
}

impl Assignment {
    /// Per-vehicle node sequences with the depot stripped, usable as a warm start.
    pub fn routes_without_depot(&self) -> Vec<Vec<usize>> {
        self.routes.iter().map(|r| r.stops().to_vec()).collect()
    }

    pub fn num_visits(&self) -> usize {
        self.routes.iter().map(|r| r.stops().len()).sum()
    }
}

/// The four outcome codes of a solve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveResult {
    Solved(Assignment),
    NoSolutionFound,
    TimedOut,
    InvalidModel(ModelError),
}

impl SolveResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveResult::Solved(_) => "SOLVED",
            SolveResult::NoSolutionFound => "NO_SOLUTION_FOUND",
            SolveResult::TimedOut => "TIMED_OUT",
            SolveResult::InvalidModel(_) => "INVALID_MODEL",
        }
    }
}

impl fmt::Display for SolveResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters collected during a solve call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStatistics {
    pub elapsed: Duration,
    pub construction_attempts: u64,
    pub candidates_evaluated: u64,
    pub moves_accepted: u64,
    pub improvements: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub result: SolveResult,
    pub statistics: SolveStatistics,
}

/// A backend able to solve a [`RoutingModel`].
pub trait RoutingEngine: Send {
    fn name(&self) -> &str;

    /// Solves `model`, optionally continuing from `initial_routes`
    /// (one node sequence per vehicle, depot stripped).
    fn solve(
        &mut self,
        model: &RoutingModel,
        params: &SearchParameters,
        initial_routes: Option<&[Vec<usize>]>,
    ) -> SolveOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_route_stops() {
        let route = VehicleRoute {
            vehicle: 0,
            nodes: vec![0, 3, 1, 0],
            cumuls: vec![vec![0]; 4],
            cost: 10,
        };
        assert_eq!(route.stops(), &[3, 1]);

        let empty = VehicleRoute {
            vehicle: 1,
            nodes: vec![0, 0],
            cumuls: vec![vec![0]; 2],
            cost: 0,
        };
        assert!(empty.is_empty());
    }

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&LocalSearchMetaheuristic::GuidedLocalSearch).unwrap();
        assert_eq!(json, "\"GUIDED_LOCAL_SEARCH\"");
        let parsed: FirstSolutionStrategy = serde_json::from_str("\"SAVINGS\"").unwrap();
        assert_eq!(parsed, FirstSolutionStrategy::Savings);
    }
}
