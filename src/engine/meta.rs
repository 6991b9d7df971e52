//! Acceptance policies steering the iterated local search.
//!
//! Every iteration perturbs the current routes, descends with u-routing's
//! local search and asks the [`Policy`] whether the result replaces the
//! current solution. Guided local search also reshapes the matrix the
//! descent runs on.

use rand::rngs::StdRng;
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use u_routing::distance::DistanceMatrix;

use super::model::DEPOT;
use super::translate::Routes;
use super::LocalSearchMetaheuristic;

/// Share of the mean arc cost used as the starting temperature.
const INITIAL_TEMPERATURE_RATIO: f64 = 0.5;
const COOLING: f64 = 0.97;
const MIN_TEMPERATURE: f64 = 1e-3;

const TABU_TENURE: usize = 16;

/// Weight of one arc penalty relative to the mean arc cost.
const GUIDED_LAMBDA_RATIO: f64 = 0.1;

/// How candidate solutions are accepted.
#[derive(Debug, Clone)]
pub enum Policy {
    /// Stop at the first local optimum.
    Descent,
    SimulatedAnnealing { temperature: f64 },
    /// Rejects solutions visited within the tenure.
    TabuSearch { recent: VecDeque<u64> },
    /// Penalises the costliest arcs of each local optimum.
    GuidedLocalSearch {
        size: usize,
        penalties: Vec<u32>,
        lambda: f64,
    },
}

/// Arcs of one closed route.
pub fn route_arcs(stops: &[usize]) -> impl Iterator<Item = (usize, usize)> + '_ {
    let from = std::iter::once(DEPOT).chain(stops.iter().copied());
    let to = stops.iter().copied().chain(std::iter::once(DEPOT));
    from.zip(to)
}

fn mean_arc_cost(cost: &DistanceMatrix, routes: &Routes) -> f64 {
    let (sum, count) = routes
        .iter()
        .filter(|stops| !stops.is_empty())
        .flat_map(|stops| route_arcs(stops))
        .fold((0.0, 0usize), |(sum, count), (a, b)| (sum + cost.get(a, b), count + 1));
    if count == 0 {
        1.0
    } else {
        (sum / count as f64).max(1.0)
    }
}

fn fingerprint(routes: &Routes) -> u64 {
    let mut hasher = DefaultHasher::new();
    routes.hash(&mut hasher);
    hasher.finish()
}

impl Policy {
    /// `None` gives plain descent. `Automatic` is guided local search.
    pub fn for_strategy(strategy: Option<LocalSearchMetaheuristic>, size: usize) -> Self {
        match strategy {
            None => Policy::Descent,
            Some(LocalSearchMetaheuristic::Automatic)
            | Some(LocalSearchMetaheuristic::GuidedLocalSearch) => Policy::GuidedLocalSearch {
                size,
                penalties: vec![0; size * size],
                lambda: 0.0,
            },
            Some(LocalSearchMetaheuristic::SimulatedAnnealing) => {
                Policy::SimulatedAnnealing { temperature: 1.0 }
            }
            Some(LocalSearchMetaheuristic::TabuSearch) => Policy::TabuSearch {
                recent: VecDeque::with_capacity(TABU_TENURE),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::Descent => "descent",
            Policy::SimulatedAnnealing { .. } => "simulated_annealing",
            Policy::TabuSearch { .. } => "tabu_search",
            Policy::GuidedLocalSearch { .. } => "guided_local_search",
        }
    }

    #[inline]
    pub fn is_descent(&self) -> bool {
        matches!(self, Policy::Descent)
    }

    /// Scales the policy to the first local optimum.
    pub fn start(&mut self, cost: &DistanceMatrix, initial: &Routes) {
        let mean = mean_arc_cost(cost, initial);
        match self {
            Policy::SimulatedAnnealing { temperature } => {
                *temperature = mean * INITIAL_TEMPERATURE_RATIO;
            }
            Policy::TabuSearch { recent } => recent.push_back(fingerprint(initial)),
            Policy::GuidedLocalSearch { lambda, .. } => *lambda = mean * GUIDED_LAMBDA_RATIO,
            Policy::Descent => {}
        }
    }

    /// Penalises the arcs of `routes` with the highest utility, `cost / (1 + penalty)`.
    pub fn on_local_optimum(&mut self, cost: &DistanceMatrix, routes: &Routes) {
        let Policy::GuidedLocalSearch {
            size, penalties, ..
        } = self
        else {
            return;
        };
        let utility =
            |(a, b): (usize, usize)| cost.get(a, b) / (1.0 + f64::from(penalties[a * *size + b]));
        let max = routes
            .iter()
            .flat_map(|stops| route_arcs(stops))
            .map(utility)
            .fold(0.0, f64::max);
        if max <= 0.0 {
            return;
        }
        let chosen: Vec<(usize, usize)> = routes
            .iter()
            .flat_map(|stops| route_arcs(stops))
            .filter(|&arc| utility(arc) >= max)
            .collect();
        for (a, b) in chosen {
            penalties[a * *size + b] += 1;
        }
    }

    /// The matrix the next descent runs on, when it differs from `cost`.
    pub fn matrix(&self, cost: &DistanceMatrix) -> Option<DistanceMatrix> {
        let Policy::GuidedLocalSearch {
            size,
            penalties,
            lambda,
        } = self
        else {
            return None;
        };
        let mut augmented = DistanceMatrix::new(*size);
        for a in 0..*size {
            for b in 0..*size {
                let penalty = f64::from(penalties[a * size + b]);
                augmented.set(a, b, cost.get(a, b) + lambda * penalty);
            }
        }
        Some(augmented)
    }

    /// Whether `candidate` replaces the current solution.
    pub fn accept(
        &mut self,
        rng: &mut StdRng,
        current_cost: i64,
        candidate: &Routes,
        candidate_cost: i64,
    ) -> bool {
        let delta = (candidate_cost - current_cost) as f64;
        match self {
            Policy::Descent => delta < 0.0,
            Policy::SimulatedAnnealing { temperature } => {
                let accepted = delta <= 0.0 || rng.gen::<f64>() < (-delta / *temperature).exp();
                *temperature = (*temperature * COOLING).max(MIN_TEMPERATURE);
                accepted
            }
            Policy::TabuSearch { recent } => {
                let print = fingerprint(candidate);
                if recent.contains(&print) {
                    return false;
                }
                if recent.len() == TABU_TENURE {
                    recent.pop_front();
                }
                recent.push_back(print);
                true
            }
            // The augmented matrix already steers away from penalised arcs
            Policy::GuidedLocalSearch { .. } => true,
        }
    }
}
