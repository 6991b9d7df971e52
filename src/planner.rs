//! Adaptive planning controller.
//!
//! Runs a bounded sequence of solve attempts. Each attempt builds a fresh
//! [`ProblemInstance`] from the surviving moloks and the accumulated slack,
//! hands it to a [`RoutingEngine`] and reacts to the outcome:
//!
//! - solved before the last attempt: jump to the last attempt and spend the
//!   remaining budget refining the solution from a warm start;
//! - no solution or timed out: add slack, or once slack reaches the ceiling,
//!   drop the most isolated molok and reset slack;
//! - invalid model: abort the run.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{audit_overfill, OverfillEntry};
use crate::config::{ConfigError, PlannerConfig};
use crate::console;
use crate::domain::{Depot, Molok, MolokId, TruckFleet, AVERAGE_SPEED_KMPH};
use crate::engine::{Assignment, RoutingEngine, SearchParameters, SolveResult};
use crate::geometry::MatrixSettings;
use crate::problem::{build_instance, ProblemError, ProblemInstance};

fn default_speed() -> f64 {
    AVERAGE_SPEED_KMPH
}

/// Everything a planning run needs besides its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningRequest {
    pub depot: Depot,
    pub moloks: Vec<Molok>,
    pub fleet: TruckFleet,
    /// Time spent emptying one molok, in seconds.
    pub emptying_secs: i64,
    #[serde(default = "default_speed")]
    pub speed_kmph: f64,
    /// Wall-clock time the trucks leave the depot.
    pub route_start: NaiveDateTime,
}

impl PlanningRequest {
    pub fn matrix_settings(&self) -> MatrixSettings {
        MatrixSettings::new(self.emptying_secs, self.speed_kmph)
    }
}

/// State of the planning state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannerState {
    Attempting,
    Relaxing,
    Dropping,
    Success,
    ExhaustedBudget,
}

impl PlannerState {
    /// ```
    /// use molok_planner::planner::PlannerState;
    ///
    /// assert_eq!(PlannerState::ExhaustedBudget.as_str(), "EXHAUSTED_BUDGET");
    /// assert!(PlannerState::Success.is_terminal());
    /// assert!(!PlannerState::Relaxing.is_terminal());
    /// ```
    pub fn as_str(self) -> &'static str {
        match self {
            PlannerState::Attempting => "ATTEMPTING",
            PlannerState::Relaxing => "RELAXING",
            PlannerState::Dropping => "DROPPING",
            PlannerState::Success => "SUCCESS",
            PlannerState::ExhaustedBudget => "EXHAUSTED_BUDGET",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlannerState::Success | PlannerState::ExhaustedBudget)
    }
}

/// What the controller did after an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlanningAction {
    Solved { objective: i64, visits: usize },
    /// The engine returned `NO_SOLUTION_FOUND` or `TIMED_OUT`.
    Failed { outcome: String },
    SlackIncreased { slack_secs: i64 },
    MolokDropped { molok: MolokId, distance_sum_m: i64 },
    JumpedToFinal { attempt: u32 },
    BudgetExpired,
    Cancelled,
}

impl fmt::Display for PlanningAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanningAction::Solved { objective, visits } => {
                write!(f, "solved ({} visits, objective {})", visits, objective)
            }
            PlanningAction::Failed { outcome } => write!(f, "failed ({})", outcome),
            PlanningAction::SlackIncreased { slack_secs } => {
                write!(f, "slack increased to {}s", slack_secs)
            }
            PlanningAction::MolokDropped {
                molok,
                distance_sum_m,
            } => write!(f, "dropped {} (distance sum {} m)", molok, distance_sum_m),
            PlanningAction::JumpedToFinal { attempt } => {
                write!(f, "jumped to final attempt {}", attempt)
            }
            PlanningAction::BudgetExpired => f.write_str("time budget expired"),
            PlanningAction::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// One entry of the action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub attempt: u32,
    pub action: PlanningAction,
}

/// A molok removed to make the problem feasible, with its original attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedMolok {
    pub molok: Molok,
    pub attempt: u32,
    pub distance_sum_m: i64,
}

/// A route position: the depot or a molok.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "molok")]
pub enum RouteStop {
    Depot,
    Container(MolokId),
}

/// A stop with the cumulative values on arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStop {
    pub stop: RouteStop,
    /// Seconds since route start.
    pub time_secs: i64,
    pub load_kg: i64,
    pub distance_m: i64,
}

/// One truck's route, depot at both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRoute {
    pub vehicle: usize,
    pub stops: Vec<PlannedStop>,
}

impl PlannedRoute {
    /// Moloks in visiting order.
    pub fn moloks(&self) -> Vec<MolokId> {
        self.stops
            .iter()
            .filter_map(|s| match s.stop {
                RouteStop::Container(id) => Some(id),
                RouteStop::Depot => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.moloks().is_empty()
    }

    pub fn total_time_secs(&self) -> i64 {
        self.stops.last().map_or(0, |s| s.time_secs)
    }

    pub fn total_load_kg(&self) -> i64 {
        self.stops.last().map_or(0, |s| s.load_kg)
    }

    pub fn total_distance_m(&self) -> i64 {
        self.stops.last().map_or(0, |s| s.distance_m)
    }
}

/// When a molok gets emptied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyingTime {
    pub molok: MolokId,
    pub offset_secs: i64,
    pub at: NaiveDateTime,
}

/// Result of a planning run that did not hit a fatal error.
///
/// `routes` is empty when no attempt found a solution; check
/// [`PlanOutcome::is_solved`] before using it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutcome {
    pub run_id: Uuid,
    pub state: PlannerState,
    pub route_start: NaiveDateTime,
    pub routes: Vec<PlannedRoute>,
    pub emptying_times: Vec<EmptyingTime>,
    pub log: Vec<ActionRecord>,
    pub dropped: Vec<DroppedMolok>,
    pub final_slack_secs: i64,
    pub overfill: Vec<OverfillEntry>,
    pub attempts_used: u32,
    pub elapsed_ms: u64,
}

impl PlanOutcome {
    pub fn is_solved(&self) -> bool {
        !self.routes.is_empty()
    }

    /// Every visited molok, route by route.
    pub fn visited(&self) -> Vec<MolokId> {
        self.routes.iter().flat_map(PlannedRoute::moloks).collect()
    }

    /// Emptied moloks with the Unix time of their visit, ready for
    /// [`ReadingStore::mark_emptied`](crate::telemetry::ReadingStore::mark_emptied).
    pub fn emptying_events(&self) -> Vec<(MolokId, f64)> {
        self.emptying_times
            .iter()
            .map(|e| {
                let at = e.at.and_utc();
                let secs = at.timestamp() as f64 + f64::from(at.timestamp_subsec_millis()) / 1000.0;
                (e.molok, secs)
            })
            .collect()
    }
}

/// Unrecoverable planning failure.
#[derive(Debug)]
pub enum PlanningError {
    /// The input cannot describe any routing problem.
    InvalidModel {
        attempt: u32,
        error: ProblemError,
        log: Vec<ActionRecord>,
    },
    Config(ConfigError),
}

impl fmt::Display for PlanningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanningError::InvalidModel { attempt, error, log } => write!(
                f,
                "Attempt {} aborted the run after {} logged actions: {}",
                attempt,
                log.len(),
                error
            ),
            PlanningError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PlanningError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlanningError::InvalidModel { error, .. } => Some(error),
            PlanningError::Config(e) => Some(e),
        }
    }
}

impl From<ConfigError> for PlanningError {
    fn from(e: ConfigError) -> Self {
        PlanningError::Config(e)
    }
}

/// Best solution found so far, with the instance it belongs to.
struct BestSolution {
    instance: ProblemInstance,
    assignment: Assignment,
    routes: Vec<Vec<MolokId>>,
}

/// Mutable state of one run.
struct RunState {
    attempt: u32,
    state: PlannerState,
    slack_secs: i64,
    moloks: Vec<Molok>,
    dropped: Vec<DroppedMolok>,
    log: Vec<ActionRecord>,
    best: Option<BestSolution>,
    /// Highest attempt number handed to the engine.
    attempts_used: u32,
}

impl RunState {
    fn record(&mut self, action: PlanningAction) {
        self.log.push(ActionRecord {
            attempt: self.attempt,
            action,
        });
    }
}

/// Drives a [`RoutingEngine`] through relaxation attempts.
///
/// # Examples
///
/// ```
/// use molok_planner::config::PlannerConfig;
/// use molok_planner::demo_data::three_container_scenario;
/// use molok_planner::engine::URoutingEngine;
/// use molok_planner::planner::{AdaptivePlanner, PlannerState};
///
/// let mut config = PlannerConfig::default_config();
/// config.time_budget_secs = 5.0;
/// config.solution_limit = Some(2_000);
///
/// let mut planner = AdaptivePlanner::new(URoutingEngine::new(), config);
/// let outcome = planner.plan(&three_container_scenario()).unwrap();
///
/// assert_eq!(outcome.state, PlannerState::Success);
/// assert_eq!(outcome.visited().len(), 3);
/// ```
pub struct AdaptivePlanner<E: RoutingEngine> {
    engine: E,
    config: PlannerConfig,
    stop_flag: Arc<AtomicBool>,
}

impl<E: RoutingEngine> AdaptivePlanner<E> {
    pub fn new(engine: E, config: PlannerConfig) -> Self {
        Self {
            engine,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares a cancellation flag, checked before every attempt.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = flag;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Runs attempts until one solves on the final attempt, the attempts run
    /// out, the budget expires or the stop flag is raised.
    pub fn plan(&mut self, request: &PlanningRequest) -> Result<PlanOutcome, PlanningError> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let deadline = started + self.config.time_budget();
        let total = self.config.max_attempts;
        let settings = request.matrix_settings();

        console::print_config(
            request.fleet.count,
            request.moloks.len(),
            total,
            self.config.time_budget(),
        );
        info!(
            run_id = %run_id,
            engine = self.engine.name(),
            moloks = request.moloks.len(),
            trucks = request.fleet.count,
            max_attempts = total,
            budget_secs = self.config.time_budget_secs,
            "Starting planning run"
        );

        let mut run = RunState {
            attempt: 1,
            state: PlannerState::Attempting,
            slack_secs: 0,
            moloks: request.moloks.clone(),
            dropped: Vec::new(),
            log: Vec::new(),
            best: None,
            attempts_used: 0,
        };

        while run.attempt <= total {
            if self.stop_flag.load(Ordering::SeqCst) {
                info!(run_id = %run_id, attempt = run.attempt, "Planning cancelled");
                run.record(PlanningAction::Cancelled);
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(run_id = %run_id, attempt = run.attempt, "Planning budget expired");
                run.record(PlanningAction::BudgetExpired);
                break;
            }

            run.state = PlannerState::Attempting;
            let remaining = total - run.attempt + 1;
            let slice = (deadline - now) / remaining;

            let instance = match build_instance(
                &request.depot,
                &run.moloks,
                &request.fleet,
                &settings,
                run.slack_secs,
                run.attempt,
            ) {
                Ok(instance) => instance,
                Err(error) => return Err(self.abort(run, error)),
            };
            let warm_start = run
                .best
                .as_ref()
                .map(|best| instance.local_routes(&best.routes));

            let timer = console::AttemptTimer::start(run.attempt, total, run.moloks.len(), run.slack_secs, slice);
            info!(
                run_id = %run_id,
                attempt = run.attempt,
                moloks = run.moloks.len(),
                slack_secs = run.slack_secs,
                budget_ms = slice.as_millis() as u64,
                warm_start = warm_start.is_some(),
                "Attempt started"
            );

            run.attempts_used = run.attempt;
            let params = self.search_parameters(slice, run.attempt);
            let outcome = self
                .engine
                .solve(&instance.model, &params, warm_start.as_deref());
            timer.finish(&outcome);

            match outcome.result {
                SolveResult::Solved(assignment) => {
                    let routes = instance.molok_routes(&assignment);
                    info!(
                        run_id = %run_id,
                        attempt = run.attempt,
                        objective = assignment.objective,
                        visits = assignment.num_visits(),
                        "Attempt solved"
                    );
                    run.record(PlanningAction::Solved {
                        objective: assignment.objective,
                        visits: assignment.num_visits(),
                    });
                    run.best = Some(BestSolution {
                        instance,
                        assignment,
                        routes,
                    });
                    if run.attempt >= total {
                        run.state = PlannerState::Success;
                        break;
                    }
                    run.record(PlanningAction::JumpedToFinal { attempt: total });
                    run.attempt = total;
                    continue;
                }
                SolveResult::InvalidModel(error) => {
                    return Err(self.abort(run, ProblemError::Model(error)));
                }
                failed => {
                    warn!(
                        run_id = %run_id,
                        attempt = run.attempt,
                        outcome = failed.as_str(),
                        "Attempt failed"
                    );
                    run.record(PlanningAction::Failed {
                        outcome: failed.as_str().to_string(),
                    });
                    // A solution from an earlier attempt is kept as is
                    if run.best.is_none() {
                        self.relax_or_drop(&mut run, &instance);
                    }
                }
            }
            run.attempt += 1;
        }

        // Cancellation and expiry end in the same terminal state as running out of attempts
        if run.state != PlannerState::Success {
            run.state = PlannerState::ExhaustedBudget;
        }

        let outcome = finalize(run_id, run, request, started.elapsed());

        info!(
            run_id = %run_id,
            state = outcome.state.as_str(),
            attempts = outcome.attempts_used,
            visits = outcome.visited().len(),
            dropped = outcome.dropped.len(),
            final_slack_secs = outcome.final_slack_secs,
            overfilled = outcome.overfill.len(),
            "Planning run finished"
        );
        console::print_planning_ended(&outcome);

        Ok(outcome)
    }

    fn search_parameters(&self, time_limit: Duration, attempt: u32) -> SearchParameters {
        SearchParameters {
            first_solution_strategy: self.config.first_solution_strategy,
            metaheuristic: self.config.metaheuristic,
            time_limit: Some(time_limit),
            solution_limit: self.config.solution_limit,
            seed: self.config.seed.wrapping_add(u64::from(attempt)),
        }
    }

    /// Adds slack, or drops the most isolated molok once slack hit the ceiling.
    fn relax_or_drop(&self, run: &mut RunState, instance: &ProblemInstance) {
        let at_ceiling = self
            .config
            .slack_ceiling_secs
            .is_some_and(|ceiling| run.slack_secs >= ceiling);

        if at_ceiling {
            if let Some((id, distance_sum_m)) = instance.most_isolated() {
                if let Some(pos) = run.moloks.iter().position(|m| m.id == id) {
                    run.state = PlannerState::Dropping;
                    let molok = run.moloks.remove(pos);
                    info!(
                        attempt = run.attempt,
                        molok = %id,
                        distance_sum_m,
                        remaining = run.moloks.len(),
                        "Dropping most isolated molok"
                    );
                    console::print_dropped(id, distance_sum_m, run.moloks.len());
                    run.dropped.push(DroppedMolok {
                        molok,
                        attempt: run.attempt,
                        distance_sum_m,
                    });
                    run.slack_secs = 0;
                    run.record(PlanningAction::MolokDropped {
                        molok: id,
                        distance_sum_m,
                    });
                    return;
                }
            }
        }

        run.state = PlannerState::Relaxing;
        run.slack_secs = run.slack_secs.saturating_add(self.config.slack_increment_secs);
        info!(
            attempt = run.attempt,
            slack_secs = run.slack_secs,
            "Increasing slack"
        );
        console::print_relaxed(run.slack_secs);
        let slack_secs = run.slack_secs;
        run.record(PlanningAction::SlackIncreased { slack_secs });
    }

    fn abort(&self, run: RunState, error: ProblemError) -> PlanningError {
        warn!(attempt = run.attempt, error = %error, "Planning run aborted");
        PlanningError::InvalidModel {
            attempt: run.attempt,
            error,
            log: run.log,
        }
    }
}

/// Turns the best assignment into routes, emptying times and the overfill report.
fn finalize(
    run_id: Uuid,
    run: RunState,
    request: &PlanningRequest,
    elapsed: Duration,
) -> PlanOutcome {
    let mut routes = Vec::new();
    let mut emptying_times = Vec::new();

    if let Some(best) = &run.best {
        let instance = &best.instance;
        for route in &best.assignment.routes {
            let stops: Vec<PlannedStop> = route
                .nodes
                .iter()
                .enumerate()
                .map(|(pos, &node)| {
                    let cumul = |dim: usize| {
                        route
                            .cumuls
                            .get(pos)
                            .and_then(|c| c.get(dim))
                            .copied()
                            .unwrap_or(0)
                    };
                    let stop = match instance.index.molok_at(node) {
                        Some(id) => RouteStop::Container(id),
                        None => RouteStop::Depot,
                    };
                    PlannedStop {
                        stop,
                        time_secs: cumul(instance.time_dimension),
                        load_kg: cumul(instance.capacity_dimension),
                        distance_m: cumul(instance.distance_dimension),
                    }
                })
                .collect();

            for stop in &stops {
                if let RouteStop::Container(molok) = stop.stop {
                    emptying_times.push(EmptyingTime {
                        molok,
                        offset_secs: stop.time_secs,
                        at: request.route_start + TimeDelta::seconds(stop.time_secs),
                    });
                }
            }

            routes.push(PlannedRoute {
                vehicle: route.vehicle,
                stops,
            });
        }
    }

    let visits: Vec<(MolokId, i64)> = emptying_times
        .iter()
        .map(|e| (e.molok, e.offset_secs))
        .collect();
    let overfill = audit_overfill(&request.moloks, &visits);

    PlanOutcome {
        run_id,
        state: run.state,
        route_start: request.route_start,
        routes,
        emptying_times,
        attempts_used: run.attempts_used,
        log: run.log,
        dropped: run.dropped,
        final_slack_secs: run.slack_secs,
        overfill,
        elapsed_ms: elapsed.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_data::three_container_scenario;
    use crate::domain::Location;
    use crate::engine::{ModelError, RoutingModel, SolveOutcome, SolveStatistics, URoutingEngine};

    fn quick_config() -> PlannerConfig {
        let mut config = PlannerConfig::default_config();
        config.time_budget_secs = 10.0;
        config.solution_limit = Some(2_000);
        config
    }

    /// Engine replaying a fixed list of outcomes.
    struct ScriptedEngine {
        script: Vec<SolveResult>,
        calls: usize,
        warm_starts: Vec<bool>,
        delay: Duration,
    }

    impl ScriptedEngine {
        fn new(script: Vec<SolveResult>) -> Self {
            Self {
                script,
                calls: 0,
                warm_starts: Vec::new(),
                delay: Duration::ZERO,
            }
        }

        /// Sleeps for `delay` on every solve call.
        fn slow(script: Vec<SolveResult>, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(script)
            }
        }
    }

    impl RoutingEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        fn solve(
            &mut self,
            _model: &RoutingModel,
            _params: &SearchParameters,
            initial_routes: Option<&[Vec<usize>]>,
        ) -> SolveOutcome {
            std::thread::sleep(self.delay);
            self.warm_starts.push(initial_routes.is_some());
            let result = self
                .script
                .get(self.calls)
                .cloned()
                .unwrap_or(SolveResult::NoSolutionFound);
            self.calls += 1;
            SolveOutcome {
                result,
                statistics: SolveStatistics::default(),
            }
        }
    }

    #[test]
    fn test_three_container_scenario_succeeds() {
        let request = three_container_scenario();
        let mut planner = AdaptivePlanner::new(URoutingEngine::new(), quick_config());
        let outcome = planner.plan(&request).unwrap();

        assert_eq!(outcome.state, PlannerState::Success);
        assert_eq!(outcome.routes.len(), 2);

        let mut visited = outcome.visited();
        visited.sort();
        assert_eq!(visited, vec![MolokId(1), MolokId(2), MolokId(3)]);

        for route in &outcome.routes {
            assert_eq!(route.stops.first().map(|s| s.stop), Some(RouteStop::Depot));
            assert_eq!(route.stops.last().map(|s| s.stop), Some(RouteStop::Depot));
            for stop in &route.stops {
                assert!(stop.load_kg <= 3000);
                assert!(stop.time_secs <= request.fleet.shift_secs());
            }
        }
        assert_eq!(outcome.emptying_times.len(), 3);
        assert!(outcome.dropped.is_empty());
        assert!(outcome.overfill.is_empty());
    }

    #[test]
    fn test_far_molok_is_dropped_then_solved() {
        let mut request = three_container_scenario();
        request.moloks[1].location = Location::new(50.0, 10.0);
        let far = request.moloks[1].id;

        let mut config = quick_config();
        config.slack_increment_secs = 1800;
        config.slack_ceiling_secs = Some(3600);
        config.max_attempts = 6;

        let mut planner = AdaptivePlanner::new(URoutingEngine::new(), config);
        let outcome = planner.plan(&request).unwrap();

        assert_eq!(outcome.state, PlannerState::Success);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].molok.id, far);
        assert_eq!(outcome.dropped[0].molok, request.moloks[1]);

        let mut visited = outcome.visited();
        visited.sort();
        assert_eq!(visited, vec![MolokId(1), MolokId(3)]);

        let actions: Vec<_> = outcome.log.iter().map(|r| r.action.clone()).collect();
        assert!(matches!(actions[1], PlanningAction::SlackIncreased { slack_secs: 1800 }));
        assert!(matches!(actions[3], PlanningAction::SlackIncreased { slack_secs: 3600 }));
        assert!(matches!(actions[5], PlanningAction::MolokDropped { molok, .. } if molok == far));
        assert_eq!(outcome.final_slack_secs, 0);
    }

    #[test]
    fn test_early_success_jumps_to_final_attempt() {
        let solved = SolveResult::Solved(Assignment {
            routes: Vec::new(),
            objective: 0,
        });
        let engine = ScriptedEngine::new(vec![
            SolveResult::TimedOut,
            solved.clone(),
            solved,
        ]);
        let mut planner = AdaptivePlanner::new(engine, quick_config());
        let outcome = planner.plan(&three_container_scenario()).unwrap();

        assert_eq!(outcome.state, PlannerState::Success);
        assert_eq!(planner.engine().calls, 3);
        assert_eq!(planner.engine().warm_starts, vec![false, false, true]);
        assert!(outcome
            .log
            .iter()
            .any(|r| r.attempt == 2 && r.action == PlanningAction::JumpedToFinal { attempt: 10 }));
        assert_eq!(outcome.attempts_used, 10);
    }

    #[test]
    fn test_exhausted_budget_returns_log_without_routes() {
        let engine = ScriptedEngine::new(Vec::new());
        let mut config = quick_config();
        config.max_attempts = 3;
        config.slack_ceiling_secs = None;

        let mut planner = AdaptivePlanner::new(engine, config);
        let outcome = planner.plan(&three_container_scenario()).unwrap();

        assert_eq!(outcome.state, PlannerState::ExhaustedBudget);
        assert!(!outcome.is_solved());
        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.final_slack_secs, 3 * 1800);
        assert_eq!(outcome.log.len(), 6);
        assert_eq!(outcome.attempts_used, 3);
    }

    #[test]
    fn test_slow_engine_stops_at_budget() {
        let engine = ScriptedEngine::slow(vec![SolveResult::TimedOut], Duration::from_millis(300));
        let mut config = quick_config();
        config.time_budget_secs = 0.2;
        config.max_attempts = 5;

        let mut planner = AdaptivePlanner::new(engine, config);
        let outcome = planner.plan(&three_container_scenario()).unwrap();

        assert_eq!(planner.engine().calls, 1);
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(outcome.state, PlannerState::ExhaustedBudget);
        let expired = outcome
            .log
            .iter()
            .find(|r| r.action == PlanningAction::BudgetExpired)
            .expect("budget expiry is logged");
        assert_eq!(expired.attempt, 2);
    }

    #[test]
    fn test_invalid_model_is_fatal() {
        let engine = ScriptedEngine::new(vec![
            SolveResult::NoSolutionFound,
            SolveResult::InvalidModel(ModelError::NoVehicles),
        ]);
        let mut planner = AdaptivePlanner::new(engine, quick_config());
        let err = planner.plan(&three_container_scenario()).unwrap_err();

        match err {
            PlanningError::InvalidModel { attempt, log, .. } => {
                assert_eq!(attempt, 2);
                assert_eq!(log.len(), 2);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_coordinates_abort_before_solving() {
        let mut request = three_container_scenario();
        request.moloks[0].location = Location::new(f64::NAN, 0.0);
        let mut planner = AdaptivePlanner::new(ScriptedEngine::new(Vec::new()), quick_config());
        assert!(matches!(
            planner.plan(&request),
            Err(PlanningError::InvalidModel { attempt: 1, .. })
        ));
        assert_eq!(planner.engine().calls, 0);
    }

    #[test]
    fn test_stop_flag_cancels_before_first_attempt() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut planner =
            AdaptivePlanner::new(ScriptedEngine::new(Vec::new()), quick_config()).with_stop_flag(flag);
        let outcome = planner.plan(&three_container_scenario()).unwrap();

        assert_eq!(outcome.state, PlannerState::ExhaustedBudget);
        assert_eq!(outcome.log[0].action, PlanningAction::Cancelled);
        assert_eq!(planner.engine().calls, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = quick_config();
        config.max_attempts = 0;
        let mut planner = AdaptivePlanner::new(ScriptedEngine::new(Vec::new()), config);
        assert!(matches!(
            planner.plan(&three_container_scenario()),
            Err(PlanningError::Config(_))
        ));
    }

    #[test]
    fn test_emptying_times_follow_route_start() {
        let request = three_container_scenario();
        let mut planner = AdaptivePlanner::new(URoutingEngine::new(), quick_config());
        let outcome = planner.plan(&request).unwrap();

        for e in &outcome.emptying_times {
            assert_eq!(e.at - request.route_start, TimeDelta::seconds(e.offset_secs));
        }
        let events = outcome.emptying_events();
        assert_eq!(events.len(), 3);
        let start = request.route_start.and_utc().timestamp() as f64;
        assert!(events.iter().all(|&(_, t)| t > start));
    }
}
