//! Converters from planning results to DTOs.

use chrono::{NaiveDateTime, TimeDelta};
use std::collections::HashMap;

use crate::domain::{Location, MolokId};
use crate::dto::{ActionDto, DroppedDto, OverfillDto, RouteDto, RoutePlanDto, StopDto};
use crate::planner::{PlanOutcome, PlannedRoute, PlanningRequest, RouteStop};

impl RoutePlanDto {
    /// Builds the DTO of `outcome`, looking up positions in `request`.
    ///
    /// # Examples
    ///
    /// ```
    /// use molok_planner::config::PlannerConfig;
    /// use molok_planner::demo_data::three_container_scenario;
    /// use molok_planner::dto::RoutePlanDto;
    /// use molok_planner::engine::URoutingEngine;
    /// use molok_planner::planner::AdaptivePlanner;
    ///
    /// let request = three_container_scenario();
    /// let mut config = PlannerConfig::default_config();
    /// config.solution_limit = Some(1_000);
    /// let outcome = AdaptivePlanner::new(URoutingEngine::new(), config)
    ///     .plan(&request)
    ///     .unwrap();
    ///
    /// let dto = RoutePlanDto::from_outcome(&outcome, &request);
    /// assert_eq!(dto.state, "SUCCESS");
    /// assert_eq!(dto.routes.iter().map(|r| r.moloks.len()).sum::<usize>(), 3);
    /// ```
    pub fn from_outcome(outcome: &PlanOutcome, request: &PlanningRequest) -> Self {
        let locations: HashMap<MolokId, Location> = request
            .moloks
            .iter()
            .map(|m| (m.id, m.location))
            .collect();
        let at = |secs: i64| -> NaiveDateTime { outcome.route_start + TimeDelta::seconds(secs) };

        let routes: Vec<RouteDto> = outcome
            .routes
            .iter()
            .map(|route| route_dto(route, request.depot.location, &locations, &at))
            .collect();

        let dropped = outcome
            .dropped
            .iter()
            .map(|d| DroppedDto {
                molok: d.molok.id.to_string(),
                location: d.molok.location,
                fill_pct: d.molok.fill_pct,
                attempt: d.attempt,
                distance_sum_meters: d.distance_sum_m,
            })
            .collect();

        let overfill = outcome
            .overfill
            .iter()
            .map(|o| OverfillDto {
                molok: o.molok.to_string(),
                deadline: at(o.deadline_secs),
                visit_time: at(o.visit_secs),
                extrapolated_fill_pct: o.extrapolated_fill_pct,
            })
            .collect();

        let log = outcome
            .log
            .iter()
            .map(|r| ActionDto {
                attempt: r.attempt,
                action: r.action.to_string(),
            })
            .collect();

        let total_distance_meters = routes.iter().map(|r| r.total_distance_meters).sum();
        let end_date_time = routes
            .iter()
            .filter(|r| !r.moloks.is_empty())
            .map(|r| r.arrival_time)
            .max();

        Self {
            run_id: outcome.run_id.to_string(),
            state: outcome.state.as_str().to_string(),
            route_start: outcome.route_start,
            routes,
            dropped,
            overfill,
            log,
            final_slack_seconds: outcome.final_slack_secs,
            attempts_used: outcome.attempts_used,
            total_distance_meters,
            end_date_time,
        }
    }
}

fn route_dto(
    route: &PlannedRoute,
    depot: Location,
    locations: &HashMap<MolokId, Location>,
    at: &impl Fn(i64) -> NaiveDateTime,
) -> RouteDto {
    let stops: Vec<StopDto> = route
        .stops
        .iter()
        .map(|s| {
            let (molok, location) = match s.stop {
                RouteStop::Depot => (None, depot),
                RouteStop::Container(id) => (
                    Some(id.to_string()),
                    locations.get(&id).copied().unwrap_or(depot),
                ),
            };
            StopDto {
                molok,
                location,
                arrival_time: at(s.time_secs),
                cumulative_time_seconds: s.time_secs,
                cumulative_load_kg: s.load_kg,
                cumulative_distance_meters: s.distance_m,
            }
        })
        .collect();

    RouteDto {
        vehicle: route.vehicle,
        moloks: route.moloks().iter().map(MolokId::to_string).collect(),
        stops,
        total_time_seconds: route.total_time_secs(),
        total_distance_meters: route.total_distance_m(),
        total_load_kg: route.total_load_kg(),
        departure_time: at(route.stops.first().map_or(0, |s| s.time_secs)),
        arrival_time: at(route.total_time_secs()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::OverfillEntry;
    use crate::demo_data::three_container_scenario;
    use crate::planner::{ActionRecord, PlannedStop, PlannerState, PlanningAction};
    use uuid::Uuid;

    fn stop(stop: RouteStop, time_secs: i64, load_kg: i64, distance_m: i64) -> PlannedStop {
        PlannedStop {
            stop,
            time_secs,
            load_kg,
            distance_m,
        }
    }

    fn outcome(request: &PlanningRequest) -> PlanOutcome {
        PlanOutcome {
            run_id: Uuid::new_v4(),
            state: PlannerState::Success,
            route_start: request.route_start,
            routes: vec![
                PlannedRoute {
                    vehicle: 0,
                    stops: vec![
                        stop(RouteStop::Depot, 0, 0, 0),
                        stop(RouteStop::Container(MolokId(2)), 8_000, 450, 111_000),
                        stop(RouteStop::Depot, 16_600, 450, 222_000),
                    ],
                },
                PlannedRoute {
                    vehicle: 1,
                    stops: vec![stop(RouteStop::Depot, 0, 0, 0), stop(RouteStop::Depot, 0, 0, 0)],
                },
            ],
            emptying_times: Vec::new(),
            log: vec![ActionRecord {
                attempt: 1,
                action: PlanningAction::SlackIncreased { slack_secs: 1800 },
            }],
            dropped: Vec::new(),
            final_slack_secs: 1800,
            overfill: vec![OverfillEntry {
                molok: MolokId(2),
                deadline_secs: 7_000,
                visit_secs: 8_000,
                extrapolated_fill_pct: 104.0,
            }],
            attempts_used: 10,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn test_stops_carry_positions_and_times() {
        let request = three_container_scenario();
        let dto = RoutePlanDto::from_outcome(&outcome(&request), &request);

        let route = &dto.routes[0];
        assert_eq!(route.moloks, vec!["molok-2".to_string()]);
        assert_eq!(route.stops[0].molok, None);
        assert_eq!(route.stops[0].location, request.depot.location);
        assert_eq!(route.stops[1].location, request.moloks[1].location);
        assert_eq!(
            route.stops[1].arrival_time,
            request.route_start + TimeDelta::seconds(8_000)
        );
        assert_eq!(route.total_distance_meters, 222_000);
        assert_eq!(dto.total_distance_meters, 222_000);
        assert_eq!(dto.end_date_time, Some(request.route_start + TimeDelta::seconds(16_600)));
    }

    #[test]
    fn test_overfill_and_log_are_converted() {
        let request = three_container_scenario();
        let dto = RoutePlanDto::from_outcome(&outcome(&request), &request);

        assert_eq!(dto.overfill[0].molok, "molok-2");
        assert_eq!(dto.overfill[0].visit_time - dto.overfill[0].deadline, TimeDelta::seconds(1_000));
        assert_eq!(dto.log[0].action, "slack increased to 1800s");
        assert_eq!(dto.state, "SUCCESS");
    }

    #[test]
    fn test_serializes_camel_case() {
        let request = three_container_scenario();
        let json = serde_json::to_string(&RoutePlanDto::from_outcome(&outcome(&request), &request))
            .unwrap();
        assert!(json.contains("\"finalSlackSeconds\":1800"));
        assert!(json.contains("\"cumulativeLoadKg\":450"));
        assert!(json.contains("\"extrapolatedFillPct\":104.0"));
    }
}
