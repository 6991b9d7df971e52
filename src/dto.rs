//! DTOs for planning results.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::Location;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopDto {
    /// `None` for the depot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub molok: Option<String>,
    pub location: Location,
    pub arrival_time: NaiveDateTime,
    pub cumulative_time_seconds: i64,
    pub cumulative_load_kg: i64,
    pub cumulative_distance_meters: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDto {
    pub vehicle: usize,
    pub moloks: Vec<String>,
    pub stops: Vec<StopDto>,
    #[serde(default)]
    pub total_time_seconds: i64,
    #[serde(default)]
    pub total_distance_meters: i64,
    #[serde(default)]
    pub total_load_kg: i64,
    pub departure_time: NaiveDateTime,
    pub arrival_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedDto {
    pub molok: String,
    pub location: Location,
    pub fill_pct: f64,
    pub attempt: u32,
    pub distance_sum_meters: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverfillDto {
    pub molok: String,
    pub deadline: NaiveDateTime,
    pub visit_time: NaiveDateTime,
    pub extrapolated_fill_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDto {
    pub attempt: u32,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanDto {
    pub run_id: String,
    pub state: String,
    pub route_start: NaiveDateTime,
    pub routes: Vec<RouteDto>,
    #[serde(default)]
    pub dropped: Vec<DroppedDto>,
    #[serde(default)]
    pub overfill: Vec<OverfillDto>,
    #[serde(default)]
    pub log: Vec<ActionDto>,
    pub final_slack_seconds: i64,
    pub attempts_used: u32,
    #[serde(default)]
    pub total_distance_meters: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date_time: Option<NaiveDateTime>,
}
