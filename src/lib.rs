//! Molok Planner
//!
//! Plans collection routes for fill-level monitored waste containers
//! ("moloks"), adapting the problem until a feasible plan exists.
//!
//! # Pipeline
//!
//! - [`telemetry`]: readings in, latest snapshot and histories out
//! - [`growth`]: segmented regression of fill levels into growth rates
//! - [`geometry`]: haversine travel-time and distance matrices
//! - [`problem`]: one immutable [`ProblemInstance`](problem::ProblemInstance) per attempt
//! - [`engine`]: the [`RoutingEngine`](engine::RoutingEngine) seam and a u-routing backend
//! - [`planner`]: the attempt loop relaxing deadlines and dropping isolated moloks
//! - [`audit`]: moloks visited after their un-relaxed deadline
//!
//! # Constraints
//!
//! - **Capacity**: a truck's load never exceeds its capacity
//! - **Deadlines**: a molok is emptied before it is predicted full, plus slack
//! - **Shift**: every route returns to the depot within the shift
//! - **Range**: a truck's driving distance stays within its range

pub mod audit;
pub mod config;
pub mod console;
pub mod converters;
pub mod demo_data;
pub mod domain;
pub mod dto;
pub mod engine;
pub mod geometry;
pub mod growth;
pub mod planner;
pub mod problem;
pub mod service;
pub mod telemetry;
