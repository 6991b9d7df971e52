//! Molok Planner - Aalborg demo
//!
//! Simulates a week of sensor readings, estimates growth rates and plans
//! today's collection routes. An optional first argument names a JSON
//! planner config.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use molok_planner::config::PlannerConfig;
use molok_planner::console;
use molok_planner::demo_data::{aalborg_request, aalborg_sites, FillSimulator, AALBORG_MOLOK_CAPACITY_KG};
use molok_planner::dto::RoutePlanDto;
use molok_planner::engine::URoutingEngine;
use molok_planner::growth::ResetRule;
use molok_planner::service::PlanningService;
use molok_planner::telemetry::{
    assemble_moloks, spawn_ingestion, InMemoryReadingStore, ReadingStore, DEFAULT_ESTIMATION_WINDOW_SECS,
};

const DEMO_SEED: u64 = 0;
const DEMO_MOLOKS: usize = 40;

/// Sensors report every three hours.
const SENSOR_INTERVAL_SECS: f64 = 3.0 * 3600.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("molok_planner=info".parse()?))
        .init();

    console::print_banner();

    let config = match std::env::args().nth(1) {
        Some(path) => PlannerConfig::load(path)?,
        None => PlannerConfig::default_config(),
    };

    // A week of readings up to the route start
    let route_start = aalborg_request(Vec::new()).route_start;
    let end = route_start.and_utc().timestamp() as f64;
    let start = end - DEFAULT_ESTIMATION_WINDOW_SECS;

    let store = Arc::new(InMemoryReadingStore::new());
    let (tx, rx) = mpsc::channel(256);
    let ingestion = spawn_ingestion(store.clone(), rx);

    let mut simulator = FillSimulator::new(DEMO_SEED, &aalborg_sites(DEMO_SEED, DEMO_MOLOKS));
    for reading in simulator.run(start, end, SENSOR_INTERVAL_SECS) {
        tx.send(reading).await?;
    }
    drop(tx);
    let stored = ingestion.await?;

    let report = assemble_moloks(
        store.as_ref(),
        AALBORG_MOLOK_CAPACITY_KG,
        ResetRule::OnDecrease,
        start,
        end,
    );
    info!(
        stored,
        moloks = report.moloks.len(),
        skipped = report.skipped.len(),
        "Assembled moloks from telemetry"
    );

    let service = PlanningService::new();
    let job = service.create_job(aalborg_request(report.moloks), config);
    service
        .start_planning(job.clone(), URoutingEngine::new())
        .await?;

    let guard = job.read();
    if let Some(error) = &guard.error {
        return Err(error.clone().into());
    }
    if let Some(outcome) = &guard.outcome {
        let dto = RoutePlanDto::from_outcome(outcome, &guard.request);
        println!("{}", serde_json::to_string_pretty(&dto)?);

        let marked: usize = outcome
            .emptying_events()
            .into_iter()
            .map(|(id, at)| store.mark_emptied(&[id], at))
            .sum();
        info!(marked, "Marked visited moloks emptied");
    }

    Ok(())
}
