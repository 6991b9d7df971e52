//! Background planning jobs.
//!
//! Planning runs block for up to their whole time budget, so the service
//! moves each run onto tokio's blocking pool and keeps the result behind a
//! lock until the caller collects it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PlannerConfig;
use crate::engine::RoutingEngine;
use crate::planner::{AdaptivePlanner, PlanOutcome, PlanningRequest};

/// Status of a planning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, not started.
    Pending,
    Planning,
    /// Finished with an outcome, solved or not.
    Finished,
    /// Aborted by an invalid model or config.
    Failed,
}

impl JobStatus {
    /// ```
    /// use molok_planner::service::JobStatus;
    ///
    /// assert_eq!(JobStatus::Planning.as_str(), "PLANNING");
    /// ```
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Planning => "PLANNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
        }
    }
}

/// A planning job with its input and, once done, its result.
pub struct PlanningJob {
    pub id: String,
    pub status: JobStatus,
    pub request: PlanningRequest,
    pub config: PlannerConfig,
    pub outcome: Option<PlanOutcome>,
    pub error: Option<String>,
    stop_flag: Arc<AtomicBool>,
}

impl PlanningJob {
    pub fn new(id: String, request: PlanningRequest, config: PlannerConfig) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            request,
            config,
            outcome: None,
            error: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Manages planning jobs.
///
/// # Examples
///
/// ```
/// use molok_planner::config::PlannerConfig;
/// use molok_planner::demo_data::three_container_scenario;
/// use molok_planner::service::{JobStatus, PlanningService};
///
/// let service = PlanningService::new();
/// let job = service.create_job(three_container_scenario(), PlannerConfig::default_config());
///
/// // Created, not started
/// assert_eq!(job.read().status, JobStatus::Pending);
/// assert_eq!(service.list_jobs().len(), 1);
/// ```
pub struct PlanningService {
    jobs: RwLock<HashMap<String, Arc<RwLock<PlanningJob>>>>,
}

impl PlanningService {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a job under a fresh id.
    pub fn create_job(&self, request: PlanningRequest, config: PlannerConfig) -> Arc<RwLock<PlanningJob>> {
        let id = Uuid::new_v4().to_string();
        let job = Arc::new(RwLock::new(PlanningJob::new(id.clone(), request, config)));
        self.jobs.write().insert(id, job.clone());
        job
    }

    pub fn get_job(&self, id: &str) -> Option<Arc<RwLock<PlanningJob>>> {
        self.jobs.read().get(id).cloned()
    }

    pub fn list_jobs(&self) -> Vec<String> {
        self.jobs.read().keys().cloned().collect()
    }

    pub fn remove_job(&self, id: &str) -> Option<Arc<RwLock<PlanningJob>>> {
        self.jobs.write().remove(id)
    }

    /// Runs the job on the blocking pool with `engine`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_planning<E>(&self, job: Arc<RwLock<PlanningJob>>, engine: E) -> JoinHandle<()>
    where
        E: RoutingEngine + 'static,
    {
        let (request, config, stop_flag) = {
            let mut guard = job.write();
            guard.status = JobStatus::Planning;
            (guard.request.clone(), guard.config.clone(), guard.stop_flag.clone())
        };

        tokio::task::spawn_blocking(move || {
            let mut planner = AdaptivePlanner::new(engine, config).with_stop_flag(stop_flag);
            let result = planner.plan(&request);

            let mut guard = job.write();
            match result {
                Ok(outcome) => {
                    info!(job_id = %guard.id, state = outcome.state.as_str(), "Planning job finished");
                    guard.outcome = Some(outcome);
                    guard.status = JobStatus::Finished;
                }
                Err(e) => {
                    warn!(job_id = %guard.id, error = %e, "Planning job failed");
                    guard.error = Some(e.to_string());
                    guard.status = JobStatus::Failed;
                }
            }
        })
    }

    /// Asks a running job to stop before its next attempt.
    pub fn stop_planning(&self, id: &str) -> bool {
        match self.get_job(id) {
            Some(job) => {
                let guard = job.read();
                if guard.status != JobStatus::Planning {
                    return false;
                }
                guard.stop_flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

impl Default for PlanningService {
    fn default() -> Self {
        Self::new()
    }
}
