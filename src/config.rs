//! Planner configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::engine::{FirstSolutionStrategy, LocalSearchMetaheuristic};

/// Default planning budget: 30 seconds.
const DEFAULT_TIME_BUDGET_SECS: f64 = 30.0;

/// Default number of attempts per run.
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default slack added per failed attempt: 30 minutes.
const DEFAULT_SLACK_INCREMENT_SECS: i64 = 30 * 60;

/// Default slack at which a molok is dropped instead: 2 hours.
const DEFAULT_SLACK_CEILING_SECS: i64 = 2 * 3600;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Cannot read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Cannot parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Budget, strategies and relaxation policy of a planning run.
///
/// Missing JSON fields fall back to [`PlannerConfig::default_config`].
///
/// ```
/// use molok_planner::config::PlannerConfig;
///
/// let config = PlannerConfig::from_json_str(r#"{ "maxAttempts": 4, "slackCeilingSecs": null }"#)
///     .unwrap();
/// assert_eq!(config.max_attempts, 4);
/// assert_eq!(config.slack_ceiling_secs, None);
/// assert_eq!(config.slack_increment_secs, 1800);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerConfig {
    /// Wall-clock budget for the whole run, in seconds.
    pub time_budget_secs: f64,
    pub max_attempts: u32,
    pub first_solution_strategy: FirstSolutionStrategy,
    pub metaheuristic: Option<LocalSearchMetaheuristic>,
    /// Per-attempt cap on candidate solutions evaluated.
    pub solution_limit: Option<u64>,
    pub seed: u64,
    pub slack_increment_secs: i64,
    /// `None` never drops a molok.
    pub slack_ceiling_secs: Option<i64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl PlannerConfig {
    /// Creates a config with a 30-second budget and guided local search.
    pub fn default_config() -> Self {
        Self {
            time_budget_secs: DEFAULT_TIME_BUDGET_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            first_solution_strategy: FirstSolutionStrategy::Automatic,
            metaheuristic: Some(LocalSearchMetaheuristic::Automatic),
            solution_limit: None,
            seed: 0,
            slack_increment_secs: DEFAULT_SLACK_INCREMENT_SECS,
            slack_ceiling_secs: Some(DEFAULT_SLACK_CEILING_SECS),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    #[inline]
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs_f64(self.time_budget_secs.max(0.0))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.time_budget_secs.is_finite() && self.time_budget_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "time budget must be positive, got {}",
                self.time_budget_secs
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("at least one attempt is required".into()));
        }
        if self.slack_increment_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "slack increment must be positive, got {}",
                self.slack_increment_secs
            )));
        }
        if let Some(ceiling) = self.slack_ceiling_secs {
            if ceiling < 0 {
                return Err(ConfigError::Invalid(format!(
                    "slack ceiling must not be negative, got {}",
                    ceiling
                )));
            }
        }
        Ok(())
    }
}
