//! Colorful console output for planning runs.
//!
//! Every function is a no-op when the `console` feature is disabled.

use num_format::{Locale, ToFormattedString};
use owo_colors::OwoColorize;
use std::time::{Duration, Instant};

use crate::domain::MolokId;
use crate::engine::{SolveOutcome, SolveResult};
use crate::planner::{PlanOutcome, PlannerState};

#[inline]
fn enabled() -> bool {
    cfg!(feature = "console")
}

/// ASCII art banner for planner startup.
pub fn print_banner() {
    if !enabled() {
        return;
    }
    let banner = r#"
  __  __       _       _      ____  _
 |  \/  | ___ | | ___ | | __ |  _ \| | __ _ _ __  _ __   ___ _ __
 | |\/| |/ _ \| |/ _ \| |/ / | |_) | |/ _` | '_ \| '_ \ / _ \ '__|
 | |  | | (_) | | (_) |   <  |  __/| | (_| | | | | | | |  __/ |
 |_|  |_|\___/|_|\___/|_|\_\ |_|   |_|\__,_|_| |_|_| |_|\___|_|
"#;
    println!("{}", banner.cyan().bold());
    println!(
        "  {} {}\n",
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black(),
        "Adaptive Waste Collection Routing".bright_cyan()
    );
}

/// Prints the size of the planning run.
pub fn print_config(trucks: usize, moloks: usize, max_attempts: u32, budget: Duration) {
    if !enabled() {
        return;
    }
    println!(
        "{} {} {} Problem: trucks ({}), moloks ({}), attempts ({}), budget ({})",
        timestamp().bright_black(),
        "INFO".bright_green(),
        "[Planner]".bright_cyan(),
        trucks.to_formatted_string(&Locale::en).bright_yellow(),
        moloks.to_formatted_string(&Locale::en).bright_yellow(),
        max_attempts.to_formatted_string(&Locale::en).bright_yellow(),
        format_duration(budget).yellow()
    );
}

/// Prints an attempt start message.
pub fn print_attempt_start(attempt: u32, total: u32, moloks: usize, slack_secs: i64, budget: Duration) {
    if !enabled() {
        return;
    }
    println!(
        "{} {} {} {} ({}/{}) started: moloks ({}), slack ({}), budget ({})",
        timestamp().bright_black(),
        "INFO".bright_green(),
        format!("[Attempt {}]", attempt).bright_cyan(),
        "Attempt".white().bold(),
        attempt.to_string().yellow(),
        total,
        moloks.to_formatted_string(&Locale::en).bright_yellow(),
        format!("{}s", slack_secs).yellow(),
        format_duration(budget).yellow()
    );
}

/// Prints an attempt end message with engine metrics.
pub fn print_attempt_end(attempt: u32, duration: Duration, outcome: &SolveOutcome) {
    if !enabled() {
        return;
    }
    let stats = &outcome.statistics;
    let evals_per_sec = if duration.as_secs_f64() > 0.0 {
        (stats.candidates_evaluated as f64 / duration.as_secs_f64()) as u64
    } else {
        0
    };
    let objective = match &outcome.result {
        SolveResult::Solved(assignment) => assignment.objective.to_formatted_string(&Locale::en),
        _ => "-".to_string(),
    };

    println!(
        "{} {} {} {} ({}) ended: time spent ({}), outcome ({}), objective ({}), evaluation speed ({}/sec), moves accepted ({})",
        timestamp().bright_black(),
        "INFO".bright_green(),
        format!("[Attempt {}]", attempt).bright_cyan(),
        "Attempt".white().bold(),
        attempt.to_string().yellow(),
        format_duration(duration).yellow(),
        format_result(&outcome.result),
        objective.white(),
        evals_per_sec.to_formatted_string(&Locale::en).bright_magenta().bold(),
        stats.moves_accepted.to_formatted_string(&Locale::en).white()
    );
}

/// Prints a slack relaxation.
pub fn print_relaxed(slack_secs: i64) {
    if !enabled() {
        return;
    }
    println!(
        "    {} Relaxing │ slack now {}",
        "→".bright_blue(),
        format_duration(Duration::from_secs(slack_secs.max(0) as u64)).yellow()
    );
}

/// Prints a dropped molok.
pub fn print_dropped(molok: MolokId, distance_sum_m: i64, remaining: usize) {
    if !enabled() {
        return;
    }
    println!(
        "    {} Dropping │ {} │ distance sum {} m │ {} left",
        "✗".bright_red(),
        molok.to_string().bright_red().bold(),
        distance_sum_m.to_formatted_string(&Locale::en).white(),
        remaining.to_formatted_string(&Locale::en).bright_yellow()
    );
}

/// Prints the planning summary box.
pub fn print_planning_ended(outcome: &PlanOutcome) {
    if !enabled() {
        return;
    }
    let elapsed = Duration::from_millis(outcome.elapsed_ms);
    println!(
        "{} {} {} Planning ended: time spent ({}), state ({}), attempts ({})",
        timestamp().bright_black(),
        "INFO".bright_green(),
        "[Planner]".bright_cyan(),
        format_duration(elapsed).yellow(),
        outcome.state.as_str().white().bold(),
        outcome.attempts_used.to_string().white()
    );

    // 60 chars wide, 56 char content area
    println!();
    println!("{}", "╔══════════════════════════════════════════════════════════╗".bright_cyan());

    let solved = outcome.state == PlannerState::Success;
    let status_text = if solved {
        "✓ ROUTES PLANNED"
    } else {
        "✗ BUDGET EXHAUSTED"
    };
    let status_colored = if solved {
        status_text.bright_green().bold().to_string()
    } else {
        status_text.bright_red().bold().to_string()
    };
    let status_padding = 56 - status_text.chars().count();
    let left_pad = status_padding / 2;
    let right_pad = status_padding - left_pad;
    println!(
        "{}{}{}{}{}",
        "║".bright_cyan(),
        " ".repeat(left_pad),
        status_colored,
        " ".repeat(right_pad),
        "║".bright_cyan()
    );

    println!("{}", "╠══════════════════════════════════════════════════════════╣".bright_cyan());

    let used_routes = outcome.routes.iter().filter(|r| !r.is_empty()).count();
    let rows = [
        ("Visited:", outcome.visited().len().to_formatted_string(&Locale::en)),
        ("Routes:", used_routes.to_formatted_string(&Locale::en)),
        ("Dropped:", outcome.dropped.len().to_formatted_string(&Locale::en)),
        ("Final Slack:", format!("{}s", outcome.final_slack_secs)),
        ("Overfilled:", outcome.overfill.len().to_formatted_string(&Locale::en)),
        ("Planning Time:", format!("{:.2}s", elapsed.as_secs_f64())),
    ];
    for (label, value) in rows {
        println!(
            "{}  {:<18}{:>36}  {}",
            "║".bright_cyan(),
            label,
            value,
            "║".bright_cyan()
        );
    }

    println!("{}", "╚══════════════════════════════════════════════════════════╝".bright_cyan());
    println!();
}

/// Formats a duration nicely.
fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else if total_ms < 60_000 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        let mins = total_ms / 60_000;
        let secs = (total_ms % 60_000) / 1000;
        format!("{}m {}s", mins, secs)
    }
}

/// Colors an engine outcome code.
fn format_result(result: &SolveResult) -> String {
    match result {
        SolveResult::Solved(_) => result.as_str().bright_green().to_string(),
        SolveResult::TimedOut => result.as_str().yellow().to_string(),
        SolveResult::NoSolutionFound => result.as_str().bright_red().to_string(),
        SolveResult::InvalidModel(_) => result.as_str().bright_red().bold().to_string(),
    }
}

/// Returns a timestamp string.
fn timestamp() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| {
            let secs = d.as_secs();
            let millis = d.subsec_millis();
            format!("{}.{:03}", secs, millis)
        })
        .unwrap_or_else(|_| "0.000".to_string())
}

/// A timer for one planning attempt.
pub struct AttemptTimer {
    start: Instant,
    attempt: u32,
}

impl AttemptTimer {
    pub fn start(attempt: u32, total: u32, moloks: usize, slack_secs: i64, budget: Duration) -> Self {
        print_attempt_start(attempt, total, moloks, slack_secs, budget);
        Self {
            start: Instant::now(),
            attempt,
        }
    }

    pub fn finish(self, outcome: &SolveOutcome) {
        print_attempt_end(self.attempt, self.start.elapsed(), outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn test_timestamp_has_millis() {
        let ts = timestamp();
        let (_, millis) = ts.split_once('.').unwrap();
        assert_eq!(millis.len(), 3);
    }
}
