//! Overfill audit of a finished plan.
//!
//! Slack lets the planner visit moloks after they are predicted to be full.
//! The audit compares every visit with the molok's un-relaxed deadline and
//! extrapolates how full it will be when the truck arrives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{Molok, MolokId};

/// A molok visited after its un-relaxed deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverfillEntry {
    pub molok: MolokId,
    pub deadline_secs: i64,
    pub visit_secs: i64,
    /// `100 + (visit - deadline) * growth_rate`.
    pub extrapolated_fill_pct: f64,
}

/// Reports every visit that happens after the molok's deadline.
///
/// `visits` pairs a molok with its arrival time in seconds from route start.
/// Moloks without a deadline never overfill.
///
/// ```
/// use molok_planner::audit::audit_overfill;
/// use molok_planner::domain::{Location, Molok, MolokId};
///
/// // Full in 1000 s, growing 0.01 points per second
/// let molok = Molok::new(MolokId(1), Location::new(0.0, 0.0), 90.0, 100.0)
///     .with_growth_rate(0.01);
///
/// let report = audit_overfill(&[molok], &[(MolokId(1), 1500)]);
/// assert_eq!(report.len(), 1);
/// assert!((report[0].extrapolated_fill_pct - 105.0).abs() < 1e-9);
///
/// let idle = Molok::new(MolokId(2), Location::new(0.0, 0.0), 10.0, 100.0);
/// assert!(audit_overfill(&[idle], &[(MolokId(2), 1500)]).is_empty());
/// ```
pub fn audit_overfill(moloks: &[Molok], visits: &[(MolokId, i64)]) -> Vec<OverfillEntry> {
    let by_id: HashMap<MolokId, &Molok> = moloks.iter().map(|m| (m.id, m)).collect();

    visits
        .iter()
        .filter_map(|&(id, visit_secs)| {
            let molok = by_id.get(&id)?;
            let deadline_secs = molok.deadline_secs()?;
            if visit_secs <= deadline_secs {
                return None;
            }
            Some(OverfillEntry {
                molok: id,
                deadline_secs,
                visit_secs,
                extrapolated_fill_pct: 100.0
                    + (visit_secs - deadline_secs) as f64 * molok.growth_rate,
            })
        })
        .collect()
}
