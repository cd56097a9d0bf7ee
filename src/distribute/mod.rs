//! Task distribution: bin-packs atomic units across sessions.
//!
//! Media-group aware by construction: units are indivisible, so no
//! group ever splits across sessions. The default strategy is greedy
//! longest-processing-time by byte weight; the legacy range strategy
//! splits evenly by unit count in id order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::group::AtomicUnit;

/// Distribution failures.
#[derive(Debug, thiserror::Error)]
pub enum DistributeError {
    #[error("no sessions available for distribution")]
    NoSessionsAvailable,
}

/// Strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Greedy LPT by weight, groups kept whole
    #[default]
    MediaGroupAware,
    /// Even split by unit count in id order
    Range,
}

/// Mapping from session name to its ordered unit list.
///
/// Per-session lists are in source-id order; iteration over sessions
/// is name-ordered, so identical inputs yield identical assignments.
#[derive(Debug, Default)]
pub struct Assignment {
    by_session: BTreeMap<String, Vec<AtomicUnit>>,
}

impl Assignment {
    pub fn sessions(&self) -> impl Iterator<Item = (&String, &Vec<AtomicUnit>)> {
        self.by_session.iter()
    }

    pub fn take(&mut self, session: &str) -> Vec<AtomicUnit> {
        self.by_session.remove(session).unwrap_or_default()
    }

    pub fn units_for(&self, session: &str) -> &[AtomicUnit] {
        self.by_session.get(session).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_units(&self) -> usize {
        self.by_session.values().map(Vec::len).sum()
    }

    pub fn session_weight(&self, session: &str) -> u64 {
        self.units_for(session).iter().map(AtomicUnit::weight).sum()
    }

    /// Load imbalance (max − min) / max over session byte weights.
    /// Zero for degenerate inputs.
    pub fn imbalance(&self) -> f64 {
        let weights: Vec<u64> = self
            .by_session
            .keys()
            .map(|s| self.session_weight(s))
            .collect();
        let max = weights.iter().copied().max().unwrap_or(0);
        let min = weights.iter().copied().min().unwrap_or(0);
        if max == 0 {
            return 0.0;
        }
        (max - min) as f64 / max as f64
    }

    fn insert(&mut self, session: &str, unit: AtomicUnit) {
        self.by_session.entry(session.to_string()).or_default().push(unit);
    }

    fn sort_by_source_order(&mut self) {
        for units in self.by_session.values_mut() {
            units.sort_by_key(AtomicUnit::first_id);
        }
    }
}

/// Distribute units across sessions.
///
/// Empty input yields an empty assignment (every session present with
/// no units); no sessions is an error.
pub fn distribute(
    units: Vec<AtomicUnit>,
    sessions: &[String],
    strategy: Strategy,
) -> Result<Assignment, DistributeError> {
    if sessions.is_empty() {
        return Err(DistributeError::NoSessionsAvailable);
    }

    let mut assignment = Assignment::default();
    for session in sessions {
        assignment.by_session.entry(session.clone()).or_default();
    }

    match strategy {
        Strategy::MediaGroupAware => pack_by_weight(units, sessions, &mut assignment),
        Strategy::Range => split_by_range(units, sessions, &mut assignment),
    }

    assignment.sort_by_source_order();

    info!(
        sessions = sessions.len(),
        units = assignment.total_units(),
        imbalance = format!("{:.3}", assignment.imbalance()),
        strategy = ?strategy,
        "distribution complete"
    );

    Ok(assignment)
}

/// Greedy LPT: heaviest unit first onto the lightest session. Ties on
/// load break by session name; ties on weight break by source id, so
/// the result is deterministic for a fixed input and session list.
fn pack_by_weight(mut units: Vec<AtomicUnit>, sessions: &[String], assignment: &mut Assignment) {
    units.sort_by(|a, b| {
        b.weight()
            .cmp(&a.weight())
            .then_with(|| a.first_id().cmp(&b.first_id()))
    });

    let mut loads: BTreeMap<&str, u64> = sessions.iter().map(|s| (s.as_str(), 0)).collect();

    for unit in units {
        let (&target, _) = loads
            .iter()
            .min_by(|(a_name, a_load), (b_name, b_load)| {
                a_load.cmp(b_load).then_with(|| a_name.cmp(b_name))
            })
            .expect("at least one session");

        *loads.get_mut(target).unwrap() += unit.weight();
        debug!(session = target, unit = unit.first_id(), weight = unit.weight(), "assigned");
        assignment.insert(target, unit);
    }
}

/// Legacy strategy: contiguous even split by unit count in id order.
fn split_by_range(mut units: Vec<AtomicUnit>, sessions: &[String], assignment: &mut Assignment) {
    units.sort_by_key(AtomicUnit::first_id);

    let per_session = units.len() / sessions.len();
    let remainder = units.len() % sessions.len();

    let mut iter = units.into_iter();
    for (index, session) in sessions.iter().enumerate() {
        let count = per_session + usize::from(index < remainder);
        for unit in iter.by_ref().take(count) {
            assignment.insert(session, unit);
        }
    }
}

/// Soft post-distribution check: warn when imbalance exceeds the
/// target ratio.
pub fn check_balance(assignment: &Assignment, max_ratio: f64) -> bool {
    let imbalance = assignment.imbalance();
    if imbalance > max_ratio {
        warn!(
            imbalance = format!("{imbalance:.3}"),
            target = format!("{max_ratio:.3}"),
            "distribution exceeds load-balance target"
        );
        return false;
    }
    true
}
