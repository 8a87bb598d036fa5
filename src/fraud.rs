//! Fraud detectors applied to every proposed transaction.
//!
//! The detectors are pure predicates over engine state; the orchestrator
//! runs them in a fixed order and the first positive result rejects the
//! transaction wholesale.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::graph::AccountGraph;
use crate::{AccountId, Transaction};

/// Reason a transaction was rejected by the detector pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FraudReason {
    #[error("flagged account involved")]
    FlaggedAccount,
    #[error("suspicious word detected: '{0}'")]
    SuspiciousWord(String),
    #[error("suspicious pattern detected: '{0}'")]
    SuspiciousPattern(String),
    #[error("velocity limit reached")]
    Velocity,
    #[error("frequent large transfers to the same account")]
    FrequentLarge,
    #[error("circular transfer detected")]
    Cycle,
}

/// Per-(sender, receiver) running totals, advanced only on committed
/// transactions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PairActivity {
    pub count: u64,
    pub total_amount: f64,
}

pub type PairCounters = HashMap<(AccountId, AccountId), PairActivity>;

/// Sliding-window velocity check over the sender's history.
///
/// The candidate transaction counts toward the window, so the check fires
/// on the `max_in_window`-th transaction within `window_secs` and permits
/// the one before it. The reverse scan stops at the first entry outside
/// the window: histories are ordered by processing time and timestamps are
/// non-decreasing.
pub fn velocity_exceeded(
    log: &[Transaction],
    sender_history: &[usize],
    timestamp: i64,
    window_secs: i64,
    max_in_window: u32,
) -> bool {
    let mut in_window = 0u32;
    for &entry in sender_history.iter().rev() {
        if timestamp - log[entry].timestamp > window_secs {
            break;
        }
        in_window += 1;
        if in_window + 1 >= max_in_window {
            return true;
        }
    }
    false
}

/// Frequency-plus-amount check for one (sender, receiver) pair. Both
/// thresholds must be met with the candidate included; neither alone
/// suffices.
pub fn frequent_large(
    counters: &PairCounters,
    sender: AccountId,
    receiver: AccountId,
    amount: f64,
    count_threshold: u64,
    amount_threshold: f64,
) -> bool {
    let activity = counters
        .get(&(sender, receiver))
        .copied()
        .unwrap_or_default();
    activity.count + 1 >= count_threshold && activity.total_amount + amount >= amount_threshold
}

/// Bounded depth-first search over the directed transfer adjacency. A walk
/// returning to `origin` at depth greater than zero is a cycle; walks are
/// cut off at `depth_cap`, so cycles longer than the cap go unreported.
pub fn has_cycle(graph: &AccountGraph, origin: usize, depth_cap: u32) -> bool {
    let mut visited = HashSet::new();
    search(graph, origin, origin, &mut visited, 0, depth_cap)
}

fn search(
    graph: &AccountGraph,
    current: usize,
    origin: usize,
    visited: &mut HashSet<usize>,
    depth: u32,
    depth_cap: u32,
) -> bool {
    if depth >= depth_cap {
        return false;
    }
    visited.insert(current);
    for &next in graph.transfer_targets(current) {
        if next == origin && depth > 0 {
            return true;
        }
        if !visited.contains(&next) && search(graph, next, origin, visited, depth + 1, depth_cap) {
            return true;
        }
    }
    visited.remove(&current);
    false
}
