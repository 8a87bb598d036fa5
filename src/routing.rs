//! Fee-optimal path selection and balance-conserving transfer execution.

use crate::graph::AccountGraph;
use crate::EngineError;

/// Result of moving money along a path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferOutcome {
    /// Total amount retained by intermediaries.
    pub fee: f64,
    /// Amount arriving at the destination.
    pub delivered: f64,
}

/// Additive Dijkstra over the fee matrix: edge weight is the fee percentage
/// of the endpoint being entered, and the objective is the minimum sum of
/// weights. Extraction scans indices in ascending order and relaxation uses
/// strict `<`, so ties break toward the lowest-index predecessor.
///
/// Returns the node-index path (source and destination inclusive) and the
/// objective value, or `None` when the endpoints are disconnected. Solving
/// a node against itself yields the trivial path at cost zero.
pub fn solve_path(graph: &AccountGraph, src: usize, dst: usize) -> Option<(Vec<usize>, f64)> {
    let n = graph.len();
    let mut dist = vec![f64::INFINITY; n];
    let mut pred = vec![usize::MAX; n];
    let mut visited = vec![false; n];
    dist[src] = 0.0;

    for _ in 0..n {
        let mut current = None;
        let mut best = f64::INFINITY;
        for candidate in 0..n {
            if !visited[candidate] && dist[candidate] < best {
                best = dist[candidate];
                current = Some(candidate);
            }
        }
        let Some(u) = current else {
            break;
        };
        visited[u] = true;
        for v in 0..n {
            if visited[v] {
                continue;
            }
            let weight = graph.fee_weight(u, v);
            if weight >= 0.0 && dist[u] + weight < dist[v] {
                dist[v] = dist[u] + weight;
                pred[v] = u;
            }
        }
    }

    if dist[dst].is_infinite() {
        return None;
    }
    let mut path = vec![dst];
    let mut node = dst;
    while node != src {
        node = pred[node];
        path.push(node);
    }
    path.reverse();
    Some((path, dist[dst]))
}

/// Move `amount` from the head of `path` to its tail.
///
/// The source is debited once; each intermediary is credited with its
/// percentage of the amount still in flight and the destination receives
/// the remainder, so the sum of balances is conserved. All deltas are
/// staged before any balance changes, and the insufficient-funds
/// precondition fails without touching state.
pub fn execute_transfer(
    graph: &mut AccountGraph,
    path: &[usize],
    amount: f64,
) -> Result<TransferOutcome, EngineError> {
    debug_assert!(path.len() >= 2, "a transfer path spans at least two accounts");
    let source = path[0];
    let destination = path[path.len() - 1];

    let source_account = graph.account(source);
    if source_account.balance < amount {
        return Err(EngineError::InsufficientFunds {
            account: source_account.id,
            required: amount,
            available: source_account.balance,
        });
    }

    let mut deltas = vec![(source, -amount)];
    let mut remaining = amount;
    for &hop in &path[1..path.len() - 1] {
        let share = remaining * graph.account(hop).fee_percentage / 100.0;
        deltas.push((hop, share));
        remaining -= share;
    }
    deltas.push((destination, remaining));

    for (index, delta) in deltas {
        graph.adjust_balance(index, delta);
    }
    Ok(TransferOutcome {
        fee: amount - remaining,
        delivered: remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Account;

    fn linked_triangle() -> AccountGraph {
        // A (2%) - B (3%) - C (5%), no direct A-C edge.
        let mut graph = AccountGraph::new();
        graph
            .add_account(Account::new(100_001, 1_000.0, 2.0), 1000)
            .unwrap();
        graph
            .add_account(Account::new(100_002, 1_000.0, 3.0), 1000)
            .unwrap();
        graph
            .add_account(Account::new(100_003, 1_000.0, 5.0), 1000)
            .unwrap();
        graph.link(0, 1);
        graph.link(1, 2);
        graph
    }

    #[test]
    fn test_direct_edge_path() {
        let graph = linked_triangle();
        let (path, cost) = solve_path(&graph, 0, 1).unwrap();
        assert_eq!(path, vec![0, 1]);
        assert_eq!(cost, 3.0);
    }

    #[test]
    fn test_multi_hop_path() {
        let graph = linked_triangle();
        let (path, cost) = solve_path(&graph, 0, 2).unwrap();
        assert_eq!(path, vec![0, 1, 2]);
        // fee(B) entering B plus fee(C) entering C.
        assert_eq!(cost, 8.0);
    }

    #[test]
    fn test_cheaper_detour_wins() {
        let mut graph = linked_triangle();
        // Entering C costs 5 on any route; a zero-fee relay undercuts the
        // route through B.
        graph
            .add_account(Account::new(100_004, 0.0, 0.0), 1000)
            .unwrap();
        graph.link(0, 3);
        graph.link(3, 2);
        let (path, cost) = solve_path(&graph, 0, 2).unwrap();
        assert_eq!(path, vec![0, 3, 2]);
        assert_eq!(cost, 5.0);
    }

    #[test]
    fn test_equal_cost_tie_breaks_to_lowest_index() {
        let mut graph = AccountGraph::new();
        for id in [100_001, 100_002, 100_003, 100_004] {
            graph
                .add_account(Account::new(id, 1_000.0, 1.0), 1000)
                .unwrap();
        }
        // Two relays with identical fees between 0 and 3.
        graph.link(0, 1);
        graph.link(1, 3);
        graph.link(0, 2);
        graph.link(2, 3);
        let (path, _) = solve_path(&graph, 0, 3).unwrap();
        assert_eq!(path, vec![0, 1, 3]);
    }

    #[test]
    fn test_disconnected_endpoints() {
        let mut graph = AccountGraph::new();
        graph
            .add_account(Account::new(100_001, 0.0, 1.0), 1000)
            .unwrap();
        graph
            .add_account(Account::new(100_002, 0.0, 1.0), 1000)
            .unwrap();
        assert!(solve_path(&graph, 0, 1).is_none());
    }

    #[test]
    fn test_diagonal_is_free() {
        let graph = linked_triangle();
        let (path, cost) = solve_path(&graph, 1, 1).unwrap();
        assert_eq!(path, vec![1]);
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_transfer_credits_intermediary_and_conserves() {
        let mut graph = linked_triangle();
        let before = graph.total_balance();
        let outcome = execute_transfer(&mut graph, &[0, 1, 2], 100.0).unwrap();
        assert_eq!(outcome.fee, 3.0);
        assert_eq!(outcome.delivered, 97.0);
        assert_eq!(graph.account(0).balance, 900.0);
        assert_eq!(graph.account(1).balance, 1_003.0);
        assert_eq!(graph.account(2).balance, 1_097.0);
        assert!((graph.total_balance() - before).abs() < 1e-9);
    }

    #[test]
    fn test_transfer_fee_compounds_on_remaining_amount() {
        let mut graph = AccountGraph::new();
        for fee in [0.0, 10.0, 10.0, 0.0] {
            let id = 100_001 + graph.len() as u32;
            graph
                .add_account(Account::new(id, 10_000.0, fee), 1000)
                .unwrap();
        }
        let outcome = execute_transfer(&mut graph, &[0, 1, 2, 3], 1_000.0).unwrap();
        // 1000 -> 900 after the first 10% cut, 810 after the second.
        assert!((outcome.delivered - 810.0).abs() < 1e-9);
        assert!((outcome.fee - 190.0).abs() < 1e-9);
        assert!((graph.account(1).balance - 10_100.0).abs() < 1e-9);
        assert!((graph.account(2).balance - 10_090.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_funds_leaves_balances_untouched() {
        let mut graph = linked_triangle();
        let err = execute_transfer(&mut graph, &[0, 1, 2], 5_000.0).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(graph.account(0).balance, 1_000.0);
        assert_eq!(graph.account(1).balance, 1_000.0);
        assert_eq!(graph.account(2).balance, 1_000.0);
    }
}
