//! # Rust Transaction Router
//!
//! A memory-safe transaction routing and fraud-detection engine over a graph
//! of financial accounts.
//!
//! ## Features
//!
//! - **Fee-Optimal Routing**: Transfers follow the cheapest intermediary path
//!   through the account graph, with direct edges materialised on demand
//! - **Balance Conservation**: Intermediary fees are redistributed, never
//!   burned; the sum of balances is invariant across successful transfers
//! - **Multi-Stage Fraud Detection**: Flagged-account short-circuit,
//!   typosquat and substring screening, velocity, frequent-large and
//!   circular-transfer detectors
//! - **Probabilistic Flagging**: Bloom-filter taint with deterministic
//!   hashing that survives snapshots
//! - **Persistent State**: Binary and JSON snapshots with bounds-checked,
//!   truncation-rejecting decoding
//!
//! The engine is single-threaded and cooperative: [`Engine::process`] is the
//! only mutator, runs to completion, and either fully commits a transaction
//! or rejects it before any state changes. Timestamps are supplied by the
//! caller; the engine never reads the wall clock.

pub mod bk_tree;
pub mod bloom;
pub mod fraud;
pub mod graph;
pub mod persistence;
pub mod routing;
pub mod suffix_trie;

pub use bk_tree::BkTree;
pub use bloom::BloomFilter;
pub use fraud::{FraudReason, PairActivity};
pub use graph::AccountGraph;
pub use persistence::{AccountSnapshot, PersistenceError, Snapshot, SnapshotLimits};
pub use suffix_trie::SuffixTrie;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Six-digit decimal account identifier. Leading zeros are significant in
/// the textual form; [`format_account_id`] renders them.
pub type AccountId = u32;

/// Validate and parse the textual form of an account id.
pub fn parse_account_id(text: &str) -> Option<AccountId> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^\d{6}$").unwrap());
    if pattern.is_match(text) {
        text.parse().ok()
    } else {
        None
    }
}

pub fn format_account_id(id: AccountId) -> String {
    format!("{id:06}")
}

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown account {0:06}")]
    UnknownAccount(AccountId),

    #[error("source and destination are the same account {0:06}")]
    SelfTransfer(AccountId),

    #[error("invalid amount {0}")]
    InvalidAmount(f64),

    #[error("fee percentage {0} is outside [0, 100)")]
    InvalidFeePercentage(f64),

    #[error("insufficient funds in account {account:06}: required {required:.2}, available {available:.2}")]
    InsufficientFunds {
        account: AccountId,
        required: f64,
        available: f64,
    },

    #[error("no route from {source_account:06} to {destination:06}")]
    NoPath {
        source_account: AccountId,
        destination: AccountId,
    },

    #[error("transaction rejected: {0}")]
    Fraud(FraudReason),

    #[error("duplicate account {0:06}")]
    DuplicateAccount(AccountId),

    #[error("duplicate transaction id '{0}'")]
    DuplicateTransaction(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// A ledger account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: f64,
    /// Percentage retained when this account relays a transfer.
    pub fee_percentage: f64,
    /// Indices into the engine's transaction log for transactions in which
    /// this account is sender or receiver, in processing order.
    #[serde(default, skip_serializing)]
    pub history: Vec<usize>,
}

impl Account {
    pub fn new(id: AccountId, balance: f64, fee_percentage: f64) -> Self {
        Self {
            id,
            balance,
            fee_percentage,
            history: Vec::new(),
        }
    }
}

/// A proposed transaction as read from an input stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txn_id: String,
    pub source: AccountId,
    pub destination: AccountId,
    pub amount: f64,
    /// Seconds, supplied by the caller, non-decreasing across a stream.
    pub timestamp: i64,
    pub description: String,
}

/// A committed transaction with its routing outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub txn_id: String,
    pub source: AccountId,
    pub destination: AccountId,
    pub amount: f64,
    pub timestamp: i64,
    pub description: String,
    /// Total amount retained by intermediaries along the path.
    pub fee: f64,
    /// Route taken, source and destination inclusive.
    pub path: Vec<AccountId>,
}

/// Outcome of a successful [`Engine::process`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub txn_id: String,
    pub path: Vec<AccountId>,
    pub fee: f64,
    pub delivered: f64,
}

impl TransferReceipt {
    /// Export as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Engine tuning knobs and resource bounds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_accounts: usize,
    pub max_history: usize,
    pub flagged_filter_bits: usize,
    pub flagged_filter_hashes: u32,
    /// Maximum edit distance for typosquat screening.
    pub max_edit_distance: u32,
    pub velocity_window_secs: i64,
    /// Transactions within the window at which velocity fires.
    pub velocity_max_transactions: u32,
    pub frequent_count_threshold: u64,
    pub frequent_amount_threshold: f64,
    pub cycle_depth_cap: u32,
    /// Materialise a direct edge when no route exists, instead of failing
    /// with `NoPath`.
    pub materialize_missing_edges: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_accounts: 1000,
            max_history: 10_000,
            flagged_filter_bits: bloom::DEFAULT_FILTER_BITS,
            flagged_filter_hashes: bloom::DEFAULT_HASH_COUNT,
            max_edit_distance: 2,
            velocity_window_secs: 60,
            velocity_max_transactions: 5,
            frequent_count_threshold: 3,
            frequent_amount_threshold: 50_000.0,
            cycle_depth_cap: 10,
            materialize_missing_edges: true,
        }
    }
}

/// Engine counters for reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineStats {
    pub account_count: usize,
    pub transaction_count: usize,
    pub seed_word_count: usize,
    pub pattern_count: usize,
}

/// The transaction engine.
///
/// Owns the account graph, detector state and transaction history. A single
/// instance is created at startup (fresh, or restored from a snapshot) and
/// threaded explicitly; concurrent callers must serialise around it.
pub struct Engine {
    config: EngineConfig,
    graph: AccountGraph,
    flagged: BloomFilter,
    seen_ids: BloomFilter,
    word_index: BkTree,
    pattern_trie: SuffixTrie,
    patterns: Vec<String>,
    counters: fraud::PairCounters,
    history: Vec<Transaction>,
    by_id: HashMap<String, usize>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let flagged = BloomFilter::new(config.flagged_filter_bits, config.flagged_filter_hashes);
        let seen_ids = BloomFilter::new(config.flagged_filter_bits, config.flagged_filter_hashes);
        Self {
            config,
            graph: AccountGraph::new(),
            flagged,
            seen_ids,
            word_index: BkTree::new(),
            pattern_trie: SuffixTrie::new(),
            patterns: Vec::new(),
            counters: fraud::PairCounters::new(),
            history: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- accounts -----------------------------------------------------------

    pub fn add_account(
        &mut self,
        id: AccountId,
        balance: f64,
        fee_percentage: f64,
    ) -> Result<(), EngineError> {
        if !(balance >= 0.0) {
            return Err(EngineError::InvalidAmount(balance));
        }
        if !(0.0..100.0).contains(&fee_percentage) {
            return Err(EngineError::InvalidFeePercentage(fee_percentage));
        }
        self.graph.add_account(
            Account::new(id, balance, fee_percentage),
            self.config.max_accounts,
        )?;
        Ok(())
    }

    /// Install accounts from loader records. Duplicate or invalid records
    /// are logged and skipped; a capacity error halts further additions.
    pub fn load_accounts(&mut self, records: Vec<AccountSnapshot>) -> Result<usize, EngineError> {
        let mut added = 0;
        for record in records {
            match self.add_account(record.id, record.balance, record.fee_percentage) {
                Ok(()) => added += 1,
                Err(err @ EngineError::CapacityExceeded(_)) => return Err(err),
                Err(err) => tracing::warn!(%err, "skipping account record"),
            }
        }
        Ok(added)
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.graph.index_of(id).map(|index| self.graph.account(index))
    }

    pub fn accounts(&self) -> &[Account] {
        self.graph.accounts()
    }

    pub fn total_balance(&self) -> f64 {
        self.graph.total_balance()
    }

    /// Materialise the direct corridor between two existing accounts.
    pub fn link_accounts(&mut self, a: AccountId, b: AccountId) -> Result<(), EngineError> {
        if a == b {
            return Err(EngineError::SelfTransfer(a));
        }
        let u = self.graph.index_of(a).ok_or(EngineError::UnknownAccount(a))?;
        let v = self.graph.index_of(b).ok_or(EngineError::UnknownAccount(b))?;
        self.graph.link(u, v);
        Ok(())
    }

    // --- lexicon ------------------------------------------------------------

    pub fn add_suspicious_word(&mut self, word: &str) {
        self.word_index.insert(word);
    }

    /// Register a substring pattern. Load order is preserved so the first
    /// matching pattern reported is deterministic.
    pub fn add_suspicious_pattern(&mut self, pattern: &str) {
        let pattern = pattern.to_lowercase();
        if !pattern.is_empty() && !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }

    // --- flagging and queries ----------------------------------------------

    /// Whether an account is possibly tainted. Flagging is monotone for the
    /// engine lifetime and survives snapshots.
    pub fn is_flagged(&self, id: AccountId) -> bool {
        self.flagged.contains(&id.to_le_bytes())
    }

    pub fn history(&self) -> &[Transaction] {
        &self.history
    }

    pub fn transaction(&self, txn_id: &str) -> Option<&Transaction> {
        self.by_id.get(txn_id).map(|&entry| &self.history[entry])
    }

    /// Transactions in which the account appears as sender or receiver, in
    /// processing order. `None` for an unknown account.
    pub fn transactions_for_account(&self, id: AccountId) -> Option<Vec<&Transaction>> {
        let index = self.graph.index_of(id)?;
        Some(
            self.graph
                .account(index)
                .history
                .iter()
                .map(|&entry| &self.history[entry])
                .collect(),
        )
    }

    pub fn pair_activity(&self, sender: AccountId, receiver: AccountId) -> PairActivity {
        self.counters
            .get(&(sender, receiver))
            .copied()
            .unwrap_or_default()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            account_count: self.graph.len(),
            transaction_count: self.history.len(),
            seed_word_count: self.word_index.len(),
            pattern_count: self.patterns.len(),
        }
    }

    // --- processing ---------------------------------------------------------

    /// Validate, screen and execute a proposed transaction.
    ///
    /// Detectors run in a fixed order and the first positive result rejects
    /// the transaction wholesale: the sender is tainted and neither
    /// balances, counters nor histories change. On success, balances move
    /// along the fee-optimal path, the pair counters advance and the
    /// transaction is appended to the log and both endpoint histories.
    pub fn process(&mut self, record: TransactionRecord) -> Result<TransferReceipt, EngineError> {
        // Replay suppression: the filter prefilters, the id map confirms, so
        // filter false positives never reject a fresh id.
        if self.seen_ids.contains(record.txn_id.as_bytes())
            && self.by_id.contains_key(&record.txn_id)
        {
            return Err(EngineError::DuplicateTransaction(record.txn_id));
        }
        let source = self
            .graph
            .index_of(record.source)
            .ok_or(EngineError::UnknownAccount(record.source))?;
        let destination = self
            .graph
            .index_of(record.destination)
            .ok_or(EngineError::UnknownAccount(record.destination))?;
        if record.source == record.destination {
            return Err(EngineError::SelfTransfer(record.source));
        }
        if !(record.amount > 0.0) {
            return Err(EngineError::InvalidAmount(record.amount));
        }
        if self.history.len() >= self.config.max_history {
            return Err(EngineError::CapacityExceeded(format!(
                "transaction history limit {} reached",
                self.config.max_history
            )));
        }
        let sender = self.graph.account(source);
        if sender.balance < record.amount {
            return Err(EngineError::InsufficientFunds {
                account: record.source,
                required: record.amount,
                available: sender.balance,
            });
        }

        if let Err(reason) = self.screen(source, destination, &record) {
            self.flagged.insert(&record.source.to_le_bytes());
            tracing::warn!(
                txn_id = %record.txn_id,
                source = %format_account_id(record.source),
                %reason,
                "transaction rejected"
            );
            return Err(EngineError::Fraud(reason));
        }

        let path = self.route(source, destination, &record)?;
        let outcome = routing::execute_transfer(&mut self.graph, &path, record.amount)?;

        let entry = self.history.len();
        let account_path: Vec<AccountId> = path
            .iter()
            .map(|&index| self.graph.account(index).id)
            .collect();
        self.history.push(Transaction {
            txn_id: record.txn_id.clone(),
            source: record.source,
            destination: record.destination,
            amount: record.amount,
            timestamp: record.timestamp,
            description: record.description,
            fee: outcome.fee,
            path: account_path.clone(),
        });
        self.by_id.insert(record.txn_id.clone(), entry);
        self.seen_ids.insert(record.txn_id.as_bytes());
        self.graph.push_history_entry(source, entry);
        self.graph.push_history_entry(destination, entry);
        let activity = self
            .counters
            .entry((record.source, record.destination))
            .or_default();
        activity.count += 1;
        activity.total_amount += record.amount;
        self.graph.record_transfer_edge(source, destination);

        tracing::info!(
            txn_id = %record.txn_id,
            fee = outcome.fee,
            delivered = outcome.delivered,
            hops = account_path.len(),
            "transaction committed"
        );
        Ok(TransferReceipt {
            txn_id: record.txn_id,
            path: account_path,
            fee: outcome.fee,
            delivered: outcome.delivered,
        })
    }

    /// Process a whole input stream. Per-record failures are reported in
    /// the output, aligned with the input order, and do not abort the batch.
    pub fn process_batch(
        &mut self,
        records: Vec<TransactionRecord>,
    ) -> Vec<Result<TransferReceipt, EngineError>> {
        records
            .into_iter()
            .map(|record| self.process(record))
            .collect()
    }

    /// Run the detector pipeline in its fixed order.
    fn screen(
        &mut self,
        source: usize,
        destination: usize,
        record: &TransactionRecord,
    ) -> Result<(), FraudReason> {
        if self.flagged.contains(&record.source.to_le_bytes())
            || self.flagged.contains(&record.destination.to_le_bytes())
        {
            return Err(FraudReason::FlaggedAccount);
        }

        for token in record.description.split_whitespace() {
            if self.word_index.find_near(token, self.config.max_edit_distance) {
                return Err(FraudReason::SuspiciousWord(token.to_string()));
            }
        }

        if !self.patterns.is_empty() && !record.description.is_empty() {
            self.pattern_trie.insert(&record.description);
            let hit = self
                .patterns
                .iter()
                .find(|pattern| self.pattern_trie.contains(pattern.as_str()))
                .cloned();
            self.pattern_trie.clear();
            if let Some(pattern) = hit {
                return Err(FraudReason::SuspiciousPattern(pattern));
            }
        }

        let sender_history = &self.graph.account(source).history;
        if fraud::velocity_exceeded(
            &self.history,
            sender_history,
            record.timestamp,
            self.config.velocity_window_secs,
            self.config.velocity_max_transactions,
        ) {
            return Err(FraudReason::Velocity);
        }

        if fraud::frequent_large(
            &self.counters,
            record.source,
            record.destination,
            record.amount,
            self.config.frequent_count_threshold,
            self.config.frequent_amount_threshold,
        ) {
            return Err(FraudReason::FrequentLarge);
        }

        // Probe with a tentative directed edge; the committed edge is
        // recorded separately on success.
        let added = self.graph.record_transfer_edge(source, destination);
        let cyclic = fraud::has_cycle(&self.graph, source, self.config.cycle_depth_cap);
        if added {
            self.graph.remove_transfer_edge(source, destination);
        }
        if cyclic {
            return Err(FraudReason::Cycle);
        }
        Ok(())
    }

    fn route(
        &mut self,
        source: usize,
        destination: usize,
        record: &TransactionRecord,
    ) -> Result<Vec<usize>, EngineError> {
        if let Some((path, _)) = routing::solve_path(&self.graph, source, destination) {
            return Ok(path);
        }
        if !self.config.materialize_missing_edges {
            return Err(EngineError::NoPath {
                source_account: record.source,
                destination: record.destination,
            });
        }
        self.graph.link(source, destination);
        tracing::debug!(
            source = %format_account_id(record.source),
            destination = %format_account_id(record.destination),
            "materialised direct edge"
        );
        routing::solve_path(&self.graph, source, destination)
            .map(|(path, _)| path)
            .ok_or(EngineError::NoPath {
                source_account: record.source,
                destination: record.destination,
            })
    }

    // --- persistence --------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            accounts: self
                .graph
                .accounts()
                .iter()
                .map(|account| AccountSnapshot {
                    id: account.id,
                    balance: account.balance,
                    fee_percentage: account.fee_percentage,
                })
                .collect(),
            fee_matrix: self.graph.fee_matrix().to_vec(),
            history: self.history.clone(),
            flagged_bits: self.flagged.words().to_vec(),
            flagged_bit_count: self.flagged.bit_count(),
            flagged_hash_count: self.flagged.hash_count(),
        }
    }

    /// Rebuild an engine from a snapshot. Derived state (pair counters,
    /// per-account histories, the id map, the transfer adjacency) is
    /// reconstructed from the persisted log.
    pub fn restore(config: EngineConfig, snapshot: Snapshot) -> Result<Self, EngineError> {
        snapshot.validate(&SnapshotLimits {
            max_accounts: config.max_accounts,
            max_history: config.max_history,
        })?;
        let mut engine = Engine::with_config(config);
        for account in &snapshot.accounts {
            engine.add_account(account.id, account.balance, account.fee_percentage)?;
        }
        engine.graph.set_fee_matrix(snapshot.fee_matrix);
        engine.flagged = BloomFilter::from_words(
            snapshot.flagged_bits,
            snapshot.flagged_bit_count,
            snapshot.flagged_hash_count,
        )
        .ok_or_else(|| {
            PersistenceError::Malformed("flagged-filter geometry is inconsistent".to_string())
        })?;
        for tx in snapshot.history {
            engine.replay_committed(tx)?;
        }
        Ok(engine)
    }

    fn replay_committed(&mut self, tx: Transaction) -> Result<(), EngineError> {
        let source = self.graph.index_of(tx.source).ok_or_else(|| {
            PersistenceError::Malformed(format!(
                "history references unknown account {:06}",
                tx.source
            ))
        })?;
        let destination = self.graph.index_of(tx.destination).ok_or_else(|| {
            PersistenceError::Malformed(format!(
                "history references unknown account {:06}",
                tx.destination
            ))
        })?;
        let entry = self.history.len();
        self.by_id.insert(tx.txn_id.clone(), entry);
        self.seen_ids.insert(tx.txn_id.as_bytes());
        self.graph.push_history_entry(source, entry);
        self.graph.push_history_entry(destination, entry);
        let activity = self.counters.entry((tx.source, tx.destination)).or_default();
        activity.count += 1;
        activity.total_amount += tx.amount;
        self.graph.record_transfer_edge(source, destination);
        self.history.push(tx);
        Ok(())
    }

    /// Write a snapshot, choosing the JSON codec for `.json` paths and the
    /// binary codec otherwise.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), EngineError> {
        let snapshot = self.snapshot();
        if path.extension().is_some_and(|ext| ext == "json") {
            persistence::save_snapshot_json(&snapshot, path)?;
        } else {
            persistence::save_snapshot_binary(&snapshot, path)?;
        }
        Ok(())
    }

    /// Load a snapshot written by [`Engine::save_snapshot`].
    pub fn load_snapshot(config: EngineConfig, path: &Path) -> Result<Self, EngineError> {
        let limits = SnapshotLimits {
            max_accounts: config.max_accounts,
            max_history: config.max_history,
        };
        let snapshot = if path.extension().is_some_and(|ext| ext == "json") {
            persistence::load_snapshot_json(path, &limits)?
        } else {
            persistence::load_snapshot_binary(path, &limits)?
        };
        Self::restore(config, snapshot)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: AccountId = 100_001;
    const B: AccountId = 100_002;
    const C: AccountId = 100_003;
    const D: AccountId = 100_004;

    fn engine_with_accounts(accounts: &[(AccountId, f64, f64)]) -> Engine {
        let mut engine = Engine::new();
        for &(id, balance, fee) in accounts {
            engine.add_account(id, balance, fee).unwrap();
        }
        engine
    }

    fn record(
        txn_id: &str,
        source: AccountId,
        destination: AccountId,
        amount: f64,
        timestamp: i64,
        description: &str,
    ) -> TransactionRecord {
        TransactionRecord {
            txn_id: txn_id.to_string(),
            source,
            destination,
            amount,
            timestamp,
            description: description.to_string(),
        }
    }

    #[test]
    fn test_unknown_account_rejected() {
        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0)]);
        let err = engine
            .process(record("T00001", A, 999_999, 10.0, 0, ""))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownAccount(999_999)));
    }

    #[test]
    fn test_self_transfer_rejected() {
        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0)]);
        let err = engine.process(record("T00001", A, A, 10.0, 0, "")).unwrap_err();
        assert!(matches!(err, EngineError::SelfTransfer(_)));
    }

    #[test]
    fn test_insufficient_funds_leaves_state_untouched() {
        let mut engine = engine_with_accounts(&[(A, 50.0, 1.0), (B, 0.0, 1.0)]);
        let err = engine.process(record("T00001", A, B, 100.0, 0, "")).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(engine.account(A).unwrap().balance, 50.0);
        assert!(engine.history().is_empty());
        // A shortage is an input failure, not a fraud signal.
        assert!(!engine.is_flagged(A));
    }

    #[test]
    fn test_direct_transfer_materialises_edge() {
        let mut engine = engine_with_accounts(&[(A, 1_000.0, 2.0), (B, 500.0, 3.0)]);
        let receipt = engine
            .process(record("T00001", A, B, 100.0, 0, "groceries"))
            .unwrap();
        assert_eq!(receipt.path, vec![A, B]);
        assert_eq!(receipt.fee, 0.0);
        assert_eq!(receipt.delivered, 100.0);
        assert_eq!(engine.account(A).unwrap().balance, 900.0);
        assert_eq!(engine.account(B).unwrap().balance, 600.0);
    }

    #[test]
    fn test_routed_transfer_credits_intermediary() {
        let mut engine =
            engine_with_accounts(&[(A, 1_000.0, 2.0), (B, 1_000.0, 3.0), (C, 1_000.0, 5.0)]);
        engine.link_accounts(A, B).unwrap();
        engine.link_accounts(B, C).unwrap();

        let receipt = engine.process(record("T00001", A, C, 100.0, 0, "")).unwrap();
        assert_eq!(receipt.path, vec![A, B, C]);
        assert_eq!(receipt.fee, 3.0);
        assert_eq!(receipt.delivered, 97.0);
        assert_eq!(engine.account(A).unwrap().balance, 900.0);
        assert_eq!(engine.account(B).unwrap().balance, 1_003.0);
        assert_eq!(engine.account(C).unwrap().balance, 1_097.0);
    }

    #[test]
    fn test_conservation_across_stream() {
        let mut engine =
            engine_with_accounts(&[(A, 1_000.0, 2.0), (B, 1_000.0, 3.0), (C, 1_000.0, 5.0)]);
        engine.link_accounts(A, B).unwrap();
        engine.link_accounts(B, C).unwrap();
        let before = engine.total_balance();

        let outcomes = engine.process_batch(vec![
            record("T00001", A, C, 100.0, 0, ""),
            record("T00002", B, A, 40.0, 100, ""),
            record("T00003", C, B, 75.0, 200, ""),
        ]);
        assert!(outcomes.iter().filter(|outcome| outcome.is_ok()).count() >= 2);
        assert!((engine.total_balance() - before).abs() < 1e-9);
    }

    #[test]
    fn test_typosquat_rejection_flags_sender() {
        let mut engine =
            engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0), (C, 1_000.0, 1.0)]);
        engine.add_suspicious_word("amazon");

        let err = engine
            .process(record("T00001", A, B, 25.0, 0, "Amaz0n purchase"))
            .unwrap_err();
        match err {
            EngineError::Fraud(FraudReason::SuspiciousWord(word)) => assert_eq!(word, "Amaz0n"),
            other => panic!("expected suspicious word, got {other:?}"),
        }
        assert!(engine.is_flagged(A));
        assert!(engine.history().is_empty());

        // Every later transaction touching A short-circuits, either side.
        let err = engine.process(record("T00002", A, B, 25.0, 10, "clean")).unwrap_err();
        assert!(matches!(err, EngineError::Fraud(FraudReason::FlaggedAccount)));
        let err = engine.process(record("T00003", C, A, 25.0, 20, "clean")).unwrap_err();
        assert!(matches!(err, EngineError::Fraud(FraudReason::FlaggedAccount)));
    }

    #[test]
    fn test_exact_seed_word_is_not_rejected() {
        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0)]);
        engine.add_suspicious_word("amazon");
        assert!(engine
            .process(record("T00001", A, B, 25.0, 0, "amazon purchase"))
            .is_ok());
    }

    #[test]
    fn test_pattern_rejection() {
        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0)]);
        engine.add_suspicious_pattern("offshore");

        let err = engine
            .process(record("T00001", A, B, 25.0, 0, "move to OffShore fund"))
            .unwrap_err();
        match err {
            EngineError::Fraud(FraudReason::SuspiciousPattern(pattern)) => {
                assert_eq!(pattern, "offshore")
            }
            other => panic!("expected suspicious pattern, got {other:?}"),
        }
        assert!(engine.is_flagged(A));
    }

    #[test]
    fn test_velocity_rejects_fifth_in_window() {
        let mut engine = engine_with_accounts(&[(A, 10_000.0, 1.0), (B, 1_000.0, 1.0)]);
        for (n, timestamp) in [100, 110, 120, 130].into_iter().enumerate() {
            engine
                .process(record(&format!("T0000{n}"), A, B, 10.0, timestamp, ""))
                .unwrap();
        }
        let err = engine.process(record("T00004", A, B, 10.0, 140, "")).unwrap_err();
        assert!(matches!(err, EngineError::Fraud(FraudReason::Velocity)));
        assert!(engine.is_flagged(A));
        assert_eq!(engine.history().len(), 4);
    }

    #[test]
    fn test_velocity_allows_spread_out_transactions() {
        let mut engine = engine_with_accounts(&[(A, 10_000.0, 1.0), (B, 1_000.0, 1.0)]);
        for (n, timestamp) in [0, 100, 200, 300, 400, 500].into_iter().enumerate() {
            engine
                .process(record(&format!("T0000{n}"), A, B, 10.0, timestamp, ""))
                .unwrap();
        }
        assert_eq!(engine.history().len(), 6);
    }

    #[test]
    fn test_frequent_large_rejects_third_transfer() {
        let mut engine = engine_with_accounts(&[(A, 100_000.0, 1.0), (B, 1_000.0, 1.0)]);
        engine.process(record("T00001", A, B, 20_000.0, 0, "")).unwrap();
        engine.process(record("T00002", A, B, 20_000.0, 100, "")).unwrap();
        let err = engine
            .process(record("T00003", A, B, 20_000.0, 200, ""))
            .unwrap_err();
        assert!(matches!(err, EngineError::Fraud(FraudReason::FrequentLarge)));

        // Counters advanced only for the two committed transfers.
        let activity = engine.pair_activity(A, B);
        assert_eq!(activity.count, 2);
        assert_eq!(activity.total_amount, 40_000.0);
        assert!(engine.is_flagged(A));
    }

    #[test]
    fn test_frequency_alone_is_permitted() {
        let mut engine = engine_with_accounts(&[(A, 100_000.0, 1.0), (B, 1_000.0, 1.0)]);
        for n in 0..4i64 {
            engine
                .process(record(&format!("T0000{n}"), A, B, 100.0, n * 100, ""))
                .unwrap();
        }
        assert_eq!(engine.pair_activity(A, B).count, 4);
    }

    #[test]
    fn test_cycle_rejected_and_edge_rolled_back() {
        let mut engine =
            engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0), (C, 1_000.0, 1.0)]);
        engine.process(record("T00001", A, B, 10.0, 0, "")).unwrap();
        engine.process(record("T00002", B, C, 10.0, 100, "")).unwrap();

        let err = engine.process(record("T00003", C, A, 10.0, 200, "")).unwrap_err();
        assert!(matches!(err, EngineError::Fraud(FraudReason::Cycle)));
        assert!(engine.is_flagged(C));

        // The tentative edge was rolled back.
        let c_index = engine.graph.index_of(C).unwrap();
        assert!(engine.graph.transfer_targets(c_index).is_empty());
        assert_eq!(engine.history().len(), 2);
    }

    #[test]
    fn test_duplicate_transaction_id_rejected() {
        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0)]);
        engine.process(record("T00001", A, B, 10.0, 0, "")).unwrap();
        let err = engine.process(record("T00001", A, B, 10.0, 100, "")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTransaction(_)));
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_history_capacity_checked_before_mutation() {
        let mut engine = Engine::with_config(EngineConfig {
            max_history: 2,
            ..Default::default()
        });
        engine.add_account(A, 1_000.0, 1.0).unwrap();
        engine.add_account(B, 1_000.0, 1.0).unwrap();
        engine.process(record("T00001", A, B, 10.0, 0, "")).unwrap();
        engine.process(record("T00002", A, B, 10.0, 100, "")).unwrap();

        let before = engine.account(A).unwrap().balance;
        let err = engine.process(record("T00003", A, B, 10.0, 200, "")).unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded(_)));
        assert_eq!(engine.account(A).unwrap().balance, before);
        assert_eq!(engine.history().len(), 2);
    }

    #[test]
    fn test_no_path_when_materialisation_disabled() {
        let mut engine = Engine::with_config(EngineConfig {
            materialize_missing_edges: false,
            ..Default::default()
        });
        engine.add_account(A, 1_000.0, 1.0).unwrap();
        engine.add_account(B, 1_000.0, 1.0).unwrap();
        let err = engine.process(record("T00001", A, B, 10.0, 0, "")).unwrap_err();
        assert!(matches!(err, EngineError::NoPath { .. }));
    }

    #[test]
    fn test_account_validation() {
        let mut engine = Engine::new();
        assert!(matches!(
            engine.add_account(A, -1.0, 1.0),
            Err(EngineError::InvalidAmount(_))
        ));
        assert!(matches!(
            engine.add_account(A, 0.0, 100.0),
            Err(EngineError::InvalidFeePercentage(_))
        ));
        assert!(matches!(
            engine.add_account(A, 0.0, -0.5),
            Err(EngineError::InvalidFeePercentage(_))
        ));
        assert!(engine.add_account(A, 0.0, 0.0).is_ok());
    }

    #[test]
    fn test_transaction_queries() {
        let mut engine =
            engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0), (C, 1_000.0, 1.0)]);
        engine.process(record("T00001", A, B, 10.0, 0, "")).unwrap();
        engine.process(record("T00002", A, C, 10.0, 100, "")).unwrap();

        assert_eq!(engine.transaction("T00002").unwrap().destination, C);
        assert!(engine.transaction("T99999").is_none());

        let for_a = engine.transactions_for_account(A).unwrap();
        assert_eq!(for_a.len(), 2);
        let for_b = engine.transactions_for_account(B).unwrap();
        assert_eq!(for_b.len(), 1);
        assert!(engine.transactions_for_account(999_999).is_none());
    }

    #[test]
    fn test_snapshot_round_trip_is_oracle_equivalent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");

        let mut original = engine_with_accounts(&[
            (A, 1_000.0, 2.0),
            (B, 1_000.0, 3.0),
            (C, 1_000.0, 5.0),
            (D, 1_000.0, 1.0),
        ]);
        original.add_suspicious_word("amazon");
        original.process(record("T00001", A, B, 100.0, 0, "")).unwrap();
        original.process(record("T00002", B, C, 50.0, 100, "")).unwrap();
        // Taints C.
        original
            .process(record("T00003", C, D, 10.0, 200, "Amaz0n refund"))
            .unwrap_err();

        original.save_snapshot(&path).unwrap();
        let mut restored = Engine::load_snapshot(EngineConfig::default(), &path).unwrap();
        // Lexicons are loaded at startup, exactly as the original was seeded.
        restored.add_suspicious_word("amazon");

        let candidates = vec![
            record("T00001", A, B, 10.0, 300, ""),            // replayed id
            record("T00004", C, D, 10.0, 310, ""),            // flagged sender
            record("T00005", D, C, 10.0, 320, ""),            // flagged receiver
            record("T00006", A, B, 25.0, 330, "groceries"),   // clean
            record("T00007", D, A, 30.0, 340, "Amaz0n gift"), // typosquat
        ];
        let original_outcomes = original.process_batch(candidates.clone());
        let restored_outcomes = restored.process_batch(candidates);

        for (first, second) in original_outcomes.iter().zip(&restored_outcomes) {
            match (first, second) {
                (Ok(a), Ok(b)) => {
                    assert_eq!(a.path, b.path);
                    assert_eq!(a.fee, b.fee);
                }
                (Err(a), Err(b)) => assert_eq!(format!("{a}"), format!("{b}")),
                (a, b) => panic!("verdicts diverged: {a:?} vs {b:?}"),
            }
        }
        for account in original.accounts() {
            let twin = restored.account(account.id).unwrap();
            assert!((account.balance - twin.balance).abs() < 1e-9);
        }
    }

    #[test]
    fn test_json_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0)]);
        engine.process(record("T00001", A, B, 10.0, 0, "note")).unwrap();
        engine.save_snapshot(&path).unwrap();

        let restored = Engine::load_snapshot(EngineConfig::default(), &path).unwrap();
        assert_eq!(restored.history().len(), 1);
        assert_eq!(restored.account(A).unwrap().balance, 990.0);
        assert_eq!(restored.transaction("T00001").unwrap().description, "note");
    }

    #[test]
    fn test_taint_survives_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");

        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0)]);
        engine.add_suspicious_pattern("launder");
        engine
            .process(record("T00001", A, B, 10.0, 0, "laundering fee"))
            .unwrap_err();
        assert!(engine.is_flagged(A));

        engine.save_snapshot(&path).unwrap();
        let restored = Engine::load_snapshot(EngineConfig::default(), &path).unwrap();
        assert!(restored.is_flagged(A));
        assert!(!restored.is_flagged(B));
    }

    #[test]
    fn test_receipt_json_export() {
        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0)]);
        let receipt = engine.process(record("T00001", A, B, 10.0, 0, "")).unwrap();
        let json = receipt.to_json().unwrap();
        assert!(json.contains("T00001"));
        assert!(json.contains("delivered"));
    }

    #[test]
    fn test_stats() {
        let mut engine = engine_with_accounts(&[(A, 1_000.0, 1.0), (B, 1_000.0, 1.0)]);
        engine.add_suspicious_word("amazon");
        engine.add_suspicious_pattern("offshore");
        engine.process(record("T00001", A, B, 10.0, 0, "")).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.account_count, 2);
        assert_eq!(stats.transaction_count, 1);
        assert_eq!(stats.seed_word_count, 1);
        assert_eq!(stats.pattern_count, 1);
    }
}
