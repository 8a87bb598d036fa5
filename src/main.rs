//! CLI driver for the transaction routing engine.
//!
//! A thin wrapper over the core API: it loads state, applies a transaction
//! stream and answers account or transaction queries. All routing and fraud
//! decisions live in the library.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rust_transaction_router::{
    format_account_id, parse_account_id, persistence, Engine, EngineConfig, EngineError,
    Transaction,
};

#[derive(Parser)]
#[command(name = "transaction-router")]
#[command(about = "Transaction routing engine with graph-based fraud detection")]
#[command(version)]
struct Cli {
    /// Snapshot file holding engine state
    #[arg(long, default_value = "state.dat", global = true)]
    state: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load state, apply a transaction stream and save the updated snapshot
    Run {
        /// Accounts file used when no snapshot exists yet
        #[arg(long, default_value = "accounts.txt")]
        accounts: PathBuf,

        /// Transaction stream to apply
        /// (CSV: `txn_id,sender,receiver,amount,timestamp,description`)
        #[arg(long)]
        transactions: Option<PathBuf>,

        /// Treat the stream as a whitespace transfer list
        /// (`txn_id source destination amount`)
        #[arg(long)]
        transfer_list: bool,

        /// Base timestamp assigned to transfer-list records
        #[arg(long, default_value = "0")]
        base_timestamp: i64,

        /// Typosquat seed lexicon (whitespace-separated words)
        #[arg(long)]
        words: Option<PathBuf>,

        /// Suspicious substring patterns (whitespace-separated)
        #[arg(long)]
        patterns: Option<PathBuf>,

        /// Skip writing the snapshot back
        #[arg(long)]
        no_save: bool,
    },

    /// Print all accounts
    Accounts,

    /// Print transactions touching a six-digit account id
    History {
        account_id: String,
    },

    /// Fetch a single transaction by id
    Transaction {
        txn_id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            accounts,
            transactions,
            transfer_list,
            base_timestamp,
            words,
            patterns,
            no_save,
        } => run(
            &cli.state,
            &accounts,
            transactions.as_deref(),
            transfer_list,
            base_timestamp,
            words.as_deref(),
            patterns.as_deref(),
            no_save,
        ),
        Commands::Accounts => {
            let engine = open_engine(&cli.state)?;
            print_accounts(&engine);
            Ok(())
        }
        Commands::History { account_id } => {
            let engine = open_engine(&cli.state)?;
            let Some(id) = parse_account_id(&account_id) else {
                bail!("account id must be six decimal digits, got '{account_id}'");
            };
            let Some(transactions) = engine.transactions_for_account(id) else {
                bail!("unknown account {}", format_account_id(id));
            };
            if transactions.is_empty() {
                println!("No transactions for account {}.", format_account_id(id));
            }
            for tx in transactions {
                print_transaction(tx);
            }
            Ok(())
        }
        Commands::Transaction { txn_id } => {
            let engine = open_engine(&cli.state)?;
            match engine.transaction(&txn_id) {
                Some(tx) => {
                    print_transaction(tx);
                    Ok(())
                }
                None => bail!("transaction '{txn_id}' not found"),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    state: &Path,
    accounts: &Path,
    transactions: Option<&Path>,
    transfer_list: bool,
    base_timestamp: i64,
    words: Option<&Path>,
    patterns: Option<&Path>,
    no_save: bool,
) -> Result<()> {
    let mut engine = if state.exists() {
        tracing::info!(state = %state.display(), "loading snapshot");
        Engine::load_snapshot(EngineConfig::default(), state)
            .with_context(|| format!("failed to load snapshot {}", state.display()))?
    } else {
        let records = persistence::load_accounts_text(accounts)
            .with_context(|| format!("failed to load accounts from {}", accounts.display()))?;
        let mut engine = Engine::new();
        let added = engine.load_accounts(records)?;
        tracing::info!(added, accounts = %accounts.display(), "loaded accounts");
        engine
    };

    if let Some(path) = words {
        let seeds = persistence::load_lexicon_text(path)
            .with_context(|| format!("failed to load word lexicon {}", path.display()))?;
        for word in &seeds {
            engine.add_suspicious_word(word);
        }
        tracing::info!(count = seeds.len(), "loaded typosquat seeds");
    }
    if let Some(path) = patterns {
        let seeds = persistence::load_lexicon_text(path)
            .with_context(|| format!("failed to load pattern lexicon {}", path.display()))?;
        for pattern in &seeds {
            engine.add_suspicious_pattern(pattern);
        }
        tracing::info!(count = seeds.len(), "loaded suspicious patterns");
    }

    if let Some(path) = transactions {
        let records = if transfer_list {
            persistence::load_transfer_list_text(path, base_timestamp)
        } else {
            persistence::load_transaction_records_csv(path)
        }
        .with_context(|| format!("failed to load transactions from {}", path.display()))?;

        let total = records.len();
        let ids: Vec<String> = records.iter().map(|r| r.txn_id.clone()).collect();
        let outcomes = engine.process_batch(records);
        let mut committed = 0usize;
        for (record, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(receipt) => {
                    committed += 1;
                    let path_text: Vec<String> =
                        receipt.path.iter().copied().map(format_account_id).collect();
                    println!(
                        "{}: committed | fee {:.2} | delivered {:.2} | path {}",
                        receipt.txn_id,
                        receipt.fee,
                        receipt.delivered,
                        path_text.join("->")
                    );
                }
                Err(EngineError::Fraud(reason)) => {
                    println!("{record}: rejected | {reason}");
                }
                Err(err) => {
                    println!("{record}: failed | {err}");
                }
            }
        }
        println!("Processed {committed}/{total} transactions.");
    } else {
        tracing::info!("no transaction stream supplied");
    }

    let stats = engine.stats();
    println!(
        "Accounts: {} | history: {} | lexicon: {} words, {} patterns",
        stats.account_count, stats.transaction_count, stats.seed_word_count, stats.pattern_count
    );

    if !no_save {
        engine
            .save_snapshot(state)
            .with_context(|| format!("failed to save snapshot {}", state.display()))?;
        tracing::info!(state = %state.display(), "snapshot saved");
    }
    Ok(())
}

fn open_engine(state: &Path) -> Result<Engine> {
    if !state.exists() {
        bail!("snapshot {} does not exist; run the engine first", state.display());
    }
    Engine::load_snapshot(EngineConfig::default(), state)
        .with_context(|| format!("failed to load snapshot {}", state.display()))
}

fn print_accounts(engine: &Engine) {
    println!("Account | Balance      | Fee");
    println!("--------------------------------");
    for account in engine.accounts() {
        println!(
            "{}  | {:>12.2} | {:.2}%",
            format_account_id(account.id),
            account.balance,
            account.fee_percentage
        );
    }
}

fn print_transaction(tx: &Transaction) {
    let when = DateTime::from_timestamp(tx.timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| tx.timestamp.to_string());
    let path_text: Vec<String> = tx.path.iter().copied().map(format_account_id).collect();
    println!("Transaction {}", tx.txn_id);
    println!("  {} -> {}", format_account_id(tx.source), format_account_id(tx.destination));
    println!("  amount {:.2} | fee {:.2} | at {}", tx.amount, tx.fee, when);
    println!("  path {}", path_text.join("->"));
    if !tx.description.is_empty() {
        println!("  description: {}", tx.description);
    }
}
