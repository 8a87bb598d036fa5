//! State snapshots and bulk input loaders.
//!
//! Bulk text inputs (accounts, transaction streams, lexicons) skip and log
//! malformed lines; snapshot problems are hard errors because resuming from
//! a partial state would corrupt the ledger.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::{parse_account_id, AccountId, Transaction, TransactionRecord};

/// Leading bytes of a binary snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"TXRS";
/// Current binary snapshot revision.
pub const SNAPSHOT_VERSION: u16 = 1;

const MAX_ID_BYTES: usize = 64;
const MAX_DESCRIPTION_BYTES: usize = 4_096;
const MAX_FILTER_BITS: u64 = 1 << 26;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot is truncated or malformed: {0}")]
    Malformed(String),
    #[error("snapshot exceeds configured bounds: {0}")]
    OutOfBounds(String),
    #[error("invalid JSON snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Account fields that survive a snapshot; per-account histories are
/// derived from the transaction log on restore.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub balance: f64,
    pub fee_percentage: f64,
}

/// Everything a fresh engine needs to resume: the account arena, the fee
/// matrix, the committed transaction log and the flagged-filter bits.
/// Pair counters, per-account histories, the id map and the transfer
/// adjacency are rebuilt from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub accounts: Vec<AccountSnapshot>,
    pub fee_matrix: Vec<Vec<f64>>,
    pub history: Vec<Transaction>,
    pub flagged_bits: Vec<u64>,
    pub flagged_bit_count: usize,
    pub flagged_hash_count: u32,
}

/// Configured maxima a loaded snapshot must respect.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotLimits {
    pub max_accounts: usize,
    pub max_history: usize,
}

impl Snapshot {
    /// Structural checks shared by the binary and JSON loaders.
    pub fn validate(&self, limits: &SnapshotLimits) -> Result<(), PersistenceError> {
        if self.accounts.len() > limits.max_accounts {
            return Err(PersistenceError::OutOfBounds(format!(
                "{} accounts exceed the limit of {}",
                self.accounts.len(),
                limits.max_accounts
            )));
        }
        if self.history.len() > limits.max_history {
            return Err(PersistenceError::OutOfBounds(format!(
                "{} history entries exceed the limit of {}",
                self.history.len(),
                limits.max_history
            )));
        }
        if self.fee_matrix.len() != self.accounts.len()
            || self
                .fee_matrix
                .iter()
                .any(|row| row.len() != self.accounts.len())
        {
            return Err(PersistenceError::Malformed(
                "fee matrix dimensions do not match the account count".to_string(),
            ));
        }
        if self.flagged_bit_count == 0
            || self.flagged_hash_count == 0
            || self.flagged_bits.len() != self.flagged_bit_count.div_ceil(64)
        {
            return Err(PersistenceError::Malformed(
                "flagged-filter geometry is inconsistent".to_string(),
            ));
        }
        Ok(())
    }
}

// --- text loaders -----------------------------------------------------------

/// Parse an accounts file: one `<id> <balance> <fee_percentage>` record per
/// line, whitespace separated. Malformed lines are logged and skipped.
pub fn load_accounts_text(path: &Path) -> Result<Vec<AccountSnapshot>, PersistenceError> {
    let file = File::open(path)?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_account_line(&line) {
            Some(record) => records.push(record),
            None => tracing::warn!(%line, "skipping malformed account record"),
        }
    }
    Ok(records)
}

fn parse_account_line(line: &str) -> Option<AccountSnapshot> {
    let mut fields = line.split_whitespace();
    let id = parse_account_id(fields.next()?)?;
    let balance: f64 = fields.next()?.parse().ok()?;
    let fee_percentage: f64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(AccountSnapshot {
        id,
        balance,
        fee_percentage,
    })
}

/// Parse a CSV transaction stream:
/// `txn_id,sender,receiver,amount,timestamp,description`.
///
/// The line is split on the first five commas only; the description keeps
/// the raw remainder and may itself contain commas. Malformed lines are
/// logged and skipped.
pub fn load_transaction_records_csv(
    path: &Path,
) -> Result<Vec<TransactionRecord>, PersistenceError> {
    let file = File::open(path)?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_csv_line(&line) {
            Some(record) => records.push(record),
            None => tracing::warn!(%line, "skipping malformed transaction record"),
        }
    }
    Ok(records)
}

fn parse_csv_line(line: &str) -> Option<TransactionRecord> {
    let mut fields = line.splitn(6, ',');
    let txn_id = fields.next()?.to_string();
    let source = parse_account_id(fields.next()?)?;
    let destination = parse_account_id(fields.next()?)?;
    let amount: f64 = fields.next()?.parse().ok()?;
    let timestamp: i64 = fields.next()?.parse().ok()?;
    let description = fields.next()?.to_string();
    if txn_id.is_empty() {
        return None;
    }
    Some(TransactionRecord {
        txn_id,
        source,
        destination,
        amount,
        timestamp,
        description,
    })
}

/// Parse a transfer list: `<txn_id> <source> <destination> <amount>`
/// whitespace records. The format carries no timestamps, so accepted
/// records are stamped `base_timestamp + index` to stay monotonically
/// non-decreasing; descriptions are empty.
pub fn load_transfer_list_text(
    path: &Path,
    base_timestamp: i64,
) -> Result<Vec<TransactionRecord>, PersistenceError> {
    let file = File::open(path)?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_transfer_line(&line, base_timestamp + records.len() as i64) {
            Some(record) => records.push(record),
            None => tracing::warn!(%line, "skipping malformed transfer record"),
        }
    }
    Ok(records)
}

fn parse_transfer_line(line: &str, timestamp: i64) -> Option<TransactionRecord> {
    let mut fields = line.split_whitespace();
    let txn_id = fields.next()?.to_string();
    let source = parse_account_id(fields.next()?)?;
    let destination = parse_account_id(fields.next()?)?;
    let amount: f64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(TransactionRecord {
        txn_id,
        source,
        destination,
        amount,
        timestamp,
        description: String::new(),
    })
}

/// Load a whitespace-separated lexicon file (typosquat seeds or substring
/// patterns).
pub fn load_lexicon_text(path: &Path) -> Result<Vec<String>, PersistenceError> {
    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;
    Ok(contents
        .split_whitespace()
        .map(|word| word.to_string())
        .collect())
}

// --- binary codec -----------------------------------------------------------

pub fn save_snapshot_binary(snapshot: &Snapshot, path: &Path) -> Result<(), PersistenceError> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&SNAPSHOT_MAGIC)?;
    out.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;

    out.write_all(&(snapshot.accounts.len() as u32).to_le_bytes())?;
    for account in &snapshot.accounts {
        out.write_all(&account.id.to_le_bytes())?;
        out.write_all(&account.balance.to_le_bytes())?;
        out.write_all(&account.fee_percentage.to_le_bytes())?;
    }

    for row in &snapshot.fee_matrix {
        for &weight in row {
            out.write_all(&weight.to_le_bytes())?;
        }
    }

    out.write_all(&(snapshot.history.len() as u32).to_le_bytes())?;
    for tx in &snapshot.history {
        write_transaction(&mut out, tx)?;
    }

    out.write_all(&(snapshot.flagged_bit_count as u64).to_le_bytes())?;
    out.write_all(&snapshot.flagged_hash_count.to_le_bytes())?;
    out.write_all(&(snapshot.flagged_bits.len() as u32).to_le_bytes())?;
    for &word in &snapshot.flagged_bits {
        out.write_all(&word.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

fn write_transaction(out: &mut impl Write, tx: &Transaction) -> Result<(), PersistenceError> {
    if tx.txn_id.len() > MAX_ID_BYTES {
        return Err(PersistenceError::Malformed(format!(
            "transaction id '{}' is too long to encode",
            tx.txn_id
        )));
    }
    out.write_all(&[tx.txn_id.len() as u8])?;
    out.write_all(tx.txn_id.as_bytes())?;
    out.write_all(&tx.source.to_le_bytes())?;
    out.write_all(&tx.destination.to_le_bytes())?;
    out.write_all(&tx.amount.to_le_bytes())?;
    out.write_all(&tx.timestamp.to_le_bytes())?;
    out.write_all(&tx.fee.to_le_bytes())?;
    out.write_all(&(tx.description.len() as u32).to_le_bytes())?;
    out.write_all(tx.description.as_bytes())?;
    out.write_all(&(tx.path.len() as u32).to_le_bytes())?;
    for &hop in &tx.path {
        out.write_all(&hop.to_le_bytes())?;
    }
    Ok(())
}

pub fn load_snapshot_binary(
    path: &Path,
    limits: &SnapshotLimits,
) -> Result<Snapshot, PersistenceError> {
    let mut input = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    fill(&mut input, &mut magic)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(PersistenceError::Malformed(
            "unrecognised snapshot magic".to_string(),
        ));
    }
    let version = read_u16(&mut input)?;
    if version != SNAPSHOT_VERSION {
        return Err(PersistenceError::Malformed(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let account_count = read_u32(&mut input)? as usize;
    if account_count > limits.max_accounts {
        return Err(PersistenceError::OutOfBounds(format!(
            "{account_count} accounts exceed the limit of {}",
            limits.max_accounts
        )));
    }
    let mut accounts = Vec::with_capacity(account_count);
    for _ in 0..account_count {
        accounts.push(AccountSnapshot {
            id: read_u32(&mut input)?,
            balance: read_f64(&mut input)?,
            fee_percentage: read_f64(&mut input)?,
        });
    }

    let mut fee_matrix = Vec::with_capacity(account_count);
    for _ in 0..account_count {
        let mut row = Vec::with_capacity(account_count);
        for _ in 0..account_count {
            row.push(read_f64(&mut input)?);
        }
        fee_matrix.push(row);
    }

    let history_count = read_u32(&mut input)? as usize;
    if history_count > limits.max_history {
        return Err(PersistenceError::OutOfBounds(format!(
            "{history_count} history entries exceed the limit of {}",
            limits.max_history
        )));
    }
    let mut history = Vec::with_capacity(history_count);
    for _ in 0..history_count {
        history.push(read_transaction(&mut input, limits)?);
    }

    let flagged_bit_count = read_u64(&mut input)?;
    if flagged_bit_count == 0 || flagged_bit_count > MAX_FILTER_BITS {
        return Err(PersistenceError::OutOfBounds(format!(
            "flagged-filter width {flagged_bit_count} is outside the supported range"
        )));
    }
    let flagged_bit_count = flagged_bit_count as usize;
    let flagged_hash_count = read_u32(&mut input)?;
    let word_count = read_u32(&mut input)? as usize;
    if word_count != flagged_bit_count.div_ceil(64) {
        return Err(PersistenceError::Malformed(
            "flagged-filter word count does not match its width".to_string(),
        ));
    }
    let mut flagged_bits = Vec::with_capacity(word_count);
    for _ in 0..word_count {
        flagged_bits.push(read_u64(&mut input)?);
    }

    let mut trailing = [0u8; 1];
    if input.read(&mut trailing)? != 0 {
        return Err(PersistenceError::Malformed(
            "trailing data after snapshot".to_string(),
        ));
    }

    let snapshot = Snapshot {
        accounts,
        fee_matrix,
        history,
        flagged_bits,
        flagged_bit_count,
        flagged_hash_count,
    };
    snapshot.validate(limits)?;
    Ok(snapshot)
}

fn read_transaction(
    input: &mut impl Read,
    limits: &SnapshotLimits,
) -> Result<Transaction, PersistenceError> {
    let mut id_len = [0u8; 1];
    fill(input, &mut id_len)?;
    let id_len = id_len[0] as usize;
    if id_len == 0 || id_len > MAX_ID_BYTES {
        return Err(PersistenceError::Malformed(format!(
            "transaction id length {id_len} is out of range"
        )));
    }
    let txn_id = read_string(input, id_len)?;
    let source = read_u32(input)?;
    let destination = read_u32(input)?;
    let amount = read_f64(input)?;
    let timestamp = read_i64(input)?;
    let fee = read_f64(input)?;

    let desc_len = read_u32(input)? as usize;
    if desc_len > MAX_DESCRIPTION_BYTES {
        return Err(PersistenceError::OutOfBounds(format!(
            "description length {desc_len} exceeds {MAX_DESCRIPTION_BYTES}"
        )));
    }
    let description = read_string(input, desc_len)?;

    let path_len = read_u32(input)? as usize;
    if path_len > limits.max_accounts {
        return Err(PersistenceError::OutOfBounds(format!(
            "path length {path_len} exceeds the account limit"
        )));
    }
    let mut path = Vec::with_capacity(path_len);
    for _ in 0..path_len {
        path.push(read_u32(input)?);
    }

    Ok(Transaction {
        txn_id,
        source,
        destination,
        amount,
        timestamp,
        description,
        fee,
        path,
    })
}

fn fill(input: &mut impl Read, buf: &mut [u8]) -> Result<(), PersistenceError> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PersistenceError::Malformed("unexpected end of snapshot".to_string())
        } else {
            PersistenceError::Io(e)
        }
    })
}

fn read_u16(input: &mut impl Read) -> Result<u16, PersistenceError> {
    let mut buf = [0u8; 2];
    fill(input, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(input: &mut impl Read) -> Result<u32, PersistenceError> {
    let mut buf = [0u8; 4];
    fill(input, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(input: &mut impl Read) -> Result<u64, PersistenceError> {
    let mut buf = [0u8; 8];
    fill(input, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(input: &mut impl Read) -> Result<i64, PersistenceError> {
    let mut buf = [0u8; 8];
    fill(input, &mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f64(input: &mut impl Read) -> Result<f64, PersistenceError> {
    let mut buf = [0u8; 8];
    fill(input, &mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_string(input: &mut impl Read, len: usize) -> Result<String, PersistenceError> {
    let mut buf = vec![0u8; len];
    fill(input, &mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| PersistenceError::Malformed("non-UTF-8 text in snapshot".to_string()))
}

// --- JSON codec -------------------------------------------------------------

pub fn save_snapshot_json(snapshot: &Snapshot, path: &Path) -> Result<(), PersistenceError> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, snapshot)?;
    out.flush()?;
    Ok(())
}

pub fn load_snapshot_json(
    path: &Path,
    limits: &SnapshotLimits,
) -> Result<Snapshot, PersistenceError> {
    let snapshot: Snapshot = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    snapshot.validate(limits)?;
    Ok(snapshot)
}
