//! Write-Ahead Log (WAL)
//!
//! Ensures durability - committed writes survive a restart. Every commit is
//! appended as `Begin`, one `Op` per change, then `Commit`, and synced before
//! the change becomes visible. Replay applies only transactions whose
//! `Commit` record made it to disk.

use crate::document::Document;
use crate::error::{DbError, Result};
use crate::index::IndexModel;
use crate::transaction::{current_millis, TransactionId};
use crate::types::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// WAL file magic number
const WAL_MAGIC: u32 = 0x7D0C_0001;

/// WAL format version
const WAL_VERSION: u32 = 1;

/// A single logged change to one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    Insert {
        collection: String,
        document: Document,
    },
    /// Full post-image of an updated document
    Replace {
        collection: String,
        document: Document,
    },
    Delete {
        collection: String,
        id: Value,
    },
    CreateIndex {
        collection: String,
        model: IndexModel,
    },
    DropIndex {
        collection: String,
        name: String,
    },
}

impl WalOp {
    pub fn collection(&self) -> &str {
        match self {
            WalOp::Insert { collection, .. }
            | WalOp::Replace { collection, .. }
            | WalOp::Delete { collection, .. }
            | WalOp::CreateIndex { collection, .. }
            | WalOp::DropIndex { collection, .. } => collection,
        }
    }
}

/// Write-Ahead Log entry types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    Begin {
        txn_id: TransactionId,
        timestamp: u64,
    },
    Op {
        txn_id: TransactionId,
        op: WalOp,
    },
    Commit {
        txn_id: TransactionId,
        timestamp: u64,
    },
}

impl WalEntry {
    pub fn txn_id(&self) -> TransactionId {
        match self {
            WalEntry::Begin { txn_id, .. } => *txn_id,
            WalEntry::Op { txn_id, .. } => *txn_id,
            WalEntry::Commit { txn_id, .. } => *txn_id,
        }
    }

    pub fn is_commit(&self) -> bool {
        matches!(self, WalEntry::Commit { .. })
    }
}

/// WAL file header
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalHeader {
    magic: u32,
    version: u32,
    created_at: u64,
}

impl WalHeader {
    fn new() -> Self {
        WalHeader {
            magic: WAL_MAGIC,
            version: WAL_VERSION,
            created_at: current_millis() / 1000,
        }
    }

    fn is_valid(&self) -> bool {
        self.magic == WAL_MAGIC && self.version == WAL_VERSION
    }
}

/// Write-Ahead Log writer
pub struct WalWriter {
    file: BufWriter<File>,
    entry_count: usize,
}

impl WalWriter {
    /// Open (or create) a log file for appending
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;

        let mut writer = BufWriter::new(file);

        // Write header if file is empty
        if writer.get_ref().metadata()?.len() == 0 {
            let header_bytes = bincode::serialize(&WalHeader::new())?;
            writer.write_all(&header_bytes)?;
            writer.flush()?;
        }

        Ok(WalWriter {
            file: writer,
            entry_count: 0,
        })
    }

    /// Buffer one length-prefixed entry
    pub fn write_entry(&mut self, entry: &WalEntry) -> Result<()> {
        let entry_bytes = bincode::serialize(entry)?;

        let len = entry_bytes.len() as u32;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&entry_bytes)?;

        self.entry_count += 1;
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Flush buffered entries, optionally with fsync
    pub fn flush(&mut self, sync: bool) -> Result<()> {
        self.file.flush()?;
        if sync {
            self.file.get_mut().sync_all()?;
        }
        Ok(())
    }
}

/// Write-Ahead Log reader
pub struct WalReader {
    file: BufReader<File>,
    offset: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut header_bytes = vec![0u8; std::mem::size_of::<WalHeader>()];
        reader.read_exact(&mut header_bytes)?;

        let header: WalHeader = bincode::deserialize(&header_bytes)?;
        if !header.is_valid() {
            return Err(DbError::Wal("invalid WAL header".to_string()));
        }

        Ok(WalReader {
            file: reader,
            offset: header_bytes.len() as u64,
        })
    }

    /// Read next entry. A record cut short by a crash ends the log.
    pub fn read_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut len_bytes = [0u8; 4];
        match self.file.read_exact(&mut len_bytes) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut entry_bytes = vec![0u8; len];
        match self.file.read_exact(&mut entry_bytes) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::warn!(len, "ignoring torn record at end of write-ahead log");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let entry = bincode::deserialize(&entry_bytes)?;
        self.offset += (len_bytes.len() + len) as u64;
        Ok(Some(entry))
    }

    /// Bytes of the file covered by the header and complete records read so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read all entries from WAL
    pub fn read_all(&mut self) -> Result<Vec<WalEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.read_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// WAL Manager - coordinates WAL operations
pub struct WalManager {
    writer: Mutex<WalWriter>,
    path: PathBuf,
    sync_on_commit: bool,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(path: P, sync_on_commit: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = WalWriter::new(&path)?;

        Ok(WalManager {
            writer: Mutex::new(writer),
            path,
            sync_on_commit,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a whole transaction and make it durable
    pub fn log_transaction(&self, txn_id: TransactionId, ops: &[WalOp]) -> Result<()> {
        let mut writer = self.writer.lock();

        writer.write_entry(&WalEntry::Begin {
            txn_id,
            timestamp: current_millis(),
        })?;
        for op in ops {
            writer.write_entry(&WalEntry::Op {
                txn_id,
                op: op.clone(),
            })?;
        }
        writer.write_entry(&WalEntry::Commit {
            txn_id,
            timestamp: current_millis(),
        })?;

        writer.flush(self.sync_on_commit)
    }

    /// Read the log back, grouping operations by committed transaction
    pub fn recover(&self) -> Result<RecoveryResult> {
        self.writer.lock().flush(false)?;
        recover_file(&self.path)
    }
}

/// Read a log file without opening it for writing
pub fn recover_file<P: AsRef<Path>>(path: P) -> Result<RecoveryResult> {
    let mut reader = WalReader::new(path)?;
    let entries = reader.read_all()?;

    let mut result = RecoveryResult::new();
    let mut pending: HashMap<TransactionId, Vec<WalOp>> = HashMap::new();

    for entry in entries {
        result.entry_count += 1;
        result.max_txn_id = result.max_txn_id.max(entry.txn_id());

        match entry {
            WalEntry::Begin { txn_id, .. } => {
                pending.insert(txn_id, Vec::new());
            }
            WalEntry::Op { txn_id, op } => {
                pending.entry(txn_id).or_default().push(op);
            }
            WalEntry::Commit { txn_id, .. } => {
                let ops = pending.remove(&txn_id).unwrap_or_default();
                result.committed.push((txn_id, ops));
            }
        }
    }

    result.incomplete = pending.into_keys().collect();
    result.valid_len = reader.offset();
    Ok(result)
}

/// Result of WAL recovery
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Committed transactions in commit order
    pub committed: Vec<(TransactionId, Vec<WalOp>)>,
    /// Transactions with no commit record; never applied
    pub incomplete: HashSet<TransactionId>,
    pub entry_count: usize,
    pub max_txn_id: TransactionId,
    /// Length of the intact prefix; anything after it is a torn record
    pub valid_len: u64,
}

impl RecoveryResult {
    fn new() -> Self {
        RecoveryResult::default()
    }

    pub fn committed_ops(&self) -> usize {
        self.committed.iter().map(|(_, ops)| ops.len()).sum()
    }
}
