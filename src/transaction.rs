//! Transaction Management
//!
//! Tracks session transactions from begin to commit or abort. Isolation is
//! optimistic: each transaction works on private copies of the collections it
//! touches and is validated against collection versions at commit.

use crate::error::{DbError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique transaction identifier
pub type TransactionId = u64;

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Transaction is currently active
    Active,
    /// Transaction has been committed
    Committed,
    /// Transaction has been rolled back
    Aborted,
}

/// Transaction metadata and state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID
    pub id: TransactionId,
    /// Session that started it
    pub session_id: u64,
    /// Current state
    pub state: TransactionState,
    /// When transaction started (milliseconds since epoch)
    pub start_time: u64,
    /// Collections modified by this transaction
    pub write_set: Vec<String>,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(id: TransactionId, session_id: u64) -> Self {
        Transaction {
            id,
            session_id,
            state: TransactionState::Active,
            start_time: current_millis(),
            write_set: Vec::new(),
        }
    }

    /// Mark a collection as written by this transaction
    pub fn track_write(&mut self, collection: &str) {
        if !self.write_set.iter().any(|c| c == collection) {
            self.write_set.push(collection.to_string());
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn is_committed(&self) -> bool {
        self.state == TransactionState::Committed
    }
}

/// Counters over the lifetime of the database handle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
    pub active: usize,
    pub started: u64,
    pub committed: u64,
    pub aborted: u64,
    pub write_conflicts: u64,
}

/// Transaction manager - allocates ids and tracks every session transaction
pub struct TransactionManager {
    /// Next transaction ID to allocate
    next_txn_id: AtomicU64,
    active_transactions: RwLock<HashMap<TransactionId, Transaction>>,
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    write_conflicts: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            active_transactions: RwLock::new(HashMap::new()),
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            write_conflicts: AtomicU64::new(0),
        }
    }

    /// Start ids after those already present in a replayed log
    pub(crate) fn advance_past(&self, txn_id: TransactionId) {
        self.next_txn_id.fetch_max(txn_id + 1, Ordering::SeqCst);
    }

    /// Allocate an id for a single auto-committed write. Not tracked.
    pub(crate) fn allocate_id(&self) -> TransactionId {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Begin a new transaction
    pub fn begin(&self, session_id: u64) -> TransactionId {
        let txn_id = self.allocate_id();
        self.active_transactions
            .write()
            .insert(txn_id, Transaction::new(txn_id, session_id));
        self.started.fetch_add(1, Ordering::Relaxed);
        txn_id
    }

    /// Track a write operation
    pub fn track_write(&self, txn_id: TransactionId, collection: &str) -> Result<()> {
        let mut active = self.active_transactions.write();
        let transaction = active
            .get_mut(&txn_id)
            .ok_or_else(|| DbError::NotFound(format!("transaction {}", txn_id)))?;
        transaction.track_write(collection);
        Ok(())
    }

    /// Mark a transaction committed and stop tracking it
    pub fn commit(&self, txn_id: TransactionId) -> Result<Transaction> {
        let mut transaction = self.finish(txn_id)?;
        transaction.state = TransactionState::Committed;
        self.committed.fetch_add(1, Ordering::Relaxed);
        Ok(transaction)
    }

    /// Rollback (abort) a transaction
    pub fn rollback(&self, txn_id: TransactionId) -> Result<Transaction> {
        let mut transaction = self.finish(txn_id)?;
        transaction.state = TransactionState::Aborted;
        self.aborted.fetch_add(1, Ordering::Relaxed);
        Ok(transaction)
    }

    pub(crate) fn record_conflict(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get an active transaction
    pub fn get_transaction(&self, txn_id: TransactionId) -> Option<Transaction> {
        self.active_transactions.read().get(&txn_id).cloned()
    }

    /// Get all active transaction IDs
    pub fn get_active_txn_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self.active_transactions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            active: self.active_transactions.read().len(),
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts.load(Ordering::Relaxed),
        }
    }

    fn finish(&self, txn_id: TransactionId) -> Result<Transaction> {
        let transaction = self
            .active_transactions
            .write()
            .remove(&txn_id)
            .ok_or_else(|| DbError::NotFound(format!("transaction {}", txn_id)))?;

        if !transaction.is_active() {
            return Err(DbError::NotFound(format!("active transaction {}", txn_id)));
        }
        Ok(transaction)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
