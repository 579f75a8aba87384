//! Sessions and multi-collection transactions
//!
//! Inside a transaction, every collection the session touches is copied on
//! first access; reads and writes go to that private copy. Commit publishes
//! the written copies all at once, after checking that no one else changed
//! those collections in the meantime. Outside a transaction, session
//! operations auto-commit like the database's own handles.

use crate::collection::{Collection, CollectionData, DocumentStore};
use crate::database::Database;
use crate::error::{DbError, Result};
use crate::transaction::TransactionId;
use crate::wal::WalOp;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// State of the session's open transaction
pub(crate) struct ActiveTransaction {
    pub(crate) id: TransactionId,
    /// Working copies, by collection name
    pub(crate) collections: HashMap<String, CollectionData>,
    /// Catalog version of each collection when it was first touched
    pub(crate) base_versions: HashMap<String, u64>,
    /// Collections written to
    pub(crate) dirty: BTreeSet<String>,
    pub(crate) ops: Vec<WalOp>,
}

impl ActiveTransaction {
    fn new(id: TransactionId) -> Self {
        ActiveTransaction {
            id,
            collections: HashMap::new(),
            base_versions: HashMap::new(),
            dirty: BTreeSet::new(),
            ops: Vec::new(),
        }
    }

    fn working_copy(&mut self, db: &Database, name: &str) -> &mut CollectionData {
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let data = db
                    .snapshot_collection(name)
                    .unwrap_or_else(|| CollectionData::new(name));
                self.base_versions.insert(name.to_string(), data.version());
                entry.insert(data)
            }
        }
    }
}

/// Client session; holds at most one transaction at a time
pub struct Session {
    db: Database,
    id: u64,
    transaction: Mutex<Option<ActiveTransaction>>,
}

impl Session {
    pub(crate) fn new(db: Database, id: u64) -> Self {
        Session {
            db,
            id,
            transaction: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Collection handle bound to this session
    pub fn collection(&self, name: &str) -> Collection<'_, Session> {
        Collection::new(self, name)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.lock().is_some()
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.lock().as_ref().map(|txn| txn.id)
    }

    pub fn start_transaction(&self) -> Result<TransactionId> {
        let mut state = self.transaction.lock();
        if let Some(txn) = state.as_ref() {
            return Err(DbError::TransactionInProgress(txn.id));
        }

        let txn_id = self.db.transactions().begin(self.id);
        *state = Some(ActiveTransaction::new(txn_id));
        debug!(session = self.id, txn = txn_id, "transaction started");
        Ok(txn_id)
    }

    /// Publish every write of the transaction, or fail with a write
    /// conflict. Either way the transaction is over.
    pub fn commit_transaction(&self) -> Result<()> {
        let txn = self
            .transaction
            .lock()
            .take()
            .ok_or(DbError::NoActiveTransaction(self.id))?;
        self.db.commit_transaction(txn)
    }

    /// Discard every write of the transaction
    pub fn abort_transaction(&self) -> Result<()> {
        let txn = self
            .transaction
            .lock()
            .take()
            .ok_or(DbError::NoActiveTransaction(self.id))?;
        self.db.transactions().rollback(txn.id)?;
        debug!(session = self.id, txn = txn.id, ops = txn.ops.len(), "transaction aborted");
        Ok(())
    }

    /// Run `body` in a transaction: commit if it returns `Ok`, abort if it
    /// returns `Err`. The body's error is returned unchanged.
    pub fn with_transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        self.start_transaction()?;
        match body(self) {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(value)
            }
            Err(err) => {
                // A failed write has already aborted the transaction
                if !self.in_transaction() {
                    return Err(err);
                }
                if let Err(abort_err) = self.abort_transaction() {
                    warn!(session = self.id, error = %abort_err, "abort after failed transaction body");
                }
                Err(err)
            }
        }
    }
}

impl DocumentStore for Session {
    fn database_name(&self) -> &str {
        self.db.name()
    }

    fn read_collection<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&CollectionData) -> Result<T>,
    {
        let mut state = self.transaction.lock();
        if let Some(txn) = state.as_mut() {
            return f(txn.working_copy(&self.db, name));
        }
        drop(state);
        self.db.read_collection(name, f)
    }

    fn write_collection<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut CollectionData, &mut Vec<WalOp>) -> Result<T>,
    {
        let mut state = self.transaction.lock();
        if let Some(txn) = state.as_mut() {
            let mut ops = Vec::new();
            let result = f(txn.working_copy(&self.db, name), &mut ops);
            if result.is_err() {
                // The working copy may hold part of the failed write
                if let Some(txn) = state.take() {
                    match self.db.transactions().rollback(txn.id) {
                        Ok(_) => debug!(session = self.id, txn = txn.id, collection = name, "transaction aborted by failed write"),
                        Err(abort_err) => warn!(session = self.id, error = %abort_err, "abort after failed write"),
                    }
                }
                return result;
            }
            if !ops.is_empty() {
                txn.dirty.insert(name.to_string());
                txn.ops.append(&mut ops);
                self.db.transactions().track_write(txn.id, name)?;
            }
            return result;
        }
        drop(state);
        self.db.write_collection(name, f)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(txn) = self.transaction.get_mut().take() {
            if self.db.transactions().rollback(txn.id).is_ok() {
                debug!(session = self.id, txn = txn.id, "transaction aborted on session end");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("transaction", &self.transaction_id())
            .finish()
    }
}
