//! Database handle
//!
//! A [`Database`] owns the catalog of collections, the transaction manager,
//! the stored-function registry and, when configured with a data directory,
//! the write-ahead log. Handles are cheap to clone and safe to share across
//! threads; all clones see the same data.

use crate::collection::{Collection, CollectionData, DocumentStore};
use crate::config::DatabaseConfig;
use crate::error::{DbError, Result};
use crate::functions::FunctionRegistry;
use crate::session::{ActiveTransaction, Session};
use crate::stats::{CollectionStats, DatabaseStats};
use crate::transaction::{current_millis, TransactionManager};
use crate::types::Value;
use crate::wal::{self, WalManager, WalOp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Catalog = HashMap<String, CollectionData>;

struct DatabaseInner {
    config: DatabaseConfig,
    catalog: RwLock<Catalog>,
    transactions: TransactionManager,
    functions: FunctionRegistry,
    wal: Option<WalManager>,
    next_session_id: AtomicU64,
    started_at: u64,
}

/// Shared handle to one database
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// In-memory database
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(DatabaseConfig::new(name), Catalog::new(), None)
    }

    /// Open a database; with a data directory, replays its write-ahead log
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let Some(path) = config.wal_path() else {
            return Ok(Self::build(config, Catalog::new(), None));
        };
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
        }

        let mut catalog = Catalog::new();
        let mut last_txn_id = 0;

        let has_log = std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        if has_log {
            let recovery = wal::recover_file(&path)?;
            let applied = recovery.committed.len();
            let op_count = recovery.committed_ops();
            last_txn_id = recovery.max_txn_id;

            for (txn_id, ops) in recovery.committed {
                for op in ops {
                    let name = op.collection().to_string();
                    let data = catalog
                        .entry(name.clone())
                        .or_insert_with(|| CollectionData::new(&name));
                    if let Err(e) = data.apply_op(op) {
                        warn!(txn = txn_id, collection = %name, error = %e, "skipping log record that no longer applies");
                    }
                }
            }

            let file_len = std::fs::metadata(&path)?.len();
            if file_len > recovery.valid_len {
                warn!(
                    bytes = file_len - recovery.valid_len,
                    "truncating torn tail of write-ahead log"
                );
                std::fs::OpenOptions::new()
                    .write(true)
                    .open(&path)?
                    .set_len(recovery.valid_len)?;
            }

            if !recovery.incomplete.is_empty() {
                warn!(
                    count = recovery.incomplete.len(),
                    "discarded transactions without a commit record"
                );
            }
            info!(
                path = %path.display(),
                transactions = applied,
                operations = op_count,
                "replayed write-ahead log"
            );
        }

        let wal = WalManager::new(&path, config.sync_on_commit)?;
        let db = Self::build(config, catalog, Some(wal));
        db.inner.transactions.advance_past(last_txn_id);
        Ok(db)
    }

    fn build(config: DatabaseConfig, catalog: Catalog, wal: Option<WalManager>) -> Self {
        Database {
            inner: Arc::new(DatabaseInner {
                config,
                catalog: RwLock::new(catalog),
                transactions: TransactionManager::new(),
                functions: FunctionRegistry::new(),
                wal,
                next_session_id: AtomicU64::new(1),
                started_at: current_millis(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Auto-commit handle to a collection; it is created on first write
    pub fn collection(&self, name: &str) -> Collection<'_, Database> {
        Collection::new(self, name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.catalog.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn start_session(&self) -> Session {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        Session::new(self.clone(), id)
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.inner.functions
    }

    /// Store a function under `name`, replacing any previous one
    pub fn register_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&Database, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.inner.functions.register(name.clone(), function) {
            debug!(function = %name, "replaced stored function");
        } else {
            debug!(function = %name, "registered stored function");
        }
    }

    pub fn call_function(&self, name: &str, args: &[Value]) -> Result<Value> {
        let function = self.inner.functions.get(name)?;
        debug!(function = name, args = args.len(), "calling stored function");
        function(self, args)
    }

    pub fn remove_function(&self, name: &str) -> bool {
        self.inner.functions.remove(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        self.inner.functions.names()
    }

    pub fn stats(&self) -> DatabaseStats {
        let catalog = self.inner.catalog.read();
        let mut collections: Vec<CollectionStats> = catalog
            .values()
            .map(|data| CollectionStats {
                name: data.name().to_string(),
                documents: data.len(),
                indexes: data.indexes().iter().map(|i| i.stats()).collect(),
                version: data.version(),
            })
            .collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));

        DatabaseStats {
            name: self.name().to_string(),
            total_documents: collections.iter().map(|c| c.documents).sum(),
            total_indexes: collections.iter().map(|c| c.indexes.len()).sum(),
            collections,
            transactions: self.inner.transactions.stats(),
            stored_functions: self.function_names(),
            wal_path: self
                .inner
                .wal
                .as_ref()
                .map(|w| w.path().display().to_string()),
            uptime_seconds: current_millis().saturating_sub(self.inner.started_at) / 1000,
        }
    }

    /// Copy of one collection, as a transaction's starting point
    pub(crate) fn snapshot_collection(&self, name: &str) -> Option<CollectionData> {
        self.inner.catalog.read().get(name).cloned()
    }

    /// Copy of every collection, in name order
    pub(crate) fn snapshot(&self) -> Vec<CollectionData> {
        let catalog = self.inner.catalog.read();
        let mut collections: Vec<CollectionData> = catalog.values().cloned().collect();
        collections.sort_by(|a, b| a.name().cmp(b.name()));
        collections
    }

    /// Replace the whole catalog, logging the change as one transaction
    pub(crate) fn replace_all(&self, collections: Vec<CollectionData>) -> Result<()> {
        let mut catalog = self.inner.catalog.write();

        if let Some(wal) = &self.inner.wal {
            let mut ops = Vec::new();
            for data in catalog.values() {
                for doc in data.documents() {
                    if let Some(id) = doc.id() {
                        ops.push(WalOp::Delete {
                            collection: data.name().to_string(),
                            id: id.clone(),
                        });
                    }
                }
                for index in &data.indexes()[1..] {
                    ops.push(WalOp::DropIndex {
                        collection: data.name().to_string(),
                        name: index.name.clone(),
                    });
                }
            }
            for data in &collections {
                for model in data.index_models() {
                    ops.push(WalOp::CreateIndex {
                        collection: data.name().to_string(),
                        model,
                    });
                }
                for doc in data.documents() {
                    ops.push(WalOp::Insert {
                        collection: data.name().to_string(),
                        document: doc.clone(),
                    });
                }
            }
            wal.log_transaction(self.inner.transactions.allocate_id(), &ops)?;
        }

        let previous = std::mem::take(&mut *catalog);
        for mut data in collections {
            if let Some(old) = previous.get(data.name()) {
                data.bump_version_past(old.version());
            }
            catalog.insert(data.name().to_string(), data);
        }
        info!(collections = catalog.len(), "replaced database contents");
        Ok(())
    }

    /// Validate and publish a session transaction
    pub(crate) fn commit_transaction(&self, txn: ActiveTransaction) -> Result<()> {
        let txn_id = txn.id;
        match self.publish(txn) {
            Ok(changed) => {
                self.inner.transactions.commit(txn_id)?;
                info!(txn = txn_id, collections = changed, "transaction committed");
                Ok(())
            }
            Err(e) => {
                if let DbError::WriteConflict(collection) = &e {
                    self.inner.transactions.record_conflict();
                    warn!(txn = txn_id, collection = %collection, "write conflict, transaction aborted");
                }
                self.inner.transactions.rollback(txn_id)?;
                Err(e)
            }
        }
    }

    fn publish(&self, mut txn: ActiveTransaction) -> Result<usize> {
        let mut catalog = self.inner.catalog.write();

        for name in &txn.dirty {
            let current = catalog.get(name).map(|c| c.version()).unwrap_or(0);
            let base = txn.base_versions.get(name).copied().unwrap_or(0);
            if current != base {
                return Err(DbError::WriteConflict(name.clone()));
            }
        }

        if let Some(wal) = &self.inner.wal {
            if !txn.ops.is_empty() {
                wal.log_transaction(txn.id, &txn.ops)?;
            }
        }

        let mut changed = 0;
        for name in std::mem::take(&mut txn.dirty) {
            if let Some(data) = txn.collections.remove(&name) {
                catalog.insert(name, data);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

impl DocumentStore for Database {
    fn database_name(&self) -> &str {
        self.name()
    }

    fn read_collection<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&CollectionData) -> Result<T>,
    {
        let catalog = self.inner.catalog.read();
        match catalog.get(name) {
            Some(data) => f(data),
            None => f(&CollectionData::new(name)),
        }
    }

    fn write_collection<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut CollectionData, &mut Vec<WalOp>) -> Result<T>,
    {
        let mut catalog = self.inner.catalog.write();
        let created = !catalog.contains_key(name);
        let data = catalog
            .entry(name.to_string())
            .or_insert_with(|| CollectionData::new(name));

        let mut ops = Vec::new();
        let result = f(data, &mut ops);

        if ops.is_empty() {
            if created {
                catalog.remove(name);
            }
            return result;
        }

        // Logged while the write lock is still held
        if let Some(wal) = &self.inner.wal {
            wal.log_transaction(self.inner.transactions.allocate_id(), &ops)?;
        }
        result
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("collections", &self.collection_names())
            .field("persistent", &self.inner.wal.is_some())
            .finish()
    }
}
