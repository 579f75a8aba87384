//! La Tienda - embedded document store
//!
//! In-process document database for the `la_tienda` retail store, with the
//! store's own commands built on top of it.
//!
//! # Architecture
//!
//! - Data Layer: self-describing documents keyed by `_id`, dotted field paths
//! - Query Layer: filters, update operators, aggregation pipelines, explain
//! - Index Layer: B-tree secondary indexes (compound, multikey, unique)
//! - Transaction Layer: sessions with optimistic multi-collection transactions
//! - Durability Layer: write-ahead log replayed on open, gzip backups
//! - Retail Layer: products, customers, sales and inventory exercises
//!
//! ```
//! use tienda_core::{doc, Database, Filter, Update};
//!
//! let db = Database::new("la_tienda");
//! let productos = db.collection("productos");
//! productos.insert_one(doc! { "_id" => 1, "nombre" => "Borojó fresco", "stock" => 30 })?;
//! productos.update_one(Filter::eq("_id", 1), Update::new().inc("stock", 10))?;
//! assert_eq!(productos.count_documents(Filter::gt("stock", 20))?, 1);
//! # Ok::<(), tienda_core::DbError>(())
//! ```

pub mod error;
pub mod types;
pub mod document;
pub mod config;

// Query modules
pub mod expr;
pub mod filter;
pub mod update;
pub mod cursor;
pub mod aggregation;
pub mod explain;

// Index module
pub mod index;

// Storage modules
pub mod collection;
pub mod database;
pub mod functions;
pub mod stats;

// Transaction modules
pub mod transaction;
pub mod session;
pub mod wal;

// Backup/restore module
pub mod backup;

// Retail exercises
pub mod retail;

pub use error::{DbError, Result};
pub use types::{ObjectId, Value};
pub use document::{Document, ID_FIELD};
pub use config::DatabaseConfig;

// Query exports
pub use expr::{CompareOp, DatePart, Expr};
pub use filter::{Condition, Filter, RegexMatcher};
pub use update::{Update, UpdateOp};
pub use cursor::{Cursor, FindOptions, SortSpec};
pub use aggregation::{Accumulator, Pipeline, ProjectField, Stage};
pub use explain::{ExecutionStats, Explain, PlanStage, QueryPlanner, Verbosity};

// Index exports
pub use index::{IndexKey, IndexModel, IndexStats, SortOrder};

// Storage exports
pub use collection::{
    Collection, CollectionData, DeleteResult, DocumentStore, Find, InsertManyResult, InsertOneResult,
    UpdateResult,
};
pub use database::Database;
pub use functions::{FunctionRegistry, StoredFunction};
pub use stats::{CollectionStats, DatabaseStats};

// Transaction exports
pub use transaction::{Transaction, TransactionId, TransactionManager, TransactionState, TransactionStats};
pub use session::Session;
pub use wal::{RecoveryResult, WalEntry, WalManager, WalOp, WalReader, WalWriter};

// Backup/restore exports
pub use backup::{BackupConfig, BackupManager, BackupMetadata};
