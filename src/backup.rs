//! Backup and Restore
//!
//! Full snapshots of a database written to a backup directory.
//! - Each backup is one JSON file holding every collection, its index
//!   specifications and its documents in extended JSON
//! - Compression: optional gzip
//! - Verification: SHA-256 checksum kept in a `.meta` file next to it

use crate::collection::CollectionData;
use crate::database::Database;
use crate::document::Document;
use crate::error::{DbError, Result};
use crate::index::IndexModel;
use crate::transaction::current_millis;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing::info;

/// Backup metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_id: String,
    pub database: String,
    /// Milliseconds since the epoch
    pub timestamp: u64,
    pub collection_count: usize,
    pub document_count: usize,
    pub compressed: bool,
    pub checksum: String,
}

/// Backup configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    pub compress: bool,
    /// Check the checksum before restoring
    pub verify: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            backup_dir: PathBuf::from("./backups"),
            compress: true,
            verify: true,
        }
    }
}

/// Backup manager
pub struct BackupManager {
    config: BackupConfig,
    last_backup_id: Option<String>,
}

impl BackupManager {
    pub fn new(config: BackupConfig) -> Result<Self> {
        create_dir_all(&config.backup_dir)
            .map_err(|e| DbError::Backup(format!("failed to create backup directory: {}", e)))?;

        Ok(BackupManager {
            config,
            last_backup_id: None,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(BackupConfig::default())
    }

    pub fn last_backup_id(&self) -> Option<&str> {
        self.last_backup_id.as_deref()
    }

    /// Snapshot every collection of `db`
    pub fn create_full_backup(&mut self, db: &Database) -> Result<BackupMetadata> {
        let backup_id = self.generate_backup_id();

        let backup_data = BackupData {
            database: db.name().to_string(),
            collections: db
                .snapshot()
                .iter()
                .map(SerializedCollection::from_collection)
                .collect(),
        };

        let serialized = serde_json::to_string(&backup_data)?;
        let checksum = calculate_checksum(&serialized);

        let mut file = File::create(self.get_backup_path(&backup_id))?;
        if self.config.compress {
            file.write_all(&compress_data(serialized.as_bytes())?)?;
        } else {
            file.write_all(serialized.as_bytes())?;
        }

        let metadata = BackupMetadata {
            backup_id: backup_id.clone(),
            database: backup_data.database.clone(),
            timestamp: current_millis(),
            collection_count: backup_data.collections.len(),
            document_count: backup_data.collections.iter().map(|c| c.documents.len()).sum(),
            compressed: self.config.compress,
            checksum,
        };
        self.save_metadata(&metadata)?;

        info!(
            backup = %backup_id,
            collections = metadata.collection_count,
            documents = metadata.document_count,
            "backup created"
        );
        self.last_backup_id = Some(backup_id);
        Ok(metadata)
    }

    /// Replace the contents of `db` with a backup
    pub fn restore_backup(&self, backup_id: &str, db: &Database) -> Result<()> {
        let metadata = self.load_metadata(backup_id)?;
        let serialized = self.read_backup(&metadata)?;

        if self.config.verify && calculate_checksum(&serialized) != metadata.checksum {
            return Err(DbError::Backup(format!(
                "checksum mismatch in backup {}, data may be corrupted",
                backup_id
            )));
        }

        let backup_data: BackupData = serde_json::from_str(&serialized)?;
        let collections = backup_data
            .collections
            .into_iter()
            .map(SerializedCollection::into_collection)
            .collect::<Result<Vec<_>>>()?;

        db.replace_all(collections)?;
        info!(backup = backup_id, database = db.name(), "backup restored");
        Ok(())
    }

    /// All backups, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        let mut backups = Vec::new();

        for entry in std::fs::read_dir(&self.config.backup_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("meta") {
                continue;
            }
            let Some(backup_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(metadata) = self.load_metadata(backup_id) {
                backups.push(metadata);
            }
        }

        backups.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.backup_id.cmp(&a.backup_id))
        });
        Ok(backups)
    }

    pub fn delete_backup(&self, backup_id: &str) -> Result<()> {
        std::fs::remove_file(self.get_backup_path(backup_id))?;
        std::fs::remove_file(self.get_metadata_path(backup_id))?;
        Ok(())
    }

    /// Recompute the checksum of a stored backup
    pub fn verify_backup(&self, backup_id: &str) -> Result<bool> {
        let metadata = self.load_metadata(backup_id)?;
        let serialized = self.read_backup(&metadata)?;
        Ok(calculate_checksum(&serialized) == metadata.checksum)
    }

    fn read_backup(&self, metadata: &BackupMetadata) -> Result<String> {
        let mut buffer = Vec::new();
        File::open(self.get_backup_path(&metadata.backup_id))?.read_to_end(&mut buffer)?;

        let data = if metadata.compressed {
            decompress_data(&buffer)?
        } else {
            buffer
        };
        String::from_utf8(data).map_err(|e| DbError::Backup(format!("invalid UTF-8 in backup: {}", e)))
    }

    // Millisecond ids, nudged forward when two backups land in the same one
    fn generate_backup_id(&self) -> String {
        let mut timestamp = current_millis();
        loop {
            let id = format!("backup_{}", timestamp);
            if !self.get_metadata_path(&id).exists() {
                return id;
            }
            timestamp += 1;
        }
    }

    fn get_backup_path(&self, backup_id: &str) -> PathBuf {
        self.config.backup_dir.join(format!("{}.backup", backup_id))
    }

    fn get_metadata_path(&self, backup_id: &str) -> PathBuf {
        self.config.backup_dir.join(format!("{}.meta", backup_id))
    }

    fn save_metadata(&self, metadata: &BackupMetadata) -> Result<()> {
        let serialized = serde_json::to_string_pretty(metadata)?;
        std::fs::write(self.get_metadata_path(&metadata.backup_id), serialized)?;
        Ok(())
    }

    fn load_metadata(&self, backup_id: &str) -> Result<BackupMetadata> {
        let path = self.get_metadata_path(backup_id);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| DbError::Backup(format!("no metadata for backup {}: {}", backup_id, e)))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupData {
    database: String,
    collections: Vec<SerializedCollection>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedCollection {
    name: String,
    indexes: Vec<IndexModel>,
    /// Extended JSON
    documents: Vec<serde_json::Value>,
}

impl SerializedCollection {
    fn from_collection(data: &CollectionData) -> Self {
        SerializedCollection {
            name: data.name().to_string(),
            indexes: data.indexes()[1..]
                .iter()
                .map(|index| IndexModel {
                    name: Some(index.name.clone()),
                    ..index.model.clone()
                })
                .collect(),
            documents: data.documents().map(Document::to_json).collect(),
        }
    }

    fn into_collection(self) -> Result<CollectionData> {
        let mut data = CollectionData::new(self.name);
        for model in self.indexes {
            data.create_index(model)?;
        }
        for json in self.documents {
            data.insert(Document::from_json(json)?)?;
        }
        Ok(data)
    }
}

fn calculate_checksum(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn compress_data(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress_data(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;

    let mut decoder = GzDecoder::new(data);
    let mut result = Vec::new();
    decoder.read_to_end(&mut result)?;
    Ok(result)
}
