//! Database configuration

use std::path::{Path, PathBuf};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database name, used in namespaces (`la_tienda.productos`) and the log file name
    pub name: String,
    /// Directory for the write-ahead log; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// fsync the log on every commit
    pub sync_on_commit: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            name: "la_tienda".to_string(),
            data_dir: None,
            sync_on_commit: true,
        }
    }
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>) -> Self {
        DatabaseConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Log file location, when persistence is enabled
    pub fn wal_path(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.wal", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.name, "la_tienda");
        assert!(config.wal_path().is_none());
        assert!(config.sync_on_commit);
    }

    #[test]
    fn test_wal_path() {
        let config = DatabaseConfig::new("pruebas")
            .with_data_dir("/var/lib/tienda")
            .with_sync_on_commit(false);
        assert_eq!(config.wal_path(), Some(PathBuf::from("/var/lib/tienda/pruebas.wal")));
        assert!(!config.sync_on_commit);
    }
}
