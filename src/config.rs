//! Configuration (ambient stack — SPEC_FULL.md §10).
//!
//! Mirrors vsdb's own configuration shape (`common::vsdb_set_base_dir` /
//! `VSDB_BASE_DIR`): a plain value type built either by hand or from the
//! environment, with no implicit global state in the library itself. The
//! two binaries additionally support an optional TOML file on disk.

use std::path::PathBuf;

use serde::Deserialize;

use crate::common::DEFAULT_SNAPSHOT_INTERVAL_SECS;
use crate::persistence::PersistenceMode;

/// Library-facing configuration. Never read from the environment by the
/// core itself — only the binaries do that, via [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub persistence: PersistenceMode,
    pub snapshot_interval_secs: u64,
    pub initial_table_size: usize,
    pub max_table_size: usize,
    pub entry_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("."),
            persistence: PersistenceMode::Aof,
            snapshot_interval_secs: DEFAULT_SNAPSHOT_INTERVAL_SECS,
            initial_table_size: crate::common::INITIAL_TABLE_SIZE,
            max_table_size: crate::common::MAX_TABLE_SIZE,
            entry_pool_size: crate::common::ENTRY_POOL_SIZE,
        }
    }
}

/// Shape of the optional on-disk TOML config file for the binaries.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub data_dir: Option<String>,
    pub persistence: Option<String>,
    pub snapshot_interval_secs: Option<u64>,
    pub password: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    /// Build a `Config` from `AYTDB_*` environment variables, falling back
    /// to defaults for anything unset. Used only by the binaries.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(dir) = std::env::var("AYTDB_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(mode) = std::env::var("AYTDB_PERSISTENCE") {
            if let Some(parsed) = PersistenceMode::parse(&mode) {
                cfg.persistence = parsed;
            }
        }
        if let Ok(secs) = std::env::var("AYTDB_SNAPSHOT_INTERVAL") {
            if let Ok(secs) = secs.parse() {
                cfg.snapshot_interval_secs = secs;
            }
        }

        cfg
    }

    /// Overlay a parsed TOML config file on top of `self`.
    pub fn merge_file(mut self, file: ConfigFile) -> Self {
        if let Some(dir) = file.data_dir {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(mode) = file.persistence.as_deref().and_then(PersistenceMode::parse) {
            self.persistence = mode;
        }
        if let Some(secs) = file.snapshot_interval_secs {
            self.snapshot_interval_secs = secs;
        }
        self
    }

    pub fn load_toml_file(path: &std::path::Path) -> std::io::Result<ConfigFile> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_uses_aof() {
        let cfg = Config::default();
        assert!(matches!(cfg.persistence, PersistenceMode::Aof));
    }

    #[test]
    fn merge_file_overrides_defaults() {
        let cfg = Config::default().merge_file(ConfigFile {
            data_dir: Some("/tmp/aytdb-test".into()),
            persistence: Some("snapshot".into()),
            snapshot_interval_secs: Some(42),
            password: None,
            port: None,
        });
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/aytdb-test"));
        assert!(matches!(cfg.persistence, PersistenceMode::Snapshot));
        assert_eq!(cfg.snapshot_interval_secs, 42);
    }
}
