//! Persistence engine (spec.md §4.E): two interchangeable durability
//! strategies sharing one contract — "reconstitute the table via
//! `set_with_ttl` at load time" — mirroring vsdb's `Engine` trait
//! (`common/engines/mod.rs`), which lets swappable storage backends
//! (rocksdb/sled/...) sit behind one shape.

pub mod aof;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::Table;

/// Which durability strategy is active for a given deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistenceMode {
    /// Append-only command log with size-triggered compaction.
    Aof,
    /// Atomically-replaced textual snapshot with periodic background writes.
    Snapshot,
}

impl PersistenceMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aof" => Some(PersistenceMode::Aof),
            "snapshot" | "rdb" => Some(PersistenceMode::Snapshot),
            _ => None,
        }
    }
}

/// Shared behavior both strategies implement: load a table from disk at
/// startup, and durably record live mutations as they happen (or on a
/// schedule, for snapshots).
pub trait Persistence: Send + Sync {
    /// Replay/deserialize the file on disk into `table`. Suppresses its own
    /// write path while doing so (spec.md §4.E.i: "the logging flag is
    /// suppressed so that replay does not itself write to the log").
    fn load(&self, table: &Arc<Table>) -> Result<()>;

    /// Record a `set`/`set_with_ttl` for durability.
    fn record_set(&self, key: &[u8], value: &[u8], ttl: u64) -> Result<()>;

    /// Record a `del` for durability.
    fn record_del(&self, key: &[u8]) -> Result<()>;

    /// The `compact`/`save` command: for AOF this compacts the log, for
    /// snapshots this is "take a snapshot immediately" (spec.md §4.E.ii).
    fn compact(&self, table: &Arc<Table>) -> Result<()>;
}

pub(crate) fn atomic_rename(tmp: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::rename(tmp, dest)
}
