//! Shared constants and small helpers (spec.md §6.4).
//!
//! Mirrors the teacher's `common` module: a flat home for the size/bound
//! constants every other module needs, plus the byte-size helpers it
//! exposes (`KB`, `MB`).

/// Bytes in a kibibyte.
pub const KB: usize = 1 << 10;
/// Bytes in a mebibyte.
pub const MB: usize = 1 << 20;

/// Maximum key length, excluding the NUL terminator.
pub const MAX_KEY_LEN: usize = 255;
/// Key buffer size, including the NUL terminator.
pub const KEY_BUF_LEN: usize = MAX_KEY_LEN + 1;

/// Maximum value length, excluding the NUL terminator.
pub const MAX_VALUE_LEN: usize = 1023;
/// Value buffer size, including the NUL terminator.
pub const VALUE_BUF_LEN: usize = MAX_VALUE_LEN + 1;

/// Initial hash table size, in slots. Always a power of two.
pub const INITIAL_TABLE_SIZE: usize = 8192;
/// Hard ceiling on hash table size, in slots.
pub const MAX_TABLE_SIZE: usize = 10_000_000;
/// Multiplicative growth factor applied on resize.
pub const GROWTH_FACTOR: usize = 2;
/// Load factor at which an insert triggers a resize.
pub const RESIZE_LOAD_FACTOR: f64 = 0.6;
/// Load factor invariant that must hold after any successful insert-driven resize.
pub const MAX_LOAD_FACTOR: f64 = 0.7;
/// Bound on consecutive same-insert resizes, to prevent pathological resize loops.
pub const MAX_CONSECUTIVE_RESIZES: u32 = 3;

/// Fixed capacity of the entry pool.
pub const ENTRY_POOL_SIZE: usize = 1_000_000;

/// Size of one arena block.
pub const ARENA_BLOCK_SIZE: usize = 4 * MB;
/// Maximum number of arena blocks (64 MiB cap).
pub const ARENA_MAX_BLOCKS: usize = 16;

/// AOF compaction threshold.
pub const MAX_STORAGE_SIZE: u64 = MB as u64;
/// Default snapshot interval, in seconds.
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 300;

/// AOF file name.
pub const AOF_FILE_NAME: &str = "AytDB.aof";
/// AOF compaction temp file name.
pub const AOF_COMPACT_FILE_NAME: &str = "AytDB.aof.compact";
/// Snapshot file name.
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.db";
/// Snapshot temp file name.
pub const SNAPSHOT_TMP_FILE_NAME: &str = "snapshot.db.tmp";
/// Snapshot format header line.
pub const SNAPSHOT_HEADER: &str = "AYTDB_SNAPSHOT_V1";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default connection password.
pub const DEFAULT_PASSWORD: &str = "password";
/// Maximum number of concurrently-served TCP clients.
pub const MAX_CLIENTS: usize = 64;

/// Seconds since the Unix epoch, as used throughout for TTL bookkeeping.
#[inline(always)]
pub fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
