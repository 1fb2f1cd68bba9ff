//! Typed error kinds for the core (spec.md §7).
//!
//! Replaces the original C code's `int`/`bool` return-code convention with
//! a tagged result value, as called for in spec.md's Design Notes (§9).

use thiserror::Error;

/// Every error kind the core distinguishes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Null/oversized key or value, or a malformed wire command.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The entry pool has no free or un-bumped slots left.
    #[error("entry pool exhausted")]
    PoolExhausted,

    /// The arena could not account for a requested allocation.
    #[error("arena exhausted")]
    ArenaExhausted,

    /// A persistence write, rename, or flush failed.
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot or AOF file failed validation during load.
    #[error("corrupt persistence file: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
