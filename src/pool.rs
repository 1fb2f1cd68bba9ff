//! Fixed-capacity entry pool (spec.md §4.B).
//!
//! Handles are plain `usize` indices rather than pointers — spec.md's
//! Design Notes (§9) explicitly sanction this ("the pool's free-list is an
//! array of indices, not pointers, so recycling is trivially cycle-free"),
//! and it is the natural, allocation-free way to express a fixed slot table
//! in safe Rust.

use parking_lot::Mutex;

use crate::arena::Arena;
use crate::common::{ENTRY_POOL_SIZE, KEY_BUF_LEN, VALUE_BUF_LEN};
use crate::error::{Result, StoreError};

/// A single cache-line-aligned slot (spec.md §3: "An entry is
/// cache-line-aligned").
#[repr(align(64))]
#[derive(Clone, Copy)]
pub struct Entry {
    pub in_use: bool,
    pub hash: u32,
    pub expire_at: u64,
    key_len: u16,
    value_len: u16,
    key: [u8; KEY_BUF_LEN],
    value: [u8; VALUE_BUF_LEN],
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            in_use: false,
            hash: 0,
            expire_at: 0,
            key_len: 0,
            value_len: 0,
            key: [0u8; KEY_BUF_LEN],
            value: [0u8; VALUE_BUF_LEN],
        }
    }
}

impl Entry {
    pub fn key(&self) -> &[u8] {
        &self.key[..self.key_len as usize]
    }

    pub fn value(&self) -> &[u8] {
        &self.value[..self.value_len as usize]
    }

    /// Overwrite the key bytes with explicit NUL termination, as
    /// `kv_store.c`'s `set` does.
    fn set_key(&mut self, key: &[u8]) {
        self.key[..key.len()].copy_from_slice(key);
        self.key[key.len()] = 0;
        self.key_len = key.len() as u16;
    }

    /// Overwrite the value bytes with explicit NUL termination.
    pub fn set_value(&mut self, value: &[u8]) {
        self.value[..value.len()].copy_from_slice(value);
        self.value[value.len()] = 0;
        self.value_len = value.len() as u16;
    }

    fn reset(&mut self) {
        *self = Entry::default();
    }

    fn occupy(&mut self, key: &[u8], value: &[u8], hash: u32, expire_at: u64) {
        self.reset();
        self.set_key(key);
        self.set_value(value);
        self.hash = hash;
        self.expire_at = expire_at;
        self.in_use = true;
    }
}

struct PoolState {
    entries: Vec<Entry>,
    free_stack: Vec<usize>,
    used: usize,
}

/// Fixed-capacity object pool the hash table draws entries from.
pub struct EntryPool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl EntryPool {
    /// Allocate the entry array and free-index stack from `arena`, zeroing
    /// the entry array, per spec.md §4.B.
    pub fn init(arena: &Arena, capacity: usize) -> Result<Self> {
        let entries: Vec<Entry> = arena.alloc_vec(capacity)?;
        // The free-index stack starts empty (allocation prefers the bump
        // cursor until the first entry is freed); we still account for its
        // eventual worst-case footprint against the arena up front, as
        // `kv_store.c`'s `pool_init` does for both arrays in one call.
        arena.alloc(capacity * std::mem::size_of::<usize>())?;

        Ok(EntryPool {
            state: Mutex::new(PoolState {
                entries,
                free_stack: Vec::new(),
                used: 0,
            }),
            capacity,
        })
    }

    pub fn with_default_capacity(arena: &Arena) -> Result<Self> {
        Self::init(arena, ENTRY_POOL_SIZE)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claim a slot for a fresh occupant. Prefers the free stack, else
    /// bumps the high-water mark; returns `PoolExhausted` otherwise.
    pub fn alloc(&self, key: &[u8], value: &[u8], hash: u32, expire_at: u64) -> Result<usize> {
        let mut state = self.state.lock();
        let idx = if let Some(idx) = state.free_stack.pop() {
            idx
        } else if state.used < self.capacity {
            let idx = state.used;
            state.used += 1;
            idx
        } else {
            return Err(StoreError::PoolExhausted);
        };
        state.entries[idx].occupy(key, value, hash, expire_at);
        Ok(idx)
    }

    pub fn free(&self, idx: usize) {
        let mut state = self.state.lock();
        state.entries[idx].reset();
        state.free_stack.push(idx);
    }

    /// Run `f` against the entry at `idx` under the pool lock.
    pub fn with_entry<R>(&self, idx: usize, f: impl FnOnce(&Entry) -> R) -> R {
        let state = self.state.lock();
        f(&state.entries[idx])
    }

    /// Run `f` against the entry at `idx` under the pool lock, mutably.
    pub fn with_entry_mut<R>(&self, idx: usize, f: impl FnOnce(&mut Entry) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state.entries[idx])
    }

    pub fn used(&self) -> usize {
        self.state.lock().used
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::ARENA_BLOCK_SIZE;

    fn pool(capacity: usize) -> EntryPool {
        let arena = Arena::with_config(ARENA_BLOCK_SIZE, 16);
        EntryPool::init(&arena, capacity).unwrap()
    }

    #[test]
    fn alloc_bumps_then_reuses_freed_slots() {
        let pool = pool(4);
        let a = pool.alloc(b"a", b"1", 1, 0).unwrap();
        let b = pool.alloc(b"b", b"2", 2, 0).unwrap();
        assert_ne!(a, b);
        pool.free(a);
        let c = pool.alloc(b"c", b"3", 3, 0).unwrap();
        assert_eq!(c, a, "freed slot should be reused before bumping further");
    }

    #[test]
    fn exhausted_pool_reports_error() {
        let pool = pool(1);
        pool.alloc(b"a", b"1", 1, 0).unwrap();
        let err = pool.alloc(b"b", b"2", 2, 0).unwrap_err();
        assert!(matches!(err, StoreError::PoolExhausted));
    }

    #[test]
    fn entries_round_trip_key_and_value() {
        let pool = pool(2);
        let idx = pool.alloc(b"hello", b"world", 42, 0).unwrap();
        pool.with_entry(idx, |e| {
            assert_eq!(e.key(), b"hello");
            assert_eq!(e.value(), b"world");
            assert_eq!(e.hash, 42);
            assert!(e.in_use);
        });
    }

    #[test]
    fn free_clears_in_use() {
        let pool = pool(1);
        let idx = pool.alloc(b"k", b"v", 1, 0).unwrap();
        pool.free(idx);
        pool.with_entry(idx, |e| assert!(!e.in_use));
    }
}
