//! TTL reaper (spec.md §4.D).
//!
//! A background `std::thread` that periodically walks the table and evicts
//! expired entries, cooperating with foreground mutators by releasing and
//! reacquiring the table lock every `yield_every` evictions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::table::Table;

const EVICTION_YIELD_BATCH: usize = 1000;

/// Handle to the background reaper thread. `Drop` stops and joins it
/// (matching spec.md's "a shared `running` flag is set false by `cleanup`;
/// the worker observes it at the top of each tick. Join is synchronous.");
/// call `stop()` directly to do the same thing earlier than scope exit.
pub struct Reaper {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Spawn the reaper loop against `table`, ticking every `interval`.
    pub fn start(table: Arc<Table>, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_worker = running.clone();

        let handle = thread::spawn(move || {
            while running_worker.load(Ordering::Relaxed) {
                thread::sleep(interval);
                if !running_worker.load(Ordering::Relaxed) {
                    break;
                }
                let evicted = table.purge_expired(EVICTION_YIELD_BATCH);
                if evicted > 0 {
                    debug!(evicted, "reaper evicted expired entries");
                }
            }
        });

        Reaper {
            running,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and join it synchronously.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::Arena;
    use crate::common::ARENA_BLOCK_SIZE;
    use crate::pool::EntryPool;

    #[test]
    fn reaper_evicts_expired_entries_on_tick() {
        let arena = Arc::new(Arena::with_config(ARENA_BLOCK_SIZE, 16));
        let pool = Arc::new(EntryPool::init(&arena, 64).unwrap());
        let table = Arc::new(Table::with_config(64, 1024, pool, arena));

        table.set_with_ttl(b"k", b"v", 1).unwrap();
        assert_eq!(table.count(), 1);

        // Force the entry into the past without sleeping for real time:
        // reinsert with a ttl of 1s, then wait just past it using a short
        // tick interval on the reaper.
        let mut reaper = Reaper::start(table.clone(), Duration::from_millis(20));
        thread::sleep(Duration::from_millis(1200));
        reaper.stop();

        // Checked via `count()` (no lock-taking side effect) so this
        // actually proves the reaper evicted the entry, rather than `get`'s
        // own inline-expiry path doing the work.
        assert_eq!(table.count(), 0);
        assert_eq!(table.get(b"k"), None);
    }
}
