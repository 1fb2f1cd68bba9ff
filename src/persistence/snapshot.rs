//! Textual snapshot persistence (spec.md §4.E.ii, §6.2).

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::common::{now_secs, SNAPSHOT_FILE_NAME, SNAPSHOT_HEADER, SNAPSHOT_TMP_FILE_NAME};
use crate::error::{Result, StoreError};
use crate::persistence::{atomic_rename, Persistence};
use crate::table::Table;

/// Full-duplex I/O buffer size for snapshot writes (spec.md §4.E.ii: "a
/// full-duplex I/O buffer (≥32 KiB)").
const SNAPSHOT_BUF_SIZE: usize = 32 * 1024;

pub struct SnapshotPersistence {
    path: PathBuf,
    tmp_path: PathBuf,
    write_lock: Mutex<()>,
    interval_secs: AtomicU64,
}

impl SnapshotPersistence {
    pub fn new(data_dir: impl AsRef<Path>, interval_secs: u64) -> Self {
        let dir = data_dir.as_ref();
        SnapshotPersistence {
            path: dir.join(SNAPSHOT_FILE_NAME),
            tmp_path: dir.join(SNAPSHOT_TMP_FILE_NAME),
            write_lock: Mutex::new(()),
            interval_secs: AtomicU64::new(interval_secs),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.load(Ordering::Relaxed)
    }

    /// `interval <seconds>` reschedules the background worker with a new
    /// period (spec.md §6.3).
    pub fn set_interval_secs(&self, secs: u64) {
        self.interval_secs.store(secs, Ordering::Relaxed);
    }

    pub fn save(&self, table: &Arc<Table>) -> Result<()> {
        let _guard = self.write_lock.lock();

        // Collecting the live set happens in one lock-held pass inside
        // `Table::snapshot_live_entries`, so the dump reflects one
        // consistent point in time as spec.md §4.E.ii requires.
        let entries = table.snapshot_live_entries();

        {
            let f = File::create(&self.tmp_path)?;
            let mut w = BufWriter::with_capacity(SNAPSHOT_BUF_SIZE, f);
            writeln!(w, "{SNAPSHOT_HEADER}")?;
            writeln!(w, "TIME:{}", now_secs())?;
            writeln!(w, "ENTRIES:{}", entries.len())?;
            writeln!(w, "---")?;
            for (key, value, ttl) in &entries {
                writeln!(w, "KEY:{}", String::from_utf8_lossy(key))?;
                writeln!(w, "VALUE:{}", String::from_utf8_lossy(value))?;
                writeln!(w, "TTL:{ttl}")?;
                writeln!(w, "---")?;
            }
            w.flush()?;
        }

        atomic_rename(&self.tmp_path, &self.path)?;
        info!(entries = entries.len(), path = %self.path.display(), "snapshot written");
        Ok(())
    }
}

/// Background worker that calls [`SnapshotPersistence::save`] on a
/// schedule it re-reads from the persistence object every tick, so the
/// `interval` command (spec.md §6.3) takes effect on the next tick rather
/// than requiring the thread itself to be torn down and respawned.
const SNAPSHOT_WORKER_TICK: Duration = Duration::from_secs(1);

pub struct SnapshotWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotWorker {
    pub fn start(table: Arc<Table>, persistence: Arc<SnapshotPersistence>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_worker = running.clone();

        let handle = thread::spawn(move || {
            let mut elapsed = Duration::ZERO;
            while running_worker.load(Ordering::Relaxed) {
                thread::sleep(SNAPSHOT_WORKER_TICK);
                if !running_worker.load(Ordering::Relaxed) {
                    break;
                }
                elapsed += SNAPSHOT_WORKER_TICK;
                let target = Duration::from_secs(persistence.interval_secs());
                if elapsed < target {
                    continue;
                }
                elapsed = Duration::ZERO;
                match persistence.save(&table) {
                    Ok(()) => debug!("periodic snapshot written"),
                    Err(e) => error!(error = %e, "periodic snapshot failed"),
                }
            }
        });

        SnapshotWorker {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SnapshotWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Block {
    key: Option<String>,
    value: Option<String>,
    ttl: Option<u64>,
}

impl Block {
    fn empty() -> Self {
        Block {
            key: None,
            value: None,
            ttl: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.key.is_some() && self.value.is_some() && self.ttl.is_some()
    }
}

impl Persistence for SnapshotPersistence {
    fn load(&self, table: &Arc<Table>) -> Result<()> {
        let Ok(f) = File::open(&self.path) else {
            return Ok(());
        };
        let mut lines = BufReader::new(f).lines();

        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| StoreError::Corrupt("empty snapshot file".into()))?;
        if header.trim_end() != SNAPSHOT_HEADER {
            return Err(StoreError::Corrupt(format!(
                "bad snapshot header: {header:?}"
            )));
        }

        let time_line = lines
            .next()
            .transpose()?
            .ok_or_else(|| StoreError::Corrupt("missing TIME line".into()))?;
        if !time_line.starts_with("TIME:") {
            return Err(StoreError::Corrupt(format!(
                "expected TIME line, got {time_line:?}"
            )));
        }

        let entries_line = lines
            .next()
            .transpose()?
            .ok_or_else(|| StoreError::Corrupt("missing ENTRIES line".into()))?;
        let declared: usize = entries_line
            .strip_prefix("ENTRIES:")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::Corrupt(format!("bad ENTRIES line: {entries_line:?}")))?;

        let separator = lines
            .next()
            .transpose()?
            .ok_or_else(|| StoreError::Corrupt("missing header separator".into()))?;
        if separator.trim_end() != "---" {
            return Err(StoreError::Corrupt("missing header separator".into()));
        }

        let mut loaded = 0usize;
        let mut block = Block::empty();
        for line in lines {
            let line = line?;
            if line.trim_end() == "---" {
                if block.is_complete() {
                    let key = block.key.take().unwrap();
                    let value = block.value.take().unwrap();
                    let ttl = block.ttl.take().unwrap();
                    if table
                        .set_with_ttl(key.as_bytes(), value.as_bytes(), ttl)
                        .is_ok()
                    {
                        loaded += 1;
                    }
                } else if block.key.is_some() || block.value.is_some() || block.ttl.is_some() {
                    warn!("dropping incomplete snapshot block");
                }
                block = Block::empty();
                continue;
            }
            if let Some(rest) = line.strip_prefix("KEY:") {
                block.key = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("VALUE:") {
                block.value = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("TTL:") {
                block.ttl = rest.parse().ok();
            }
        }

        if loaded != declared {
            warn!(
                declared,
                loaded, "snapshot entry count mismatch; loading what parsed"
            );
        }
        info!(loaded, path = %self.path.display(), "snapshot load complete");
        Ok(())
    }

    fn record_set(&self, _key: &[u8], _value: &[u8], _ttl: u64) -> Result<()> {
        // Snapshots don't record individual mutations; they're picked up
        // by the next periodic/on-demand `save`.
        Ok(())
    }

    fn record_del(&self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn compact(&self, table: &Arc<Table>) -> Result<()> {
        // "take a snapshot immediately" (spec.md §4.E.ii): expired keys are
        // never serialized, so this has the same effect as dropping them.
        self.save(table)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::Arena;
    use crate::common::ARENA_BLOCK_SIZE;
    use crate::pool::EntryPool;

    fn fresh_table() -> Arc<Table> {
        let arena = Arc::new(Arena::with_config(ARENA_BLOCK_SIZE, 16));
        let pool = Arc::new(EntryPool::init(&arena, 256).unwrap());
        Arc::new(Table::with_config(64, 1024, pool, arena))
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = SnapshotPersistence::new(dir.path(), 300);

        let table = fresh_table();
        table.set(b"a", b"1").unwrap();
        table.set_with_ttl(b"b", b"2", 100).unwrap();
        persistence.save(&table).unwrap();

        let loaded = fresh_table();
        persistence.load(&loaded).unwrap();
        assert_eq!(loaded.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(loaded.get(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn rejects_corrupt_header() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE_NAME), "NOT_A_SNAPSHOT\n").unwrap();
        let persistence = SnapshotPersistence::new(dir.path(), 300);
        let table = fresh_table();
        assert!(persistence.load(&table).is_err());
    }

    #[test]
    fn without_save_a_fresh_process_sees_the_last_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = SnapshotPersistence::new(dir.path(), 300);
        let table = fresh_table();
        table.set(b"a", b"1").unwrap();
        persistence.save(&table).unwrap();

        table.set(b"b", b"2").unwrap(); // never saved

        let loaded = fresh_table();
        persistence.load(&loaded).unwrap();
        assert_eq!(loaded.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(loaded.get(b"b"), None);
    }

    #[test]
    fn worker_saves_automatically_once_interval_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(SnapshotPersistence::new(dir.path(), 1));
        let table = fresh_table();
        table.set(b"a", b"1").unwrap();

        let mut worker = SnapshotWorker::start(table, persistence.clone());
        thread::sleep(Duration::from_millis(2500));
        worker.stop();

        let loaded = fresh_table();
        persistence.load(&loaded).unwrap();
        assert_eq!(loaded.get(b"a"), Some(b"1".to_vec()));
    }
}
