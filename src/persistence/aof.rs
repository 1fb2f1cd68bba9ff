//! Append-only command log (spec.md §4.E.i, §6.1).

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::common::{AOF_COMPACT_FILE_NAME, AOF_FILE_NAME, MAX_STORAGE_SIZE};
use crate::error::Result;
use crate::persistence::{atomic_rename, Persistence};
use crate::table::Table;

pub struct AofPersistence {
    path: PathBuf,
    compact_path: PathBuf,
    /// Serializes append + size-check + maybe-compact so lines never
    /// interleave across concurrent writers.
    write_lock: Mutex<()>,
    /// Suppressed during `load` so replay doesn't re-append what it reads.
    replaying: AtomicBool,
}

impl AofPersistence {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        AofPersistence {
            path: dir.join(AOF_FILE_NAME),
            compact_path: dir.join(AOF_COMPACT_FILE_NAME),
            write_lock: Mutex::new(()),
            replaying: AtomicBool::new(false),
        }
    }

    fn append_line(&self, line: &str) -> Result<()> {
        if self.replaying.load(Ordering::Relaxed) {
            return Ok(());
        }

        let _guard = self.write_lock.lock();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
        Ok(())
    }

    /// Whether the log has grown past the compaction threshold. The
    /// top-level facade (`AytDb`) checks this after every append and, if
    /// true, calls [`Persistence::compact`] — compaction needs the live
    /// table to dump, which the narrower `record_set`/`record_del` calls
    /// don't have access to.
    pub fn should_compact(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0) > MAX_STORAGE_SIZE
    }

    fn format_set(key: &[u8], value: &[u8], ttl: u64) -> String {
        format!(
            "SET {} \"{}\" {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value),
            ttl
        )
    }

    fn format_del(key: &[u8]) -> String {
        format!("DEL {}", String::from_utf8_lossy(key))
    }

    /// Parse one line, accepting double-quoted values and falling back to
    /// whitespace-delimited tokens for older files (spec.md §4.E.i).
    fn parse_line(line: &str) -> Option<Cmd> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }
        let (cmd, rest) = line.split_once(' ')?;
        match cmd {
            "DEL" => Some(Cmd::Del {
                key: rest.trim().as_bytes().to_vec(),
            }),
            "SET" => {
                let rest = rest.trim_start();
                let (key, rest) = rest.split_once(' ')?;
                let rest = rest.trim_start();
                if let Some(stripped) = rest.strip_prefix('"') {
                    let end = stripped.find('"')?;
                    let value = stripped[..end].as_bytes().to_vec();
                    let ttl_str = stripped[end + 1..].trim();
                    let ttl = ttl_str.parse().unwrap_or(0);
                    Some(Cmd::Set {
                        key: key.as_bytes().to_vec(),
                        value,
                        ttl,
                    })
                } else {
                    // Legacy whitespace-delimited variant.
                    let mut it = rest.split_whitespace();
                    let value = it.next()?.as_bytes().to_vec();
                    let ttl = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    Some(Cmd::Set {
                        key: key.as_bytes().to_vec(),
                        value,
                        ttl,
                    })
                }
            }
            _ => None,
        }
    }
}

enum Cmd {
    Set { key: Vec<u8>, value: Vec<u8>, ttl: u64 },
    Del { key: Vec<u8> },
}

impl Persistence for AofPersistence {
    fn load(&self, table: &Arc<Table>) -> Result<()> {
        let Ok(f) = File::open(&self.path) else {
            return Ok(());
        };

        self.replaying.store(true, Ordering::Relaxed);
        let reader = BufReader::new(f);
        let mut loaded = 0usize;
        for line in reader.lines() {
            let line = line?;
            match Self::parse_line(&line) {
                Some(Cmd::Set { key, value, ttl }) => {
                    if table.set_with_ttl(&key, &value, ttl).is_ok() {
                        loaded += 1;
                    }
                }
                Some(Cmd::Del { key }) => {
                    table.del(&key);
                }
                None => warn!(%line, "skipping malformed AOF line"),
            }
        }
        self.replaying.store(false, Ordering::Relaxed);
        info!(loaded, path = %self.path.display(), "AOF replay complete");
        Ok(())
    }

    fn record_set(&self, key: &[u8], value: &[u8], ttl: u64) -> Result<()> {
        self.append_line(&Self::format_set(key, value, ttl))
    }

    fn record_del(&self, key: &[u8]) -> Result<()> {
        self.append_line(&Self::format_del(key))
    }

    fn compact(&self, table: &Arc<Table>) -> Result<()> {
        let _guard = self.write_lock.lock();

        self.replaying.store(true, Ordering::Relaxed);
        {
            let mut tmp = File::create(&self.compact_path)?;
            // We don't have a native "iterate all live entries" on `Table`
            // beyond what the command surface exposes; compaction instead
            // walks keys the caller tracked via a snapshot of current state.
            // Here we rely on the table itself remaining the source of
            // truth: callers should pass the table whose live set we dump.
            for (key, value, ttl) in table_live_entries(table) {
                writeln!(
                    tmp,
                    "SET {} \"{}\" {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value),
                    ttl
                )?;
            }
            tmp.flush()?;
        }
        self.replaying.store(false, Ordering::Relaxed);

        atomic_rename(&self.compact_path, &self.path)?;
        info!(path = %self.path.display(), "AOF compacted");
        Ok(())
    }
}

/// Collect every live (unexpired) key/value/remaining-ttl triple, for AOF
/// compaction and for informational dumps. Lives here rather than on
/// `Table` because it is a persistence-only concern (spec.md never asks
/// the table itself to expose bulk iteration).
pub(crate) fn table_live_entries(table: &Arc<Table>) -> Vec<(Vec<u8>, Vec<u8>, u64)> {
    table.snapshot_live_entries()
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
    fn parses_quoted_and_legacy_lines() {
        match AofPersistence::parse_line("SET a \"b c\" 30").unwrap() {
            Cmd::Set { key, value, ttl } => {
                assert_eq!(key, b"a");
                assert_eq!(value, b"b c");
                assert_eq!(ttl, 30);
            }
            _ => panic!("expected Set"),
        }

        match AofPersistence::parse_line("SET a b 0").unwrap() {
            Cmd::Set { key, value, ttl } => {
                assert_eq!(key, b"a");
                assert_eq!(value, b"b");
                assert_eq!(ttl, 0);
            }
            _ => panic!("expected Set"),
        }

        match AofPersistence::parse_line("DEL a").unwrap() {
            Cmd::Del { key } => assert_eq!(key, b"a"),
            _ => panic!("expected Del"),
        }
    }

    #[test]
    fn round_trips_through_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = AofPersistence::new(dir.path());
        persistence.record_set(b"a", b"1", 0).unwrap();
        persistence.record_set(b"b", b"2", 0).unwrap();
        persistence.record_del(b"a").unwrap();
        persistence.record_set(b"c", b"3", 0).unwrap();

        let table = fresh_table();
        persistence.load(&table).unwrap();

        assert_eq!(table.get(b"a"), None);
        assert_eq!(table.get(b"b"), Some(b"2".to_vec()));
        assert_eq!(table.get(b"c"), Some(b"3".to_vec()));
    }

    #[test]
    fn compaction_produces_minimal_set_only_log() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = AofPersistence::new(dir.path());
        let table = fresh_table();
        table.set(b"a", b"1").unwrap();
        table.set(b"b", b"2").unwrap();
        table.del(b"a");
        persistence.compact(&table).unwrap();

        let contents = fs::read_to_string(&persistence.path).unwrap();
        assert!(contents.contains("SET b \"2\" 0"));
        assert!(!contents.contains("DEL"));
        assert!(!contents.contains("\"a\""));
    }
}
