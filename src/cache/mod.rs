use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Ephemeral string key-value lookup in front of the catalog store.
///
/// Payloads are opaque serialized snapshots. Expiry and eviction belong to
/// the implementation; callers only ever see a hit or a miss.
pub trait EntityCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;
}

struct Entry {
    value: String,
    inserted: Instant,
    seq: u64,
}

/// Map plus insertion order. An order slot whose `seq` no longer matches the
/// map entry belongs to an overwritten or removed key and is skipped.
#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl Entries {
    fn is_live(&self, key: &str, seq: u64) -> bool {
        self.map.get(key).is_some_and(|e| e.seq == seq)
    }

    fn compact(&mut self) {
        let map = &self.map;
        self.order
            .retain(|(key, seq)| map.get(key).is_some_and(|e| e.seq == *seq));
    }
}

/// In-process cache with a fixed time-to-live per entry.
///
/// When `max_entries` is reached, expired entries at the old end are dropped
/// first, then the oldest insertion is evicted.
pub struct MemoryCache {
    entries: Mutex<Entries>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".into()))
    }

    fn make_room(&self, entries: &mut Entries) {
        while let Some((key, seq)) = entries.order.pop_front() {
            if !entries.is_live(&key, seq) {
                continue;
            }
            let expired = entries
                .map
                .get(&key)
                .is_some_and(|e| e.inserted.elapsed() >= self.ttl);
            if !expired && entries.map.len() < self.max_entries {
                entries.order.push_front((key, seq));
                break;
            }
            log::trace!("Evicting cache entry {}", key);
            entries.map.remove(&key);
        }
    }
}

impl EntityCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock()?;
        match entries.map.get(key) {
            Some(e) if e.inserted.elapsed() < self.ttl => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if !entries.map.contains_key(key) && entries.map.len() >= self.max_entries {
            self.make_room(&mut entries);
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                inserted: Instant::now(),
                seq,
            },
        );
        entries.order.push_back((key.to_string(), seq));

        // Overwrites and expired reads leave dead slots behind.
        if entries.order.len() > self.max_entries * 2 {
            entries.compact();
        }
        Ok(())
    }
}
