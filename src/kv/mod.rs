// The ordered key-value store the profile indexes are layered on.
//
// A store needs to offer three things:
// * atomic commit of a batch of entries, each with an optional time-to-live,
// * point-in-time snapshots that never observe a partially applied batch,
// * forward iteration over a snapshot in key order, with seek.
//
// MemStore is the in-memory implementation shipped here. Anything else (an
// LSM on disk, a remote store) plugs in by implementing KvStore.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

mod mem;
mod memtable;

pub use mem::{MemSnapshot, MemStore, SnapshotIter};

pub trait KVIter<K, V>
where
    K: Ord,
{
    fn next(&mut self) -> Option<(&K, &V)>;
    fn peek(&mut self) -> Option<(&K, &V)>;

    // Positions the iterator to the left of the first location the key is >=
    // to.
    fn seek_ge(&mut self, key: &K);
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub ttl: Option<Duration>,
}

// Entries committed together: either all of them become visible or none do.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    entries: Vec<Entry>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(n: usize) -> Self {
        WriteBatch {
            entries: Vec::with_capacity(n),
        }
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Option<Duration>) {
        self.entries.push(Entry { key, value, ttl });
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterOptions {
    pub prefetch_values: bool,
}

impl IterOptions {
    // Values are never copied out; iterators hand back empty values.
    pub fn keys_only() -> Self {
        IterOptions {
            prefetch_values: false,
        }
    }
}

impl Default for IterOptions {
    fn default() -> Self {
        IterOptions {
            prefetch_values: true,
        }
    }
}

pub trait Snapshot {
    type Iter: KVIter<Vec<u8>, Vec<u8>>;

    fn iter(&self, opts: IterOptions) -> Result<Self::Iter, StoreError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

pub trait KvStore: Send + Sync {
    type Snapshot: Snapshot;

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    fn snapshot(&self) -> Result<Self::Snapshot, StoreError>;
}

// Time source for expiry, nanoseconds since the unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(nanos: u64) -> Self {
        ManualClock {
            nanos: AtomicU64::new(nanos),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now(&self) -> u64 {
        (**self).now()
    }
}
