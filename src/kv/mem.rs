use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::{
    memtable::{Memtable, MergingIter, Run, VecIter},
    Clock, IterOptions, KVIter, KvStore, Snapshot, StoreError, SystemClock, WriteBatch,
};

#[derive(Debug, Clone)]
pub struct Versioned {
    value: Vec<u8>,
    // Nanoseconds since the epoch, compared against the snapshot's clock.
    expires_at: Option<u64>,
}

impl Versioned {
    fn live_at(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |t| t > now)
    }
}

type VersionedKey = (Vec<u8>, u64);

// An in-memory ordered store with snapshot reads.
//
// Every entry gets its own seqnum. A commit stages the whole batch first and
// only then inserts it and ratchets `visible_seqnum` past it, all under the
// write lock, so a snapshot sees either every entry of a batch or none.
// Snapshots hold the memtable's immutable runs plus the seqnum and clock
// reading they were taken at.
#[derive(Debug)]
pub struct MemStore<C = SystemClock> {
    memtable: RwLock<Memtable<Vec<u8>, Versioned>>,
    // The seqnum that is used for reads.
    visible_seqnum: AtomicU64,
    clock: C,

    // After this many more entry writes the store goes down: the next write
    // fails, and so does every commit and snapshot until `recover`.
    writes_until_failure: Mutex<Option<usize>>,
}

impl MemStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemStore<C> {
    pub fn with_clock(clock: C) -> Self {
        MemStore {
            memtable: RwLock::new(Memtable::new()),
            visible_seqnum: AtomicU64::new(0),
            clock,
            writes_until_failure: Mutex::new(None),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn schedule_failure(&self, writes: usize) {
        *self.writes_until_failure.lock() = Some(writes);
    }

    pub fn recover(&self) {
        *self.writes_until_failure.lock() = None;
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if *self.writes_until_failure.lock() == Some(0) {
            Err(StoreError::Unavailable("store is down".into()))
        } else {
            Ok(())
        }
    }

    fn perform_write(&self) -> Result<(), StoreError> {
        let mut remaining = self.writes_until_failure.lock();
        match *remaining {
            None => Ok(()),
            Some(0) => Err(StoreError::Unavailable("store is down".into())),
            Some(x) => {
                *remaining = Some(x - 1);
                Ok(())
            }
        }
    }

    fn ratchet_visible_seqnum(&self, v: u64) {
        // Someone else might have ratcheted above us, which is fine.
        self.visible_seqnum.fetch_max(v, Ordering::SeqCst);
    }
}

impl<C: Clock> KvStore for MemStore<C> {
    type Snapshot = MemSnapshot;

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        let mut memtable = self.memtable.write();

        let mut staged = Vec::with_capacity(batch.len());
        for entry in batch {
            self.perform_write()?;
            let expires_at = entry
                .ttl
                .map(|ttl| now.saturating_add(ttl.as_nanos().min(u64::MAX as u128) as u64));
            staged.push((
                entry.key,
                Versioned {
                    value: entry.value,
                    expires_at,
                },
            ));
        }

        let mut seqnum = memtable.prev_seqnum();
        for (key, value) in staged {
            seqnum += 1;
            memtable.insert(seqnum, key, value);
        }
        self.ratchet_visible_seqnum(seqnum);
        tracing::trace!(seqnum, "committed batch");

        Ok(())
    }

    fn snapshot(&self) -> Result<MemSnapshot, StoreError> {
        self.check_available()?;
        let memtable = self.memtable.read();
        Ok(MemSnapshot {
            runs: memtable.runs(),
            seqnum: self.visible_seqnum.load(Ordering::SeqCst),
            now: self.clock.now(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemSnapshot {
    runs: Vec<Run<Vec<u8>, Versioned>>,
    seqnum: u64,
    now: u64,
}

impl MemSnapshot {
    pub fn seqnum(&self) -> u64 {
        self.seqnum
    }
}

impl Snapshot for MemSnapshot {
    type Iter = SnapshotIter;

    fn iter(&self, opts: IterOptions) -> Result<SnapshotIter, StoreError> {
        Ok(SnapshotIter::new(
            MergingIter::new(self.runs.iter().map(|r| VecIter::new(r.clone()))),
            self.seqnum,
            self.now,
            opts,
        ))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let mut iter = self.iter(IterOptions::default())?;
        let key = key.to_vec();
        iter.seek_ge(&key);
        Ok(match iter.peek() {
            Some((k, v)) if *k == key => Some(v.clone()),
            _ => None,
        })
    }
}

// Collapses the versions of each key down to the newest one at or below the
// snapshot seqnum, and hides keys whose newest version has expired.
pub struct SnapshotIter {
    iter: MergingIter<VecIter<VersionedKey, Versioned>, VersionedKey, Versioned>,
    seqnum: u64,
    now: u64,
    prefetch_values: bool,
    buf: (Vec<u8>, Vec<u8>),
    // Whether `buf` holds an entry that has been peeked but not yet returned.
    peeked: bool,
}

impl SnapshotIter {
    fn new(
        iter: MergingIter<VecIter<VersionedKey, Versioned>, VersionedKey, Versioned>,
        seqnum: u64,
        now: u64,
        opts: IterOptions,
    ) -> Self {
        SnapshotIter {
            iter,
            seqnum,
            now,
            prefetch_values: opts.prefetch_values,
            buf: (Vec::new(), Vec::new()),
            peeked: false,
        }
    }

    fn physical_forwards(&mut self) -> bool {
        loop {
            let (ks, v) = match self.iter.next() {
                Some(kv) => kv,
                None => return false,
            };
            if ks.1 > self.seqnum {
                continue;
            }
            self.buf.0.clone_from(&ks.0);
            self.buf.1.clear();
            let mut live = v.live_at(self.now);
            if live && self.prefetch_values {
                self.buf.1.extend_from_slice(&v.value);
            }

            // Later versions of the same key come next, oldest first.
            while let Some((nks, nv)) = self.iter.peek() {
                if nks.0 != self.buf.0 {
                    break;
                }
                if nks.1 <= self.seqnum {
                    live = nv.live_at(self.now);
                    if live && self.prefetch_values {
                        self.buf.1.clone_from(&nv.value);
                    }
                }
                self.iter.next();
            }

            if live {
                return true;
            }
        }
    }
}

impl KVIter<Vec<u8>, Vec<u8>> for SnapshotIter {
    fn next(&mut self) -> Option<(&Vec<u8>, &Vec<u8>)> {
        if self.peeked {
            self.peeked = false;
        } else if !self.physical_forwards() {
            return None;
        }
        Some((&self.buf.0, &self.buf.1))
    }

    fn peek(&mut self) -> Option<(&Vec<u8>, &Vec<u8>)> {
        if !self.peeked {
            if !self.physical_forwards() {
                return None;
            }
            self.peeked = true;
        }
        Some((&self.buf.0, &self.buf.1))
    }

    fn seek_ge(&mut self, key: &Vec<u8>) {
        self.iter.seek_ge(&(key.clone(), 0));
        self.peeked = false;
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fmt::Write, sync::Arc, time::Duration};

    use super::*;
    use crate::kv::ManualClock;

    fn render(mut iter: SnapshotIter) -> String {
        let mut out = String::new();
        while let Some((k, v)) = iter.next() {
            writeln!(
                &mut out,
                "{}={}",
                String::from_utf8_lossy(k),
                String::from_utf8_lossy(v)
            )
            .unwrap();
        }
        if out.is_empty() {
            out.push_str("<empty>\n");
        }
        out
    }

    #[test]
    fn test_mem_store() {
        datadriven::walk("src/kv/testdata/", |f| {
            let clock = Arc::new(ManualClock::new(1_000));
            let store = MemStore::with_clock(clock.clone());
            let mut snapshots: HashMap<String, MemSnapshot> = HashMap::new();
            f.run(|test_case| match test_case.directive.as_str() {
                "commit" => {
                    let ttl = test_case
                        .args
                        .get("ttl")
                        .map(|v| Duration::from_secs(v[0].parse().unwrap()));
                    let mut batch = WriteBatch::new();
                    for line in test_case.input.lines() {
                        let (k, v) = line.split_once('=').unwrap();
                        batch.set(k.as_bytes().to_vec(), v.as_bytes().to_vec(), ttl);
                    }
                    match store.commit(batch) {
                        Ok(()) => "ok\n".into(),
                        Err(e) => format!("error: {}\n", e),
                    }
                }
                "snapshot" => {
                    let name = test_case.args["name"][0].clone();
                    match store.snapshot() {
                        Ok(snap) => {
                            snapshots.insert(name, snap);
                            "ok\n".into()
                        }
                        Err(e) => format!("error: {}\n", e),
                    }
                }
                "scan" => {
                    let snap = match test_case.args.get("snapshot") {
                        Some(name) => snapshots[&name[0]].clone(),
                        None => store.snapshot().unwrap(),
                    };
                    let opts = if test_case.args.contains_key("keys_only") {
                        IterOptions::keys_only()
                    } else {
                        IterOptions::default()
                    };
                    let mut iter = snap.iter(opts).unwrap();
                    if let Some(from) = test_case.args.get("from") {
                        iter.seek_ge(&from[0].as_bytes().to_vec());
                    }
                    render(iter)
                }
                "get" => {
                    let key = test_case.input.trim();
                    let got = store.snapshot().unwrap().get(key.as_bytes()).unwrap();
                    match got {
                        Some(v) => format!("{}\n", String::from_utf8_lossy(&v)),
                        None => "<none>\n".into(),
                    }
                }
                "advance" => {
                    let secs: u64 = test_case.args["secs"][0].parse().unwrap();
                    clock.advance(Duration::from_secs(secs));
                    "ok\n".into()
                }
                "fail-after" => {
                    let writes: usize = test_case.args["writes"][0].parse().unwrap();
                    store.schedule_failure(writes);
                    "ok\n".into()
                }
                "recover" => {
                    store.recover();
                    "ok\n".into()
                }
                _ => {
                    panic!("unhandled");
                }
            })
        })
    }

    #[test]
    fn test_peek_then_next() {
        let store = MemStore::new();
        let mut batch = WriteBatch::new();
        batch.set(b"a".to_vec(), b"1".to_vec(), None);
        batch.set(b"b".to_vec(), b"2".to_vec(), None);
        store.commit(batch).unwrap();

        let mut iter = store.snapshot().unwrap().iter(IterOptions::default()).unwrap();
        assert_eq!(iter.peek().map(|(k, _)| k.clone()), Some(b"a".to_vec()));
        assert_eq!(iter.peek().map(|(k, _)| k.clone()), Some(b"a".to_vec()));
        assert_eq!(iter.next().map(|(k, _)| k.clone()), Some(b"a".to_vec()));
        assert_eq!(iter.next().map(|(k, v)| (k.clone(), v.clone())), Some((b"b".to_vec(), b"2".to_vec())));
        assert!(iter.next().is_none());
        assert!(iter.peek().is_none());
    }

    #[test]
    fn test_concurrent_commits_are_all_visible() {
        let store = Arc::new(MemStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let mut batch = WriteBatch::new();
                        batch.set(format!("{}-{:03}-a", t, i).into_bytes(), Vec::new(), None);
                        batch.set(format!("{}-{:03}-b", t, i).into_bytes(), Vec::new(), None);
                        store.commit(batch).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut iter = store
            .snapshot()
            .unwrap()
            .iter(IterOptions::keys_only())
            .unwrap();
        let mut n = 0;
        while iter.next().is_some() {
            n += 1;
        }
        assert_eq!(n, 400);
    }
}
