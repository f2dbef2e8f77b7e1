use crate::{
    keys::{split_index_key, IndexEntry, IndexPrefix},
    kv::{IterOptions, KVIter, Snapshot, StoreError},
};

use super::TimeRange;

// Entries of one index prefix within a time range, ascending by
// (created_at, id). Forward only and bound to the snapshot it was opened on.
pub struct IndexScan<I> {
    iter: I,
    prefix: IndexPrefix,
    max: u64,
    done: bool,
}

pub fn scan_index<S: Snapshot>(
    snapshot: &S,
    prefix: &IndexPrefix,
    range: TimeRange,
) -> Result<IndexScan<S::Iter>, StoreError> {
    // Index values are empty, never fetch them.
    let mut iter = snapshot.iter(IterOptions::keys_only())?;
    let start = prefix.seek_key(range.min);
    tracing::debug!(
        kind = ?prefix.kind(),
        index_value = %String::from_utf8_lossy(prefix.index_value()),
        min = range.min,
        max = range.max,
        "scanning index"
    );
    iter.seek_ge(&start);
    Ok(IndexScan {
        iter,
        prefix: prefix.clone(),
        max: range.max,
        done: false,
    })
}

impl<I> Iterator for IndexScan<I>
where
    I: KVIter<Vec<u8>, Vec<u8>>,
{
    type Item = IndexEntry;

    fn next(&mut self) -> Option<IndexEntry> {
        while !self.done {
            let (key, _) = match self.iter.next() {
                Some(kv) => kv,
                None => break,
            };
            if !key.starts_with(self.prefix.as_bytes()) {
                break;
            }
            // A longer index value that merely starts with our bytes (service
            // "apix" while scanning "api") lands in the same key range. Such
            // keys are skipped, and they don't end the scan either, since
            // exact matches can still follow them.
            let (item_prefix, entry) = match split_index_key(key) {
                Some(split) => split,
                None => continue,
            };
            if item_prefix != self.prefix.as_bytes() {
                continue;
            }
            if entry.created_at > self.max {
                break;
            }
            return Some(entry);
        }
        self.done = true;
        None
    }
}
