use std::{marker::PhantomData, sync::Arc};

use super::KVIter;

// A sorted run of versioned entries. Runs are immutable once built, so a
// reader can hold on to them while writers keep inserting.
pub type Run<K, V> = Arc<Vec<((K, u64), V)>>;

#[derive(Debug)]
pub struct VecIter<K, V> {
    idx: usize,
    contents: Arc<Vec<(K, V)>>,
}

impl<K, V> VecIter<K, V> {
    pub fn new(v: Arc<Vec<(K, V)>>) -> Self {
        Self {
            idx: 0,
            contents: v,
        }
    }
}

impl<K, V> KVIter<K, V> for VecIter<K, V>
where
    K: Ord,
{
    fn next(&mut self) -> Option<(&K, &V)> {
        if self.idx >= self.contents.len() {
            None
        } else {
            self.idx += 1;
            let v = &self.contents[self.idx - 1];
            Some((&v.0, &v.1))
        }
    }

    fn peek(&mut self) -> Option<(&K, &V)> {
        if self.idx >= self.contents.len() {
            None
        } else {
            let v = &self.contents[self.idx];
            Some((&v.0, &v.1))
        }
    }

    fn seek_ge(&mut self, key: &K) {
        self.idx = match self.contents.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(x) => x,
            Err(x) => x,
        };
    }
}

// Yields the union of several sorted iterators in key order.
#[derive(Debug)]
pub struct MergingIter<I, K, V>
where
    K: Ord,
    I: KVIter<K, V>,
{
    iters: Vec<I>,
    _marker: PhantomData<(K, V)>,
}

impl<I, K, V> MergingIter<I, K, V>
where
    K: Ord,
    I: KVIter<K, V>,
{
    pub fn new<J>(j: J) -> Self
    where
        J: IntoIterator<Item = I>,
    {
        Self {
            iters: j.into_iter().collect(),
            _marker: PhantomData,
        }
    }

    fn lowest(&mut self) -> Option<usize> {
        let mut lowest = None;

        for (idx, it) in self.iters.iter_mut().enumerate() {
            match lowest {
                None => {
                    lowest = it.peek().map(|(k, _v)| (idx, k));
                }
                Some((_, k)) => {
                    if let Some((k2, _)) = it.peek() {
                        if k2 < k {
                            lowest = Some((idx, k2));
                        }
                    }
                }
            }
        }

        lowest.map(|(x, _)| x)
    }
}

impl<I, K, V> KVIter<K, V> for MergingIter<I, K, V>
where
    I: KVIter<K, V>,
    K: Ord,
{
    fn next(&mut self) -> Option<(&K, &V)> {
        let i = self.lowest()?;
        self.iters[i].next()
    }

    fn peek(&mut self) -> Option<(&K, &V)> {
        let i = self.lowest()?;
        self.iters[i].peek()
    }

    fn seek_ge(&mut self, key: &K) {
        for it in self.iters.iter_mut() {
            it.seek_ge(key);
        }
    }
}

// Entries are kept as a stack of sorted runs whose sizes at least halve from
// bottom to top. An insert pushes a run of one and merges upward until that
// holds again, so every entry gets rewritten O(log n) times.
#[derive(Debug)]
pub struct Memtable<K, V>
where
    K: Ord,
{
    prev_seqnum: u64,
    runs: Vec<Run<K, V>>,
}

impl<K, V> Memtable<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Memtable {
            prev_seqnum: 0,
            runs: Vec::new(),
        }
    }

    fn merge(lhs: &[((K, u64), V)], rhs: &[((K, u64), V)]) -> Run<K, V> {
        let mut out = Vec::with_capacity(lhs.len() + rhs.len());
        let mut lhs = lhs.iter();
        let mut rhs = rhs.iter();
        let mut left = lhs.next();
        let mut right = rhs.next();
        loop {
            match (left, right) {
                (None, None) => {
                    break;
                }
                (Some(l), None) => {
                    out.push(l.clone());
                    out.extend(lhs.cloned());
                    break;
                }
                (None, Some(r)) => {
                    out.push(r.clone());
                    out.extend(rhs.cloned());
                    break;
                }
                (Some(l), Some(r)) => {
                    // Seqnums are unique, so two entries never compare equal.
                    if l.0 < r.0 {
                        out.push(l.clone());
                        left = lhs.next();
                    } else {
                        out.push(r.clone());
                        right = rhs.next();
                    }
                }
            }
        }

        Arc::new(out)
    }

    fn maybe_fix_at(&mut self, idx: usize) {
        if self.runs[idx].len() < self.runs[idx + 1].len() * 2 {
            let merged = Self::merge(&self.runs[idx], &self.runs[idx + 1]);
            self.runs.splice(idx..idx + 2, [merged]).for_each(drop);
        }
    }

    pub fn insert(&mut self, s: u64, k: K, v: V) {
        if s <= self.prev_seqnum {
            panic!("seqnums must be strictly increasing")
        }
        self.prev_seqnum = s;
        self.runs.push(Arc::new(vec![((k, s), v)]));
        for i in (0..(self.runs.len() - 1)).rev() {
            self.maybe_fix_at(i);
        }
    }

    pub fn prev_seqnum(&self) -> u64 {
        self.prev_seqnum
    }

    // The current runs. The returned handles stay valid (and unchanged) no
    // matter what is inserted afterwards.
    pub fn runs(&self) -> Vec<Run<K, V>> {
        self.runs.clone()
    }

    #[cfg(test)]
    pub fn scan(&self) -> MergingIter<VecIter<(K, u64), V>, (K, u64), V> {
        MergingIter::new(self.runs.iter().map(|r| VecIter::new(r.clone())))
    }
}

impl<K, V> Default for Memtable<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut it: impl KVIter<(String, u64), i32>) -> Vec<(String, u64, i32)> {
        let mut out = Vec::new();
        while let Some(((k, s), v)) = it.next() {
            out.push((k.clone(), *s, *v));
        }
        out
    }

    #[test]
    fn test_runs_stay_sorted_and_logarithmic() {
        let mut m = Memtable::new();
        for i in 0..100_u64 {
            m.insert(i + 1, format!("key{:02}", (i * 37) % 50), i as i32);
        }
        assert!(m.runs.len() <= 8, "{} runs", m.runs.len());

        let all = drain(m.scan());
        assert_eq!(all.len(), 100);
        assert!(all.windows(2).all(|w| (&w[0].0, w[0].1) < (&w[1].0, w[1].1)));
    }

    #[test]
    fn test_runs_survive_later_inserts() {
        let mut m = Memtable::new();
        m.insert(1, "b".to_string(), 1);
        m.insert(2, "a".to_string(), 2);
        let held = m.runs();

        m.insert(3, "c".to_string(), 3);
        m.insert(4, "a".to_string(), 4);

        let old = drain(MergingIter::new(held.into_iter().map(VecIter::new)));
        assert_eq!(
            old,
            vec![("a".to_string(), 2, 2), ("b".to_string(), 1, 1)]
        );
        assert_eq!(drain(m.scan()).len(), 4);
    }

    #[test]
    fn test_seek_ge() {
        let mut m = Memtable::new();
        for (s, k) in ["d", "b", "f", "b"].iter().enumerate() {
            m.insert(s as u64 + 1, k.to_string(), s as i32);
        }
        let mut it = m.scan();
        it.seek_ge(&("c".to_string(), 0));
        assert_eq!(it.next().map(|((k, _), _)| k.clone()), Some("d".to_string()));

        it.seek_ge(&("b".to_string(), 0));
        assert_eq!(it.peek().map(|((k, s), _)| (k.clone(), *s)), Some(("b".to_string(), 2)));
    }

    #[test]
    #[should_panic(expected = "seqnums must be strictly increasing")]
    fn test_insert_rejects_stale_seqnum() {
        let mut m = Memtable::new();
        m.insert(2, "a".to_string(), 1);
        m.insert(2, "b".to_string(), 2);
    }
}
