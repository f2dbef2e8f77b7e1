// The merge half of a sort-merge join: the intersection of several ascending
// lists, one per scanned index.
//
// Pairs of lists are walked from the tail towards the head. Whichever side
// holds the strictly larger element steps back alone, since nothing smaller
// on the other side can match it; on a tie the element is kept and both sides
// step back. Matches therefore come out largest first, and the accumulated
// result stays in that order between rounds. Only at the very end is it
// flipped back to ascending.
//
// With a limit, the descending result keeps its *last* `limit` elements before
// the flip: the smallest (oldest) matches survive, not the newest.

use std::cmp::Ordering;

pub fn intersect<T>(lists: Vec<Vec<T>>, limit: usize) -> Vec<T>
where
    T: Ord + Clone,
{
    let mut lists = lists.into_iter();
    let first = match lists.next() {
        Some(first) => first,
        None => return Vec::new(),
    };

    // Matches so far, largest first.
    let mut merged: Vec<T> = first.into_iter().rev().collect();
    for next in lists {
        if merged.is_empty() {
            break;
        }
        merged = intersect_from_tail(&merged, &next);
    }

    if limit > 0 && merged.len() > limit {
        let excess = merged.len() - limit;
        merged.drain(..excess);
    }

    merged.reverse();
    merged
}

// `desc` is largest first, `asc` smallest first; both are consumed starting
// from their largest element.
fn intersect_from_tail<T>(desc: &[T], asc: &[T]) -> Vec<T>
where
    T: Ord + Clone,
{
    let mut out = Vec::with_capacity(desc.len().min(asc.len()));
    let mut k = 0;
    let mut j = asc.len();
    while k < desc.len() && j > 0 {
        match desc[k].cmp(&asc[j - 1]) {
            Ordering::Equal => {
                out.push(desc[k].clone());
                k += 1;
                j -= 1;
            }
            Ordering::Greater => k += 1,
            Ordering::Less => j -= 1,
        }
    }
    out
}
