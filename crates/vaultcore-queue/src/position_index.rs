//! Order-statistic index over approval sequence numbers.
//!
//! Every approval takes the next sequence number. A request's queue
//! position is the number of still-approved sequence numbers up to and
//! including its own, so removing one entry implicitly shifts every later
//! entry down by one. Both operations are O(log n) on a Fenwick tree;
//! no per-request position is ever rewritten.
//!
//! Sequence numbers are only reused after [`PositionIndex::compact`],
//! which renumbers the live entries in order once most slots are dead.

/// Below this many allocated sequence numbers the index never compacts.
const COMPACT_MIN_SEQ: usize = 64;

/// Fenwick tree of 0/1 occupancy flags, growable.
#[derive(Debug, Clone, Default)]
pub struct PositionIndex {
    /// 1-based Fenwick array; `tree[0]` is unused.
    tree: Vec<u64>,
    present: Vec<bool>,
    next_seq: usize,
    len: usize,
}

impl PositionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tree: vec![0; capacity + 1],
            present: vec![false; capacity],
            next_seq: 0,
            len: 0,
        }
    }

    /// Append a new entry at the back of the queue. Returns its sequence
    /// number; its position is `len()` after the call.
    pub fn push(&mut self) -> usize {
        let seq = self.next_seq;
        if seq >= self.present.len() {
            self.grow();
        }
        self.next_seq += 1;
        self.present[seq] = true;
        self.len += 1;
        self.update(seq, true);
        seq
    }

    /// Remove `seq` from the queue. Returns its position before removal,
    /// or `None` if it was not present.
    pub fn remove(&mut self, seq: usize) -> Option<u64> {
        let position = self.position(seq)?;
        self.present[seq] = false;
        self.len -= 1;
        self.update(seq, false);
        Some(position)
    }

    /// 1-based dense position of `seq`, if present.
    #[must_use]
    pub fn position(&self, seq: usize) -> Option<u64> {
        if !self.present.get(seq).copied().unwrap_or(false) {
            return None;
        }
        Some(self.prefix(seq))
    }

    /// Number of entries currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once fewer than half of the allocated sequence numbers are
    /// still queued.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.next_seq >= COMPACT_MIN_SEQ && self.next_seq > self.len * 2
    }

    /// Renumber the live entries `0..len` in queue order and shrink the
    /// tree to fit. Positions do not change. Returns `(old, new)` sequence
    /// pairs for every live entry.
    pub fn compact(&mut self) -> Vec<(usize, usize)> {
        let live: Vec<usize> = (0..self.next_seq).filter(|seq| self.present[*seq]).collect();
        let capacity = (live.len() * 2).max(16);
        self.present = vec![false; capacity];
        self.present[..live.len()].fill(true);
        self.next_seq = live.len();
        self.rebuild();
        live.into_iter().enumerate().map(|(new, old)| (old, new)).collect()
    }

    /// Count of present entries with sequence number `<= seq`.
    fn prefix(&self, seq: usize) -> u64 {
        let mut i = seq + 1;
        let mut sum = 0;
        while i > 0 {
            sum += self.tree[i];
            i &= i - 1;
        }
        sum
    }

    fn update(&mut self, seq: usize, insert: bool) {
        let mut i = seq + 1;
        while i < self.tree.len() {
            if insert {
                self.tree[i] += 1;
            } else {
                self.tree[i] -= 1;
            }
            i += i & i.wrapping_neg();
        }
    }

    /// Double the capacity and rebuild the tree.
    fn grow(&mut self) {
        let capacity = (self.present.len() * 2).max(16);
        self.present.resize(capacity, false);
        self.rebuild();
    }

    /// Rebuild the tree from the occupancy flags in O(capacity).
    fn rebuild(&mut self) {
        let capacity = self.present.len();
        self.tree = vec![0; capacity + 1];
        for i in 1..=capacity {
            if self.present[i - 1] {
                self.tree[i] += 1;
            }
            let parent = i + (i & i.wrapping_neg());
            if parent <= capacity {
                self.tree[parent] += self.tree[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn push_assigns_dense_positions() {
        let mut idx = PositionIndex::new();
        let a = idx.push();
        let b = idx.push();
        let c = idx.push();
        assert_eq!(idx.position(a), Some(1));
        assert_eq!(idx.position(b), Some(2));
        assert_eq!(idx.position(c), Some(3));
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn removal_shifts_later_entries_down() {
        let mut idx = PositionIndex::new();
        let a = idx.push();
        let b = idx.push();
        let c = idx.push();
        assert_eq!(idx.remove(b), Some(2));
        assert_eq!(idx.position(a), Some(1));
        assert_eq!(idx.position(b), None);
        assert_eq!(idx.position(c), Some(2));
        assert_eq!(idx.remove(b), None);
        assert_eq!(idx.len(), 2);
        let d = idx.push();
        assert_eq!(idx.position(d), Some(3));
    }

    #[test]
    fn growth_preserves_positions() {
        let mut idx = PositionIndex::with_capacity(2);
        let seqs: Vec<usize> = (0..100).map(|_| idx.push()).collect();
        for seq in seqs.iter().step_by(3) {
            idx.remove(*seq);
        }
        let mut expected = 1;
        for seq in &seqs {
            if let Some(pos) = idx.position(*seq) {
                assert_eq!(pos, expected);
                expected += 1;
            }
        }
        assert_eq!(expected - 1, idx.len() as u64);
    }

    #[test]
    fn compaction_renumbers_without_moving_positions() {
        let mut idx = PositionIndex::new();
        let seqs: Vec<usize> = (0..100).map(|_| idx.push()).collect();
        assert!(!idx.is_sparse());
        for seq in &seqs[..90] {
            idx.remove(*seq);
        }
        assert!(idx.is_sparse());

        let renumbered = idx.compact();
        assert_eq!(renumbered.len(), 10);
        assert!(!idx.is_sparse());
        for (i, (old, new)) in renumbered.iter().enumerate() {
            assert_eq!(*old, seqs[90 + i]);
            assert_eq!(*new, i);
            assert_eq!(idx.position(*new), Some(i as u64 + 1));
        }
        let next = idx.push();
        assert_eq!(next, 10);
        assert_eq!(idx.position(next), Some(11));
    }

    #[test]
    fn small_index_never_sparse() {
        let mut idx = PositionIndex::new();
        let a = idx.push();
        idx.push();
        idx.remove(a);
        assert!(!idx.is_sparse());
    }

    #[test]
    fn random_operations_keep_positions_dense() {
        let mut rng = rand::thread_rng();
        let mut idx = PositionIndex::with_capacity(4);
        let mut live: Vec<usize> = Vec::new();
        for _ in 0..2_000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                live.push(idx.push());
            } else {
                let victim = live.remove(rng.gen_range(0..live.len()));
                assert!(idx.remove(victim).is_some());
            }
            let positions: Vec<u64> = live.iter().filter_map(|s| idx.position(*s)).collect();
            let expected: Vec<u64> = (1..=live.len() as u64).collect();
            assert_eq!(positions, expected);
        }
    }
}
