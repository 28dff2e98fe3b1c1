//! Priority index over pending jobs.
//!
//! Jobs are ordered by tier (urgent first) and, within a tier, by arrival.
//! Each tier keeps its jobs in an ordered map keyed by a monotonically
//! increasing arrival offset, plus a Fenwick tree over those offsets so the
//! rank of any job can be answered in O(log n) without scanning.

use std::collections::{BTreeMap, HashMap};

use super::job::{JobId, Priority};

/// Growable Fenwick (binary indexed) tree of live-entry counts.
#[derive(Debug, Default)]
struct Fenwick {
    tree: Vec<i64>,
}

impl Fenwick {
    fn len(&self) -> usize {
        self.tree.len()
    }

    /// Sum of the first `n` slots.
    fn prefix(&self, mut n: usize) -> i64 {
        let mut sum = 0;
        while n > 0 {
            sum += self.tree[n - 1];
            n &= n - 1;
        }
        sum
    }

    /// Append a new slot holding `value`.
    fn push(&mut self, value: i64) {
        let n = self.tree.len() + 1;
        let lowbit = n & n.wrapping_neg();
        // Node n covers (n - lowbit, n]; everything but the new slot is
        // already accounted for in the existing prefix sums.
        let covered = self.prefix(n - 1) - self.prefix(n - lowbit);
        self.tree.push(covered + value);
    }

    fn add(&mut self, slot: usize, delta: i64) {
        let mut n = slot + 1;
        while n <= self.tree.len() {
            self.tree[n - 1] += delta;
            n += n & n.wrapping_neg();
        }
    }

    fn clear(&mut self) {
        self.tree.clear();
    }
}

/// Pending jobs of one priority tier, oldest first.
#[derive(Debug, Default)]
struct Tier {
    entries: BTreeMap<usize, JobId>,
    live: Fenwick,
}

impl Tier {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, id: JobId) -> usize {
        let offset = self.live.len();
        self.live.push(1);
        self.entries.insert(offset, id);
        offset
    }

    fn remove(&mut self, offset: usize) -> Option<JobId> {
        let id = self.entries.remove(&offset)?;
        self.live.add(offset, -1);
        if self.entries.is_empty() {
            self.live.clear();
        }
        Some(id)
    }

    /// Jobs in this tier ahead of `offset`.
    fn ahead_of(&self, offset: usize) -> usize {
        self.live.prefix(offset) as usize
    }

    /// Whether dead slots dominate the Fenwick tree.
    fn needs_compaction(&self) -> bool {
        self.live.len() > 1024 && self.live.len() > self.entries.len() * 4
    }
}

/// Ordering structure for pending jobs: strict priority, FIFO within a tier.
#[derive(Debug, Default)]
pub struct PriorityIndex {
    tiers: [Tier; 4],
    slots: HashMap<JobId, (Priority, usize)>,
}

impl PriorityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.slots.contains_key(id)
    }

    /// Append a job at the back of its tier.
    ///
    /// Panics if the job is already indexed.
    pub fn insert(&mut self, id: JobId, priority: Priority) {
        assert!(
            !self.slots.contains_key(&id),
            "job {} inserted into the priority index twice",
            id
        );
        let offset = self.tiers[priority.index()].insert(id);
        self.slots.insert(id, (priority, offset));
    }

    /// Remove a job wherever it sits. Returns false if it was not indexed.
    pub fn remove(&mut self, id: &JobId) -> bool {
        let Some((priority, offset)) = self.slots.remove(id) else {
            return false;
        };
        let tier = &mut self.tiers[priority.index()];
        let removed = tier.remove(offset);
        assert_eq!(removed.as_ref(), Some(id), "priority index slot map out of sync");
        if tier.needs_compaction() {
            self.compact(priority);
        }
        true
    }

    /// Remove and return the highest-ranked job.
    pub fn pop(&mut self) -> Option<JobId> {
        let id = self.peek(1).into_iter().next()?;
        self.remove(&id);
        Some(id)
    }

    /// Up to `n` jobs in dispatch order, without removing them.
    pub fn peek(&self, n: usize) -> Vec<JobId> {
        Priority::DESCENDING
            .iter()
            .flat_map(|p| self.tiers[p.index()].entries.values().copied())
            .take(n)
            .collect()
    }

    /// 1-based dispatch rank of a pending job.
    pub fn position(&self, id: &JobId) -> Option<usize> {
        let (priority, offset) = *self.slots.get(id)?;
        let higher: usize = Priority::DESCENDING
            .iter()
            .take_while(|p| **p != priority)
            .map(|p| self.tiers[p.index()].len())
            .sum();
        Some(higher + self.tiers[priority.index()].ahead_of(offset) + 1)
    }

    /// Number of pending jobs in one tier.
    pub fn tier_len(&self, priority: Priority) -> usize {
        self.tiers[priority.index()].len()
    }

    /// Reassign dense offsets in one tier, keeping relative order.
    fn compact(&mut self, priority: Priority) {
        let tier = &mut self.tiers[priority.index()];
        let ids: Vec<JobId> = tier.entries.values().copied().collect();
        *tier = Tier::default();
        for id in ids {
            let offset = tier.insert(id);
            self.slots.insert(id, (priority, offset));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
