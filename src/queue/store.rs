//! Storage interface for the job table.
//!
//! The queue only talks to [`JobStore`], so a durable backend can replace
//! [`MemoryJobStore`] without touching scheduling or retry logic.

use std::collections::HashMap;

use super::job::{Job, JobId};

/// Job table used by the queue. Called with the queue lock held, so
/// implementations must not block for long.
pub trait JobStore: Send + Sync {
    fn insert(&mut self, job: Job);
    fn get(&self, id: &JobId) -> Option<&Job>;
    fn get_mut(&mut self, id: &JobId) -> Option<&mut Job>;
    fn remove(&mut self, id: &JobId) -> Option<Job>;
    fn len(&self) -> usize;
    fn jobs(&self) -> Box<dyn Iterator<Item = &Job> + '_>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory job table. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: HashMap<JobId, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&mut self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    fn get_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    fn remove(&mut self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id)
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }

    fn jobs(&self) -> Box<dyn Iterator<Item = &Job> + '_> {
        Box::new(self.jobs.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::{normalize_target, AuditOptions, Priority};

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryJobStore::new();
        let job = Job::new(
            normalize_target("https://example.com").unwrap(),
            AuditOptions::new(),
            Priority::Normal,
            2,
        );
        let id = job.id;
        store.insert(job);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id).map(|j| j.target.as_str()), Some("https://example.com/"));

        store.get_mut(&id).unwrap().attempts = 1;
        assert_eq!(store.jobs().map(|j| j.attempts).sum::<u32>(), 1);

        assert!(store.remove(&id).is_some());
        assert!(store.is_empty());
    }
}
