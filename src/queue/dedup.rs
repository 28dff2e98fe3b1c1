//! Signature → live job map used to collapse duplicate submissions.

use std::collections::HashMap;

use super::job::{JobId, Signature};

#[derive(Debug, Default)]
pub struct DedupIndex {
    live: HashMap<Signature, JobId>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &Signature) -> Option<JobId> {
        self.live.get(signature).copied()
    }

    /// Claim a signature for a new live job.
    ///
    /// Panics if another job already holds it.
    pub fn claim(&mut self, signature: Signature, id: JobId) {
        if let Some(existing) = self.live.insert(signature, id) {
            panic!("dedup signature claimed by job {} while held by job {}", id, existing);
        }
    }

    /// Release a signature once its job reaches a terminal state.
    ///
    /// Panics if the signature is held by a different job.
    pub fn release(&mut self, signature: &Signature, id: JobId) {
        match self.live.remove(signature) {
            Some(holder) if holder == id => {}
            Some(holder) => panic!(
                "job {} released a dedup signature held by job {}",
                id, holder
            ),
            None => panic!("job {} released a dedup signature it never held", id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
