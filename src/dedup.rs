use std::collections::VecDeque;
use tracing::debug;

/// Remembers the most recent request ids so a retried submission is not
/// printed twice.
///
/// Not synchronized: the owner wraps it in a lock so that the membership
/// check and the insert happen in one critical section.
#[derive(Debug)]
pub struct DedupGuard {
    window: VecDeque<String>,
    capacity: usize,
}

impl DedupGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` if `job_id` was seen within the window, otherwise
    /// records it and returns `true`.
    ///
    /// Requests without an id cannot be deduplicated and are always accepted.
    pub fn should_accept(&mut self, job_id: Option<&str>) -> bool {
        let Some(job_id) = job_id else {
            return true;
        };

        if self.capacity == 0 {
            return true;
        }

        if self.window.iter().any(|seen| seen == job_id) {
            debug!("Duplicate request id rejected: {}", job_id);
            return false;
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(job_id.to_string());
        true
    }

    /// Drop `job_id` from the window so the caller may resubmit it
    /// (used after a failed print).
    pub fn forget(&mut self, job_id: &str) -> bool {
        match self.window.iter().position(|seen| seen == job_id) {
            Some(index) => {
                self.window.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.window.iter().any(|seen| seen == job_id)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
