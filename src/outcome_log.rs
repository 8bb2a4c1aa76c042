use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Result of executing one print job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobOutcome {
    pub success: bool,
    pub job_id: Option<String>,
    /// Internal id correlating log lines for this job
    pub trace_id: String,
    /// The request body as received
    pub request: Arc<serde_json::Value>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Ring buffer of the most recent job outcomes, oldest first.
#[derive(Debug)]
pub struct OutcomeLog {
    entries: VecDeque<JobOutcome>,
    capacity: usize,
}

impl OutcomeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, outcome: JobOutcome) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(outcome);
    }

    pub fn entries(&self) -> Vec<JobOutcome> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
