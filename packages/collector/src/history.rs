use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::Payload;

/// Fixed-capacity, newest-first buffer of captured payloads for one endpoint.
///
/// Appending at capacity evicts the oldest entry. Order always reflects
/// capture order.
#[derive(Debug)]
pub struct PayloadHistory {
    entries: VecDeque<Arc<Payload>>,
    capacity: usize,
}

impl PayloadHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest entry once at capacity.
    pub fn append(&mut self, payload: Arc<Payload>) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(payload);
    }

    /// Capture timestamp of the newest entry, if any.
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.front().map(|payload| payload.timestamp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-consistent copy of the whole history, newest first.
    pub fn snapshot(&self) -> Vec<Arc<Payload>> {
        self.entries.iter().cloned().collect()
    }

    /// Newest-first page of the history.
    pub fn page(&self, limit: usize, offset: usize) -> Vec<Arc<Payload>> {
        self.entries.iter().skip(offset).take(limit).cloned().collect()
    }
}
