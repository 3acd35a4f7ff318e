//! Summary cache
//!
//! Remembers replies to aggregate questions so follow-ups skip execution.
//! Entries are tagged with the dataset version they were computed from.

use crate::models::Reply;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CachedSummary {
    pub dataset_version: u64,
    pub reply: Reply,
    pub created_at: DateTime<Utc>,
}

/// Bounded plan-key → summary map, oldest entry evicted first.
#[derive(Debug)]
pub struct SummaryCache {
    entries: HashMap<String, CachedSummary>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Look up a summary computed from exactly this dataset version.
    pub fn get(&self, key: &str, dataset_version: u64) -> Option<&CachedSummary> {
        self.entries
            .get(key)
            .filter(|entry| entry.dataset_version == dataset_version)
    }

    pub fn insert(&mut self, key: String, dataset_version: u64, reply: Reply) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }

        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CachedSummary {
                dataset_version,
                reply,
                created_at: Utc::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for SummaryCache {
    fn default() -> Self {
        Self::new()
    }
}
