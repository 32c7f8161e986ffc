use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatcher::Category;

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of one notification queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub enqueued: u64,
    /// Dequeued by the worker, including dropped ones.
    pub processed: u64,
    /// Dequeued but not delivered to the listener (malformed or unresolvable).
    pub dropped: u64,
    /// Still waiting in the queue.
    pub queued: u64,
}

/// Per-category dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    counters: [Counters; Category::COUNT],
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_enqueued(&self, category: Category) {
        self.counters[category.index()]
            .enqueued
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self, category: Category, delivered: bool) {
        let counters = &self.counters[category.index()];
        if !delivered {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, category: Category) -> CategoryStats {
        let counters = &self.counters[category.index()];
        let enqueued = counters.enqueued.load(Ordering::Relaxed);
        let processed = counters.processed.load(Ordering::Relaxed);
        CategoryStats {
            enqueued,
            processed,
            dropped: counters.dropped.load(Ordering::Relaxed),
            queued: enqueued.saturating_sub(processed),
        }
    }

    pub fn all(&self) -> Vec<(Category, CategoryStats)> {
        Category::ALL
            .iter()
            .map(|&category| (category, self.snapshot(category)))
            .collect()
    }
}
