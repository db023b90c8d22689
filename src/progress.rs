//! Progress reporting and cooperative cancellation for long passes.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::Serialize;

/// Cloneable cancellation flag. Checked between files while indexing,
/// between corrections while applying and between fuzzy groups.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Stage of a pass, reported after each unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum ProgressEvent {
    Indexing { done: usize, total: usize },
    Resolving { done: usize, total: usize },
    Fuzzy { done: usize, total: usize },
}

/// Progress sink that ignores every event.
pub fn no_progress(_: ProgressEvent) {}
