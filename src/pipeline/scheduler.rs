//! Concurrency limit for in-process chunk work.
//!
//! Every chunk the local invoker runs holds a [`ChunkPermit`] for the whole
//! classification and result write. Permits release their slot on drop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// ─────────────────────────────────────────────────────────────────────────────
// ChunkScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Bounds the number of chunks processed at once by this process.
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl ChunkScheduler {
    /// Creates a scheduler with `max_concurrent` slots.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is 0.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be greater than 0");

        Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
        }
    }

    /// Waits for a free slot and claims it for `chunk_id`.
    pub async fn acquire(&self, chunk_id: &str) -> ChunkPermit {
        // The semaphore is never closed
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed unexpectedly");

        ChunkPermit {
            _permit: permit,
            chunk_id: chunk_id.to_string(),
            acquired_at: Instant::now(),
        }
    }

    /// Chunks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max - self.sem.available_permits()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChunkPermit
// ─────────────────────────────────────────────────────────────────────────────

/// A claimed processing slot. Released when dropped.
#[derive(Debug)]
pub struct ChunkPermit {
    _permit: OwnedSemaphorePermit,
    chunk_id: String,
    acquired_at: Instant,
}

impl ChunkPermit {
    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    /// Time since the slot was claimed.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
