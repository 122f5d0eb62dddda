//! Latest-result cache shared between the control loop and classification
//! workers.
//!
//! The cache is the only resource mutated from more than one thread.
//! Consistency does not rely on writer exclusion: workers may race to
//! publish, and the cache stays convergent because a write is applied only
//! when its frame sequence is strictly greater than the stored one. A slow,
//! older request can therefore never clobber a newer result that completed
//! first.

use std::sync::{Arc, Mutex, PoisonError};

use crate::ClassificationResult;

/// Concurrency-safe holder of the most recent classification result.
///
/// Cloning yields another handle to the same storage. Reads copy the value
/// out and never fail; writes are infrequent (at most one per submission
/// period), so a plain mutex around the single value is sufficient.
#[derive(Clone, Debug, Default)]
pub struct ResultCache {
    inner: Arc<Mutex<ClassificationResult>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `candidate` if it is strictly newer than the current value.
    ///
    /// Returns whether the write was applied. Candidates with a lower or
    /// equal frame sequence are discarded.
    pub fn publish(&self, candidate: ClassificationResult) -> bool {
        let mut current = self.lock();
        if candidate.frame_seq > current.frame_seq {
            *current = candidate;
            true
        } else {
            false
        }
    }

    /// Copy out the latest stored result.
    ///
    /// Returns the default (neutral, sequence 0) until the first publish.
    pub fn read(&self) -> ClassificationResult {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClassificationResult> {
        // The stored value is plain data; a panic in a lock holder cannot
        // leave it half-written, so a poisoned lock is recoverable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
