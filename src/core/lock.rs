//! Chain lock
//!
//! A single exclusive lock over the chain store and the mempool. Everything
//! that reads a consistent chain view or mutates chain state holds it.
//! Waiters are served in FIFO order.

use crate::core::Blockchain;
use crate::mining::Mempool;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// State guarded by the chain lock
#[derive(Debug, Default)]
pub struct ChainState {
    pub chain: Blockchain,
    pub mempool: Mempool,
}

impl ChainState {
    pub fn new(chain: Blockchain, mempool: Mempool) -> Self {
        Self { chain, mempool }
    }
}

/// Shared handle to the chain lock
#[derive(Debug, Clone)]
pub struct ChainLock {
    inner: Arc<Mutex<ChainState>>,
}

impl ChainLock {
    pub fn new(state: ChainState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Wait for exclusive access. `purpose` only shows up in trace logs.
    pub async fn acquire(&self, purpose: &'static str) -> ChainGuard {
        log::trace!("Waiting for chain lock ({})", purpose);
        let guard = self.inner.clone().lock_owned().await;
        log::trace!("Chain lock acquired ({})", purpose);

        ChainGuard {
            guard,
            purpose,
            acquired_at: Instant::now(),
        }
    }

    /// Take the lock only if nobody holds it
    pub fn try_acquire(&self, purpose: &'static str) -> Option<ChainGuard> {
        let guard = self.inner.clone().try_lock_owned().ok()?;
        Some(ChainGuard {
            guard,
            purpose,
            acquired_at: Instant::now(),
        })
    }
}

/// Exclusive access to the chain state; released on drop
#[derive(Debug)]
pub struct ChainGuard {
    guard: OwnedMutexGuard<ChainState>,
    purpose: &'static str,
    acquired_at: Instant,
}

impl ChainGuard {
    pub fn purpose(&self) -> &'static str {
        self.purpose
    }
}

impl Deref for ChainGuard {
    type Target = ChainState;

    fn deref(&self) -> &ChainState {
        &self.guard
    }
}

impl DerefMut for ChainGuard {
    fn deref_mut(&mut self) -> &mut ChainState {
        &mut self.guard
    }
}

impl Drop for ChainGuard {
    fn drop(&mut self) {
        log::trace!(
            "Chain lock released ({}) after {:?}",
            self.purpose,
            self.acquired_at.elapsed()
        );
    }
}
