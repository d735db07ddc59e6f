//! Mining session
//!
//! Shared state read by workers and the node: the current task, whether the
//! initial sync finished, and stats of the last assembled template.

use crate::mining::MiningTask;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Statistics of the last assembled template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiningStats {
    /// Transactions in the template, payout included
    pub tx_count: usize,
    /// Raw block size in bytes
    pub block_size: usize,
    /// Tasks published since startup
    pub tasks_published: u64,
}

#[derive(Debug)]
pub struct Session {
    task: watch::Sender<Arc<MiningTask>>,
    synced: AtomicBool,
    tx_count: AtomicUsize,
    block_size: AtomicUsize,
    tasks_published: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (task, _) = watch::channel(Arc::new(MiningTask::inactive()));
        Self {
            task,
            synced: AtomicBool::new(false),
            tx_count: AtomicUsize::new(0),
            block_size: AtomicUsize::new(0),
            tasks_published: AtomicU64::new(0),
        }
    }

    /// Replace the visible task in one swap
    pub fn publish(&self, task: MiningTask) {
        if task.active {
            self.tasks_published.fetch_add(1, Ordering::Relaxed);
        }
        self.task.send_replace(Arc::new(task));
    }

    pub fn current(&self) -> Arc<MiningTask> {
        self.task.borrow().clone()
    }

    /// Receive every task replacement
    pub fn subscribe(&self) -> watch::Receiver<Arc<MiningTask>> {
        self.task.subscribe()
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::Release);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn record_stats(&self, tx_count: usize, block_size: usize) {
        self.tx_count.store(tx_count, Ordering::Relaxed);
        self.block_size.store(block_size, Ordering::Relaxed);
    }

    pub fn stats(&self) -> MiningStats {
        MiningStats {
            tx_count: self.tx_count.load(Ordering::Relaxed),
            block_size: self.block_size.load(Ordering::Relaxed),
            tasks_published: self.tasks_published.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_notifies_subscribers() {
        let session = Session::new();
        let mut rx = session.subscribe();
        assert!(!session.current().active);

        let task = MiningTask {
            active: true,
            reward: 42,
            ..MiningTask::default()
        };
        session.publish(task.clone());

        rx.changed().await.unwrap();
        assert_eq!(**rx.borrow(), task);
        assert_eq!(session.stats().tasks_published, 1);

        session.publish(MiningTask::inactive());
        assert_eq!(session.stats().tasks_published, 1);
        assert!(!session.current().active);
    }

    #[test]
    fn test_sync_flag_and_stats() {
        let session = Session::new();
        assert!(!session.is_synced());
        session.set_synced(true);
        assert!(session.is_synced());

        session.record_stats(4, 1_000);
        assert_eq!(session.stats().tx_count, 4);
        assert_eq!(session.stats().block_size, 1_000);
    }
}
