//! WorkerPool - 同時実行数の上限
//!
//! counting semaphore で admission を 1 回の atomic な acquire にする。
//! dispatch loop は pop の前に Slot を取り、メッセージが来たら `occupy()` して worker に渡す。
//! WorkerSlot が drop されると active が減り、permit が返る。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    capacity: usize,
}

/// A reserved but not yet running slot.
pub struct Slot {
    permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

/// A slot owned by a running worker.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Slot {
    pub fn occupy(self) -> WorkerSlot {
        self.active.fetch_add(1, Ordering::SeqCst);
        WorkerSlot {
            _permit: self.permit,
            active: self.active,
        }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Wait until a worker slot is free and reserve it.
    pub async fn acquire(&self) -> Result<Slot, AcquireError> {
        if self.slots.available_permits() == 0 {
            debug!(active = self.active(), "Waiting for worker slot");
        }
        let permit = Arc::clone(&self.slots).acquire_owned().await?;
        Ok(Slot {
            permit,
            active: Arc::clone(&self.active),
        })
    }

    /// Number of running workers.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_active_counts_only_occupied_slots() {
        let pool = WorkerPool::new(2);
        let reserved = pool.acquire().await.unwrap();
        assert_eq!(pool.active(), 0);

        let running = reserved.occupy();
        assert_eq!(pool.active(), 1);

        drop(running);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.capacity(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_release() {
        let pool = WorkerPool::new(1);
        let held = pool.acquire().await.unwrap().occupy();

        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire().await.map(|_| ()) }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_reservation_frees_capacity() {
        let pool = WorkerPool::new(1);
        let reserved = pool.acquire().await.unwrap();
        drop(reserved);
        let again = pool.acquire().await.unwrap().occupy();
        assert_eq!(pool.active(), 1);
        drop(again);
    }
}
