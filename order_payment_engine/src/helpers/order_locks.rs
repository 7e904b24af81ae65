//! Per-order mutual exclusion.
//!
//! Every read-validate-write sequence on an order runs while holding that order's lock, so two requests for the same
//! order are serialised while requests for different orders proceed in parallel. The lock table only holds entries
//! for orders that currently have a holder or a waiter.
//!
//! The table is owned by the database handle and shared by all of its clones, so every API built on the same
//! database in a process uses the same locks. The lock is process-local. Cross-process safety comes from the version
//! check on every order update.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::*;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::traits::PaymentGatewayError;

type LockTable = HashMap<i64, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct OrderLocks {
    table: Arc<Mutex<LockTable>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        // A panic while holding the table lock cannot leave the map half-updated, so poisoning is ignored.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits up to `timeout` for exclusive access to the order. A timeout is reported as a transient error.
    pub async fn acquire(&self, order_id: i64, timeout: Duration) -> Result<OrderLockGuard, PaymentGatewayError> {
        let lock = self.table().entry(order_id).or_default().clone();
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                trace!("🔐️ Acquired lock for order {order_id}");
                Ok(OrderLockGuard { order_id, locks: self.clone(), _guard: guard })
            },
            Err(_) => {
                self.prune(order_id, 1);
                warn!("🔐️ Timed out after {}ms waiting for the lock on order {order_id}", timeout.as_millis());
                Err(PaymentGatewayError::Transient(format!("Timed out waiting for the lock on order {order_id}")))
            },
        }
    }

    /// Number of orders that currently have a holder or waiters.
    pub fn active_locks(&self) -> usize {
        self.table().len()
    }

    // Removes the entry if nobody but the table (plus `held` references owned by the caller) refers to it.
    fn prune(&self, order_id: i64, held: usize) {
        let mut table = self.table();
        if table.get(&order_id).is_some_and(|lock| Arc::strong_count(lock) <= held) {
            table.remove(&order_id);
        }
    }
}

/// Exclusive access to one order. Released on drop.
pub struct OrderLockGuard {
    order_id: i64,
    locks: OrderLocks,
    _guard: OwnedMutexGuard<()>,
}

impl OrderLockGuard {
    pub fn order_id(&self) -> i64 {
        self.order_id
    }
}

impl Drop for OrderLockGuard {
    fn drop(&mut self) {
        // The table entry and our own guard account for two references. Any more means someone is waiting.
        self.locks.prune(self.order_id, 2);
        trace!("🔐️ Released lock for order {}", self.order_id);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn same_order_is_serialised() {
        let locks = OrderLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let mut jobs = Vec::new();
        for _ in 0..10 {
            let locks = locks.clone();
            let inside = inside.clone();
            jobs.push(tokio::spawn(async move {
                let _guard = locks.acquire(7, Duration::from_secs(5)).await.unwrap();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for job in jobs {
            job.await.unwrap();
        }
        assert_eq!(locks.active_locks(), 0);
    }

    #[tokio::test]
    async fn different_orders_do_not_block() {
        let locks = OrderLocks::new();
        let _a = locks.acquire(1, Duration::from_millis(50)).await.unwrap();
        let _b = locks.acquire(2, Duration::from_millis(50)).await.unwrap();
        assert_eq!(locks.active_locks(), 2);
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let locks = OrderLocks::new();
        let guard = locks.acquire(1, Duration::from_millis(50)).await.unwrap();
        let err = locks.acquire(1, Duration::from_millis(20)).await.err().unwrap();
        assert!(err.is_transient());
        drop(guard);
        assert_eq!(locks.active_locks(), 0);
    }
}
