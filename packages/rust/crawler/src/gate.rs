//! Render admission gate.
//!
//! Bounds the number of documents being rendered at once, independent of
//! how many retrievals or extractions are running. Inside the gate, content
//! appends share a read lock while document creation and finalisation take
//! the write lock.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore};

use docassembler_shared::{DocAssemblerError, Result};

/// Counting gate plus readers-many/writer-one lock for the render stage.
#[derive(Debug, Clone)]
pub struct RenderGate {
    permits: Arc<Semaphore>,
    lock: Arc<RwLock<()>>,
    pool_size: usize,
}

/// Held for the lifetime of one document render.
#[derive(Debug)]
pub struct RenderPermit {
    _permit: OwnedSemaphorePermit,
}

impl RenderGate {
    /// A gate admitting at most `pool_size` concurrent renders (minimum 1).
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(pool_size)),
            lock: Arc::new(RwLock::new(())),
            pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Free render slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a render slot.
    pub async fn admit(&self) -> Result<RenderPermit> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DocAssemblerError::Render("render gate closed".into()))?;
        Ok(RenderPermit { _permit: permit })
    }

    /// Shared access for content-emitting operations.
    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Exclusive access for creation, finalisation and structural edits.
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn admits_at_most_pool_size() {
        let gate = RenderGate::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.admit().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn zero_pool_size_still_admits_one() {
        let gate = RenderGate::new(0);
        assert_eq!(gate.pool_size(), 1);
        let _permit = gate.admit().await.unwrap();
        assert_eq!(gate.available(), 0);
    }

    #[tokio::test]
    async fn exclusive_waits_for_shared_holders() {
        let gate = RenderGate::new(1);
        let read = gate.shared().await;
        let write = tokio::time::timeout(Duration::from_millis(20), gate.exclusive()).await;
        assert!(write.is_err());
        drop(read);
        let _write = gate.exclusive().await;
    }
}
