// Per-target mutual exclusion.
//
// The fast-path job and the batch sweep can both pick up the same target.
// Every check-and-transition sequence holds the lock for its (kind, id) so at
// most one backend call and one state transition is in flight per target.

use super::moderation_models::TargetRef;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct TargetLocks {
    locks: Arc<DashMap<TargetRef, Arc<Mutex<()>>>>,
}

/// Held for the duration of one critical section.
pub struct TargetGuard {
    target: TargetRef,
    locks: Arc<DashMap<TargetRef, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no one else holds `target`, then hold it.
    pub async fn acquire(&self, target: TargetRef) -> TargetGuard {
        let mutex = self
            .locks
            .entry(target)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;

        TargetGuard {
            target,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of targets with a live lock entry.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        // Release first, then forget the entry if nobody else is waiting on it:
        // once every waiter is gone the map holds the only reference.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.target, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_target_is_serialized() {
        let locks = Arc::new(TargetLocks::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let in_section = Arc::clone(&in_section);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(TargetRef::post(1)).await;
                let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_targets_do_not_block() {
        let locks = TargetLocks::new();

        let _post = locks.acquire(TargetRef::post(1)).await;
        let comment = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(TargetRef::comment(1)),
        )
        .await;

        assert!(comment.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
