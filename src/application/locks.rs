use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slots = HashMap<String, Arc<Mutex<()>>>;

/// One async mutex per operation id.
///
/// Serializes `confirm`, `refund` and webhook reconciliation touching the
/// same operation while leaving unrelated operations concurrent. A slot
/// lives only as long as someone holds or waits for it.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Arc<StdMutex<Slots>>,
}

/// Exclusive access to one key. Dropping the last guard for a key removes
/// its slot.
pub struct KeyGuard {
    key: String,
    slot: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<StdMutex<Slots>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.to_string()).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            slot,
            guard: Some(guard),
            slots: self.slots.clone(),
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here: nobody else holds or awaits it.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("pi_1").await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(locks.slot_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _first = locks.lock("pi_1").await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock("pi_2")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_slots_are_released_with_their_guards() {
        let locks = KeyedLocks::new();
        let first = locks.lock("pi_1").await;
        let second = locks.lock("pi_2").await;
        assert_eq!(locks.slot_count(), 2);

        drop(first);
        assert_eq!(locks.slot_count(), 1);
        drop(second);
        assert_eq!(locks.slot_count(), 0);

        for i in 0..100 {
            let _guard = locks.lock(&format!("pi_forged_{i}")).await;
        }
        assert_eq!(locks.slot_count(), 0);
    }

    #[tokio::test]
    async fn test_slot_survives_while_a_waiter_is_queued() {
        let locks = Arc::new(KeyedLocks::new());
        let held = locks.lock("pi_1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("pi_1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        assert_eq!(locks.slot_count(), 1);
        waiter.await.unwrap();
        assert_eq!(locks.slot_count(), 0);
    }
}
