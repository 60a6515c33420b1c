// Concurrency Limiter - bounds simultaneous dispatches

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One concurrency slot; released when dropped
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

/// Fixed pool of concurrency slots backed by a semaphore
///
/// Slots are taken by the poll loop right before a claim and travel with the
/// claimed job into its dispatch task; dropping the permit after the outcome
/// is persisted frees the slot.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.free_slots())
    }

    pub fn try_acquire(&self) -> Option<SlotPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| SlotPermit { _permit: permit })
    }

    /// Take as many free slots as available, at most `max`
    pub fn try_acquire_up_to(&self, max: usize) -> Vec<SlotPermit> {
        let mut slots = Vec::with_capacity(max.min(self.capacity));
        while slots.len() < max {
            match self.try_acquire() {
                Some(slot) => slots.push(slot),
                None => break,
            }
        }
        slots
    }

    /// Wait until every slot is free, i.e. no dispatch is in flight
    ///
    /// The slots are handed back before returning, so the limiter is reusable.
    pub async fn drain(&self) {
        // The semaphore is never closed, so acquisition only fails if that changes
        if let Ok(all) = self.semaphore.acquire_many(self.capacity as u32).await {
            drop(all);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_slots_are_bounded() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_flight(), 2);

        drop(a);
        assert_eq!(limiter.free_slots(), 1);
    }

    #[test]
    fn test_acquire_up_to_takes_only_free_slots() {
        let limiter = ConcurrencyLimiter::new(3);
        let _held = limiter.try_acquire().unwrap();

        let slots = limiter.try_acquire_up_to(5);
        assert_eq!(slots.len(), 2);
        assert_eq!(limiter.free_slots(), 0);

        drop(slots);
        assert_eq!(limiter.free_slots(), 2);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_and_restores_slots() {
        let limiter = Arc::new(ConcurrencyLimiter::new(2));
        let slot = limiter.try_acquire().unwrap();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(slot);
        });

        tokio::time::timeout(Duration::from_secs(1), limiter.drain())
            .await
            .expect("drain should finish once the slot is released");
        release.await.unwrap();
        assert_eq!(limiter.free_slots(), 2);
    }
}
