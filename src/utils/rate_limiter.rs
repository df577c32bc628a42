/// Minimum spacing between vendor requests
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces calls at least `interval` apart across all workers.
///
/// Independent of the daily call budget: the budget caps volume, the pacer caps rate.
#[derive(Clone)]
pub struct RequestPacer {
    interval: Duration,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        RequestPacer {
            interval,
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Pacer that never waits
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next slot and sleep until it opens.
    ///
    /// The lock only covers the reservation, not the sleep.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let wait_until = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(wait_until).await;
    }
}
