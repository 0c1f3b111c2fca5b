// src/worker/lease.rs

//! Lease heartbeat for in-flight crawl slots.
//!
//! The renewer owns only a clone of the slot's cancellation token, never
//! the slot itself; losing the lease cancels the token and the slot's
//! in-flight I/O unwinds at its next suspension point.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::state::{RenewOutcome, StateStore};

pub struct LeaseRenewer {
    handle: JoinHandle<()>,
}

impl LeaseRenewer {
    /// Spawn a heartbeat renewing `url_hash`'s lease at roughly one third
    /// of the lease interval, until the slot token is cancelled or the
    /// lease is lost.
    pub fn spawn(
        state: Arc<dyn StateStore>,
        url_hash: String,
        owner_id: String,
        lease: Duration,
        slot: CancellationToken,
    ) -> Self {
        let interval = (lease / 3).max(Duration::from_millis(100));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = slot.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match state.renew_lease(&url_hash, &owner_id, lease).await {
                    Ok(RenewOutcome::Renewed) => {
                        debug!(url_hash, "lease renewed");
                    }
                    Ok(RenewOutcome::Lost) => {
                        warn!(url_hash, "lease lost, cancelling slot");
                        slot.cancel();
                        break;
                    }
                    Err(e) => {
                        // Transient store trouble: keep trying, the lease
                        // may still be alive. Expiry is the backstop.
                        warn!(url_hash, error = %e, "lease renewal attempt failed");
                    }
                }
            }
        });

        Self { handle }
    }
}

impl Drop for LeaseRenewer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::memory::InMemoryStateStore;
    use crate::state::AcquireOutcome;

    #[tokio::test]
    async fn test_renewer_extends_short_lease() {
        let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new(3));
        let lease = Duration::from_millis(300);

        let outcome = state
            .try_acquire("https://example.test/a", "example.test", "h1", "w1", lease)
            .await
            .unwrap();
        assert_eq!(outcome, AcquireOutcome::Acquired);

        let slot = CancellationToken::new();
        let _renewer = LeaseRenewer::spawn(Arc::clone(&state), "h1".into(), "w1".into(), lease, slot.clone());

        // Without renewal the lease would lapse well within this window.
        tokio::time::sleep(Duration::from_millis(700)).await;
        let contender = state
            .try_acquire("https://example.test/a", "example.test", "h1", "w2", lease)
            .await
            .unwrap();
        assert_eq!(contender, AcquireOutcome::AlreadyHeld);
        assert!(!slot.is_cancelled());
    }

    #[tokio::test]
    async fn test_lost_lease_cancels_slot() {
        let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new(3));
        let lease = Duration::from_millis(200);

        state
            .try_acquire("https://example.test/a", "example.test", "h1", "w1", Duration::ZERO)
            .await
            .unwrap();
        // Another worker reclaims the expired lease immediately.
        state
            .try_acquire("https://example.test/a", "example.test", "h1", "w2", Duration::from_secs(60))
            .await
            .unwrap();

        let slot = CancellationToken::new();
        let _renewer = LeaseRenewer::spawn(Arc::clone(&state), "h1".into(), "w1".into(), lease, slot.clone());

        tokio::time::timeout(Duration::from_secs(2), slot.cancelled())
            .await
            .expect("slot should be cancelled after lost lease");
    }
}
