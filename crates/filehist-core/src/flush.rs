//! When history models are durably written.
//!
//! Two policies share the same model and registry code. Eager flushes
//! after every mutation and suits stores that can vanish without
//! notice, such as a fragile remote connection. Batched only marks
//! models dirty and relies on a recurring sweep plus a mandatory
//! store-all join on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::Result;
use crate::registry::HistoryRegistry;

/// Interval between batched flush sweeps.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// When a model must be durably written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Every mutation stores synchronously before returning.
    Eager,
    /// Mutations only mark models dirty; a recurring sweep and the
    /// shutdown join perform the writes.
    Batched,
}

/// Recurring sweep driving the [`FlushPolicy::Batched`] policy.
///
/// Sweeps all registry models on a fixed interval, storing the dirty
/// ones through the registry's bounded pool. [`shutdown`] cancels the
/// timer and awaits one final store-all pass — a blocking join, so a
/// clean exit loses no data even though writes were otherwise lazy.
///
/// [`shutdown`]: FlushScheduler::shutdown
pub struct FlushScheduler {
    registry: Arc<HistoryRegistry>,
    stop: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    /// Start sweeping `registry` every `interval`.
    pub fn start(registry: Arc<HistoryRegistry>, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let sweep_stop = stop.clone();
        let sweep_registry = Arc::clone(&registry);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the
            // first sweep happens one full interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = sweep_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("sweeping history models for pending writes");
                        let sweep = CancellationToken::new();
                        if let Err(err) = sweep_registry.store_all(&sweep).await {
                            warn!(error = %err, "periodic history flush failed");
                        }
                    }
                }
            }
        });
        Self {
            registry,
            stop,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Cancel the recurring sweep and run the final store-all pass.
    /// Store failures propagate so shutdown sequencing can report
    /// them — the one place persistence errors are not swallowed.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop.cancel();
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            let _ = sweeper.await;
        }
        self.registry.store_all(&CancellationToken::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_are_distinct() {
        assert_ne!(FlushPolicy::Eager, FlushPolicy::Batched);
    }
}
