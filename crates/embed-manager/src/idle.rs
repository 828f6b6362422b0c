//! Idle eviction.
//!
//! A background task wakes on a fixed interval and unloads the model once it
//! has gone unused for longer than the configured timeout. Eviction takes the
//! same state lock as inference, so a model that is in use is never evicted.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::Inner;
use crate::state::RuntimeState;

/// Run the idle check until `shutdown` is cancelled or the manager is dropped.
pub(crate) async fn run_idle_check(
    inner: Weak<Inner>,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.evict_if_idle(timeout).await;
    }

    debug!("Idle check stopped");
}

impl Inner {
    /// Unload the model if it has been idle for at least `timeout`.
    ///
    /// Skips this round when the state lock is held: someone is loading,
    /// embedding or disposing. The release runs on the blocking pool with
    /// the lock still held. Returns true when the model was unloaded.
    pub(crate) async fn evict_if_idle(self: Arc<Self>, timeout: Duration) -> bool {
        let Ok(mut state) = Arc::clone(&self.state).try_lock_owned() else {
            debug!("Model busy, skipping idle check");
            return false;
        };

        let idle_for = match &*state {
            RuntimeState::Loaded(resources) => resources.last_used().elapsed(),
            _ => return false,
        };
        if idle_for < timeout {
            return false;
        }

        let inner = Arc::clone(&self);
        let released = tokio::task::spawn_blocking(move || {
            if let RuntimeState::Loaded(resources) =
                std::mem::replace(&mut *state, RuntimeState::Unloaded)
            {
                resources.release();
            }
            inner.update_snapshot(|s| {
                s.is_loaded = false;
                s.eviction_count += 1;
            });
        })
        .await;

        if let Err(e) = released {
            warn!(error = %e, "Idle release failed");
            return false;
        }

        info!(
            model = %self.config.model,
            idle_ms = idle_for.as_millis() as u64,
            "Unloaded idle embedding model"
        );
        true
    }
}
