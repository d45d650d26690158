// Periodic token expiry check
// Ticks only while a credential is held and goes idle the moment it is dropped

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::manager::SessionManager;

/// Background task calling `SessionManager::check_expiration` on a fixed period.
///
/// The task waits while signed out, starts ticking when a credential appears
/// and stops ticking as soon as the session is cleared. Cancelling its token,
/// calling `stop` or dropping the scheduler ends it for good.
pub struct ExpiryScheduler {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ExpiryScheduler {
    /// Spawn the scheduler on the current runtime
    pub fn spawn(manager: Arc<SessionManager>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(manager, period, cancel.clone()));

        tracing::info!("Expiry scheduler started ({}s interval)", period.as_secs_f64());
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Token that stops the scheduler when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Cancel and wait for the task to finish
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Expiry scheduler ended abnormally: {}", e);
            }
        }
        tracing::info!("Expiry scheduler stopped");
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(manager: Arc<SessionManager>, period: Duration, cancel: CancellationToken) {
    let mut authenticated = manager.subscribe();

    loop {
        // Idle until a credential is held
        while !*authenticated.borrow_and_update() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = authenticated.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        tracing::debug!("Session active, checking expiry every {:?}", period);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = authenticated.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*authenticated.borrow_and_update() {
                        tracing::debug!("Session cleared, expiry checks paused");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match manager.check_expiration().await {
                        Ok(true) => tracing::debug!("Token refreshed by expiry check"),
                        Ok(false) => {}
                        Err(e) => tracing::warn!("Expiry check failed: {}", e),
                    }
                }
            }
        }
    }
}
