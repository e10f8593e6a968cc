//! Single-flight recovery
//!
//! Exactly one task runs recovery at a time; any other caller that finds it
//! in progress returns at once. A run goes through these steps:
//!
//! 1. emit `TemporarilyLost`
//! 2. retry the current endpoint every `serverStatusPollingInterval` for up
//!    to `maxServerWaitTime`; after a successful probe, replay the
//!    notification subscriptions and emit `Restored`
//! 3. otherwise try the other endpoints in list order; the first one that
//!    answers becomes active, gets fresh bootstrap metadata and replayed
//!    subscriptions, and `Opened` is emitted
//! 4. if nothing answers, the session is permanently disconnected and
//!    `Failed` is emitted
//!
//! Shutdown while step 2 sleeps finalizes as failed.

use restmx_common::{RestmxError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::SessionShared;
use crate::endpoint::Endpoint;
use crate::events::LifecycleEvent;

/// Clears the in-progress flag however the run ends, cancellation included.
struct RecoveryGuard<'a>(&'a AtomicBool);

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum RetryOutcome {
    Restored,
    GaveUp,
    Interrupted,
}

impl SessionShared {
    pub(crate) async fn recover(&self, cause: &RestmxError) {
        self.recover_from(cause, false).await
    }

    /// Runs recovery unless another task already is.
    ///
    /// # Arguments
    /// * `cause` - The error that triggered recovery, attached to the events
    /// * `skip_current` - Go straight to the other endpoints
    pub(crate) async fn recover_from(&self, cause: &RestmxError, skip_current: bool) {
        if self
            .recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Recovery already in progress");
            return;
        }
        let _guard = RecoveryGuard(&self.recovering);

        if !self.is_connected() {
            return;
        }
        self.recoveries.fetch_add(1, Ordering::SeqCst);

        let cause = Arc::new(cause.snapshot());
        let original = self.active.get();
        warn!(endpoint = %original, error = %cause, "Connection temporarily lost");
        self.events
            .emit(LifecycleEvent::TemporarilyLost(Arc::clone(&cause)));

        let max_wait = self.settings.max_server_wait_time;
        if !skip_current && !max_wait.is_zero() {
            match self.retry_current(&original, max_wait).await {
                RetryOutcome::Restored => return,
                RetryOutcome::Interrupted => {
                    debug!("Recovery interrupted by shutdown");
                    self.connection_failed(cause).await;
                    return;
                }
                RetryOutcome::GaveUp => {
                    debug!(endpoint = %original, "Gave up waiting for endpoint");
                }
            }
        }

        for endpoint in self.endpoints.iter() {
            if *endpoint == original || !self.probe(endpoint).await {
                continue;
            }
            // tentative; a later endpoint or the failure path overrides it
            self.active.set(endpoint.clone());

            match self.adopt_endpoint().await {
                Ok(()) => {
                    if self.settings.log_failovers {
                        info!(from = %original, to = %endpoint, "Failed over to endpoint");
                    } else {
                        debug!(from = %original, to = %endpoint, "Failed over to endpoint");
                    }
                    return;
                }
                Err(err) => {
                    debug!(%endpoint, error = %err, "Could not adopt endpoint");
                }
            }
        }

        self.connection_failed(cause).await;
    }

    async fn retry_current(&self, endpoint: &Endpoint, max_wait: Duration) -> RetryOutcome {
        let deadline = Instant::now() + max_wait;
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                return RetryOutcome::Interrupted;
            }

            if self.probe(endpoint).await {
                match self.notifications.restore(self).await {
                    Ok(errors) => {
                        let errors = if errors.is_empty() {
                            None
                        } else {
                            Some(errors.into_iter().map(Arc::new).collect())
                        };
                        info!(%endpoint, "Connection restored");
                        self.events.emit(LifecycleEvent::Restored(errors));
                        return RetryOutcome::Restored;
                    }
                    Err(err) => {
                        debug!(%endpoint, error = %err, "Endpoint answered but restore failed");
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return RetryOutcome::GaveUp;
            }
            let pause = (deadline - now).min(self.settings.server_status_polling_interval);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => return RetryOutcome::Interrupted,
            }
        }
    }

    /// Finishes a switch to the newly active endpoint.
    async fn adopt_endpoint(&self) -> Result<()> {
        if self.initializing.load(Ordering::SeqCst) {
            // bootstrap reloads the metadata itself and the connector emits Opened
            return Ok(());
        }
        self.load_server_info().await?;
        let dropped = self.notifications.restore(self).await?;
        for err in &dropped {
            warn!(error = %err, "Dropped subscription while failing over");
        }
        self.events.emit(LifecycleEvent::Opened);
        Ok(())
    }

    /// Marks the session permanently disconnected and emits `Failed`.
    pub(crate) async fn connection_failed(&self, cause: Arc<RestmxError>) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        warn!(error = %cause, "Connection failed");
        self.events.emit(LifecycleEvent::Failed(cause));

        // the worker may be running this; the stop signal cancels it at its next await
        self.notifications.discard().await;
        self.poller.signal_stop();
    }
}
