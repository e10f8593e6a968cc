//! Background polling worker
//!
//! One task per session. In `Failover` mode it re-probes the active endpoint
//! every `serverFailoverInterval`; in `Notification` mode it fetches the
//! notification inbox every `notificationFetchInterval`, looping again at once
//! while batches keep arriving. Any failure drives recovery and the loop
//! carries on. A mode switch wakes the worker out of its sleep.

use hyper::Method;
use restmx_common::{NotificationRecord, ROOT_PATH};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{RequestOptions, SessionShared};
use crate::events::LifecycleEvent;

/// How long `stop` waits for the worker before aborting it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Health checks of the active endpoint.
    Failover,
    /// Inbox fetches for subscribed notifications.
    Notification,
}

enum PollStep {
    /// A batch was delivered; fetch again without sleeping.
    Again,
    Wait,
}

struct WorkerTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub(crate) struct PollingWorker {
    mode: watch::Sender<PollMode>,
    task: Mutex<Option<WorkerTask>>,
}

impl PollingWorker {
    pub fn new() -> Self {
        let (mode, _) = watch::channel(PollMode::Failover);
        Self {
            mode,
            task: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> PollMode {
        *self.mode.borrow()
    }

    /// Switches mode, waking a sleeping worker.
    pub fn set_mode(&self, mode: PollMode) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            debug!(?previous, ?mode, "Poll mode changed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Spawns the worker unless one is already running.
    pub fn start(&self, session: &Arc<SessionShared>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::downgrade(session), self.mode.subscribe(), stop_rx));
        debug!(mode = ?self.mode(), "Polling worker started");
        *task = Some(WorkerTask { stop, handle });
    }

    /// Asks the worker to exit without waiting for it.
    pub fn signal_stop(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            task.stop.send_replace(true);
        }
    }

    /// Stops the worker, waiting up to two seconds before aborting it.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(WorkerTask { stop, mut handle }) = task else {
            return;
        };
        stop.send_replace(true);
        if tokio::time::timeout(JOIN_TIMEOUT, &mut handle).await.is_err() {
            warn!("Polling worker did not stop in time, aborting it");
            handle.abort();
        }
        debug!("Polling worker stopped");
    }
}

async fn run(session: Weak<SessionShared>, mut mode: watch::Receiver<PollMode>, mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            break;
        }
        let current = *mode.borrow_and_update();
        let Some(shared) = session.upgrade() else {
            break;
        };
        if !shared.is_connected() {
            break;
        }

        let step = tokio::select! {
            step = shared.poll_once(current) => step,
            _ = stop.changed() => break,
        };
        let delay = match step {
            PollStep::Again => continue,
            PollStep::Wait => shared.poll_interval(current),
        };
        drop(shared);

        match delay {
            Some(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = mode.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            // no health checks configured: idle until notifications need fetching
            None => {
                tokio::select! {
                    changed = mode.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        }
    }
    debug!("Polling worker exiting");
}

impl SessionShared {
    fn poll_interval(&self, mode: PollMode) -> Option<Duration> {
        match mode {
            PollMode::Failover => self.settings.server_failover_interval,
            PollMode::Notification => Some(self.settings.notification_fetch_interval),
        }
    }

    async fn poll_once(&self, mode: PollMode) -> PollStep {
        match mode {
            PollMode::Failover => {
                let url = format!("{}://{}{}", self.scheme.as_str(), self.active.get(), ROOT_PATH);
                if let Err(err) = self
                    .send_raw(Method::GET, url, None, RequestOptions::unrouted())
                    .await
                {
                    debug!(error = %err, "Health check failed");
                    self.recover(&err).await;
                }
                PollStep::Wait
            }
            PollMode::Notification => {
                let Some(inbox) = self.notifications.inbox_url() else {
                    return PollStep::Wait;
                };
                let options = RequestOptions {
                    timeout: Some(self.settings.notification_read_timeout),
                    ignore_routing: true,
                };
                let fetched = self
                    .send_raw(Method::GET, inbox.resolve(), None, options)
                    .await
                    .and_then(|body| self.decode::<Vec<NotificationRecord>>(&body));

                let records = match fetched {
                    Ok(records) => records,
                    Err(err) => {
                        debug!(error = %err, "Inbox fetch failed");
                        self.recover(&err).await;
                        return PollStep::Wait;
                    }
                };
                if records.is_empty() {
                    return PollStep::Wait;
                }

                debug!(count = records.len(), "Received notifications");
                for record in records {
                    if !self.is_connected() {
                        break;
                    }
                    if let Some(lost) = self.notifications.deliver(record).await {
                        self.events
                            .emit(LifecycleEvent::NotificationLost(Box::new(lost)));
                    }
                }
                PollStep::Again
            }
        }
    }
}
