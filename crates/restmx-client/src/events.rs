use restmx_common::{Notification, RestmxError, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Connection lifecycle event.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Opened,
    Closed,
    Failed(Arc<RestmxError>),
    /// A fetched notification that no subscription could take.
    NotificationLost(Box<Notification>),
    TemporarilyLost(Arc<RestmxError>),
    /// Connection is back on the same endpoint; carries the non-fatal errors
    /// hit while replaying subscriptions, if any.
    Restored(Option<Vec<Arc<RestmxError>>>),
}

impl LifecycleEvent {
    pub fn kind(&self) -> LifecycleEventKind {
        match self {
            LifecycleEvent::Opened => LifecycleEventKind::Opened,
            LifecycleEvent::Closed => LifecycleEventKind::Closed,
            LifecycleEvent::Failed(_) => LifecycleEventKind::Failed,
            LifecycleEvent::NotificationLost(_) => LifecycleEventKind::NotificationLost,
            LifecycleEvent::TemporarilyLost(_) => LifecycleEventKind::TemporarilyLost,
            LifecycleEvent::Restored(_) => LifecycleEventKind::Restored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEventKind {
    Opened,
    Closed,
    Failed,
    NotificationLost,
    TemporarilyLost,
    Restored,
}

/// An event as delivered to listeners.
#[derive(Debug, Clone)]
pub struct LifecycleNotification {
    pub connection_id: String,
    pub sequence_number: u64,
    pub event: LifecycleEvent,
}

/// Selects the event kinds a listener wants.
#[derive(Debug, Clone, Default)]
pub struct LifecycleFilter {
    kinds: HashSet<LifecycleEventKind>,
}

impl LifecycleFilter {
    pub fn only<I: IntoIterator<Item = LifecycleEventKind>>(kinds: I) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn is_enabled(&self, event: &LifecycleEvent) -> bool {
        self.kinds.contains(&event.kind())
    }
}

pub trait LifecycleListener: Send + Sync {
    fn handle_event(&self, notification: &LifecycleNotification);
}

impl<F> LifecycleListener for F
where
    F: Fn(&LifecycleNotification) + Send + Sync,
{
    fn handle_event(&self, notification: &LifecycleNotification) {
        self(notification)
    }
}

type Registration = (Arc<dyn LifecycleListener>, Option<LifecycleFilter>);

/// Fans lifecycle events out to connector listeners.
pub struct LifecycleEmitter {
    connection_id: String,
    sequence: AtomicU64,
    listeners: RwLock<Vec<Registration>>,
}

impl LifecycleEmitter {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            sequence: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>, filter: Option<LifecycleFilter>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((listener, filter));
    }

    /// Removes every registration of `listener`.
    pub fn remove_listener(&self, listener: &Arc<dyn LifecycleListener>) -> Result<()> {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| Arc::as_ptr(registered) as *const () != Arc::as_ptr(listener) as *const ());
        if listeners.len() == before {
            return Err(RestmxError::ListenerNotFound("lifecycle listener".to_string()));
        }
        Ok(())
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let notification = LifecycleNotification {
            connection_id: self.connection_id.clone(),
            sequence_number: self.sequence.fetch_add(1, Ordering::SeqCst),
            event,
        };
        debug!(
            connection = %self.connection_id,
            sequence = notification.sequence_number,
            kind = ?notification.event.kind(),
            "Lifecycle event"
        );

        // Deliver outside the lock so listeners may (un)register themselves
        let targets: Vec<Registration> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (listener, filter) in targets {
            if filter.as_ref().map_or(true, |f| f.is_enabled(&notification.event)) {
                listener.handle_event(&notification);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<dyn LifecycleListener>, Arc<Mutex<Vec<LifecycleEventKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<dyn LifecycleListener> = Arc::new(move |n: &LifecycleNotification| {
            sink.lock().unwrap().push(n.event.kind());
        });
        (listener, seen)
    }

    #[test]
    fn test_emit_reaches_all_listeners() {
        let emitter = LifecycleEmitter::new("conn-1");
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        emitter.add_listener(a, None);
        emitter.add_listener(b, None);

        emitter.emit(LifecycleEvent::Opened);
        emitter.emit(LifecycleEvent::Closed);

        assert_eq!(*seen_a.lock().unwrap(), vec![LifecycleEventKind::Opened, LifecycleEventKind::Closed]);
        assert_eq!(seen_b.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_filter_limits_delivery() {
        let emitter = LifecycleEmitter::new("conn-1");
        let (listener, seen) = recorder();
        emitter.add_listener(listener, Some(LifecycleFilter::only([LifecycleEventKind::Failed])));

        emitter.emit(LifecycleEvent::Opened);
        emitter.emit(LifecycleEvent::Failed(Arc::new(RestmxError::NoAvailableEndpoints)));

        assert_eq!(*seen.lock().unwrap(), vec![LifecycleEventKind::Failed]);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let emitter = LifecycleEmitter::new("conn-1");
        let numbers = Arc::new(Mutex::new(Vec::new()));
        let sink = numbers.clone();
        emitter.add_listener(
            Arc::new(move |n: &LifecycleNotification| {
                assert_eq!(n.connection_id, "conn-1");
                sink.lock().unwrap().push(n.sequence_number);
            }),
            None,
        );

        for _ in 0..3 {
            emitter.emit(LifecycleEvent::Opened);
        }
        assert_eq!(*numbers.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_listener() {
        let emitter = LifecycleEmitter::new("conn-1");
        let (listener, seen) = recorder();
        emitter.add_listener(listener.clone(), None);

        emitter.remove_listener(&listener).unwrap();
        emitter.emit(LifecycleEvent::Opened);
        assert!(seen.lock().unwrap().is_empty());

        assert!(matches!(
            emitter.remove_listener(&listener),
            Err(RestmxError::ListenerNotFound(_))
        ));
    }
}
