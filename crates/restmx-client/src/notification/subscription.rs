use restmx_common::{FilterSpec, Notification, NotificationRecord, ObjectName, RoutingContext};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use super::filter::{same_object, same_optional, Handback, NotificationFilter, NotificationListener};
use crate::deferred_url::DeferredUrl;

/// Resource a subscription targets, plus the routing context it was made under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationTarget {
    pub object_name: ObjectName,
    pub routing: Option<RoutingContext>,
}

impl NotificationTarget {
    pub fn new(object_name: ObjectName, routing: Option<RoutingContext>) -> Self {
        Self { object_name, routing }
    }

    /// Target an inbox record was emitted for; `None` if the source is not a resource name.
    pub fn of_record(record: &NotificationRecord) -> Option<Self> {
        let source = record.notification.source.as_deref()?;
        let object_name = ObjectName::new(source).ok()?;
        Some(Self::new(object_name, record.routing()))
    }
}

/// One (listener, filter, handback) registration.
#[derive(Clone)]
pub(crate) struct LocalListener {
    pub listener: Arc<dyn NotificationListener>,
    pub filter: Option<Arc<dyn NotificationFilter>>,
    pub handback: Option<Handback>,
}

impl LocalListener {
    fn matches(
        &self,
        listener: &Arc<dyn NotificationListener>,
        filter: Option<&Arc<dyn NotificationFilter>>,
        handback: Option<&Handback>,
    ) -> bool {
        same_object(&self.listener, listener)
            && same_optional(self.filter.as_ref(), filter)
            && same_optional(self.handback.as_ref(), handback)
    }
}

/// Server forwarding state of a resource's client subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Forwarding {
    /// The server pre-filters with these filters.
    Filters(Vec<FilterSpec>),
    /// Some listener cannot be served by forwarded filters; the server sends
    /// everything and filtering happens locally.
    Everything,
}

impl Forwarding {
    /// Filter list to send to the server; empty means "deliver everything".
    pub fn wire_filters(&self) -> Vec<FilterSpec> {
        match self {
            Forwarding::Filters(filters) => filters.clone(),
            Forwarding::Everything => Vec::new(),
        }
    }
}

/// Client-side listeners of one resource and the server registration backing them.
pub(crate) struct ClientSubscription {
    listeners: Vec<LocalListener>,
    /// Forwarding state last pushed to the server.
    pub pushed: Option<Forwarding>,
    pub registration: Option<DeferredUrl>,
}

impl ClientSubscription {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            pushed: None,
            registration: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn add(&mut self, listener: LocalListener) {
        self.listeners.push(listener);
    }

    /// Removes every registration of `listener`, returning them.
    pub fn remove_all(&mut self, listener: &Arc<dyn NotificationListener>) -> Vec<LocalListener> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .listeners
            .drain(..)
            .partition(|entry| same_object(&entry.listener, listener));
        self.listeners = kept;
        removed
    }

    /// Removes the first registration matching all three objects.
    pub fn remove_exact(
        &mut self,
        listener: &Arc<dyn NotificationListener>,
        filter: Option<&Arc<dyn NotificationFilter>>,
        handback: Option<&Handback>,
    ) -> Option<LocalListener> {
        let index = self
            .listeners
            .iter()
            .position(|entry| entry.matches(listener, filter, handback))?;
        Some(self.listeners.remove(index))
    }

    /// Derives the forwarding state from the current listeners.
    ///
    /// Every filter forwardable: the server gets the union of them. Any
    /// listener without a filter, or with a client-only filter: everything.
    pub fn forwarding(&self) -> Forwarding {
        let mut filters = Vec::new();
        let mut seen = HashSet::new();
        for entry in &self.listeners {
            let Some(spec) = entry.filter.as_ref().and_then(|f| f.forwardable()) else {
                return Forwarding::Everything;
            };
            if seen.insert(spec.clone()) {
                filters.push(spec);
            }
        }
        Forwarding::Filters(filters)
    }

    /// Hands a notification to every listener whose filter enables it.
    ///
    /// Returns false when a listener panicked, in which case the notification
    /// counts as lost.
    pub fn deliver(&self, notification: &Notification) -> bool {
        let mut delivered = true;
        for entry in &self.listeners {
            if let Some(filter) = &entry.filter {
                if !filter.is_enabled(notification) {
                    continue;
                }
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                entry
                    .listener
                    .handle_notification(notification, entry.handback.as_ref())
            }));
            if outcome.is_err() {
                warn!(
                    notification_type = %notification.notification_type,
                    "Notification listener panicked"
                );
                delivered = false;
            }
        }
        delivered
    }
}

/// A server-resident listener registration, kept for replay after failover.
#[derive(Clone)]
pub(crate) struct ServerSubscription {
    pub target: NotificationTarget,
    pub listener: ObjectName,
    pub filter: Option<Arc<dyn NotificationFilter>>,
    pub handback: Option<Handback>,
}

impl ServerSubscription {
    pub fn matches(
        &self,
        target: &NotificationTarget,
        listener: &ObjectName,
        exact: Option<(Option<&Arc<dyn NotificationFilter>>, Option<&Handback>)>,
    ) -> bool {
        if &self.target != target || &self.listener != listener {
            return false;
        }
        match exact {
            Some((filter, handback)) => {
                same_optional(self.filter.as_ref(), filter) && same_optional(self.handback.as_ref(), handback)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::filter::{AttributeChangeFilter, FnFilter, NotificationTypeFilter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener() -> (Arc<dyn NotificationListener>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        let listener: Arc<dyn NotificationListener> = Arc::new(move |_: &Notification, _: Option<&Handback>| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        (listener, count)
    }

    fn entry(listener: &Arc<dyn NotificationListener>, filter: Option<Arc<dyn NotificationFilter>>) -> LocalListener {
        LocalListener {
            listener: listener.clone(),
            filter,
            handback: None,
        }
    }

    #[test]
    fn test_forwarding_all_forwardable() {
        let (listener, _) = counting_listener();
        let types: Arc<dyn NotificationFilter> = Arc::new(NotificationTypeFilter::new().enable_type("cache."));
        let attrs: Arc<dyn NotificationFilter> = Arc::new(AttributeChangeFilter::new().enable_attribute("Size"));

        let mut subscription = ClientSubscription::new();
        subscription.add(entry(&listener, Some(types.clone())));
        subscription.add(entry(&listener, Some(types)));
        subscription.add(entry(&listener, Some(attrs)));

        match subscription.forwarding() {
            Forwarding::Filters(filters) => assert_eq!(filters.len(), 2),
            other => panic!("unexpected forwarding: {:?}", other),
        }
    }

    #[test]
    fn test_forwarding_disabled_by_client_only_filter() {
        let (listener, _) = counting_listener();
        let types: Arc<dyn NotificationFilter> = Arc::new(NotificationTypeFilter::new().enable_type("cache."));
        let local: Arc<dyn NotificationFilter> = Arc::new(FnFilter(|_: &Notification| true));

        let mut subscription = ClientSubscription::new();
        subscription.add(entry(&listener, Some(types)));
        assert!(matches!(subscription.forwarding(), Forwarding::Filters(_)));

        subscription.add(entry(&listener, Some(local)));
        assert_eq!(subscription.forwarding(), Forwarding::Everything);
        assert!(subscription.forwarding().wire_filters().is_empty());
    }

    #[test]
    fn test_forwarding_disabled_by_unfiltered_listener() {
        let (listener, _) = counting_listener();
        let mut subscription = ClientSubscription::new();
        subscription.add(entry(&listener, None));
        assert_eq!(subscription.forwarding(), Forwarding::Everything);
    }

    #[test]
    fn test_deliver_applies_local_filters() {
        let (a, count_a) = counting_listener();
        let (b, count_b) = counting_listener();
        let only_cache: Arc<dyn NotificationFilter> = Arc::new(NotificationTypeFilter::new().enable_type("cache."));

        let mut subscription = ClientSubscription::new();
        subscription.add(entry(&a, Some(only_cache)));
        subscription.add(entry(&b, None));

        assert!(subscription.deliver(&Notification::new("pool.grown", "app:type=A", 1)));
        assert!(subscription.deliver(&Notification::new("cache.evicted", "app:type=A", 2)));

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_listener_reports_loss() {
        let listener: Arc<dyn NotificationListener> =
            Arc::new(|_: &Notification, _: Option<&Handback>| panic!("listener failure"));
        let mut subscription = ClientSubscription::new();
        subscription.add(entry(&listener, None));

        assert!(!subscription.deliver(&Notification::new("t", "app:type=A", 1)));
    }

    #[test]
    fn test_remove_variants() {
        let (a, _) = counting_listener();
        let (b, _) = counting_listener();
        let filter: Arc<dyn NotificationFilter> = Arc::new(NotificationTypeFilter::new());

        let mut subscription = ClientSubscription::new();
        subscription.add(entry(&a, None));
        subscription.add(entry(&a, Some(filter.clone())));
        subscription.add(entry(&b, None));

        assert!(subscription.remove_exact(&a, Some(&filter), None).is_some());
        assert!(subscription.remove_exact(&a, Some(&filter), None).is_none());
        assert_eq!(subscription.len(), 2);

        assert_eq!(subscription.remove_all(&a).len(), 1);
        assert_eq!(subscription.len(), 1);
        assert!(subscription.remove_all(&a).is_empty());
    }

    #[test]
    fn test_target_of_record() {
        let routing = RoutingContext::server("host1", "/usr/wlp", "member1");
        let record = NotificationRecord::new(Notification::new("t", "app:type=A", 1)).with_routing(&routing);

        let target = NotificationTarget::of_record(&record).unwrap();
        assert_eq!(target.object_name.as_str(), "app:type=A");
        assert_eq!(target.routing, Some(routing));

        let mut sourceless = Notification::new("t", "app:type=A", 1);
        sourceless.source = None;
        assert!(NotificationTarget::of_record(&NotificationRecord::new(sourceless)).is_none());
    }
}
