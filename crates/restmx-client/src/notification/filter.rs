use restmx_common::{FilterSpec, Notification};
use std::any::Any;
use std::sync::Arc;

/// Opaque caller object handed back to a listener with every notification.
pub type Handback = Arc<dyn Any + Send + Sync>;

/// Notification type of attribute change notifications.
pub const ATTRIBUTE_CHANGE_TYPE: &str = "jmx.attribute.change";

/// Receives notifications of a locally evaluated subscription.
pub trait NotificationListener: Send + Sync {
    fn handle_notification(&self, notification: &Notification, handback: Option<&Handback>);
}

impl<F> NotificationListener for F
where
    F: Fn(&Notification, Option<&Handback>) + Send + Sync,
{
    fn handle_notification(&self, notification: &Notification, handback: Option<&Handback>) {
        self(notification, handback)
    }
}

/// Decides which notifications reach a listener.
///
/// A filter with a wire form (`forwardable` returns `Some`) can be evaluated by
/// the server before buffering. Filters without one are only evaluated on the
/// client, which forces the server to deliver everything for that resource.
pub trait NotificationFilter: Send + Sync {
    fn is_enabled(&self, notification: &Notification) -> bool;

    fn forwardable(&self) -> Option<FilterSpec> {
        None
    }
}

/// Enables notifications whose type starts with one of the enabled prefixes.
///
/// # Example
///
/// ```
/// use restmx_client::notification::{NotificationFilter, NotificationTypeFilter};
/// use restmx_common::Notification;
///
/// let filter = NotificationTypeFilter::new().enable_type("cache.");
/// assert!(filter.is_enabled(&Notification::new("cache.evicted", "app:type=A", 1)));
/// assert!(!filter.is_enabled(&Notification::new("pool.grown", "app:type=A", 2)));
/// assert!(filter.forwardable().is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationTypeFilter {
    enabled_types: Vec<String>,
}

impl NotificationTypeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_type(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !self.enabled_types.contains(&prefix) {
            self.enabled_types.push(prefix);
        }
        self
    }

    pub fn enabled_types(&self) -> &[String] {
        &self.enabled_types
    }
}

impl NotificationFilter for NotificationTypeFilter {
    fn is_enabled(&self, notification: &Notification) -> bool {
        self.enabled_types
            .iter()
            .any(|prefix| notification.notification_type.starts_with(prefix.as_str()))
    }

    fn forwardable(&self) -> Option<FilterSpec> {
        Some(FilterSpec::NotificationType {
            enabled_types: self.enabled_types.clone(),
        })
    }
}

/// Enables attribute change notifications for the enabled attribute names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeChangeFilter {
    enabled_attributes: Vec<String>,
}

impl AttributeChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_attribute(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.enabled_attributes.contains(&name) {
            self.enabled_attributes.push(name);
        }
        self
    }
}

impl NotificationFilter for AttributeChangeFilter {
    fn is_enabled(&self, notification: &Notification) -> bool {
        notification.notification_type == ATTRIBUTE_CHANGE_TYPE
            && notification
                .attribute_name
                .as_ref()
                .is_some_and(|name| self.enabled_attributes.contains(name))
    }

    fn forwardable(&self) -> Option<FilterSpec> {
        Some(FilterSpec::AttributeChange {
            enabled_attributes: self.enabled_attributes.clone(),
        })
    }
}

/// A client-only filter built from a closure.
pub struct FnFilter<F>(pub F);

impl<F> NotificationFilter for FnFilter<F>
where
    F: Fn(&Notification) -> bool + Send + Sync,
{
    fn is_enabled(&self, notification: &Notification) -> bool {
        (self.0)(notification)
    }
}

/// Compares two shared objects by address, ignoring trait object metadata.
pub(crate) fn same_object<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

pub(crate) fn same_optional<T: ?Sized>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => same_object(a, b),
        _ => false,
    }
}
