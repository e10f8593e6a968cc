//! Notification subscriptions
//!
//! The registry keeps two kinds of subscriptions:
//!
//! - **client** subscriptions: a local listener per resource; the server
//!   buffers matching notifications in the session's notification area and
//!   the polling worker delivers them
//! - **server** subscriptions: another server-resident resource listens; the
//!   client only remembers the registration so it can be replayed
//!
//! The first subscription of either kind creates the notification area and
//! puts the poller in notification mode; when the last one goes, the area is
//! deleted and the poller falls back to health checks.
//!
//! # Locking
//!
//! Mutations are serialized by one async lock over both maps. Each client
//! subscription has its own lock so delivery and unsubscription of the same
//! resource do not interleave. Recovery is never run while the registry lock
//! is held: registry requests skip recovery, and the public entry points run
//! it after releasing the lock.

pub mod filter;
mod subscription;

pub use filter::{
    AttributeChangeFilter, FnFilter, Handback, NotificationFilter, NotificationListener, NotificationTypeFilter,
    ATTRIBUTE_CHANGE_TYPE,
};
pub use subscription::NotificationTarget;

use hyper::Method;
use restmx_common::{
    Notification, NotificationAreaLinks, NotificationRecord, NotificationRegistration, NotificationSettings,
    ObjectName, RestmxError, Result, ServerNotificationRegistration, ServerRegistrationOp,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::deferred_url::DeferredUrl;
use crate::identity::IdentityRegistry;
use crate::session::{PollMode, RequestOptions, Session, SessionShared};
use subscription::{ClientSubscription, LocalListener, ServerSubscription};

/// Server-issued URLs of the session's notification area.
#[derive(Debug, Clone)]
struct NotificationArea {
    registrations: DeferredUrl,
    server_registrations: DeferredUrl,
    inbox: DeferredUrl,
    client: DeferredUrl,
}

#[derive(Default)]
struct RegistryState {
    local: HashMap<NotificationTarget, Arc<Mutex<ClientSubscription>>>,
    server: Vec<ServerSubscription>,
}

impl RegistryState {
    fn is_idle(&self) -> bool {
        self.local.is_empty() && self.server.is_empty()
    }
}

pub(crate) struct NotificationRegistry {
    state: tokio::sync::Mutex<RegistryState>,
    area: RwLock<Option<NotificationArea>>,
    identities: IdentityRegistry,
    area_settings: NotificationSettings,
}

/// What a mutation needs to tell the server about one client subscription.
enum RegistrationUpdate {
    None,
    Create(NotificationRegistration),
    Update(DeferredUrl, Vec<restmx_common::FilterSpec>),
    Delete(DeferredUrl),
}

fn lock_subscription(entry: &Mutex<ClientSubscription>) -> std::sync::MutexGuard<'_, ClientSubscription> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NotificationRegistry {
    pub fn new(settings: &Settings) -> Self {
        Self {
            state: tokio::sync::Mutex::new(RegistryState::default()),
            area: RwLock::new(None),
            identities: IdentityRegistry::new(),
            area_settings: NotificationSettings {
                delivery_interval: settings.notification_delivery_interval.as_millis() as u64,
                inbox_expiry: settings.notification_inbox_expiry.as_millis() as u64,
            },
        }
    }

    fn area(&self) -> Option<NotificationArea> {
        self.area.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_area(&self, area: Option<NotificationArea>) {
        *self.area.write().unwrap_or_else(PoisonError::into_inner) = area;
    }

    pub fn inbox_url(&self) -> Option<DeferredUrl> {
        self.area().map(|area| area.inbox)
    }

    pub fn has_area(&self) -> bool {
        self.area().is_some()
    }

    /// Number of (client, server) registrations.
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        let local = state
            .local
            .values()
            .map(|entry| lock_subscription(entry).len())
            .sum();
        (local, state.server.len())
    }

    // ========================================================================
    // Client subscriptions
    // ========================================================================

    /// Adds a local listener for notifications of `target`.
    pub async fn subscribe_local(
        &self,
        session: &Arc<SessionShared>,
        target: NotificationTarget,
        listener: LocalListener,
    ) -> Result<()> {
        session.ensure_connected()?;
        let result = {
            let mut state = self.state.lock().await;
            self.subscribe_local_locked(session, &mut state, target, listener)
                .await
        };
        Self::after_request(session, result).await
    }

    async fn subscribe_local_locked(
        &self,
        session: &Arc<SessionShared>,
        state: &mut RegistryState,
        target: NotificationTarget,
        listener: LocalListener,
    ) -> Result<()> {
        self.ensure_area(session).await?;

        let entry = state
            .local
            .entry(target.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ClientSubscription::new())))
            .clone();
        let added = listener.clone();

        let update = {
            let mut subscription = lock_subscription(&entry);
            subscription.add(listener);
            let forwarding = subscription.forwarding();
            match &subscription.registration {
                None => RegistrationUpdate::Create(NotificationRegistration {
                    object_name: target.object_name.clone(),
                    filters: forwarding.wire_filters(),
                    routing: target.routing.clone(),
                }),
                Some(url) if subscription.pushed.as_ref() != Some(&forwarding) => {
                    RegistrationUpdate::Update(url.clone(), forwarding.wire_filters())
                }
                Some(_) => RegistrationUpdate::None,
            }
        };

        match self.push_update(session, &entry, update).await {
            Ok(()) => {
                debug!(target = %target.object_name, "Added notification listener");
                Ok(())
            }
            Err(err) => {
                // roll back the listener that could not be registered
                let empty = {
                    let mut subscription = lock_subscription(&entry);
                    subscription.remove_exact(&added.listener, added.filter.as_ref(), added.handback.as_ref());
                    subscription.is_empty() && subscription.registration.is_none()
                };
                if empty {
                    state.local.remove(&target);
                }
                self.teardown_if_idle(session, state).await;
                Err(err)
            }
        }
    }

    /// Removes registrations of `listener` on `target`.
    ///
    /// With `exact` only the registration with that filter and handback goes;
    /// without it, every registration of the listener does.
    pub async fn unsubscribe_local(
        &self,
        session: &Arc<SessionShared>,
        target: &NotificationTarget,
        listener: &Arc<dyn NotificationListener>,
        exact: Option<(Option<&Arc<dyn NotificationFilter>>, Option<&Handback>)>,
    ) -> Result<()> {
        session.ensure_connected()?;
        let result = {
            let mut state = self.state.lock().await;
            self.unsubscribe_local_locked(session, &mut state, target, listener, exact)
                .await
        };
        Self::after_request(session, result).await
    }

    async fn unsubscribe_local_locked(
        &self,
        session: &Arc<SessionShared>,
        state: &mut RegistryState,
        target: &NotificationTarget,
        listener: &Arc<dyn NotificationListener>,
        exact: Option<(Option<&Arc<dyn NotificationFilter>>, Option<&Handback>)>,
    ) -> Result<()> {
        let entry = state
            .local
            .get(target)
            .cloned()
            .ok_or_else(|| RestmxError::ListenerNotFound(format!("no listeners on {}", target.object_name)))?;

        let (update, now_empty) = {
            let mut subscription = lock_subscription(&entry);
            let removed = match exact {
                Some((filter, handback)) => subscription
                    .remove_exact(listener, filter, handback)
                    .map(|r| vec![r])
                    .unwrap_or_default(),
                None => subscription.remove_all(listener),
            };
            if removed.is_empty() {
                return Err(RestmxError::ListenerNotFound(format!(
                    "listener not registered on {}",
                    target.object_name
                )));
            }

            if subscription.is_empty() {
                let update = match subscription.registration.take() {
                    Some(url) => RegistrationUpdate::Delete(url),
                    None => RegistrationUpdate::None,
                };
                subscription.pushed = None;
                (update, true)
            } else {
                let forwarding = subscription.forwarding();
                let update = match &subscription.registration {
                    Some(url) if subscription.pushed.as_ref() != Some(&forwarding) => {
                        RegistrationUpdate::Update(url.clone(), forwarding.wire_filters())
                    }
                    _ => RegistrationUpdate::None,
                };
                (update, false)
            }
        };

        if now_empty {
            state.local.remove(target);
        }
        let result = self.push_update(session, &entry, update).await;
        debug!(target = %target.object_name, "Removed notification listener");
        self.teardown_if_idle(session, state).await;
        result
    }

    /// Sends a registration change and records the new server state.
    async fn push_update(
        &self,
        session: &SessionShared,
        entry: &Mutex<ClientSubscription>,
        update: RegistrationUpdate,
    ) -> Result<()> {
        match update {
            RegistrationUpdate::None => Ok(()),
            RegistrationUpdate::Create(registration) => {
                let url = self.create_registration(session, &registration).await?;
                let mut subscription = lock_subscription(entry);
                subscription.pushed = Some(subscription.forwarding());
                subscription.registration = Some(url);
                Ok(())
            }
            RegistrationUpdate::Update(url, filters) => {
                let body = session.encode(&filters)?;
                session
                    .send_raw(Method::PUT, url.resolve(), Some(body), RequestOptions::unrouted())
                    .await?;
                let mut subscription = lock_subscription(entry);
                subscription.pushed = Some(subscription.forwarding());
                Ok(())
            }
            RegistrationUpdate::Delete(url) => {
                session
                    .send_raw(Method::DELETE, url.resolve(), None, RequestOptions::unrouted())
                    .await?;
                Ok(())
            }
        }
    }

    async fn create_registration(
        &self,
        session: &SessionShared,
        registration: &NotificationRegistration,
    ) -> Result<DeferredUrl> {
        let area = self.area().ok_or(RestmxError::NotConnected)?;
        let body = session.encode(registration)?;
        let response = session
            .send_raw(
                Method::POST,
                area.registrations.resolve(),
                Some(body),
                RequestOptions::unrouted(),
            )
            .await?;
        let path: String = session.decode(&response)?;
        Ok(session.deferred(&path))
    }

    // ========================================================================
    // Server subscriptions
    // ========================================================================

    /// Registers the server-resident `listener` resource for notifications of `target`.
    ///
    /// The filter, if any, must have a wire form.
    pub async fn subscribe_server(
        &self,
        session: &Arc<SessionShared>,
        target: NotificationTarget,
        listener: ObjectName,
        filter: Option<Arc<dyn NotificationFilter>>,
        handback: Option<Handback>,
    ) -> Result<()> {
        session.ensure_connected()?;
        if let Some(filter) = &filter {
            if filter.forwardable().is_none() {
                return Err(RestmxError::InvalidArgument(
                    "filter of a server listener must have a wire form".to_string(),
                ));
            }
        }

        let result = {
            let mut state = self.state.lock().await;
            let subscription = ServerSubscription {
                target,
                listener,
                filter,
                handback,
            };
            match self.ensure_area(session).await {
                Ok(()) => match self.post_server_registration(session, &subscription, ServerRegistrationOp::Add).await {
                    Ok(()) => {
                        debug!(
                            target = %subscription.target.object_name,
                            listener = %subscription.listener,
                            "Added server notification listener"
                        );
                        state.server.push(subscription);
                        Ok(())
                    }
                    Err(err) => {
                        self.teardown_if_idle(session, &mut state).await;
                        Err(err)
                    }
                },
                Err(err) => Err(err),
            }
        };
        Self::after_request(session, result).await
    }

    /// Removes server-resident listener registrations.
    ///
    /// Without `exact` every registration of `listener` on `target` goes in a
    /// single request; with it only the one carrying that filter and handback.
    pub async fn unsubscribe_server(
        &self,
        session: &Arc<SessionShared>,
        target: &NotificationTarget,
        listener: &ObjectName,
        exact: Option<(Option<&Arc<dyn NotificationFilter>>, Option<&Handback>)>,
    ) -> Result<()> {
        session.ensure_connected()?;
        let result = {
            let mut state = self.state.lock().await;
            self.unsubscribe_server_locked(session, &mut state, target, listener, exact)
                .await
        };
        Self::after_request(session, result).await
    }

    async fn unsubscribe_server_locked(
        &self,
        session: &Arc<SessionShared>,
        state: &mut RegistryState,
        target: &NotificationTarget,
        listener: &ObjectName,
        exact: Option<(Option<&Arc<dyn NotificationFilter>>, Option<&Handback>)>,
    ) -> Result<()> {
        let position = state
            .server
            .iter()
            .position(|s| s.matches(target, listener, exact))
            .ok_or_else(|| {
                RestmxError::ListenerNotFound(format!("{} does not listen to {}", listener, target.object_name))
            })?;

        let op = if exact.is_some() {
            ServerRegistrationOp::RemoveSpecific
        } else {
            ServerRegistrationOp::RemoveAll
        };
        let request = state.server[position].clone();
        self.post_server_registration(session, &request, op).await?;

        match op {
            ServerRegistrationOp::RemoveSpecific => {
                state.server.remove(position);
            }
            _ => state.server.retain(|s| !s.matches(target, listener, None)),
        }
        debug!(target = %target.object_name, %listener, "Removed server notification listener");
        self.teardown_if_idle(session, state).await;
        Ok(())
    }

    async fn post_server_registration(
        &self,
        session: &SessionShared,
        subscription: &ServerSubscription,
        operation: ServerRegistrationOp,
    ) -> Result<()> {
        let area = self.area().ok_or(RestmxError::NotConnected)?;
        let carries_objects = operation != ServerRegistrationOp::RemoveAll;
        let (filter_id, handback_id) = if carries_objects {
            (
                self.identities.identity_of(subscription.filter.as_ref())?,
                self.identities.identity_of(subscription.handback.as_ref())?,
            )
        } else {
            (crate::identity::NULL_ID, crate::identity::NULL_ID)
        };

        let registration = ServerNotificationRegistration {
            operation,
            object_name: subscription.target.object_name.clone(),
            listener: subscription.listener.clone(),
            filter: if carries_objects {
                subscription.filter.as_ref().and_then(|f| f.forwardable())
            } else {
                None
            },
            filter_id,
            handback_id,
            routing: subscription.target.routing.clone(),
        };
        let body = session.encode(&registration)?;
        session
            .send_raw(
                Method::POST,
                area.server_registrations.resolve(),
                Some(body),
                RequestOptions::unrouted(),
            )
            .await?;
        Ok(())
    }

    // ========================================================================
    // Notification area
    // ========================================================================

    /// Creates the notification area if there is none and switches the
    /// poller to notification mode.
    async fn ensure_area(&self, session: &Arc<SessionShared>) -> Result<()> {
        if self.area().is_none() {
            self.create_area(session).await?;
        }
        session.poller.set_mode(PollMode::Notification);
        session.poller.start(session);
        Ok(())
    }

    async fn create_area(&self, session: &SessionShared) -> Result<()> {
        let url = session.notifications_url()?;
        let body = session.encode(&self.area_settings)?;
        let response = session
            .send_raw(Method::POST, url.resolve(), Some(body), RequestOptions::unrouted())
            .await?;
        let links: NotificationAreaLinks = session.decode(&response)?;
        self.set_area(Some(NotificationArea {
            registrations: session.deferred(&links.registrations),
            server_registrations: session.deferred(&links.server_registrations),
            inbox: session.deferred(&links.inbox),
            client: session.deferred(&links.client),
        }));
        info!(inbox = %links.inbox, "Created notification area");
        Ok(())
    }

    /// Deletes the area and falls back to health checks once nothing is subscribed.
    async fn teardown_if_idle(&self, session: &Arc<SessionShared>, state: &RegistryState) {
        if !state.is_idle() {
            return;
        }
        self.remove_area(session).await;
        if session.settings.server_failover_interval.is_some() {
            session.poller.set_mode(PollMode::Failover);
        } else {
            session.poller.stop().await;
            session.poller.set_mode(PollMode::Failover);
        }
    }

    async fn remove_area(&self, session: &SessionShared) {
        if let Some(area) = self.area() {
            self.set_area(None);
            if let Err(err) = session
                .send_raw(Method::DELETE, area.client.resolve(), None, RequestOptions::unrouted())
                .await
            {
                debug!(error = %err, "Could not delete notification area");
            }
            info!("Removed notification area");
        }
    }

    // ========================================================================
    // Delivery, restore, close
    // ========================================================================

    /// Delivers one inbox record; returns the notification if nobody took it.
    pub async fn deliver(&self, record: NotificationRecord) -> Option<Notification> {
        let Some(target) = NotificationTarget::of_record(&record) else {
            debug!(source = ?record.notification.source, "Notification source is not a resource name");
            return Some(record.notification);
        };

        let entry = self.state.lock().await.local.get(&target).cloned();
        let delivered = match entry {
            Some(entry) => lock_subscription(&entry).deliver(&record.notification),
            None => {
                debug!(target = %target.object_name, "No subscription for notification");
                false
            }
        };
        if delivered {
            None
        } else {
            Some(record.notification)
        }
    }

    /// Recreates the notification area and replays every subscription on the
    /// active endpoint.
    ///
    /// Subscriptions the server rejects are dropped and their errors returned.
    /// A connectivity failure aborts the whole restore.
    pub async fn restore(&self, session: &SessionShared) -> Result<Vec<RestmxError>> {
        let mut state = self.state.lock().await;
        if state.is_idle() {
            self.set_area(None);
            return Ok(Vec::new());
        }

        self.create_area(session).await?;
        let mut dropped = Vec::new();

        let targets: Vec<(NotificationTarget, Arc<Mutex<ClientSubscription>>)> = state
            .local
            .iter()
            .map(|(target, entry)| (target.clone(), Arc::clone(entry)))
            .collect();
        for (target, entry) in targets {
            let registration = {
                let subscription = lock_subscription(&entry);
                NotificationRegistration {
                    object_name: target.object_name.clone(),
                    filters: subscription.forwarding().wire_filters(),
                    routing: target.routing.clone(),
                }
            };
            match self.create_registration(session, &registration).await {
                Ok(url) => {
                    let mut subscription = lock_subscription(&entry);
                    subscription.pushed = Some(subscription.forwarding());
                    subscription.registration = Some(url);
                }
                Err(err) if err.requires_recovery() => return Err(err),
                Err(err) => {
                    warn!(target = %target.object_name, error = %err, "Dropping subscription that could not be restored");
                    state.local.remove(&target);
                    dropped.push(err);
                }
            }
        }

        let mut index = 0;
        while index < state.server.len() {
            let subscription = state.server[index].clone();
            match self
                .post_server_registration(session, &subscription, ServerRegistrationOp::Add)
                .await
            {
                Ok(()) => index += 1,
                Err(err) if err.requires_recovery() => return Err(err),
                Err(err) => {
                    warn!(
                        target = %subscription.target.object_name,
                        listener = %subscription.listener,
                        error = %err,
                        "Dropping server subscription that could not be restored"
                    );
                    state.server.remove(index);
                    dropped.push(err);
                }
            }
        }

        if state.is_idle() {
            // restore may run on the worker itself, so it is switched back
            // rather than stopped; without health checks it then stays idle
            self.remove_area(session).await;
            session.poller.set_mode(PollMode::Failover);
        }

        info!(
            local = state.local.len(),
            server = state.server.len(),
            dropped = dropped.len(),
            "Restored notification subscriptions"
        );
        Ok(dropped)
    }

    /// Best-effort removal of the notification area at session close.
    pub async fn close(&self, session: &SessionShared) {
        let mut state = self.state.lock().await;
        state.local.clear();
        state.server.clear();
        if let Some(area) = self.area() {
            self.set_area(None);
            if let Err(err) = session
                .send_raw(Method::DELETE, area.client.resolve(), None, RequestOptions::unrouted())
                .await
            {
                debug!(error = %err, "Ignoring notification area removal failure");
            }
        }
    }

    /// Forgets all subscription state without talking to the server.
    pub async fn discard(&self) {
        let mut state = self.state.lock().await;
        state.local.clear();
        state.server.clear();
        self.set_area(None);
    }

    /// Runs recovery for a failed registry request once the lock is released.
    async fn after_request(session: &SessionShared, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            if err.requires_recovery() {
                session.recover(err).await;
            }
        }
        result
    }
}

impl Session {
    /// Registers a local listener for notifications emitted by `name`.
    ///
    /// The subscription is made under the current routing context. The
    /// resource must exist; a pattern never does.
    ///
    /// # Arguments
    /// * `name` - Resource whose notifications are wanted
    /// * `listener` - Receives each delivered notification
    /// * `filter` - Optional filter; a wire form lets the server pre-filter
    /// * `handback` - Passed back to the listener unchanged
    pub async fn add_notification_listener(
        &self,
        name: &ObjectName,
        listener: Arc<dyn NotificationListener>,
        filter: Option<Arc<dyn NotificationFilter>>,
        handback: Option<Handback>,
    ) -> Result<()> {
        if !self.is_registered(name).await? {
            return Err(RestmxError::ResourceNotFound(name.to_string()));
        }
        let target = NotificationTarget::new(name.clone(), self.routing_context());
        let entry = LocalListener {
            listener,
            filter,
            handback,
        };
        self.shared
            .notifications
            .subscribe_local(&self.shared, target, entry)
            .await
    }

    /// Removes every registration of `listener` on `name`.
    pub async fn remove_notification_listener(
        &self,
        name: &ObjectName,
        listener: &Arc<dyn NotificationListener>,
    ) -> Result<()> {
        let target = NotificationTarget::new(name.clone(), self.routing_context());
        self.shared
            .notifications
            .unsubscribe_local(&self.shared, &target, listener, None)
            .await
    }

    /// Removes the registration of `listener` made with exactly this filter and handback.
    pub async fn remove_notification_listener_exact(
        &self,
        name: &ObjectName,
        listener: &Arc<dyn NotificationListener>,
        filter: Option<&Arc<dyn NotificationFilter>>,
        handback: Option<&Handback>,
    ) -> Result<()> {
        let target = NotificationTarget::new(name.clone(), self.routing_context());
        self.shared
            .notifications
            .unsubscribe_local(&self.shared, &target, listener, Some((filter, handback)))
            .await
    }

    /// Makes the server-resident resource `listener` a listener of `name`.
    pub async fn add_server_notification_listener(
        &self,
        name: &ObjectName,
        listener: &ObjectName,
        filter: Option<Arc<dyn NotificationFilter>>,
        handback: Option<Handback>,
    ) -> Result<()> {
        let target = NotificationTarget::new(name.clone(), self.routing_context());
        self.shared
            .notifications
            .subscribe_server(&self.shared, target, listener.clone(), filter, handback)
            .await
    }

    pub async fn remove_server_notification_listener(&self, name: &ObjectName, listener: &ObjectName) -> Result<()> {
        let target = NotificationTarget::new(name.clone(), self.routing_context());
        self.shared
            .notifications
            .unsubscribe_server(&self.shared, &target, listener, None)
            .await
    }

    pub async fn remove_server_notification_listener_exact(
        &self,
        name: &ObjectName,
        listener: &ObjectName,
        filter: Option<&Arc<dyn NotificationFilter>>,
        handback: Option<&Handback>,
    ) -> Result<()> {
        let target = NotificationTarget::new(name.clone(), self.routing_context());
        self.shared
            .notifications
            .unsubscribe_server(&self.shared, &target, listener, Some((filter, handback)))
            .await
    }

    /// True while the server holds a notification area for this session.
    pub fn has_notification_area(&self) -> bool {
        self.shared.notifications.has_area()
    }

    /// Number of (client, server) notification registrations.
    pub async fn notification_registrations(&self) -> (usize, usize) {
        self.shared.notifications.counts().await
    }
}
