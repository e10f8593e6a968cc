//! Connector front
//!
//! The [`Connector`] is what callers hold on to. It validates configuration,
//! builds the endpoint list, opens the [`Session`] and owns the lifecycle
//! listeners. Lifecycle listeners may be registered before `connect` so that
//! `Opened` is observed.

use rand::Rng;
use restmx_common::transport::{HyperTransport, TlsSettings, Transport};
use restmx_common::{RestmxError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{ConnectorConfig, Settings};
use crate::endpoint::EndpointList;
use crate::events::{LifecycleEmitter, LifecycleEvent, LifecycleFilter, LifecycleListener};
use crate::session::{Session, SessionParams};

/// Session factory and handle.
///
/// # Example
///
/// ```no_run
/// use restmx_client::{Connector, ConnectorConfig, Credentials};
/// use restmx_common::ObjectName;
///
/// # async fn run() -> restmx_common::Result<()> {
/// let config = ConnectorConfig::new("mgmt1.example.com:9443")
///     .with_extra_endpoints(["mgmt2.example.com:9443"])
///     .with_credentials(Credentials::basic("admin", "secret"));
///
/// let connector = Connector::new(config);
/// let session = connector.connect().await?;
/// let count = session.resource_count().await?;
/// println!("{} resources on {}", count, session.current_endpoint());
/// connector.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Connector {
    config: ConnectorConfig,
    events: Arc<LifecycleEmitter>,
    session: Mutex<Option<Session>>,
    closed: AtomicBool,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        let connection_id = format!("restmx://{} {:016x}", config.endpoint, rand::thread_rng().gen::<u64>());
        Self {
            config,
            events: Arc::new(LifecycleEmitter::new(connection_id)),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Identifier carried by every lifecycle notification of this connector.
    pub fn connection_id(&self) -> &str {
        self.events.connection_id()
    }

    /// Connects with settings taken from the environment and the defaults.
    pub async fn connect(&self) -> Result<Session> {
        self.connect_with(&HashMap::new()).await
    }

    /// Connects, resolving settings from `overrides` first.
    ///
    /// Connecting an already connected connector returns the existing
    /// session. A session that failed permanently is replaced by a new one.
    /// A closed connector cannot be reconnected.
    ///
    /// # Arguments
    /// * `overrides` - Per-call settings keyed by the names in [`crate::config::keys`]
    ///
    /// # Errors
    /// * `MissingCredentials` - No credentials in the configuration
    /// * `InvalidEndpoint` - An endpoint is not `host:port`
    /// * `NoAvailableEndpoints` - No endpoint answered the initial probe
    pub async fn connect_with(&self, overrides: &HashMap<String, Value>) -> Result<Session> {
        let mut slot = self.session.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(RestmxError::NotConnected);
        }
        match slot.as_ref() {
            Some(session) if session.is_connected() => {
                debug!(connection = %self.connection_id(), "Already connected");
                return Ok(session.clone());
            }
            Some(_) => {
                info!(connection = %self.connection_id(), "Replacing failed session");
                *slot = None;
            }
            None => {}
        }

        let credentials = self.config.validate_credentials()?;
        let endpoints = EndpointList::build(&self.config.endpoint, &self.config.extra_endpoints)?;
        let settings = Settings::resolve(overrides);
        let transport = self.transport(&settings)?;

        let session = Session::open(SessionParams {
            scheme: self.config.scheme,
            endpoints,
            transport,
            authorization: credentials.authorization_header(),
            events: Arc::clone(&self.events),
            settings,
        })
        .await?;

        info!(
            connection = %self.connection_id(),
            endpoint = %session.current_endpoint(),
            "Connector opened"
        );
        self.events.emit(LifecycleEvent::Opened);
        *slot = Some(session.clone());
        Ok(session)
    }

    fn transport(&self, settings: &Settings) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &self.config.transport {
            return Ok(Arc::clone(transport));
        }
        let tls = TlsSettings {
            hostname_verification_disabled: self.config.tls.hostname_verification_disabled
                || settings.hostname_verification_disabled,
            ..self.config.tls.clone()
        };
        Ok(Arc::new(HyperTransport::new(&tls)?))
    }

    /// The open session; `NotConnected` before `connect`, after `close` and
    /// once the session failed permanently.
    pub async fn session(&self) -> Result<Session> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RestmxError::NotConnected);
        }
        self.session
            .lock()
            .await
            .clone()
            .filter(Session::is_connected)
            .ok_or(RestmxError::NotConnected)
    }

    /// Closes the session and emits `Closed`. Later calls do nothing.
    pub async fn close(&self) {
        let mut slot = self.session.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(session) = slot.take() {
            session.close().await;
        }
        info!(connection = %self.connection_id(), "Connector closed");
        self.events.emit(LifecycleEvent::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Registers a lifecycle listener, optionally restricted to some event kinds.
    pub fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>, filter: Option<LifecycleFilter>) {
        self.events.add_listener(listener, filter);
    }

    /// Removes every registration of `listener`; `ListenerNotFound` if there was none.
    pub fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) -> Result<()> {
        self.events.remove_listener(listener)
    }
}
