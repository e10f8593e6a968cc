//! Management session
//!
//! A [`Session`] is one logical connection backed by whichever endpoint of the
//! frozen [`EndpointList`] is active. It owns the request path (headers,
//! routing, status classification), the per-resource URL cache, the
//! single-flight recovery algorithm, the background [`PollMode`] worker and
//! the notification registry.
//!
//! # Request path
//!
//! Every operation goes through [`SessionShared::send`]:
//!
//! 1. fail fast with `NotConnected` once the session is closed or failed
//! 2. add `User-Agent`, `Accept`, `Authorization`, routing headers
//! 3. classify the status: 2xx body, 400/500 remote exception, 401/403 bad
//!    credentials, 404/410 endpoint unavailable, anything else unexpected
//! 4. run recovery before returning a transport or 404/410 error
//!
//! The call that hit the failure still fails; the next one goes to whatever
//! endpoint recovery settled on.

pub mod cache;
mod operations;
mod polling;
mod recovery;

pub use cache::{CacheLookup, ResourceUrlCache};
pub use polling::PollMode;

use hyper::body::Bytes;
use hyper::Method;
use restmx_common::protocol::routing::ROUTING_READ_TIMEOUT_HEADER;
use restmx_common::transport::{Codec, HttpRequest, HttpResponse, Transport};
use restmx_common::{
    RestmxError, Result, RoutingContext, ServerInfo, CONNECTOR_URI, ROOT_PATH, ROUTER_FREE_VERSION, ROUTER_URI,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{Settings, CLIENT_VERSION};
use crate::deferred_url::DeferredUrl;
use crate::endpoint::{ActiveEndpoint, Endpoint, EndpointList, Scheme};
use crate::events::LifecycleEmitter;
use crate::notification::NotificationRegistry;
use polling::PollingWorker;

/// Everything a session needs from the connector.
pub(crate) struct SessionParams {
    pub settings: Settings,
    pub scheme: Scheme,
    pub endpoints: EndpointList,
    pub transport: Arc<dyn Transport>,
    pub authorization: Option<String>,
    pub events: Arc<LifecycleEmitter>,
}

/// Per-request knobs of the request path.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RequestOptions {
    /// Overrides the configured read timeout.
    pub timeout: Option<Duration>,
    /// Skips routing headers and the router prefix rewrite.
    pub ignore_routing: bool,
}

impl RequestOptions {
    pub fn unrouted() -> Self {
        RequestOptions {
            timeout: None,
            ignore_routing: true,
        }
    }
}

/// Recovery counters, readable at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Recovery runs that actually started (lost CAS races are not counted).
    pub recoveries: u64,
    /// Endpoint liveness probes sent by initial selection and recovery.
    pub probes: u64,
}

/// Bootstrap URLs advertised by the active server.
#[derive(Debug, Clone)]
struct Bootstrap {
    version: u32,
    mbeans: DeferredUrl,
    create: DeferredUrl,
    instance_of: DeferredUrl,
    count: DeferredUrl,
    default_domain: DeferredUrl,
    domains: DeferredUrl,
    notifications: DeferredUrl,
    file_transfer: Option<DeferredUrl>,
}

pub(crate) struct SessionShared {
    pub(crate) settings: Settings,
    scheme: Scheme,
    endpoints: EndpointList,
    active: ActiveEndpoint,
    transport: Arc<dyn Transport>,
    codec: Codec,
    authorization: Option<String>,
    bootstrap: RwLock<Option<Bootstrap>>,
    cache: ResourceUrlCache,
    routing: RwLock<Option<RoutingContext>>,
    disconnected: AtomicBool,
    closed: AtomicBool,
    initializing: AtomicBool,
    recovering: AtomicBool,
    recoveries: AtomicU64,
    probes: AtomicU64,
    pub(crate) events: Arc<LifecycleEmitter>,
    pub(crate) notifications: NotificationRegistry,
    pub(crate) poller: PollingWorker,
    shutdown: watch::Sender<bool>,
}

/// Handle to a management session. Clones share the same connection.
#[derive(Clone)]
pub struct Session {
    pub(crate) shared: Arc<SessionShared>,
}

impl Session {
    /// Probes for a live endpoint, loads the bootstrap metadata and starts
    /// background polling.
    pub(crate) async fn open(params: SessionParams) -> Result<Session> {
        let active = ActiveEndpoint::new(params.endpoints.first().clone());
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(SessionShared {
            cache: ResourceUrlCache::new(active.clone(), params.scheme),
            notifications: NotificationRegistry::new(&params.settings),
            poller: PollingWorker::new(),
            settings: params.settings,
            scheme: params.scheme,
            endpoints: params.endpoints,
            active,
            transport: params.transport,
            codec: Codec::new(),
            authorization: params.authorization,
            bootstrap: RwLock::new(None),
            routing: RwLock::new(None),
            disconnected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            initializing: AtomicBool::new(true),
            recovering: AtomicBool::new(false),
            recoveries: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            events: params.events,
            shutdown,
        });

        shared.find_initial_endpoint().await?;
        shared.bootstrap().await?;
        shared.initializing.store(false, Ordering::SeqCst);

        if shared.settings.server_failover_interval.is_some() {
            shared.poller.start(&shared);
        }

        info!(
            endpoint = %shared.active.get(),
            version = shared.server_version(),
            "Session established"
        );
        Ok(Session { shared })
    }

    /// Closes the session: stops the poller, removes the notification area
    /// and makes every later call fail with `NotConnected`.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.disconnected.store(true, Ordering::SeqCst);
        shared.shutdown.send_replace(true);
        shared.poller.stop().await;
        shared.notifications.close(shared).await;
        info!(endpoint = %shared.active.get(), "Session closed");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn current_endpoint(&self) -> Endpoint {
        self.shared.active.get()
    }

    pub fn endpoints(&self) -> &EndpointList {
        &self.shared.endpoints
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Protocol version reported by the active server.
    pub fn server_version(&self) -> u32 {
        self.shared.server_version()
    }

    /// Absolute file transfer URL for collaborators reusing this session.
    pub fn file_transfer_url(&self) -> Option<String> {
        self.shared
            .read_bootstrap()
            .and_then(|b| b.file_transfer)
            .map(|url| url.resolve())
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            recoveries: self.shared.recoveries.load(Ordering::SeqCst),
            probes: self.shared.probes.load(Ordering::SeqCst),
        }
    }

    pub fn poll_mode(&self) -> PollMode {
        self.shared.poller.mode()
    }

    pub fn is_polling(&self) -> bool {
        self.shared.poller.is_running()
    }

    /// The URL cache, for inspection.
    pub fn url_cache(&self) -> &ResourceUrlCache {
        &self.shared.cache
    }

    /// Routes later calls to one server of a cluster member host.
    pub fn assign_server_context(&self, host_name: &str, server_user_dir: &str, server_name: &str) -> Result<()> {
        for (field, value) in [
            ("host name", host_name),
            ("server user dir", server_user_dir),
            ("server name", server_name),
        ] {
            if value.trim().is_empty() {
                return Err(RestmxError::InvalidArgument(format!("empty routing {}", field)));
            }
        }
        self.set_routing(Some(RoutingContext::server(host_name, server_user_dir, server_name)));
        Ok(())
    }

    /// Routes later calls to a cluster member host.
    pub fn assign_host_context(&self, host_name: &str) -> Result<()> {
        if host_name.trim().is_empty() {
            return Err(RestmxError::InvalidArgument("empty routing host name".to_string()));
        }
        self.set_routing(Some(RoutingContext::host(host_name)));
        Ok(())
    }

    pub fn clear_routing_context(&self) {
        self.set_routing(None);
    }

    pub fn routing_context(&self) -> Option<RoutingContext> {
        self.shared.routing()
    }

    fn set_routing(&self, routing: Option<RoutingContext>) {
        debug!(?routing, "Routing context changed");
        *self
            .shared
            .routing
            .write()
            .unwrap_or_else(PoisonError::into_inner) = routing;
    }
}

impl SessionShared {
    pub(crate) fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RestmxError::NotConnected)
        }
    }

    pub(crate) fn routing(&self) -> Option<RoutingContext> {
        self.routing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn deferred(&self, path: &str) -> DeferredUrl {
        DeferredUrl::new(path, self.active.clone(), self.scheme)
    }

    fn read_bootstrap(&self) -> Option<Bootstrap> {
        self.bootstrap
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn bootstrap_url<F>(&self, pick: F) -> Result<DeferredUrl>
    where
        F: FnOnce(&Bootstrap) -> &DeferredUrl,
    {
        self.bootstrap
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|b| pick(b).clone())
            .ok_or(RestmxError::NotConnected)
    }

    pub(crate) fn notifications_url(&self) -> Result<DeferredUrl> {
        self.bootstrap_url(|b| &b.notifications)
    }

    fn server_version(&self) -> u32 {
        self.read_bootstrap().map(|b| b.version).unwrap_or(0)
    }

    pub(crate) fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        self.codec.encode(value)
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T> {
        self.codec.decode(body)
    }

    /// Sends a request and classifies the response, running recovery before
    /// returning an error that calls for it.
    pub(crate) async fn send(&self, method: Method, url: String, body: Option<Vec<u8>>) -> Result<Bytes> {
        self.ensure_connected()?;
        let result = self.send_raw(method, url, body, RequestOptions::default()).await;
        if let Err(err) = &result {
            if err.requires_recovery() {
                self.recover(err).await;
            }
        }
        result
    }

    /// Sends a request and classifies the response without recovery.
    ///
    /// Used under the notification registry lock and by recovery itself.
    pub(crate) async fn send_raw(
        &self,
        method: Method,
        url: String,
        body: Option<Vec<u8>>,
        options: RequestOptions,
    ) -> Result<Bytes> {
        let response = self.execute(method, url, body, options).await?;
        self.classify(response)
    }

    async fn execute(
        &self,
        method: Method,
        url: String,
        body: Option<Vec<u8>>,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let timeout = options.timeout.unwrap_or(self.settings.read_timeout);
        let routing = if options.ignore_routing { None } else { self.routing() };
        let proxied = routing.as_ref().is_some_and(RoutingContext::is_server_level);

        let url = if proxied && self.server_version() < ROUTER_FREE_VERSION && !url.contains(ROUTER_URI) {
            url.replacen(CONNECTOR_URI, ROUTER_URI, 1)
        } else {
            url
        };

        let mut request = HttpRequest::new(method, url, timeout)
            .header("User-Agent", CLIENT_VERSION)
            .header("Accept", self.codec.content_type());
        if let Some(authorization) = &self.authorization {
            request = request.header("Authorization", authorization.as_str());
        }
        if let Some(routing) = &routing {
            for (name, value) in routing.headers() {
                request = request.header(name, value);
            }
            if proxied {
                request = request.header(
                    ROUTING_READ_TIMEOUT_HEADER,
                    self.settings.read_timeout.as_millis().to_string(),
                );
            }
        }
        if let Some(body) = body {
            request = request
                .header("Content-Type", self.codec.content_type())
                .body(body);
        }

        debug!(method = %request.method, url = %request.url, "Sending request");
        self.transport.send(request).await
    }

    fn classify(&self, response: HttpResponse) -> Result<Bytes> {
        let code = response.status.as_u16();
        match code {
            200..=299 => Ok(response.body),
            400 | 500 => Err(self.codec.decode_remote_exception(&response.body)),
            401 | 403 => Err(RestmxError::BadCredentials(code)),
            404 | 410 => Err(RestmxError::EndpointUnavailable(format!(
                "HTTP {} {} from {}",
                code,
                response.reason(),
                self.active.get()
            ))),
            _ => Err(RestmxError::UnexpectedResponseCode {
                code,
                reason: response.reason().to_string(),
            }),
        }
    }

    /// GETs the root resource of `endpoint`; true only on a 200.
    pub(crate) async fn probe(&self, endpoint: &Endpoint) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let url = format!("{}://{}{}", self.scheme.as_str(), endpoint, ROOT_PATH);
        match self.execute(Method::GET, url, None, RequestOptions::unrouted()).await {
            Ok(response) if response.status.as_u16() == 200 => {
                debug!(%endpoint, "Probe succeeded");
                true
            }
            Ok(response) => {
                debug!(%endpoint, status = %response.status, "Probe rejected");
                false
            }
            Err(err) => {
                debug!(%endpoint, error = %err, "Probe failed");
                false
            }
        }
    }

    async fn find_initial_endpoint(&self) -> Result<()> {
        for endpoint in self.endpoints.iter() {
            if self.probe(endpoint).await {
                self.active.set(endpoint.clone());
                return Ok(());
            }
        }
        Err(RestmxError::NoAvailableEndpoints)
    }

    /// Loads the bootstrap metadata, recovering once on a connectivity failure.
    async fn bootstrap(&self) -> Result<()> {
        match self.load_server_info().await {
            Ok(()) => Ok(()),
            Err(err) if err.requires_recovery() => {
                // the endpoint just answered a probe, so go straight to the others
                self.recover_from(&err, true).await;
                if !self.is_connected() {
                    return Err(err);
                }
                self.load_server_info().await
            }
            Err(err) => Err(err),
        }
    }

    /// Fetches and stores the bootstrap metadata of the active endpoint.
    pub(crate) async fn load_server_info(&self) -> Result<()> {
        let url = format!("{}://{}{}", self.scheme.as_str(), self.active.get(), ROOT_PATH);
        let body = self
            .send_raw(Method::GET, url, None, RequestOptions::unrouted())
            .await?;
        let info: ServerInfo = self.decode(&body)?;

        let bootstrap = Bootstrap {
            version: info.version,
            mbeans: self.deferred(&info.mbeans_url),
            create: self.deferred(&info.create_mbean_url),
            instance_of: self.deferred(&info.instance_of_url),
            count: self.deferred(&info.mbean_count_url),
            default_domain: self.deferred(&info.default_domain_url),
            domains: self.deferred(&info.domains_url),
            notifications: self.deferred(&info.notifications_url),
            file_transfer: info.file_transfer_url.as_deref().map(|path| self.deferred(path)),
        };
        debug!(version = bootstrap.version, "Loaded server info");
        *self.bootstrap.write().unwrap_or_else(PoisonError::into_inner) = Some(bootstrap);
        Ok(())
    }
}
