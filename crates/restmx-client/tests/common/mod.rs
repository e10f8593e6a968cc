//! In-process mock management server
//!
//! Serves the bootstrap, resource and notification routes over plain HTTP on
//! `127.0.0.1:0`. Tests flip it between healthy and failing states:
//!
//! - `set_down(true)` answers every request with 410 Gone, probes included
//! - `fail_next(n)` answers the next `n` non-probe requests with 410
//! - `set_probe_delay(d)` slows down the root resource
//!
//! Every request is recorded for later assertions.

#![allow(dead_code)]

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use restmx_client::{
    Connector, ConnectorConfig, Credentials, LifecycleEventKind, LifecycleListener, LifecycleNotification, Scheme,
    Session,
};
use restmx_common::{
    Attribute, AttributeDescriptor, FilterSpec, NotificationAreaLinks, NotificationRecord, NotificationRegistration,
    ObjectInstanceLink, ObjectName, OperationDescriptor, RemoteException, ResourceInfo, ResourceInfoLinks,
    ServerInfo, ServerNotificationRegistration, CONNECTOR_URI, ROOT_PATH, ROUTER_URI,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const MBEANS: &str = "/IBMJMXConnectorREST/mbeans";
const NOTIFICATIONS: &str = "/IBMJMXConnectorREST/notifications";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
struct MockResource {
    class_name: String,
    attributes: BTreeMap<String, Value>,
}

#[derive(Default)]
struct MockArea {
    id: usize,
    registrations: BTreeMap<usize, NotificationRegistration>,
    server_registrations: Vec<ServerNotificationRegistration>,
}

#[derive(Default)]
struct Inner {
    resources: BTreeMap<String, MockResource>,
    area: Option<MockArea>,
    inbox: VecDeque<NotificationRecord>,
    requests: Vec<RecordedRequest>,
}

struct MockState {
    version: u32,
    down: AtomicBool,
    fail_next: AtomicUsize,
    probe_delay_ms: AtomicU64,
    next_id: AtomicUsize,
    forced: Mutex<Vec<ForcedResponse>>,
    inner: Mutex<Inner>,
}

/// Canned response for requests matching a method and path suffix.
struct ForcedResponse {
    method: Method,
    suffix: String,
    status: StatusCode,
    body: Vec<u8>,
}

/// Mock server that runs on a separate task.
pub struct MockServer {
    addr: String,
    state: Arc<MockState>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::with_version(4).await
    }

    /// Starts a server advertising protocol `version`.
    pub async fn with_version(version: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(MockState {
            version,
            down: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            probe_delay_ms: AtomicU64::new(0),
            next_id: AtomicUsize::new(1),
            forced: Mutex::new(Vec::new()),
            inner: Mutex::new(Inner::default()),
        });

        let (shutdown, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let connection_rx = shutdown_rx.clone();
        let server_state = state.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let state = server_state.clone();
                                let mut closing = connection_rx.clone();

                                tokio::spawn(async move {
                                    let service = service_fn(move |req| handle(state.clone(), req));
                                    let connection = http1::Builder::new().serve_connection(io, service);
                                    // stopping the server also drops kept-alive connections
                                    tokio::select! {
                                        result = connection => {
                                            if let Err(err) = result {
                                                eprintln!("Server error: {}", err);
                                            }
                                        }
                                        _ = closing.changed() => {}
                                    }
                                });
                            }
                            Err(err) => {
                                eprintln!("Accept error: {}", err);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    /// `host:port` of the server.
    pub fn endpoint(&self) -> String {
        self.addr.clone()
    }

    pub fn add_resource(&self, name: &str, class_name: &str, attributes: &[(&str, Value)]) {
        let resource = MockResource {
            class_name: class_name.to_string(),
            attributes: attributes
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
        };
        self.inner().resources.insert(name.to_string(), resource);
    }

    pub fn remove_resource(&self, name: &str) {
        self.inner().resources.remove(name);
    }

    pub fn attribute(&self, name: &str, attribute: &str) -> Option<Value> {
        self.inner()
            .resources
            .get(name)
            .and_then(|r| r.attributes.get(attribute).cloned())
    }

    pub fn set_down(&self, down: bool) {
        self.state.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_next(&self, count: usize) {
        self.state.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        self.state
            .probe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Closes the listener and every open connection; later connects are refused.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Answers every `method` request whose path ends with `suffix` with `status` and `body`.
    pub fn force_response(&self, method: Method, suffix: &str, status: StatusCode, body: &[u8]) {
        self.state.forced.lock().unwrap().push(ForcedResponse {
            method,
            suffix: suffix.to_string(),
            status,
            body: body.to_vec(),
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.inner().requests.clear();
    }

    /// Recorded requests with this method whose path ends with `suffix`.
    pub fn requests_to(&self, method: Method, suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.ends_with(suffix))
            .collect()
    }

    pub fn has_area(&self) -> bool {
        self.inner().area.is_some()
    }

    /// Filter lists of the live client registrations.
    pub fn registration_filters(&self) -> Vec<Vec<FilterSpec>> {
        self.inner()
            .area
            .as_ref()
            .map(|area| area.registrations.values().map(|r| r.filters.clone()).collect())
            .unwrap_or_default()
    }

    pub fn server_registrations(&self) -> Vec<ServerNotificationRegistration> {
        self.inner()
            .area
            .as_ref()
            .map(|area| area.server_registrations.clone())
            .unwrap_or_default()
    }

    pub fn queue_notification(&self, record: NotificationRecord) {
        self.inner().inbox.push_back(record);
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.state.inner.lock().unwrap()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle(state: Arc<MockState>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = req.into_body().collect().await?.to_bytes();

    if path == ROOT_PATH {
        let delay = state.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    let request = RecordedRequest {
        method,
        path,
        query,
        headers,
        body,
    };
    state.inner.lock().unwrap().requests.push(request.clone());

    let (status, payload) = state.route(&request);
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .unwrap())
}

fn json_body<T: Serialize + ?Sized>(value: &T) -> (StatusCode, Vec<u8>) {
    (StatusCode::OK, serde_json::to_vec(value).unwrap())
}

fn remote_error(status: StatusCode, class_name: &str, message: &str) -> (StatusCode, Vec<u8>) {
    (
        status,
        serde_json::to_vec(&RemoteException::new(class_name, message)).unwrap(),
    )
}

fn empty(status: StatusCode) -> (StatusCode, Vec<u8>) {
    (status, Vec::new())
}

fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}

impl MockState {
    fn route(&self, request: &RecordedRequest) -> (StatusCode, Vec<u8>) {
        if self.down.load(Ordering::SeqCst) {
            return empty(StatusCode::GONE);
        }
        if let Some(forced) = self
            .forced
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.method == request.method && request.path.ends_with(&f.suffix))
        {
            return (forced.status, forced.body.clone());
        }
        if request.path != ROOT_PATH
            && self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return empty(StatusCode::GONE);
        }

        let path = request.path.replacen(ROUTER_URI, CONNECTOR_URI, 1);
        let method = &request.method;
        let mut inner = self.inner.lock().unwrap();

        if path == ROOT_PATH && method == Method::GET {
            return json_body(&ServerInfo::with_default_layout(self.version));
        }
        if let Some(rest) = path.strip_prefix(ROOT_PATH) {
            return match rest {
                "/mbeanCount" => json_body(&inner.resources.len()),
                "/defaultDomain" => json_body("app"),
                "/domains" => {
                    let mut domains: Vec<String> = inner
                        .resources
                        .keys()
                        .filter_map(|n| n.split(':').next().map(str::to_string))
                        .collect();
                    domains.dedup();
                    json_body(&domains)
                }
                "/instanceOf" => {
                    let pairs = query_pairs(request.query.as_deref());
                    let find = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
                    let matches = match (find("objectName"), find("className")) {
                        (Some(name), Some(class)) => inner
                            .resources
                            .get(&name)
                            .is_some_and(|r| r.class_name == class),
                        _ => false,
                    };
                    json_body(&matches)
                }
                _ => empty(StatusCode::NOT_FOUND),
            };
        }
        if path == format!("{}/factory", MBEANS) && method == Method::POST {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            let name = body["objectName"].as_str().unwrap_or_default().to_string();
            let class_name = body["className"].as_str().unwrap_or_default().to_string();
            if inner.resources.contains_key(&name) {
                return remote_error(
                    StatusCode::BAD_REQUEST,
                    "javax.management.InstanceAlreadyExistsException",
                    &name,
                );
            }
            inner.resources.insert(
                name.clone(),
                MockResource {
                    class_name: class_name.clone(),
                    attributes: BTreeMap::new(),
                },
            );
            return json_body(&json!({
                "objectName": name,
                "className": class_name,
                "URL": format!("{}/{}", MBEANS, name),
            }));
        }
        if path == MBEANS && method == Method::GET {
            let pairs = query_pairs(request.query.as_deref());
            let name = pairs.iter().find(|(k, _)| k == "objectName").map(|(_, v)| v.clone());
            let links: Vec<ObjectInstanceLink> = inner
                .resources
                .iter()
                .filter(|(n, _)| name.as_ref().map_or(true, |wanted| *n == wanted))
                .map(|(n, r)| ObjectInstanceLink {
                    object_name: ObjectName::new(n.as_str()).unwrap(),
                    class_name: r.class_name.clone(),
                    url: format!("{}/{}", MBEANS, n),
                })
                .collect();
            return json_body(&links);
        }
        if let Some(rest) = path.strip_prefix(&format!("{}/", MBEANS)) {
            return Self::route_resource(&mut inner, method, rest, request);
        }
        if path == NOTIFICATIONS && method == Method::POST {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            inner.area = Some(MockArea {
                id,
                ..MockArea::default()
            });
            let base = format!("{}/{}", NOTIFICATIONS, id);
            return json_body(&NotificationAreaLinks {
                registrations: format!("{}/registrations", base),
                server_registrations: format!("{}/serverRegistrations", base),
                inbox: format!("{}/inbox", base),
                client: base,
            });
        }
        if let Some(rest) = path.strip_prefix(&format!("{}/", NOTIFICATIONS)) {
            return self.route_area(&mut inner, method, rest, request);
        }
        empty(StatusCode::NOT_FOUND)
    }

    fn route_resource(
        inner: &mut Inner,
        method: &Method,
        rest: &str,
        request: &RecordedRequest,
    ) -> (StatusCode, Vec<u8>) {
        let mut parts = rest.splitn(3, '/');
        let name = parts.next().unwrap_or_default().to_string();
        let child = parts.next();
        let leaf = parts.next();

        if !inner.resources.contains_key(&name) {
            return remote_error(
                StatusCode::BAD_REQUEST,
                "javax.management.InstanceNotFoundException",
                &name,
            );
        }
        let base = format!("{}/{}", MBEANS, name);

        match (method.clone(), child, leaf) {
            (Method::GET, None, None) => {
                let resource = &inner.resources[&name];
                let info = ResourceInfo {
                    class_name: resource.class_name.clone(),
                    description: None,
                    attributes: resource
                        .attributes
                        .keys()
                        .map(|a| AttributeDescriptor {
                            name: a.clone(),
                            type_name: "java.lang.Object".to_string(),
                            description: None,
                            readable: true,
                            writable: true,
                        })
                        .collect(),
                    operations: vec![OperationDescriptor {
                        name: "reset".to_string(),
                        return_type: Some("java.lang.String".to_string()),
                        signature: Vec::new(),
                        description: None,
                    }],
                };
                json_body(&ResourceInfoLinks {
                    info,
                    attributes_url: format!("{}/attributes", base),
                    attribute_urls: resource
                        .attributes
                        .keys()
                        .map(|a| (a.clone(), format!("{}/attributes/{}", base, a)))
                        .collect(),
                    operation_urls: [("reset".to_string(), format!("{}/operations/reset", base))]
                        .into_iter()
                        .collect(),
                })
            }
            (Method::DELETE, None, None) => {
                inner.resources.remove(&name);
                empty(StatusCode::NO_CONTENT)
            }
            (Method::GET, Some("attributes"), None) => {
                let wanted: Vec<String> = query_pairs(request.query.as_deref())
                    .into_iter()
                    .filter(|(k, _)| k == "attribute")
                    .map(|(_, v)| v)
                    .collect();
                let attributes: Vec<Attribute> = inner.resources[&name]
                    .attributes
                    .iter()
                    .filter(|(a, _)| wanted.is_empty() || wanted.contains(a))
                    .map(|(a, v)| Attribute::new(a.clone(), v.clone()))
                    .collect();
                json_body(&attributes)
            }
            (Method::POST, Some("attributes"), None) => {
                let attributes: Vec<Attribute> = serde_json::from_slice(&request.body).unwrap_or_default();
                let resource = inner.resources.get_mut(&name).unwrap();
                for attribute in &attributes {
                    resource
                        .attributes
                        .insert(attribute.name.clone(), attribute.value.clone());
                }
                json_body(&attributes)
            }
            (Method::GET, Some("attributes"), Some(attribute)) => match inner.resources[&name].attributes.get(attribute) {
                Some(value) => json_body(value),
                None => remote_error(
                    StatusCode::BAD_REQUEST,
                    "javax.management.AttributeNotFoundException",
                    attribute,
                ),
            },
            (Method::PUT, Some("attributes"), Some(attribute)) => {
                let value: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
                inner
                    .resources
                    .get_mut(&name)
                    .unwrap()
                    .attributes
                    .insert(attribute.to_string(), value);
                empty(StatusCode::NO_CONTENT)
            }
            (Method::POST, Some("operations"), Some("reset")) => json_body("reset done"),
            _ => empty(StatusCode::NOT_FOUND),
        }
    }

    fn route_area(
        &self,
        inner: &mut Inner,
        method: &Method,
        rest: &str,
        request: &RecordedRequest,
    ) -> (StatusCode, Vec<u8>) {
        let segments: Vec<&str> = rest.split('/').collect();
        let id: usize = segments[0].parse().unwrap_or(0);
        if inner.area.as_ref().map(|a| a.id) != Some(id) {
            return empty(StatusCode::GONE);
        }

        match (method.clone(), &segments[1..]) {
            (Method::DELETE, []) => {
                inner.area = None;
                empty(StatusCode::NO_CONTENT)
            }
            (Method::GET, ["inbox"]) => {
                let batch: Vec<NotificationRecord> = inner.inbox.drain(..).collect();
                json_body(&batch)
            }
            (Method::POST, ["registrations"]) => {
                let registration: NotificationRegistration = match serde_json::from_slice(&request.body) {
                    Ok(registration) => registration,
                    Err(err) => return remote_error(StatusCode::BAD_REQUEST, "java.lang.IllegalArgumentException", &err.to_string()),
                };
                if !inner.resources.contains_key(registration.object_name.as_str()) {
                    return remote_error(
                        StatusCode::BAD_REQUEST,
                        "javax.management.InstanceNotFoundException",
                        registration.object_name.as_str(),
                    );
                }
                let key = self.next_id.fetch_add(1, Ordering::SeqCst);
                let area = inner.area.as_mut().unwrap();
                area.registrations.insert(key, registration);
                json_body(&format!("{}/{}/registrations/{}", NOTIFICATIONS, id, key))
            }
            (Method::PUT, ["registrations", key]) => {
                let filters: Vec<FilterSpec> = serde_json::from_slice(&request.body).unwrap_or_default();
                let key: usize = key.parse().unwrap_or(0);
                match inner.area.as_mut().unwrap().registrations.get_mut(&key) {
                    Some(registration) => {
                        registration.filters = filters;
                        empty(StatusCode::NO_CONTENT)
                    }
                    None => empty(StatusCode::NOT_FOUND),
                }
            }
            (Method::DELETE, ["registrations", key]) => {
                let key: usize = key.parse().unwrap_or(0);
                inner.area.as_mut().unwrap().registrations.remove(&key);
                empty(StatusCode::NO_CONTENT)
            }
            (Method::POST, ["serverRegistrations"]) => {
                let registration: ServerNotificationRegistration = match serde_json::from_slice(&request.body) {
                    Ok(registration) => registration,
                    Err(err) => return remote_error(StatusCode::BAD_REQUEST, "java.lang.IllegalArgumentException", &err.to_string()),
                };
                if !inner.resources.contains_key(registration.listener.as_str()) {
                    return remote_error(
                        StatusCode::BAD_REQUEST,
                        "javax.management.InstanceNotFoundException",
                        registration.listener.as_str(),
                    );
                }
                let operation = registration.operation;
                let area = inner.area.as_mut().unwrap();
                match operation {
                    restmx_common::ServerRegistrationOp::Add => area.server_registrations.push(registration),
                    restmx_common::ServerRegistrationOp::RemoveAll => area.server_registrations.retain(|r| {
                        r.object_name != registration.object_name || r.listener != registration.listener
                    }),
                    restmx_common::ServerRegistrationOp::RemoveSpecific => {
                        if let Some(position) = area.server_registrations.iter().position(|r| {
                            r.object_name == registration.object_name
                                && r.listener == registration.listener
                                && r.filter_id == registration.filter_id
                                && r.handback_id == registration.handback_id
                        }) {
                            area.server_registrations.remove(position);
                        }
                    }
                }
                empty(StatusCode::NO_CONTENT)
            }
            _ => empty(StatusCode::NOT_FOUND),
        }
    }
}

// ============================================================================
// Client helpers
// ============================================================================

/// Settings that keep tests fast and free of background health checks.
pub fn fast_settings() -> HashMap<String, Value> {
    let mut settings = HashMap::new();
    settings.insert("serverFailoverInterval".to_string(), json!(-1));
    settings.insert("maxServerWaitTime".to_string(), json!(0));
    settings.insert("serverStatusPollingInterval".to_string(), json!(50));
    settings.insert("notificationFetchInterval".to_string(), json!(50));
    settings.insert("readTimeout".to_string(), json!(5000));
    settings
}

pub fn connector_for(servers: &[&MockServer]) -> Connector {
    let mut endpoints = servers.iter().map(|s| s.endpoint());
    let primary = endpoints.next().unwrap();
    let config = ConnectorConfig::new(primary)
        .with_extra_endpoints(endpoints.collect::<Vec<_>>())
        .with_scheme(Scheme::Http)
        .with_credentials(Credentials::basic("admin", "secret"));
    Connector::new(config)
}

/// Routes client logs to the test output; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub async fn connect(servers: &[&MockServer], settings: &HashMap<String, Value>) -> (Connector, Session) {
    init_tracing();
    let connector = connector_for(servers);
    let session = connector.connect_with(settings).await.unwrap();
    (connector, session)
}

/// Lifecycle event kinds observed by a connector, in order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<LifecycleNotification>>>);

impl EventLog {
    pub fn attach(connector: &Connector) -> Self {
        let log = EventLog::default();
        let sink = log.0.clone();
        let listener: Arc<dyn LifecycleListener> = Arc::new(move |n: &LifecycleNotification| {
            sink.lock().unwrap().push(n.clone());
        });
        connector.add_lifecycle_listener(listener, None);
        log
    }

    pub fn kinds(&self) -> Vec<LifecycleEventKind> {
        self.0.lock().unwrap().iter().map(|n| n.event.kind()).collect()
    }

    pub fn notifications(&self) -> Vec<LifecycleNotification> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, kind: LifecycleEventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

/// Connects with an event log attached before `connect`.
pub async fn connect_logged(
    servers: &[&MockServer],
    settings: &HashMap<String, Value>,
) -> (Connector, Session, EventLog) {
    let connector = connector_for(servers);
    let log = EventLog::attach(&connector);
    let session = connector.connect_with(settings).await.unwrap();
    (connector, session, log)
}

/// Polls `condition` every 10ms until it holds or `timeout` expires.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn name(raw: &str) -> ObjectName {
    ObjectName::new(raw).unwrap()
}
