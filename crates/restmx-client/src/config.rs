//! Connector configuration and settings resolution
//!
//! Numeric and boolean settings are resolved per key from three sources, in
//! order: the map passed to `connect`, the process environment (`RESTMX_`
//! followed by the upper snake case key), and the built-in defaults. A value
//! that cannot be parsed is skipped with a warning and the next source is
//! consulted. Negative durations are treated the same way, except for
//! `serverFailoverInterval` where a negative value disables health polling.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use restmx_common::transport::{TlsSettings, Transport};
use restmx_common::{RestmxError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::endpoint::Scheme;

/// Value sent in the `User-Agent` header of every request.
pub const CLIENT_VERSION: &str = concat!("restmx-client/", env!("CARGO_PKG_VERSION"));

/// Prefix of the environment variables consulted during resolution.
pub const ENV_PREFIX: &str = "RESTMX_";

/// Recognized setting keys.
pub mod keys {
    pub const HOSTNAME_VERIFICATION_DISABLED: &str = "hostnameVerificationDisabled";
    pub const NOTIFICATION_DELIVERY_INTERVAL: &str = "notificationDeliveryInterval";
    pub const NOTIFICATION_FETCH_INTERVAL: &str = "notificationFetchInterval";
    pub const NOTIFICATION_INBOX_EXPIRY: &str = "notificationInboxExpiry";
    pub const READ_TIMEOUT: &str = "readTimeout";
    pub const NOTIFICATION_READ_TIMEOUT: &str = "notificationReadTimeout";
    pub const SERVER_FAILOVER_INTERVAL: &str = "serverFailoverInterval";
    pub const MAX_SERVER_WAIT_TIME: &str = "maxServerWaitTime";
    pub const SERVER_STATUS_POLLING_INTERVAL: &str = "serverStatusPollingInterval";
    pub const LOG_FAILOVERS: &str = "logFailovers";
}

/// Resolved connector settings.
///
/// All durations are whole milliseconds on the wire and in the settings map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub hostname_verification_disabled: bool,
    /// Zero lets the server deliver as soon as a notification is buffered.
    pub notification_delivery_interval: Duration,
    pub notification_fetch_interval: Duration,
    pub notification_inbox_expiry: Duration,
    pub read_timeout: Duration,
    pub notification_read_timeout: Duration,
    /// `None` when configured negative: no background health polling.
    pub server_failover_interval: Option<Duration>,
    pub max_server_wait_time: Duration,
    pub server_status_polling_interval: Duration,
    pub log_failovers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let read_timeout = Duration::from_millis(60_000);
        Self {
            hostname_verification_disabled: false,
            notification_delivery_interval: Duration::ZERO,
            notification_fetch_interval: Duration::from_millis(1_000),
            notification_inbox_expiry: Duration::from_millis(300_000),
            read_timeout,
            notification_read_timeout: read_timeout,
            server_failover_interval: Some(Duration::from_millis(30_000)),
            max_server_wait_time: Duration::from_millis(120_000),
            server_status_polling_interval: Duration::from_millis(4_000),
            log_failovers: false,
        }
    }
}

impl Settings {
    /// Resolves settings from `overrides`, then the process environment, then defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use restmx_client::config::{keys, Settings};
    /// use serde_json::json;
    /// use std::collections::HashMap;
    /// use std::time::Duration;
    ///
    /// let mut overrides = HashMap::new();
    /// overrides.insert(keys::READ_TIMEOUT.to_string(), json!(5000));
    ///
    /// let settings = Settings::resolve(&overrides);
    /// assert_eq!(settings.read_timeout, Duration::from_millis(5000));
    /// ```
    pub fn resolve(overrides: &HashMap<String, Value>) -> Self {
        Self::resolve_with(overrides, |name| std::env::var(name).ok())
    }

    /// Like [`Settings::resolve`], reading the environment through `env`.
    pub fn resolve_with<F>(overrides: &HashMap<String, Value>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let source = Source {
            overrides,
            env: &env,
        };

        let millis = |key: &str, default: Duration| {
            source
                .integer(key, false)
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(default)
        };

        let delivery = millis(keys::NOTIFICATION_DELIVERY_INTERVAL, defaults.notification_delivery_interval);
        let read_timeout = millis(keys::READ_TIMEOUT, defaults.read_timeout);
        let derived_notification_timeout = if delivery.is_zero() {
            read_timeout
        } else {
            delivery * 2
        };

        let failover = match source.integer(keys::SERVER_FAILOVER_INTERVAL, true) {
            Some(ms) if ms < 0 => None,
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => defaults.server_failover_interval,
        };

        Settings {
            hostname_verification_disabled: source
                .boolean(keys::HOSTNAME_VERIFICATION_DISABLED)
                .unwrap_or(defaults.hostname_verification_disabled),
            notification_delivery_interval: delivery,
            notification_fetch_interval: millis(keys::NOTIFICATION_FETCH_INTERVAL, defaults.notification_fetch_interval),
            notification_inbox_expiry: millis(keys::NOTIFICATION_INBOX_EXPIRY, defaults.notification_inbox_expiry),
            read_timeout,
            notification_read_timeout: millis(keys::NOTIFICATION_READ_TIMEOUT, derived_notification_timeout),
            server_failover_interval: failover,
            max_server_wait_time: millis(keys::MAX_SERVER_WAIT_TIME, defaults.max_server_wait_time),
            server_status_polling_interval: millis(
                keys::SERVER_STATUS_POLLING_INTERVAL,
                defaults.server_status_polling_interval,
            ),
            log_failovers: source.boolean(keys::LOG_FAILOVERS).unwrap_or(defaults.log_failovers),
        }
    }
}

/// Environment variable consulted for a setting key.
pub fn env_var_name(key: &str) -> String {
    let mut name = String::from(ENV_PREFIX);
    for (i, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            name.push('_');
        }
        name.push(c.to_ascii_uppercase());
    }
    name
}

struct Source<'a> {
    overrides: &'a HashMap<String, Value>,
    env: &'a dyn Fn(&str) -> Option<String>,
}

impl Source<'_> {
    /// First integer found for `key`; negatives are skipped unless `allow_negative`.
    fn integer(&self, key: &str, allow_negative: bool) -> Option<i64> {
        if let Some(value) = self.overrides.get(key) {
            let parsed = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            match parsed {
                Some(v) if v >= 0 || allow_negative => return Some(v),
                Some(_) => warn!(key, value = %value, "Ignoring negative setting"),
                None => warn!(key, value = %value, "Ignoring non-integer setting"),
            }
        }
        let name = env_var_name(key);
        if let Some(raw) = (self.env)(&name) {
            match raw.trim().parse::<i64>() {
                Ok(v) if v >= 0 || allow_negative => return Some(v),
                Ok(_) => warn!(variable = %name, value = %raw, "Ignoring negative setting"),
                Err(_) => warn!(variable = %name, value = %raw, "Ignoring non-integer setting"),
            }
        }
        None
    }

    fn boolean(&self, key: &str) -> Option<bool> {
        if let Some(value) = self.overrides.get(key) {
            let parsed = match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) => parse_bool(s),
                _ => None,
            };
            match parsed {
                Some(v) => return Some(v),
                None => warn!(key, value = %value, "Ignoring non-boolean setting"),
            }
        }
        let name = env_var_name(key);
        if let Some(raw) = (self.env)(&name) {
            match parse_bool(&raw) {
                Some(v) => return Some(v),
                None => warn!(variable = %name, value = %raw, "Ignoring non-boolean setting"),
            }
        }
        None
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// How the client authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password, sent as HTTP basic auth.
    Basic { user: String, password: String },
    /// The TLS layer presents a client certificate; no header is sent.
    Certificate,
}

impl Credentials {
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Value of the `Authorization` header, if these credentials use one.
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            Credentials::Basic { user, password } => {
                Some(format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password))))
            }
            Credentials::Certificate => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Certificate => f.write_str("Certificate"),
        }
    }
}

/// Everything the connector needs besides the per-call settings map.
#[derive(Clone)]
pub struct ConnectorConfig {
    /// The locally supplied `host:port`.
    pub endpoint: String,
    /// Additional interchangeable `host:port` endpoints.
    pub extra_endpoints: Vec<String>,
    pub credentials: Option<Credentials>,
    pub scheme: Scheme,
    pub tls: TlsSettings,
    /// Replaces the default hyper transport.
    pub transport: Option<Arc<dyn Transport>>,
}

impl ConnectorConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            extra_endpoints: Vec::new(),
            credentials: None,
            scheme: Scheme::Https,
            tls: TlsSettings::default(),
            transport: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_extra_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Checks that credentials are present.
    pub fn validate_credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or(RestmxError::MissingCredentials)
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("endpoint", &self.endpoint)
            .field("extra_endpoints", &self.extra_endpoints)
            .field("credentials", &self.credentials)
            .field("scheme", &self.scheme)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}
