use std::fmt;

use thiserror::Error;

/// Semantic kind of an exception raised by the remote management server.
///
/// The server reports failures as a structured payload naming the exception
/// class. The simple class name is mapped onto this closed set so callers can
/// distinguish, for example, "resource already exists" from "bad argument".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    InstanceNotFound,
    InstanceAlreadyExists,
    AttributeNotFound,
    InvalidAttributeValue,
    IllegalArgument,
    Registration,
    NotCompliant,
    Reflection,
    ManagementOperation,
    Runtime,
    ListenerNotFound,
    Introspection,
    Other(String),
}

impl RemoteErrorKind {
    /// Maps a (possibly fully qualified) exception class name to a kind.
    pub fn from_class_name(class_name: &str) -> Self {
        let simple = class_name.rsplit('.').next().unwrap_or(class_name);
        match simple {
            "InstanceNotFoundException" => RemoteErrorKind::InstanceNotFound,
            "InstanceAlreadyExistsException" => RemoteErrorKind::InstanceAlreadyExists,
            "AttributeNotFoundException" => RemoteErrorKind::AttributeNotFound,
            "InvalidAttributeValueException" => RemoteErrorKind::InvalidAttributeValue,
            "IllegalArgumentException" | "RuntimeOperationsException" => {
                RemoteErrorKind::IllegalArgument
            }
            "MBeanRegistrationException" | "RuntimeMBeanRegistrationException" => {
                RemoteErrorKind::Registration
            }
            "NotCompliantMBeanException" => RemoteErrorKind::NotCompliant,
            "ReflectionException" => RemoteErrorKind::Reflection,
            "MBeanException" => RemoteErrorKind::ManagementOperation,
            "RuntimeMBeanException" | "RuntimeErrorException" => RemoteErrorKind::Runtime,
            "ListenerNotFoundException" => RemoteErrorKind::ListenerNotFound,
            "IntrospectionException" => RemoteErrorKind::Introspection,
            other => RemoteErrorKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::InstanceNotFound => write!(f, "instance not found"),
            RemoteErrorKind::InstanceAlreadyExists => write!(f, "instance already exists"),
            RemoteErrorKind::AttributeNotFound => write!(f, "attribute not found"),
            RemoteErrorKind::InvalidAttributeValue => write!(f, "invalid attribute value"),
            RemoteErrorKind::IllegalArgument => write!(f, "illegal argument"),
            RemoteErrorKind::Registration => write!(f, "registration"),
            RemoteErrorKind::NotCompliant => write!(f, "not compliant"),
            RemoteErrorKind::Reflection => write!(f, "reflection"),
            RemoteErrorKind::ManagementOperation => write!(f, "management operation"),
            RemoteErrorKind::Runtime => write!(f, "runtime"),
            RemoteErrorKind::ListenerNotFound => write!(f, "listener not found"),
            RemoteErrorKind::Introspection => write!(f, "introspection"),
            RemoteErrorKind::Other(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Error, Debug)]
pub enum RestmxError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Bad credentials (HTTP {0})")]
    BadCredentials(u16),

    #[error("Endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    #[error("Remote {kind} error: {message}")]
    RemoteOperation {
        kind: RemoteErrorKind,
        message: String,
    },

    #[error("Unexpected response code {code}: {reason}")]
    UnexpectedResponseCode { code: u16, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Listener not found: {0}")]
    ListenerNotFound(String),

    #[error("Identity space exhausted")]
    IdentitySpaceExhausted,

    #[error("Missing credentials")]
    MissingCredentials,

    #[error("No available endpoints")]
    NoAvailableEndpoints,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RestmxError {
    /// Returns true when no HTTP response was received at all.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RestmxError::Transport(_) | RestmxError::Timeout(_) | RestmxError::Io(_)
        )
    }

    /// Returns true when the session must run failover before surfacing this error.
    pub fn requires_recovery(&self) -> bool {
        self.is_transport() || matches!(self, RestmxError::EndpointUnavailable(_))
    }

    /// Returns the remote error kind, if this error was decoded from the server.
    pub fn remote_kind(&self) -> Option<&RemoteErrorKind> {
        match self {
            RestmxError::RemoteOperation { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Copies the error so it can be both returned and attached to an event.
    ///
    /// Serialization errors lose their source and become `InvalidResponse`.
    pub fn snapshot(&self) -> RestmxError {
        match self {
            RestmxError::Transport(m) => RestmxError::Transport(m.clone()),
            RestmxError::Timeout(ms) => RestmxError::Timeout(*ms),
            RestmxError::BadCredentials(code) => RestmxError::BadCredentials(*code),
            RestmxError::EndpointUnavailable(m) => RestmxError::EndpointUnavailable(m.clone()),
            RestmxError::RemoteOperation { kind, message } => RestmxError::RemoteOperation {
                kind: kind.clone(),
                message: message.clone(),
            },
            RestmxError::UnexpectedResponseCode { code, reason } => RestmxError::UnexpectedResponseCode {
                code: *code,
                reason: reason.clone(),
            },
            RestmxError::NotConnected => RestmxError::NotConnected,
            RestmxError::ResourceNotFound(m) => RestmxError::ResourceNotFound(m.clone()),
            RestmxError::ListenerNotFound(m) => RestmxError::ListenerNotFound(m.clone()),
            RestmxError::IdentitySpaceExhausted => RestmxError::IdentitySpaceExhausted,
            RestmxError::MissingCredentials => RestmxError::MissingCredentials,
            RestmxError::NoAvailableEndpoints => RestmxError::NoAvailableEndpoints,
            RestmxError::InvalidEndpoint(m) => RestmxError::InvalidEndpoint(m.clone()),
            RestmxError::InvalidArgument(m) => RestmxError::InvalidArgument(m.clone()),
            RestmxError::InvalidConfiguration(m) => RestmxError::InvalidConfiguration(m.clone()),
            RestmxError::InvalidResponse(m) => RestmxError::InvalidResponse(m.clone()),
            RestmxError::JsonSerialization(e) => RestmxError::InvalidResponse(e.to_string()),
            RestmxError::Io(e) => RestmxError::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl From<rustls::Error> for RestmxError {
    fn from(err: rustls::Error) -> Self {
        RestmxError::InvalidConfiguration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RestmxError>;
