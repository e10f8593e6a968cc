//! restmx Client
//!
//! A session-oriented connector for the REST management protocol. One
//! [`Session`] is backed by whichever of several interchangeable server
//! endpoints is currently reachable:
//!
//! - the first endpoint that answers a probe becomes active
//! - a transport failure or a 404/410 runs recovery: the active endpoint is
//!   retried for a while, then the others are tried in order
//! - server-side notification subscriptions are replayed on whichever
//!   endpoint recovery settles on
//! - cached resource URLs ([`DeferredUrl`]) keep working across failover
//!   because they resolve against the active endpoint on every use
//!
//! Progress is reported through lifecycle events on the [`Connector`].

pub mod config;
pub mod connector;
pub mod deferred_url;
pub mod endpoint;
pub mod events;
pub mod identity;
pub mod notification;
pub mod session;

pub use config::{ConnectorConfig, Credentials, Settings};
pub use connector::Connector;
pub use deferred_url::DeferredUrl;
pub use endpoint::{ActiveEndpoint, Endpoint, EndpointList, Scheme};
pub use events::{
    LifecycleEvent, LifecycleEventKind, LifecycleFilter, LifecycleListener, LifecycleNotification,
};
pub use identity::IdentityRegistry;
pub use notification::{
    AttributeChangeFilter, FnFilter, Handback, NotificationFilter, NotificationListener, NotificationTypeFilter,
};
pub use session::{PollMode, Session, SessionStats};
