pub mod error;
pub mod notifications;
pub mod resources;
pub mod routing;
pub mod server_info;

#[cfg(test)]
mod tests;

pub use error::{RemoteErrorKind, RestmxError, Result};
pub use notifications::{
    FilterSpec, Notification, NotificationAreaLinks, NotificationRecord, NotificationRegistration,
    NotificationSettings, ServerNotificationRegistration, ServerRegistrationOp,
};
pub use resources::{
    Attribute, AttributeDescriptor, CreateResource, Invocation, ObjectInstance, ObjectInstanceLink,
    ObjectName, OperationDescriptor, RemoteException, RemoteThrowable, ResourceInfo, ResourceInfoLinks,
};
pub use routing::RoutingContext;
pub use server_info::{ServerInfo, CONNECTOR_URI, ROOT_PATH, ROUTER_FREE_VERSION, ROUTER_URI};
