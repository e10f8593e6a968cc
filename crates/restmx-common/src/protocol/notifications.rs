use serde::{Deserialize, Serialize};

use crate::protocol::resources::ObjectName;
use crate::protocol::routing::RoutingContext;

/// A notification emitted by a remote resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default = "default_notification_class")]
    pub class_name: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub sequence_number: i64,
    #[serde(default)]
    pub time_stamp: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_data: Option<serde_json::Value>,
    /// Set on attribute change notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
}

impl Notification {
    pub fn new(notification_type: impl Into<String>, source: impl Into<String>, sequence_number: i64) -> Self {
        Notification {
            class_name: default_notification_class(),
            notification_type: notification_type.into(),
            source: Some(source.into()),
            sequence_number,
            time_stamp: 0,
            message: None,
            user_data: None,
            attribute_name: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_attribute(mut self, attribute_name: impl Into<String>) -> Self {
        self.attribute_name = Some(attribute_name.into());
        self
    }
}

fn default_notification_class() -> String {
    "javax.management.Notification".to_string()
}

/// One entry of an inbox batch: the notification and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub notification: Notification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_user_dir: Option<String>,
}

impl NotificationRecord {
    pub fn new(notification: Notification) -> Self {
        NotificationRecord {
            notification,
            host_name: None,
            server_name: None,
            server_user_dir: None,
        }
    }

    pub fn with_routing(mut self, routing: &RoutingContext) -> Self {
        match routing {
            RoutingContext::Host { host_name } => {
                self.host_name = Some(host_name.clone());
            }
            RoutingContext::Server {
                host_name,
                server_user_dir,
                server_name,
            } => {
                self.host_name = Some(host_name.clone());
                self.server_user_dir = Some(server_user_dir.clone());
                self.server_name = Some(server_name.clone());
            }
        }
        self
    }

    /// Routing context the record was emitted under, if any.
    pub fn routing(&self) -> Option<RoutingContext> {
        match (&self.host_name, &self.server_user_dir, &self.server_name) {
            (Some(host), Some(user_dir), Some(server)) => {
                Some(RoutingContext::server(host.clone(), user_dir.clone(), server.clone()))
            }
            (Some(host), None, None) => Some(RoutingContext::host(host.clone())),
            _ => None,
        }
    }
}

/// Wire form of a filter the server can evaluate before buffering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterSpec {
    /// Enabled notification type prefixes.
    #[serde(rename_all = "camelCase")]
    NotificationType { enabled_types: Vec<String> },
    /// Enabled attribute names of attribute change notifications.
    #[serde(rename_all = "camelCase")]
    AttributeChange { enabled_attributes: Vec<String> },
}

/// Settings posted when creating a notification area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub delivery_interval: u64,
    pub inbox_expiry: u64,
}

/// URLs of a freshly created notification area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAreaLinks {
    pub registrations: String,
    pub server_registrations: String,
    pub inbox: String,
    pub client: String,
}

/// Creates or updates the server side of a client-delivered subscription.
///
/// An empty filter list means every notification of the resource is buffered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRegistration {
    pub object_name: ObjectName,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerRegistrationOp {
    Add,
    RemoveAll,
    RemoveSpecific,
}

/// Registers (or removes) a server-resident resource as listener of another.
///
/// Filter and handback objects stay on the client; only their identity ids
/// travel so that a removal can name the exact registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerNotificationRegistration {
    pub operation: ServerRegistrationOp,
    pub object_name: ObjectName,
    pub listener: ObjectName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,
    #[serde(rename = "filterID")]
    pub filter_id: u32,
    #[serde(rename = "handbackID")]
    pub handback_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingContext>,
}
