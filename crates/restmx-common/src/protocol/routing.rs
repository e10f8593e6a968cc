use serde::{Deserialize, Serialize};

/// Header naming the target host of a routed request.
pub const ROUTING_HOST_HEADER: &str = "X-Restmx-Routing-Host";
/// Header naming the target server's user directory.
pub const ROUTING_SERVER_USER_DIR_HEADER: &str = "X-Restmx-Routing-Server-User-Dir";
/// Header naming the target server.
pub const ROUTING_SERVER_NAME_HEADER: &str = "X-Restmx-Routing-Server-Name";
/// Header telling the routing server how long the client waits for the member.
pub const ROUTING_READ_TIMEOUT_HEADER: &str = "X-Restmx-Routing-Read-Timeout";

/// Addressing info used when the session proxies into a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "camelCase")]
pub enum RoutingContext {
    /// Route to a host; only the host header is sent.
    #[serde(rename_all = "camelCase")]
    Host { host_name: String },
    /// Route to one server on a host; all three headers are sent.
    #[serde(rename_all = "camelCase")]
    Server {
        host_name: String,
        server_user_dir: String,
        server_name: String,
    },
}

impl RoutingContext {
    pub fn host(host_name: impl Into<String>) -> Self {
        RoutingContext::Host {
            host_name: host_name.into(),
        }
    }

    pub fn server(
        host_name: impl Into<String>,
        server_user_dir: impl Into<String>,
        server_name: impl Into<String>,
    ) -> Self {
        RoutingContext::Server {
            host_name: host_name.into(),
            server_user_dir: server_user_dir.into(),
            server_name: server_name.into(),
        }
    }

    pub fn is_server_level(&self) -> bool {
        matches!(self, RoutingContext::Server { .. })
    }

    pub fn host_name(&self) -> &str {
        match self {
            RoutingContext::Host { host_name } | RoutingContext::Server { host_name, .. } => host_name,
        }
    }

    /// Headers carried by every request made under this context.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            RoutingContext::Host { host_name } => vec![(ROUTING_HOST_HEADER, host_name.clone())],
            RoutingContext::Server {
                host_name,
                server_user_dir,
                server_name,
            } => vec![
                (ROUTING_HOST_HEADER, host_name.clone()),
                (ROUTING_SERVER_USER_DIR_HEADER, server_user_dir.clone()),
                (ROUTING_SERVER_NAME_HEADER, server_name.clone()),
            ],
        }
    }
}
