use serde::{Deserialize, Serialize};

/// Path prefix under which every connector resource lives.
pub const CONNECTOR_URI: &str = "/IBMJMXConnectorREST";

/// Path prefix used to reach cluster members through a routing server.
pub const ROUTER_URI: &str = "/IBMJMXConnectorREST/router";

/// Root bootstrap resource, also used as the liveness probe target.
pub const ROOT_PATH: &str = "/IBMJMXConnectorREST/mbeanServer";

/// Server protocol version from which routed calls no longer need the router prefix.
pub const ROUTER_FREE_VERSION: u32 = 4;

/// Bootstrap metadata returned by the root resource.
///
/// Every URL is server-relative; the client resolves them against whichever
/// endpoint is active when a request is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: u32,
    #[serde(rename = "mbeans")]
    pub mbeans_url: String,
    #[serde(rename = "createMBean")]
    pub create_mbean_url: String,
    #[serde(rename = "mbeanCount")]
    pub mbean_count_url: String,
    #[serde(rename = "defaultDomain")]
    pub default_domain_url: String,
    #[serde(rename = "domains")]
    pub domains_url: String,
    #[serde(rename = "notifications")]
    pub notifications_url: String,
    #[serde(rename = "instanceOf")]
    pub instance_of_url: String,
    #[serde(rename = "fileTransfer", default)]
    pub file_transfer_url: Option<String>,
    #[serde(rename = "api", default)]
    pub api_url: Option<String>,
    #[serde(rename = "graph", default)]
    pub graph_url: Option<String>,
}

impl ServerInfo {
    /// Builds the metadata a server at protocol `version` advertises under the default layout.
    pub fn with_default_layout(version: u32) -> Self {
        ServerInfo {
            version,
            mbeans_url: format!("{}/mbeans", CONNECTOR_URI),
            create_mbean_url: format!("{}/mbeans/factory", CONNECTOR_URI),
            mbean_count_url: format!("{}/mbeanCount", ROOT_PATH),
            default_domain_url: format!("{}/defaultDomain", ROOT_PATH),
            domains_url: format!("{}/domains", ROOT_PATH),
            notifications_url: format!("{}/notifications", CONNECTOR_URI),
            instance_of_url: format!("{}/instanceOf", ROOT_PATH),
            file_transfer_url: Some(format!("{}/file", CONNECTOR_URI)),
            api_url: Some(format!("{}/api", CONNECTOR_URI)),
            graph_url: Some(format!("{}/graph", CONNECTOR_URI)),
        }
    }
}
