use std::fmt;
use std::sync::Arc;

use crate::endpoint::{ActiveEndpoint, Scheme};

/// A server path whose host and port are filled in at the last moment.
///
/// `resolve` reads the session's active endpoint on every call, so a URL
/// cached while one endpoint was active keeps working after failover moves
/// the session to another one.
#[derive(Clone)]
pub struct DeferredUrl {
    path: Arc<str>,
    active: ActiveEndpoint,
    scheme: Scheme,
}

impl DeferredUrl {
    /// Creates a deferred URL from a server-relative path.
    ///
    /// Absolute URLs are accepted too; their scheme and authority are
    /// discarded.
    pub fn new(path: &str, active: ActiveEndpoint, scheme: Scheme) -> Self {
        Self {
            path: normalize_path(path).into(),
            active,
            scheme,
        }
    }

    /// Absolute URL against the endpoint active right now.
    ///
    /// # Example
    ///
    /// ```
    /// use restmx_client::{ActiveEndpoint, DeferredUrl, Endpoint, Scheme};
    ///
    /// let active = ActiveEndpoint::new(Endpoint::parse("a:1").unwrap());
    /// let url = DeferredUrl::new("/IBMJMXConnectorREST/mbeans", active, Scheme::Https);
    /// assert_eq!(url.resolve(), "https://a:1/IBMJMXConnectorREST/mbeans");
    /// ```
    pub fn resolve(&self) -> String {
        format!("{}://{}{}", self.scheme.as_str(), self.active.get(), self.path)
    }

    /// Resolves and appends a query string (without the leading `?`).
    pub fn resolve_with_query(&self, query: &str) -> String {
        if query.is_empty() {
            self.resolve()
        } else {
            format!("{}?{}", self.resolve(), query)
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for DeferredUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeferredUrl").field(&self.path).finish()
    }
}

fn normalize_path(raw: &str) -> String {
    let without_authority = match raw.find("://") {
        Some(idx) => {
            let rest = &raw[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => raw,
    };
    if without_authority.starts_with('/') {
        without_authority.to_string()
    } else {
        format!("/{}", without_authority)
    }
}
