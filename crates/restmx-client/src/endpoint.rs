use rand::seq::SliceRandom;
use rand::Rng;
use restmx_common::{RestmxError, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

/// URL scheme used to reach endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Https,
    /// Plain HTTP, for local servers and tests.
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http => "http",
        }
    }
}

/// One candidate server process, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parses `host:port`, splitting at the last `:`. IPv6 hosts must be
    /// bracketed.
    ///
    /// # Example
    ///
    /// ```
    /// use restmx_client::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("[::1]:9443").unwrap();
    /// assert_eq!(endpoint.host(), "[::1]");
    /// assert_eq!(endpoint.port(), 9443);
    /// assert!(Endpoint::parse("no-port").is_err());
    /// assert!(Endpoint::parse("::1:9443").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| RestmxError::InvalidEndpoint(format!("{} is not host:port", raw)))?;
        if host.is_empty() {
            return Err(RestmxError::InvalidEndpoint(format!("{} has no host", raw)));
        }
        let bracketed = host.len() > 2 && host.starts_with('[') && host.ends_with(']');
        if host.contains(':') && !bracketed {
            return Err(RestmxError::InvalidEndpoint(format!(
                "{} has an IPv6 host without brackets",
                raw
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| RestmxError::InvalidEndpoint(format!("{} has an invalid port", raw)))?;
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = RestmxError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

/// Immutable, never-empty list of interchangeable endpoints.
///
/// Built once per connect. With more than one distinct endpoint the order is
/// shuffled once, spreading clients across the servers.
#[derive(Debug, Clone)]
pub struct EndpointList {
    endpoints: Arc<[Endpoint]>,
}

impl EndpointList {
    pub fn build(primary: &str, extras: &[String]) -> Result<Self> {
        Self::build_with_rng(primary, extras, &mut rand::thread_rng())
    }

    pub fn build_with_rng<R: Rng + ?Sized>(primary: &str, extras: &[String], rng: &mut R) -> Result<Self> {
        let mut endpoints = vec![Endpoint::parse(primary)?];
        for raw in extras {
            let endpoint = Endpoint::parse(raw)?;
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        if endpoints.len() > 1 {
            endpoints.shuffle(rng);
        }
        Ok(EndpointList {
            endpoints: endpoints.into(),
        })
    }

    /// The endpoint tried first.
    pub fn first(&self) -> &Endpoint {
        // build() always inserts the primary endpoint
        &self.endpoints[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    pub fn as_slice(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

/// The endpoint currently serving the session.
///
/// Shared by every [`crate::DeferredUrl`]; written only by initial probing and
/// by the recovery algorithm.
#[derive(Debug, Clone)]
pub struct ActiveEndpoint {
    current: Arc<RwLock<Endpoint>>,
}

impl ActiveEndpoint {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            current: Arc::new(RwLock::new(endpoint)),
        }
    }

    pub fn get(&self) -> Endpoint {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, endpoint: Endpoint) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = endpoint;
    }
}
