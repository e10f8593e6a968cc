//! restmx Transport Layer
//!
//! This module provides the body codec and the HTTP transport used to talk to
//! management servers.
//!
//! # Components
//!
//! - **[`Codec`]** / **[`JsonCodec`]**: Encode/decode request and response bodies
//! - **[`Transport`]**: Seam through which every request is sent
//! - **[`HyperTransport`]**: Default transport (hyper client, rustls TLS)
//!
//! # Example
//!
//! ```no_run
//! use restmx_common::transport::{HttpRequest, HyperTransport, TlsSettings, Transport};
//! use hyper::Method;
//! use std::time::Duration;
//!
//! # async fn run() -> restmx_common::Result<()> {
//! let transport = HyperTransport::new(&TlsSettings::default())?;
//! let request = HttpRequest::new(
//!     Method::GET,
//!     "https://127.0.0.1:9443/IBMJMXConnectorREST/mbeanServer",
//!     Duration::from_secs(60),
//! );
//! let response = transport.send(request).await?;
//! println!("status {}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod http;
pub mod https;

pub use codec::{Codec, JsonCodec};
pub use http::{HttpRequest, HttpResponse, Transport};
pub use https::{HyperTransport, TlsSettings};
