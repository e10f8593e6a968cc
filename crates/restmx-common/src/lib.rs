//! restmx Common Types and Transport
//!
//! This crate provides the wire protocol definitions and the HTTP transport
//! layer for the restmx management connector.
//!
//! # Overview
//!
//! restmx talks to a cluster of management servers over a REST-over-HTTPS
//! protocol. Servers expose managed resources (attributes, operations) and
//! buffer notifications for polling clients. This crate contains the pieces
//! shared by everything that speaks the protocol:
//!
//! - **Protocol Layer**: bootstrap metadata, resource and notification payloads,
//!   routing context, error taxonomy
//! - **Transport Layer**: JSON codec and the HTTPS transport
//!
//! # Components
//!
//! - [`protocol`] - Payload types and [`RestmxError`]
//! - [`transport`] - [`transport::Codec`], [`transport::Transport`] and its hyper implementation
//!
//! # Example
//!
//! ```
//! use restmx_common::{ObjectName, RestmxError};
//!
//! let name = ObjectName::new("app:type=Cache,name=users")?;
//! assert_eq!(name.domain(), "app");
//! # Ok::<(), RestmxError>(())
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
