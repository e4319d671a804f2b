//! # dumdum Core Library
//!
//! A small chat service over a length-prefixed binary protocol: named
//! channels, unique nicknames, and a bounded in-memory message history
//! per channel.
//!
//! ## Layers
//!
//! - [`protocol`]: sans-I/O client and server state machines, wire codecs
//!   and snowflake ids. Nothing in here touches a socket.
//! - [`server`]: shared chat state and the tokio connection manager that
//!   drives one protocol instance per accepted client.
//! - [`client`]: async driver that runs the client machine over TCP.
//! - [`tls`]: certificate loading for the optional in-band TLS upgrade.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        dumdum-server / dumdum-cli       │
//! ├─────────────────────────────────────────┤
//! │   server (Manager)  │  client (Async)   │
//! ├─────────────────────────────────────────┤
//! │           protocol (sans-I/O)           │
//! ├─────────────────────────────────────────┤
//! │      error     │   logging   │   tls    │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod client;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod tls;

pub use client::{AsyncClient, ClientOptions};
pub use error::{Error, Result};
pub use protocol::PROTOCOL_VERSION;
pub use server::{Manager, ManagerConfig, ServerState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
