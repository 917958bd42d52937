//! JSON-RPC client for IRC daemon admin endpoints.
//!
//! This crate keeps a pool of WebSocket sessions to one or more daemons'
//! JSON-RPC interfaces and keeps them usable: it tracks the health of every
//! session, replaces broken ones, and retries an operation once after a
//! reconnect.
//!
//! ## Features
//!
//! - Named, pooled connections with one active designation ([`Registry`])
//! - Per-connection health counters with proactive replacement ([`Connection`])
//! - One reconnect-and-retry per operation ([`Registry::with_retry`])
//! - Unregistered sessions for log streaming ([`DedicatedSession`])
//! - Configuration loaded from the panel's JSON config ([`RpcServers`])
//! - TLS via rustls, with certificate verification per endpoint
//!
//! ## Example
//!
//! ```ignore
//! use ircd_rpc_client::{Registry, RpcServers};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let servers = RpcServers::load("config.json")?;
//! let registry = Arc::new(Registry::new(Arc::new(servers)));
//!
//! // Connect every configured endpoint; failures are logged and returned.
//! for (name, err) in registry.connect_all("webpanel").await {
//!     eprintln!("{name}: {err}");
//! }
//!
//! // Run a command against the active endpoint.
//! let users = registry
//!     .with_retry(|conn| async move { conn.query("user.list", json!({})).await })
//!     .await?;
//! ```
//!
//! ## Connection Health
//!
//! Every [`Connection`] counts consecutive failures and remembers when it last
//! failed and last succeeded. [`Registry::with_retry`] records the outcome of
//! every operation. A connection is replaced before its next use when:
//!
//! - it failed [`defaults::ERROR_THRESHOLD`] times in a row, or
//! - its latest outcome was a failure less than [`defaults::FRESHNESS_WINDOW`] ago.
//!
//! Both thresholds are configurable through [`HealthPolicy`].
//!
//! ## Retry Logic
//!
//! [`Registry::with_retry`] reconnects and retries at most once. Whether a
//! failure warrants it is decided by [`ClientError::is_connection_error`]:
//!
//! - Transport failures (dial, closed, I/O, timeout, framing): yes
//! - Daemon error replies: only parse / invalid request codes
//! - Registry and configuration errors: no
//! - [`ClientError::Other`] raised by caller code: when the message contains
//!   one of [`CONNECTION_ERROR_TERMS`]
//!
//! A failure that is not a connection error is still retried once the
//! failure threshold is reached.
//!
//! If the reconnect itself fails, the call returns
//! [`ClientError::ConnectionLost`] carrying both failures.
//!
//! ```ignore
//! match registry.with_retry(|conn| async move { conn.query("server.list", json!({})).await }).await {
//!     Ok(servers) => println!("{servers}"),
//!     Err(ClientError::ConnectionLost { original, reconnect }) => {
//!         eprintln!("lost connection ({original}), reconnect failed ({reconnect})");
//!     }
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```
//!
//! ## Log Streaming
//!
//! Subscriptions run on a [`DedicatedSession`], a separate session to the
//! active endpoint that is not registered in the pool. Disconnecting or
//! reconnecting the pooled connection leaves it alone.
//!
//! ```ignore
//! use std::ops::ControlFlow;
//!
//! let session = registry.new_dedicated_client().await?;
//! session
//!     .stream_logs(&["all"], |entry| {
//!         println!("{entry}");
//!         ControlFlow::Continue(())
//!     })
//!     .await?;
//! ```
//!
//! [`DedicatedSession::stream_logs`] unsubscribes and closes on every exit
//! path, including a panicking handler.
//!
//! ## Feature Flags
//!
//! ### TLS
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `tls` | `tls-ring` + `tls-native-roots` (default) |
//! | `tls-ring` | ring crypto provider |
//! | `tls-aws-lc` | AWS LC crypto provider |
//! | `tls-native-roots` | System root certificates |
//! | `tls-webpki-roots` | Bundled Mozilla root certificates |
//!
//! Endpoints with `tls_verify_cert = false` accept any certificate, which is
//! how daemons with self-signed certificates are reached. Endpoints with
//! `tls = false` use plain `ws://`.
//!
//! ### Observability
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `tracing` | Events for dials, reconnects and streaming sessions (default) | `tracing` |
//!
//! ## Testing
//!
//! Internal components are tested via `#[cfg(test)]` modules against an
//! in-memory dialer. The `ircd-rpc-test` crate runs the client against a mock
//! daemon over real WebSockets.
//!
//! Run with: `cargo test -p ircd-rpc-client`

pub mod config;
mod connection;
mod error;
mod registry;
mod retry;
mod streaming;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{
    ConfigError, ConfigSource, DEFAULT_ISSUER, DialOptions, EndpointConfig, HealthPolicy,
    RpcServers, STREAMING_ISSUER, SharedConfig, defaults,
};
pub use connection::{Connection, HealthSnapshot};
pub use error::{CONNECTION_ERROR_TERMS, ClientError, RegistryBuildError, TransportError};
pub use registry::{Registry, RegistryBuilder};
pub use streaming::{DEFAULT_LOG_SOURCES, DedicatedSession};

// Re-export transport types at the top level for convenience
pub use transport::{Dialer, Transport, WsDialer, WsSession};

// Re-export core types that users need
pub use ircd_rpc_core::{Code, ErrorObject, methods};
