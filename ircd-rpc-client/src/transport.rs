//! Transport layer for the RPC client.
//!
//! The rest of the crate talks to a daemon only through two traits:
//!
//! - [`Dialer`]: establishes a session to an [`EndpointConfig`]
//! - [`Transport`]: one established session; sends requests, yields
//!   server-initiated events, closes
//!
//! [`WsDialer`] and [`WsSession`] are the production implementation: JSON-RPC
//! 2.0 over a WebSocket with HTTP basic credentials on the upgrade request.
//!
//! # Feature Flags
//!
//! `wss://` endpoints require enabling the appropriate features:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates
//!
//! # Example
//!
//! ```ignore
//! use ircd_rpc_client::transport::WsDialer;
//! use std::time::Duration;
//!
//! let dialer = WsDialer::new()
//!     .connect_timeout(Duration::from_secs(5))
//!     .request_timeout(Duration::from_secs(15));
//! ```

mod connector;
mod websocket;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

pub use connector::{danger_accept_invalid_certs_config, has_tls_support, DangerousAcceptAnyCertVerifier};

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub use connector::default_tls_config;

pub use websocket::{defaults, WsDialer, WsSession};

use crate::config::{DialOptions, EndpointConfig};
use crate::error::{ClientError, TransportError};

/// One established session to a daemon.
///
/// Implementations must be safe to share: many tasks may `query` the same
/// session concurrently while another reads events.
pub trait Transport: Send + Sync {
    /// Send one request and wait for its reply.
    ///
    /// Daemon error replies surface as [`ClientError::Rpc`]; everything else as
    /// [`ClientError::Transport`].
    fn query<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Value, ClientError>>;

    /// Wait for the next server-initiated frame.
    ///
    /// Returns [`TransportError::Closed`] once the session has ended.
    fn next_event(&self) -> BoxFuture<'_, Result<Value, TransportError>>;

    /// Close the session. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Whether the session has been closed, locally or by the peer.
    fn is_closed(&self) -> bool;
}

/// Establishes sessions.
pub trait Dialer: Send + Sync {
    /// Dial `endpoint`.
    ///
    /// When `options` announce an issuer, the session sends `rpc.set_issuer`
    /// before it is handed out.
    fn dial<'a>(
        &'a self,
        endpoint: &'a EndpointConfig,
        options: &'a DialOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, TransportError>>;
}
