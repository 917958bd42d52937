//! Configuration modules for the RPC client.
//!
//! This module contains:
//! - [`EndpointConfig`], [`RpcServers`], [`ConfigSource`]: where the daemons are
//! - [`HealthPolicy`]: when a connection is considered suspect
//! - [`DialOptions`]: how a single session is established

mod endpoint;
mod health;
mod options;

pub use endpoint::{ConfigError, ConfigSource, EndpointConfig, RpcServers, SharedConfig};
pub use health::{defaults, HealthPolicy};
pub use options::{DialOptions, DEFAULT_ISSUER, STREAMING_ISSUER};
