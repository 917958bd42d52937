//! The connection registry.
//!
//! One [`Registry`] per process, built at startup and shared as
//! `Arc<Registry>`. It maps endpoint names to pooled [`Connection`]s and
//! designates one of them as active.
//!
//! Mutations (`connect`, `disconnect`, `set_active`, `reconnect`) hold the
//! write lock for their whole critical section, dial included, so concurrent
//! `connect` calls for one name dial once. Lookups take the read lock.

use std::collections::HashMap;
use std::sync::Arc;

use ircd_rpc_core::methods;
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::{ConfigSource, DEFAULT_ISSUER, DialOptions, EndpointConfig, HealthPolicy};
use crate::connection::Connection;
use crate::error::{ClientError, RegistryBuildError};
use crate::streaming::DedicatedSession;
use crate::transport::{Dialer, WsDialer};

#[derive(Default)]
struct State {
    connections: HashMap<String, Arc<Connection>>,
    active: Option<String>,
}

impl State {
    /// Keep `active` pointing at a live entry whenever the map is non-empty.
    fn repair_active(&mut self) {
        let stale = match &self.active {
            Some(name) => !self.connections.contains_key(name),
            None => true,
        };
        if stale {
            self.active = self.connections.keys().next().cloned();
        }
    }
}

/// Pooled connections to the configured daemons.
pub struct Registry {
    state: RwLock<State>,
    config: Arc<dyn ConfigSource>,
    dialer: Arc<dyn Dialer>,
    policy: HealthPolicy,
    default_issuer: String,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("policy", &self.policy)
            .field("default_issuer", &self.default_issuer)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create a registry with the WebSocket dialer and default health policy.
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            config,
            dialer: Arc::new(WsDialer::new()),
            policy: HealthPolicy::default(),
            default_issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Start building a registry.
    pub fn builder(config: Arc<dyn ConfigSource>) -> RegistryBuilder {
        RegistryBuilder::new(config)
    }

    /// Issuer label used when none is known for an endpoint.
    pub fn default_issuer(&self) -> &str {
        &self.default_issuer
    }

    /// Connect to `endpoint` and register the connection under its name.
    ///
    /// An existing entry is returned as is, without dialing. The new
    /// connection becomes active if the endpoint is flagged default or nothing
    /// is active yet. An empty `issuer` means the default issuer.
    pub async fn connect(
        &self,
        endpoint: &EndpointConfig,
        issuer: &str,
    ) -> Result<Arc<Connection>, ClientError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.connections.get(&endpoint.name) {
            return Ok(Arc::clone(existing));
        }

        let issuer = if issuer.is_empty() {
            self.default_issuer.as_str()
        } else {
            issuer
        };
        let options = DialOptions::new(issuer);
        let transport = self
            .dialer
            .dial(endpoint, &options)
            .await
            .map_err(|source| ClientError::Connect {
                name: endpoint.name.clone(),
                source,
            })?;

        let connection = Arc::new(Connection::new(
            endpoint.name.clone(),
            issuer,
            transport,
            self.policy,
        ));
        state
            .connections
            .insert(endpoint.name.clone(), Arc::clone(&connection));
        if endpoint.is_default || state.active.is_none() {
            state.active = Some(endpoint.name.clone());
        }

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %endpoint.name, issuer, "connected to RPC endpoint");

        Ok(connection)
    }

    /// Connect every configured endpoint, continuing past failures.
    ///
    /// Returns the failures, keyed by endpoint name.
    pub async fn connect_all(&self, issuer: &str) -> Vec<(String, ClientError)> {
        let mut failures = Vec::new();
        for endpoint in self.config.endpoints() {
            if let Err(e) = self.connect(&endpoint, issuer).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(endpoint = %endpoint.name, error = %e, "failed to connect to RPC endpoint");
                failures.push((endpoint.name, e));
            }
        }
        failures
    }

    /// Remove and close the connection registered under `name`.
    ///
    /// If it was active, another remaining connection becomes active.
    pub async fn disconnect(&self, name: &str) -> Result<(), ClientError> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state
                .connections
                .remove(name)
                .ok_or_else(|| ClientError::NotConnected(name.to_string()))?;
            state.repair_active();
            removed
        };

        removed.close().await;

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %name, "disconnected from RPC endpoint");
        Ok(())
    }

    /// Designate the connection under `name` as active.
    pub async fn set_active(&self, name: &str) -> Result<(), ClientError> {
        let mut state = self.state.write().await;
        if !state.connections.contains_key(name) {
            return Err(ClientError::NotConnected(name.to_string()));
        }
        state.active = Some(name.to_string());
        Ok(())
    }

    /// The active connection.
    pub async fn get_active(&self) -> Result<Arc<Connection>, ClientError> {
        let state = self.state.read().await;
        state
            .active
            .as_ref()
            .and_then(|name| state.connections.get(name))
            .cloned()
            .ok_or(ClientError::NoActiveConnection)
    }

    /// The connection registered under `name`, if any.
    pub async fn get_client(&self, name: &str) -> Option<Arc<Connection>> {
        self.state.read().await.connections.get(name).cloned()
    }

    /// Name of the active connection.
    pub async fn active_name(&self) -> Option<String> {
        self.state.read().await.active.clone()
    }

    /// Names of all registered connections, sorted.
    pub async fn list_connections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .read()
            .await
            .connections
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Dial `name` afresh from current configuration and replace its entry.
    ///
    /// The replaced connection's issuer is reused. If dialing fails the
    /// existing entry stays in place. The replaced connection is not closed
    /// here: handles already obtained keep working, and its session is
    /// released once the last of them is dropped.
    pub async fn reconnect(&self, name: &str) -> Result<Arc<Connection>, ClientError> {
        let endpoint = self
            .config
            .endpoint(name)
            .ok_or_else(|| ClientError::ConfigNotFound(name.to_string()))?;
        self.replace(endpoint).await
    }

    /// Force a reconnect of the active connection and return the fresh one.
    ///
    /// With nothing active, the configured default endpoint is dialed and
    /// becomes active.
    pub async fn get_active_with_reconnect(&self) -> Result<Arc<Connection>, ClientError> {
        let active = self.active_name().await;
        let endpoint = match active {
            Some(name) => self
                .config
                .endpoint(&name)
                .ok_or(ClientError::ConfigNotFound(name))?,
            None => self
                .config
                .default_endpoint()
                .ok_or(ClientError::NoActiveConnection)?,
        };
        self.replace(endpoint).await
    }

    async fn replace(&self, endpoint: EndpointConfig) -> Result<Arc<Connection>, ClientError> {
        let (fresh, superseded) = {
            let mut state = self.state.write().await;
            let issuer = state
                .connections
                .get(&endpoint.name)
                .map(|existing| existing.issuer().to_string())
                .unwrap_or_else(|| self.default_issuer.clone());

            #[cfg(feature = "tracing")]
            tracing::info!(endpoint = %endpoint.name, "reconnecting to RPC endpoint");

            let options = DialOptions::new(issuer.clone());
            let transport = match self.dialer.dial(&endpoint, &options).await {
                Ok(transport) => transport,
                Err(source) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(endpoint = %endpoint.name, error = %source, "reconnect failed");
                    return Err(ClientError::Reconnect {
                        name: endpoint.name,
                        source,
                    });
                }
            };

            let fresh = Arc::new(Connection::new(
                endpoint.name.clone(),
                issuer,
                transport,
                self.policy,
            ));
            let superseded = state
                .connections
                .insert(endpoint.name.clone(), Arc::clone(&fresh));
            if state.active.is_none() {
                state.active = Some(endpoint.name.clone());
            }
            (fresh, superseded)
        };

        // Callers may still be running against the superseded connection.
        // Its session is released when the last of them lets go.
        drop(superseded);

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %fresh.name(), "reconnected to RPC endpoint");
        Ok(fresh)
    }

    /// Dial `endpoint`, call `rpc.info`, and close. The registry is untouched.
    pub async fn test_connection(&self, endpoint: &EndpointConfig) -> Result<(), ClientError> {
        let transport = self
            .dialer
            .dial(endpoint, &DialOptions::anonymous())
            .await
            .map_err(|source| ClientError::Connect {
                name: endpoint.name.clone(),
                source,
            })?;

        let result = transport.query(methods::INFO, json!({})).await;
        transport.close().await;
        result.map(|_| ())
    }

    /// Open an unregistered session to the active endpoint for event streaming.
    ///
    /// The session skips the issuer handshake and shares nothing with the
    /// pooled connection: disconnecting or reconnecting that one does not
    /// affect it. The caller owns it and must close it.
    pub async fn new_dedicated_client(&self) -> Result<DedicatedSession, ClientError> {
        let name = self
            .active_name()
            .await
            .ok_or(ClientError::NoActiveConnection)?;
        let endpoint = self
            .config
            .endpoint(&name)
            .ok_or_else(|| ClientError::ConfigNotFound(name.clone()))?;

        let options = DialOptions::streaming();
        let transport = self
            .dialer
            .dial(&endpoint, &options)
            .await
            .map_err(|source| ClientError::Connect {
                name: name.clone(),
                source,
            })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %name, "dedicated streaming session opened");

        Ok(DedicatedSession::new(name, transport))
    }
}

/// Builder for a [`Registry`].
///
/// # Example
///
/// ```ignore
/// use ircd_rpc_client::{HealthPolicy, Registry, RpcServers};
/// use std::sync::Arc;
///
/// let servers = RpcServers::load("config.json")?;
/// let registry = Registry::builder(Arc::new(servers))
///     .health_policy(HealthPolicy::new().error_threshold(3))
///     .default_issuer("admin-bot")
///     .build()?;
/// ```
pub struct RegistryBuilder {
    config: Arc<dyn ConfigSource>,
    dialer: Option<Arc<dyn Dialer>>,
    policy: HealthPolicy,
    default_issuer: String,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("custom_dialer", &self.dialer.is_some())
            .field("policy", &self.policy)
            .field("default_issuer", &self.default_issuer)
            .finish_non_exhaustive()
    }
}

impl RegistryBuilder {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            dialer: None,
            policy: HealthPolicy::default(),
            default_issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Use a custom dialer instead of [`WsDialer`].
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn health_policy(mut self, policy: HealthPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Issuer used by reconnects of endpoints that were never connected.
    pub fn default_issuer<S: Into<String>>(mut self, issuer: S) -> Self {
        self.default_issuer = issuer.into();
        self
    }

    /// Build the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the health policy is invalid or the default issuer
    /// is empty.
    pub fn build(self) -> Result<Registry, RegistryBuildError> {
        self.policy
            .validate()
            .map_err(RegistryBuildError::InvalidHealthPolicy)?;
        if self.default_issuer.is_empty() {
            return Err(RegistryBuildError::EmptyIssuer);
        }

        Ok(Registry {
            state: RwLock::new(State::default()),
            config: self.config,
            dialer: self
                .dialer
                .unwrap_or_else(|| Arc::new(WsDialer::new())),
            policy: self.policy,
            default_issuer: self.default_issuer,
        })
    }
}
