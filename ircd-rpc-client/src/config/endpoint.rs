//! Endpoint configuration and the configuration source seam.
//!
//! The registry never owns configuration. It asks a [`ConfigSource`] for an
//! endpoint by name whenever it needs to (re)dial one, so edits made by the
//! configuration-management side take effect on the next reconnect.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// One configured RPC endpoint of the daemon.
///
/// Field names on the wire match the `rpc_servers` entries of the panel's
/// JSON configuration file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique endpoint name; the registry key.
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "rpc_user")]
    pub user: String,
    #[serde(rename = "rpc_password")]
    pub password: String,
    /// Verify the daemon's TLS certificate. Daemons commonly run with
    /// self-signed certificates, hence off by default.
    #[serde(default)]
    pub tls_verify_cert: bool,
    /// Make this endpoint active when it connects.
    #[serde(default)]
    pub is_default: bool,
    /// Use `wss://`. Plain `ws://` is only meant for local daemons and tests.
    #[serde(default = "default_tls")]
    pub tls: bool,
}

fn default_tls() -> bool {
    true
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls_verify_cert", &self.tls_verify_cert)
            .field("is_default", &self.is_default)
            .field("tls", &self.tls)
            .finish()
    }
}

impl EndpointConfig {
    /// Create an endpoint with empty credentials, TLS on and verification off.
    pub fn new<N: Into<String>, H: Into<String>>(name: N, host: H, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            user: String::new(),
            password: String::new(),
            tls_verify_cert: false,
            is_default: false,
            tls: true,
        }
    }

    /// Set the RPC user and password.
    pub fn credentials<U: Into<String>, P: Into<String>>(mut self, user: U, password: P) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Enable or disable TLS certificate verification.
    pub fn verify_cert(mut self, verify: bool) -> Self {
        self.tls_verify_cert = verify;
        self
    }

    /// Mark this endpoint as the default one.
    pub fn default_endpoint(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    /// Use plain `ws://` instead of `wss://`.
    pub fn plaintext(mut self) -> Self {
        self.tls = false;
        self
    }

    /// The WebSocket URL of this endpoint.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/", self.host, self.port)
    }

    /// The `user:password` login presented to the daemon.
    pub fn api_login(&self) -> String {
        format!("{}:{}", self.user, self.password)
    }
}

/// Errors while loading endpoint configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid JSON or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two endpoints share a name.
    #[error("duplicate endpoint name: {0}")]
    DuplicateName(String),
}

/// The list of configured endpoints.
///
/// Deserializes from the panel's configuration document, ignoring unrelated
/// sections:
///
/// ```json
/// {"rpc_servers": [{"name": "hub", "host": "irc.example.net", "port": 8600,
///                   "rpc_user": "panel", "rpc_password": "secret",
///                   "tls_verify_cert": false, "is_default": true}]}
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcServers {
    #[serde(rename = "rpc_servers", default)]
    pub servers: Vec<EndpointConfig>,
}

impl RpcServers {
    /// Create from a list of endpoints.
    pub fn new(servers: Vec<EndpointConfig>) -> Result<Self, ConfigError> {
        let list = Self { servers };
        list.check_unique_names()?;
        Ok(list)
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let list: Self = serde_json::from_str(json)?;
        list.check_unique_names()?;
        Ok(list)
    }

    /// Read and parse a JSON configuration file.
    ///
    /// A missing file yields an empty list, the same as a fresh install.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json_str(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up an endpoint by name.
    pub fn get(&self, name: &str) -> Option<&EndpointConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// The endpoint flagged as default, else the first one.
    pub fn default_endpoint(&self) -> Option<&EndpointConfig> {
        self.servers
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.servers.first())
    }

    /// Insert an endpoint, replacing any existing one with the same name.
    pub fn upsert(&mut self, endpoint: EndpointConfig) {
        match self.servers.iter_mut().find(|s| s.name == endpoint.name) {
            Some(existing) => *existing = endpoint,
            None => self.servers.push(endpoint),
        }
    }

    /// Remove an endpoint by name.
    pub fn remove(&mut self, name: &str) -> Option<EndpointConfig> {
        let index = self.servers.iter().position(|s| s.name == name)?;
        Some(self.servers.remove(index))
    }

    fn check_unique_names(&self) -> Result<(), ConfigError> {
        for (i, server) in self.servers.iter().enumerate() {
            if self.servers[..i].iter().any(|s| s.name == server.name) {
                return Err(ConfigError::DuplicateName(server.name.clone()));
            }
        }
        Ok(())
    }
}

/// Read-only access to endpoint configuration, resolved by name.
///
/// Implemented by [`RpcServers`] for fixed configuration and by
/// [`SharedConfig`] for configuration edited at runtime.
pub trait ConfigSource: Send + Sync {
    /// The endpoint configured under `name`.
    fn endpoint(&self, name: &str) -> Option<EndpointConfig>;

    /// The endpoint to use when nothing is active yet.
    fn default_endpoint(&self) -> Option<EndpointConfig>;

    /// Every configured endpoint, in configuration order.
    fn endpoints(&self) -> Vec<EndpointConfig>;
}

impl ConfigSource for RpcServers {
    fn endpoint(&self, name: &str) -> Option<EndpointConfig> {
        self.get(name).cloned()
    }

    fn default_endpoint(&self) -> Option<EndpointConfig> {
        RpcServers::default_endpoint(self).cloned()
    }

    fn endpoints(&self) -> Vec<EndpointConfig> {
        self.servers.clone()
    }
}

/// Endpoint configuration shared with the code that edits it.
///
/// Cloning is cheap; all clones see the same list.
#[derive(Clone, Debug, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<RpcServers>>,
}

impl SharedConfig {
    pub fn new(servers: RpcServers) -> Self {
        Self {
            inner: Arc::new(RwLock::new(servers)),
        }
    }

    /// Replace the whole list.
    pub fn replace(&self, servers: RpcServers) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = servers;
    }

    /// Edit the list in place.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut RpcServers) -> R,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// A copy of the current list.
    pub fn snapshot(&self) -> RpcServers {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConfigSource for SharedConfig {
    fn endpoint(&self, name: &str) -> Option<EndpointConfig> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn default_endpoint(&self) -> Option<EndpointConfig> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default_endpoint()
            .cloned()
    }

    fn endpoints(&self) -> Vec<EndpointConfig> {
        self.snapshot().servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PANEL_CONFIG: &str = r#"{
        "server": {"host": "0.0.0.0", "port": 8080},
        "database": {"driver": "sqlite", "dsn": "data/webpanel.db"},
        "rpc_servers": [
            {"name": "leaf", "host": "leaf.example.net", "port": 8600,
             "rpc_user": "panel", "rpc_password": "s3cret"},
            {"name": "hub", "host": "hub.example.net", "port": 8601,
             "rpc_user": "panel", "rpc_password": "s3cret",
             "tls_verify_cert": true, "is_default": true}
        ]
    }"#;

    #[test]
    fn test_parse_panel_config() {
        let servers = RpcServers::from_json_str(PANEL_CONFIG).unwrap();
        assert_eq!(servers.servers.len(), 2);

        let leaf = servers.get("leaf").unwrap();
        assert_eq!(leaf.port, 8600);
        assert_eq!(leaf.user, "panel");
        assert!(!leaf.tls_verify_cert);
        assert!(!leaf.is_default);
        assert!(leaf.tls);

        let hub = servers.get("hub").unwrap();
        assert!(hub.tls_verify_cert);
        assert!(hub.is_default);
    }

    #[test]
    fn test_default_endpoint_prefers_flag() {
        let servers = RpcServers::from_json_str(PANEL_CONFIG).unwrap();
        assert_eq!(servers.default_endpoint().unwrap().name, "hub");
    }

    #[test]
    fn test_default_endpoint_falls_back_to_first() {
        let servers = RpcServers::new(vec![
            EndpointConfig::new("a", "a.example.net", 8600),
            EndpointConfig::new("b", "b.example.net", 8600),
        ])
        .unwrap();
        assert_eq!(servers.default_endpoint().unwrap().name, "a");
        assert!(RpcServers::default().default_endpoint().is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = RpcServers::new(vec![
            EndpointConfig::new("a", "one", 1),
            EndpointConfig::new("a", "two", 2),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateName(name)) if name == "a"));
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut servers = RpcServers::default();
        servers.upsert(EndpointConfig::new("a", "one", 1));
        servers.upsert(EndpointConfig::new("a", "two", 2));
        assert_eq!(servers.servers.len(), 1);
        assert_eq!(servers.get("a").unwrap().host, "two");

        assert!(servers.remove("a").is_some());
        assert!(servers.remove("a").is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PANEL_CONFIG.as_bytes()).unwrap();

        let servers = RpcServers::load(file.path()).unwrap();
        assert_eq!(servers.servers.len(), 2);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let servers = RpcServers::load(dir.path().join("config.json")).unwrap();
        assert!(servers.servers.is_empty());
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"rpc_servers\": [").unwrap();
        assert!(matches!(
            RpcServers::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_endpoint_url_and_login() {
        let endpoint = EndpointConfig::new("hub", "hub.example.net", 8600).credentials("u", "p");
        assert_eq!(endpoint.url(), "wss://hub.example.net:8600/");
        assert_eq!(endpoint.api_login(), "u:p");
        assert_eq!(endpoint.plaintext().url(), "ws://hub.example.net:8600/");
    }

    #[test]
    fn test_debug_redacts_password() {
        let endpoint = EndpointConfig::new("hub", "h", 1).credentials("u", "hunter2");
        let text = format!("{endpoint:?}");
        assert!(!text.contains("hunter2"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn test_shared_config_sees_edits() {
        let shared = SharedConfig::default();
        let view = shared.clone();
        assert!(view.endpoint("hub").is_none());

        shared.update(|servers| servers.upsert(EndpointConfig::new("hub", "h", 1)));
        assert_eq!(view.endpoint("hub").unwrap().host, "h");
        assert_eq!(view.default_endpoint().unwrap().name, "hub");

        shared.replace(RpcServers::default());
        assert!(view.snapshot().servers.is_empty());
    }
}
