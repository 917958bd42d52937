//! Per-dial options.

/// Issuer label announced by pooled connections unless the caller names one.
pub const DEFAULT_ISSUER: &str = "webpanel";

/// Label carried by dedicated streaming sessions. Never announced to the daemon.
pub const STREAMING_ISSUER: &str = "webpanel-streaming";

/// Options for establishing one transport session.
///
/// # Example
///
/// ```
/// use ircd_rpc_client::DialOptions;
///
/// let pooled = DialOptions::new("admin-bot");
/// assert!(pooled.announces_issuer());
///
/// let streaming = DialOptions::streaming();
/// assert!(!streaming.announces_issuer());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialOptions {
    pub(crate) issuer: String,
    pub(crate) announce_issuer: bool,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self::new(DEFAULT_ISSUER)
    }
}

impl DialOptions {
    /// Options for a pooled connection that announces `issuer` after the upgrade.
    pub fn new<S: Into<String>>(issuer: S) -> Self {
        Self {
            issuer: issuer.into(),
            announce_issuer: true,
        }
    }

    /// Options for a dedicated streaming session: no issuer handshake.
    pub fn streaming() -> Self {
        Self {
            issuer: STREAMING_ISSUER.to_string(),
            announce_issuer: false,
        }
    }

    /// Options for a throwaway connection check: no issuer handshake.
    pub fn anonymous() -> Self {
        Self {
            issuer: String::new(),
            announce_issuer: false,
        }
    }

    /// Enable or disable the issuer handshake.
    pub fn announce_issuer(mut self, announce: bool) -> Self {
        self.announce_issuer = announce;
        self
    }

    /// The issuer label.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Whether the dialer sends `rpc.set_issuer` after connecting.
    pub fn announces_issuer(&self) -> bool {
        self.announce_issuer && !self.issuer.is_empty()
    }
}
