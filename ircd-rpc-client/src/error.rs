//! Client-side error types.
//!
//! This module provides:
//! - [`TransportError`]: failures tagged at the transport boundary (dial, socket, framing)
//! - [`ClientError`]: the error type returned by every client operation
//!
//! Whether a failure should trigger a reconnect is decided by
//! [`ClientError::is_connection_error`], a check on the variant rather than on
//! message text. Only the untagged [`ClientError::Other`] falls back to matching
//! its message against [`CONNECTION_ERROR_TERMS`].

use ircd_rpc_core::{Code, ErrorObject, FrameError};

/// Lower-case message fragments that mark an untagged error as a connection
/// failure.
///
/// Deliberately broad: a needless reconnect is cheap, operating on a dead
/// socket is not.
pub const CONNECTION_ERROR_TERMS: &[&str] = &[
    "websocket",
    "connection",
    "eof",
    "broken pipe",
    "reset by peer",
    "use of closed",
    "closed",
    "timed out",
    "timeout",
    "deadline",
    "network",
    "refused",
    "unreachable",
    "no route",
    "write:",
    "read:",
    "dial",
    "socket",
    "json",
];

/// Failures produced by a [`Transport`](crate::transport::Transport) or a
/// [`Dialer`](crate::transport::Dialer).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The session could not be established.
    #[error("dial failed: {0}")]
    Dial(String),

    /// The session is closed, locally or by the peer.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Reading or writing the socket failed.
    #[error("i/o error: {0}")]
    Io(String),

    /// A dial or request deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// TLS could not be configured.
    #[error("tls error: {0}")]
    Tls(String),

    /// An outgoing frame could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// An incoming frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// An incoming frame was well-formed JSON but not valid JSON-RPC.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Encode(msg) => TransportError::Encode(msg),
            FrameError::Decode(msg) => TransportError::Decode(msg),
            FrameError::Protocol(msg) => TransportError::Protocol(msg),
        }
    }
}

/// Errors returned by connections, the registry and the retry policy.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The daemon answered with a JSON-RPC error object.
    #[error("rpc error: {0}")]
    Rpc(ErrorObject),

    /// Initial dial to a not yet registered endpoint failed. Nothing was registered.
    #[error("failed to connect to {name}: {source}")]
    Connect {
        name: String,
        #[source]
        source: TransportError,
    },

    /// The endpoint name is not present in the registry.
    #[error("not connected to {0}")]
    NotConnected(String),

    /// There is no active connection and none could be established.
    #[error("no active RPC connection")]
    NoActiveConnection,

    /// A forced reconnect could not dial the endpoint.
    #[error("failed to reconnect to {name}: {source}")]
    Reconnect {
        name: String,
        #[source]
        source: TransportError,
    },

    /// No endpoint configuration exists under this name.
    #[error("server {0} not found in config")]
    ConfigNotFound(String),

    /// An operation failed with a connection error and the recovery reconnect
    /// failed too. Both failures are kept.
    #[error("connection lost: {original} (reconnect failed: {reconnect})")]
    ConnectionLost {
        original: Box<ClientError>,
        reconnect: Box<ClientError>,
    },

    /// Untagged failure raised by caller code.
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Create an untagged error from caller code.
    pub fn other<S: Into<String>>(message: S) -> Self {
        ClientError::Other(message.into())
    }

    /// Get the daemon error code, for [`ClientError::Rpc`] only.
    pub fn code(&self) -> Option<Code> {
        match self {
            ClientError::Rpc(obj) => Some(obj.kind()),
            _ => None,
        }
    }

    /// Get the error message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            ClientError::Rpc(obj) => obj.message.clone(),
            ClientError::Other(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Returns whether this failure means the connection it happened on is
    /// unusable and should be replaced.
    ///
    /// - Transport, connect and reconnect failures: always.
    /// - Daemon error replies: only framing codes (the daemon could not parse
    ///   what it received, which points at a corrupted stream).
    /// - Registry lookups and missing configuration: never.
    /// - [`ClientError::Other`]: when the message contains any of
    ///   [`CONNECTION_ERROR_TERMS`].
    pub fn is_connection_error(&self) -> bool {
        match self {
            ClientError::Transport(_)
            | ClientError::Connect { .. }
            | ClientError::Reconnect { .. }
            | ClientError::ConnectionLost { .. } => true,
            ClientError::Rpc(obj) => obj.kind().is_framing(),
            ClientError::NotConnected(_)
            | ClientError::NoActiveConnection
            | ClientError::ConfigNotFound(_) => false,
            ClientError::Other(msg) => message_suggests_connection_error(msg),
        }
    }
}

/// Error building a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryBuildError {
    #[error("invalid health policy: {0}")]
    InvalidHealthPolicy(&'static str),

    #[error("default issuer must not be empty")]
    EmptyIssuer,
}

impl From<ErrorObject> for ClientError {
    fn from(err: ErrorObject) -> Self {
        ClientError::Rpc(err)
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        ClientError::Transport(err.into())
    }
}

fn message_suggests_connection_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CONNECTION_ERROR_TERMS
        .iter()
        .any(|term| lowered.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_connection_errors() {
        let variants = [
            TransportError::Dial("refused".into()),
            TransportError::Closed("peer went away".into()),
            TransportError::Io("broken pipe".into()),
            TransportError::Timeout("request 4".into()),
            TransportError::Tls("no provider".into()),
            TransportError::Encode("bad params".into()),
            TransportError::Decode("trailing characters".into()),
            TransportError::Protocol("unsupported version".into()),
        ];
        for variant in variants {
            assert!(ClientError::from(variant).is_connection_error());
        }
    }

    #[test]
    fn test_rpc_errors_are_not_connection_errors() {
        let err = ClientError::from(ErrorObject::new(Code::NotFound, "Nickname not found"));
        assert!(!err.is_connection_error());
        assert_eq!(err.code(), Some(Code::NotFound));

        let err = ClientError::from(ErrorObject::new(Code::Timeout, "remote server timeout"));
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_rpc_framing_errors_are_connection_errors() {
        let err = ClientError::from(ErrorObject::new(Code::ParseError, "Parse error"));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_registry_errors_are_not_connection_errors() {
        assert!(!ClientError::NotConnected("prod".into()).is_connection_error());
        assert!(!ClientError::NoActiveConnection.is_connection_error());
        assert!(!ClientError::ConfigNotFound("prod".into()).is_connection_error());
    }

    #[test]
    fn test_other_falls_back_to_message_terms() {
        assert!(ClientError::other("EOF").is_connection_error());
        assert!(ClientError::other("write: Broken Pipe").is_connection_error());
        assert!(ClientError::other("invalid JSON in reply").is_connection_error());
        assert!(!ClientError::other("channel is full").is_connection_error());
        assert!(!ClientError::other("permission denied").is_connection_error());
    }

    #[test]
    fn test_connection_lost_keeps_both_messages() {
        let err = ClientError::ConnectionLost {
            original: Box::new(ClientError::other("EOF")),
            reconnect: Box::new(ClientError::Reconnect {
                name: "prod".into(),
                source: TransportError::Dial("connection refused".into()),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("EOF"));
        assert!(text.contains("failed to reconnect to prod"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn test_message_strips_prefix() {
        let err = ClientError::from(ErrorObject::new(Code::Denied, "Permission denied"));
        assert_eq!(err.message(), "Permission denied");
        assert_eq!(ClientError::other("EOF").message(), "EOF");
        assert_eq!(ClientError::NoActiveConnection.message(), "no active RPC connection");
    }

    #[test]
    fn test_frame_error_conversion() {
        let err = ClientError::from(FrameError::Decode("expected value".into()));
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Decode(_))
        ));
    }
}
