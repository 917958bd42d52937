//! JSON-RPC error codes and error types.
//!
//! This module provides the core error types shared by the wire layer:
//! - [`Code`]: Error codes used by the daemon's RPC interface
//! - [`ErrorObject`]: The `error` member of a JSON-RPC response
//! - [`FrameError`]: Framing (encode/decode) errors

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes returned in JSON-RPC error objects.
///
/// The negative `-327xx`/`-326xx` range is reserved by JSON-RPC 2.0 itself.
/// The daemon adds a server range (`-320xx`) and application codes (`-10xx`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ApiCallDenied,
    ServerGone,
    Timeout,
    RemoteServerNoRpc,
    NotFound,
    AlreadyExists,
    InvalidName,
    UserNotInChannel,
    Denied,
    /// Any code outside the known vocabulary.
    Unknown,
}

impl Code {
    /// Map a numeric wire code to a [`Code`].
    ///
    /// Codes that are not part of the known vocabulary map to [`Code::Unknown`];
    /// the raw number stays available on [`ErrorObject::code`].
    pub fn from_i64(code: i64) -> Self {
        match code {
            -32700 => Code::ParseError,
            -32600 => Code::InvalidRequest,
            -32601 => Code::MethodNotFound,
            -32602 => Code::InvalidParams,
            -32603 => Code::InternalError,
            -32000 => Code::ApiCallDenied,
            -32001 => Code::ServerGone,
            -32002 => Code::Timeout,
            -32003 => Code::RemoteServerNoRpc,
            -1000 => Code::NotFound,
            -1001 => Code::AlreadyExists,
            -1002 => Code::InvalidName,
            -1003 => Code::UserNotInChannel,
            -1004 => Code::Denied,
            _ => Code::Unknown,
        }
    }

    /// The numeric wire value, or `None` for [`Code::Unknown`].
    pub fn as_i64(&self) -> Option<i64> {
        let value = match self {
            Code::ParseError => -32700,
            Code::InvalidRequest => -32600,
            Code::MethodNotFound => -32601,
            Code::InvalidParams => -32602,
            Code::InternalError => -32603,
            Code::ApiCallDenied => -32000,
            Code::ServerGone => -32001,
            Code::Timeout => -32002,
            Code::RemoteServerNoRpc => -32003,
            Code::NotFound => -1000,
            Code::AlreadyExists => -1001,
            Code::InvalidName => -1002,
            Code::UserNotInChannel => -1003,
            Code::Denied => -1004,
            Code::Unknown => return None,
        };
        Some(value)
    }

    /// Get the string representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::ParseError => "parse_error",
            Code::InvalidRequest => "invalid_request",
            Code::MethodNotFound => "method_not_found",
            Code::InvalidParams => "invalid_params",
            Code::InternalError => "internal_error",
            Code::ApiCallDenied => "api_call_denied",
            Code::ServerGone => "server_gone",
            Code::Timeout => "timeout",
            Code::RemoteServerNoRpc => "remote_server_no_rpc",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::InvalidName => "invalid_name",
            Code::UserNotInChannel => "user_not_in_channel",
            Code::Denied => "denied",
            Code::Unknown => "unknown",
        }
    }

    /// Returns whether the daemon rejected the request because the bytes it
    /// received were not a well-formed JSON-RPC request.
    ///
    /// A well-behaved client never produces these, so they point at a
    /// corrupted stream rather than at the request itself.
    pub fn is_framing(&self) -> bool {
        matches!(self, Code::ParseError | Code::InvalidRequest)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `error` member of a JSON-RPC response.
///
/// # Wire Format
///
/// ```json
/// {"code": -1000, "message": "Nickname not found", "data": null}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Create an error object from a known code.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code: code.as_i64().unwrap_or_default(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The decoded error code.
    pub fn kind(&self) -> Code {
        Code::from_i64(self.code)
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind(), self.code, self.message)
    }
}

/// Errors produced while encoding or decoding JSON-RPC frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A request could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// Incoming bytes were not valid JSON.
    #[error("decode error: {0}")]
    Decode(String),

    /// Valid JSON that is not a JSON-RPC frame.
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_numeric_mapping() {
        assert_eq!(Code::from_i64(-32601), Code::MethodNotFound);
        assert_eq!(Code::from_i64(-1000), Code::NotFound);
        assert_eq!(Code::from_i64(-1004), Code::Denied);
        assert_eq!(Code::from_i64(42), Code::Unknown);

        assert_eq!(Code::NotFound.as_i64(), Some(-1000));
        assert_eq!(Code::Unknown.as_i64(), None);
    }

    #[test]
    fn test_code_is_framing() {
        assert!(Code::ParseError.is_framing());
        assert!(Code::InvalidRequest.is_framing());
        assert!(!Code::NotFound.is_framing());
        assert!(!Code::Timeout.is_framing());
    }

    #[test]
    fn test_error_object_display() {
        let err = ErrorObject::new(Code::NotFound, "Nickname not found");
        assert_eq!(err.code, -1000);
        assert_eq!(err.to_string(), "not_found (-1000): Nickname not found");
    }

    #[test]
    fn test_error_object_deserialize_without_data() {
        let err: ErrorObject =
            serde_json::from_str(r#"{"code":-32602,"message":"Invalid parameters"}"#).unwrap();
        assert_eq!(err.kind(), Code::InvalidParams);
        assert!(err.data.is_none());
    }

    #[test]
    fn test_error_object_keeps_unknown_code() {
        let err: ErrorObject =
            serde_json::from_str(r#"{"code":-7,"message":"odd","data":{"x":1}}"#).unwrap();
        assert_eq!(err.kind(), Code::Unknown);
        assert_eq!(err.code, -7);
        assert_eq!(err.data, Some(serde_json::json!({"x": 1})));
    }
}
