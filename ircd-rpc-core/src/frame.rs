//! JSON-RPC 2.0 message framing.
//!
//! Every WebSocket text message carries exactly one frame:
//!
//! ```text
//! request:   {"jsonrpc":"2.0","method":"user.list","params":{},"id":7}
//! response:  {"jsonrpc":"2.0","id":7,"result":{...}}
//!            {"jsonrpc":"2.0","id":7,"error":{"code":-1000,"message":"..."}}
//! event:     {"jsonrpc":"2.0","method":"log.event","params":{...}}
//! ```
//!
//! This module provides constants and functions for working with frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorObject, FrameError};

/// Protocol version carried in the `jsonrpc` member.
pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known method names used by the connection layer itself.
pub mod methods {
    /// Announce the issuer label of the connection (audit trail on the daemon).
    pub const SET_ISSUER: &str = "rpc.set_issuer";
    /// Returns information about the RPC interface; used as a liveness check.
    pub const INFO: &str = "rpc.info";
    /// Start streaming log events on this connection.
    pub const LOG_SUBSCRIBE: &str = "log.subscribe";
    /// Stop streaming log events on this connection.
    pub const LOG_UNSUBSCRIBE: &str = "log.unsubscribe";
}

#[derive(Serialize)]
struct RequestFrame<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
    id: u64,
}

#[derive(Deserialize)]
struct IncomingFrame {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// A decoded incoming frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Reply to a request. `id` is `None` when the daemon could not
    /// attribute the reply to a request (e.g. it failed to parse it).
    Response {
        id: Option<u64>,
        outcome: Result<Value, ErrorObject>,
    },
    /// Server-initiated message (subscription traffic). Some daemons echo
    /// the subscribing request's `id` on every event.
    Event {
        id: Option<u64>,
        method: String,
        payload: Value,
    },
}

/// Serialize a request frame.
pub fn encode_request(id: u64, method: &str, params: &Value) -> Result<String, FrameError> {
    if method.is_empty() {
        return Err(FrameError::Encode("method name must not be empty".into()));
    }

    let frame = RequestFrame {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
        id,
    };
    serde_json::to_string(&frame).map_err(|e| FrameError::Encode(e.to_string()))
}

/// Parse one incoming frame.
///
/// # Errors
/// - [`FrameError::Decode`] if the text is not JSON
/// - [`FrameError::Protocol`] if it is JSON but not a JSON-RPC 2.0 frame
pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    let incoming: IncomingFrame =
        serde_json::from_str(text).map_err(|e| FrameError::Decode(e.to_string()))?;

    match incoming.jsonrpc.as_deref() {
        None | Some(JSONRPC_VERSION) => {}
        Some(version) => {
            return Err(FrameError::Protocol(format!(
                "unsupported jsonrpc version: {version}"
            )));
        }
    }

    let id = incoming.id.as_ref().and_then(Value::as_u64);

    if let Some(error) = incoming.error {
        return Ok(Frame::Response {
            id,
            outcome: Err(error),
        });
    }

    if let Some(method) = incoming.method {
        let payload = incoming
            .params
            .or(incoming.result)
            .unwrap_or(Value::Null);
        return Ok(Frame::Event {
            id,
            method,
            payload,
        });
    }

    let outcome = match incoming.result {
        Some(result) => Ok(result),
        None if incoming.id.is_some() => Ok(Value::Null),
        None => {
            return Err(FrameError::Protocol(
                "frame has neither method, result, error nor id".into(),
            ));
        }
    };

    Ok(Frame::Response { id, outcome })
}
