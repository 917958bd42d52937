//! Core wire types for the IRC daemon JSON-RPC interface.
//!
//! This crate provides the types shared by the client and by test doubles
//! of the daemon (`ircd-rpc-test`).
//!
//! ## Modules
//!
//! - [`error`]: Error codes, the JSON-RPC error object and framing errors
//! - [`frame`]: Request encoding and incoming frame decoding

mod error;
mod frame;

pub use error::*;
pub use frame::*;
