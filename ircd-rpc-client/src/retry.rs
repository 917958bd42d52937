//! Reconnect-and-retry around operations on the active connection.
//!
//! [`Registry::with_retry`] runs an operation against the active connection
//! and recovers from a broken session by forcing one reconnect and running
//! the operation once more. It never loops: an operation is invoked at most
//! twice per call.

use std::future::Future;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::ClientError;
use crate::registry::Registry;

impl Registry {
    /// Run `op` on the active connection, reconnecting and retrying once if
    /// the failure looks like a broken connection.
    ///
    /// 1. Resolve the active connection, forcing a reconnect if there is none.
    /// 2. Replace it first if it is already suspect (see
    ///    [`Connection::needs_reconnect`]); keep it if that reconnect fails.
    /// 3. Run `op`. On success, record it and return.
    /// 4. On failure, record it. If the error is a connection error or the
    ///    failure threshold was reached, force one reconnect and run `op`
    ///    once more on the fresh connection. A failed reconnect yields
    ///    [`ClientError::ConnectionLost`] carrying both failures.
    /// 5. Any other failure is returned as is.
    ///
    /// A failed retry is recorded on the fresh connection, so the next call
    /// proactively reconnects while that failure is within the freshness
    /// window.
    ///
    /// The registry lock is never held while `op` runs. A reconnect only
    /// swaps the registry entry: concurrent callers still running on the
    /// replaced connection finish on it undisturbed.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let users = registry
    ///     .with_retry(|conn| async move { conn.query("user.list", json!({})).await })
    ///     .await?;
    /// ```
    pub async fn with_retry<F, Fut, T>(&self, op: F) -> Result<T, ClientError>
    where
        F: Fn(Arc<Connection>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut connection = match self.get_active().await {
            Ok(connection) => connection,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::info!("no active RPC connection, attempting to reconnect");
                self.get_active_with_reconnect().await?
            }
        };

        if connection.needs_reconnect() {
            #[cfg(feature = "tracing")]
            tracing::info!(endpoint = %connection.name(), "proactively reconnecting after recent errors");
            match self.get_active_with_reconnect().await {
                Ok(fresh) => connection = fresh,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "proactive reconnect failed, using existing connection");
                }
            }
        }

        let original = match op(Arc::clone(&connection)).await {
            Ok(value) => {
                connection.record_success();
                return Ok(value);
            }
            Err(e) => e,
        };

        let threshold_reached = connection.record_error();
        if !original.is_connection_error() && !threshold_reached {
            return Err(original);
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            endpoint = %connection.name(),
            error = %original,
            threshold_reached,
            "RPC connection error detected, attempting reconnect"
        );

        let fresh = match self.get_active_with_reconnect().await {
            Ok(fresh) => fresh,
            Err(reconnect) => {
                return Err(ClientError::ConnectionLost {
                    original: Box::new(original),
                    reconnect: Box::new(reconnect),
                });
            }
        };

        match op(Arc::clone(&fresh)).await {
            Ok(value) => {
                fresh.record_success();
                Ok(value)
            }
            Err(second) => {
                fresh.record_error();
                Err(second)
            }
        }
    }
}
