//! A named, health-tracked session to one daemon endpoint.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tokio::time::Instant;

use crate::config::HealthPolicy;
use crate::error::{ClientError, TransportError};
use crate::transport::Transport;

/// Point-in-time copy of a connection's health counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Consecutive failures since the last success.
    pub error_count: u32,
    pub last_error_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
}

#[derive(Default)]
struct Stamps {
    last_error_at: Option<Instant>,
    last_success_at: Option<Instant>,
    // Set by record_error, cleared by record_success.
    error_is_latest: bool,
}

/// A pooled session to one endpoint, plus its health counters.
///
/// Connections are created by the [`Registry`](crate::Registry) and shared as
/// `Arc<Connection>`. The counters are only touched by
/// [`record_success`](Self::record_success) and
/// [`record_error`](Self::record_error), which the retry policy calls around
/// every operation.
///
/// Dropping the last handle to a connection that was never closed releases
/// its session in the background.
pub struct Connection {
    name: String,
    issuer: String,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    error_count: AtomicU32,
    stamps: Mutex<Stamps>,
    policy: HealthPolicy,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("issuer", &self.issuer)
            .field("closed", &self.is_closed())
            .field("health", &self.health())
            .finish()
    }
}

impl Connection {
    /// Wrap an established transport.
    pub fn new<N: Into<String>, I: Into<String>>(
        name: N,
        issuer: I,
        transport: Arc<dyn Transport>,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            issuer: issuer.into(),
            transport: RwLock::new(Some(transport)),
            error_count: AtomicU32::new(0),
            stamps: Mutex::new(Stamps::default()),
            policy,
        }
    }

    /// Endpoint name this connection belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issuer label the connection was dialed with.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The transport handle, or a `Closed` error once [`close`](Self::close) ran.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                TransportError::Closed(format!("connection {} is closed", self.name)).into()
            })
    }

    /// Run `op` against the transport handle.
    ///
    /// The result is returned as is: no classification, no counter updates.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ClientError>
    where
        F: FnOnce(Arc<dyn Transport>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let transport = self.transport()?;
        op(transport).await
    }

    /// Send one JSON-RPC request.
    pub async fn query(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.call(move |transport| async move { transport.query(method, params).await })
            .await
    }

    /// Reset the failure counter and stamp the success time.
    pub fn record_success(&self) {
        let mut stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        self.error_count.store(0, Ordering::Release);
        stamps.last_success_at = Some(Instant::now());
        stamps.error_is_latest = false;
    }

    /// Count one failure. Returns `true` when the failure threshold is reached.
    pub fn record_error(&self) -> bool {
        let mut stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self
            .error_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or_else(|n| n);
        stamps.last_error_at = Some(Instant::now());
        stamps.error_is_latest = true;

        previous.saturating_add(1) >= self.policy.error_threshold
    }

    /// Whether this connection should be replaced before it is used again.
    ///
    /// True once the failure threshold is reached, or while a failure that no
    /// success has followed is younger than the freshness window.
    pub fn needs_reconnect(&self) -> bool {
        if self.error_count.load(Ordering::Acquire) >= self.policy.error_threshold {
            return true;
        }

        let stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        match stamps.last_error_at {
            Some(at) if stamps.error_is_latest => at.elapsed() < self.policy.freshness_window,
            _ => false,
        }
    }

    /// Current health counters.
    pub fn health(&self) -> HealthSnapshot {
        let stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        HealthSnapshot {
            error_count: self.error_count.load(Ordering::Acquire),
            last_error_at: stamps.last_error_at,
            last_success_at: stamps.last_success_at,
        }
    }

    /// Whether the handle was released or the session ended.
    pub fn is_closed(&self) -> bool {
        match self
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(transport) => transport.is_closed(),
            None => true,
        }
    }

    /// Release the transport handle. Idempotent.
    pub async fn close(&self) {
        let transport = self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let transport = self
            .transport
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(transport) = transport else {
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.name, "releasing RPC session of dropped connection");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                transport.close().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;
    use std::time::Duration;

    fn connection(transport: Arc<MockTransport>) -> Connection {
        Connection::new("prod", "webpanel", transport, HealthPolicy::default())
    }

    #[test]
    fn test_threshold_reached_after_two_errors() {
        let conn = connection(MockTransport::new());
        assert!(!conn.needs_reconnect());

        assert!(!conn.record_error());
        assert!(conn.record_error());
        assert!(conn.needs_reconnect());
        assert_eq!(conn.health().error_count, 2);

        conn.record_success();
        assert!(!conn.needs_reconnect());
        assert_eq!(conn.health().error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_error_marks_connection_suspect() {
        let conn = connection(MockTransport::new());
        conn.record_success();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(!conn.record_error());
        assert!(conn.needs_reconnect());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!conn.needs_reconnect());
    }

    #[test]
    fn test_success_redeems_single_error() {
        let conn = connection(MockTransport::new());
        conn.record_error();
        conn.record_success();
        assert!(!conn.needs_reconnect());

        let health = conn.health();
        assert!(health.last_error_at.is_some());
        assert!(health.last_success_at.is_some());
    }

    #[test]
    fn test_custom_threshold() {
        let conn = Connection::new(
            "prod",
            "webpanel",
            MockTransport::new(),
            HealthPolicy::new()
                .error_threshold(3)
                .freshness_window(Duration::ZERO),
        );
        assert!(!conn.record_error());
        assert!(!conn.record_error());
        assert!(!conn.needs_reconnect());
        assert!(conn.record_error());
        assert!(conn.needs_reconnect());
    }

    #[test]
    fn test_concurrent_record_error() {
        let conn = Arc::new(connection(MockTransport::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let conn = Arc::clone(&conn);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        conn.record_error();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(conn.health().error_count, 800);
    }

    #[tokio::test]
    async fn test_query_uses_transport() {
        let transport = MockTransport::new();
        transport.push_reply(Ok(json!({"version": "6.1.0"})));
        let conn = connection(transport.clone());

        let info = conn.query("rpc.info", json!({})).await.unwrap();
        assert_eq!(info["version"], "6.1.0");
        assert_eq!(transport.queries(), vec!["rpc.info".to_string()]);
    }

    #[tokio::test]
    async fn test_call_returns_error_unmodified() {
        let conn = connection(MockTransport::new());
        let err = conn
            .call(|_| async { Err::<(), _>(ClientError::other("EOF")) })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Other(msg) if msg == "EOF"));
        assert_eq!(conn.health().error_count, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_calls() {
        let transport = MockTransport::new();
        let conn = connection(transport.clone());

        conn.close().await;
        conn.close().await;

        assert!(conn.is_closed());
        assert_eq!(transport.close_count(), 1);

        let err = conn.query("rpc.info", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Closed(_))
        ));
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_last_handle_drop_releases_session() {
        let transport = MockTransport::new();
        let conn = Arc::new(connection(transport.clone()));
        let held = Arc::clone(&conn);

        drop(conn);
        tokio::task::yield_now().await;
        assert_eq!(transport.close_count(), 0);
        assert!(!held.is_closed());

        drop(held);
        tokio::task::yield_now().await;
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_after_close_does_not_close_again() {
        let transport = MockTransport::new();
        let conn = connection(transport.clone());

        conn.close().await;
        drop(conn);
        tokio::task::yield_now().await;
        assert_eq!(transport.close_count(), 1);
    }
}
