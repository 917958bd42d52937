//! Dedicated streaming sessions.
//!
//! A [`DedicatedSession`] is a second, unregistered session to the active
//! endpoint, created by [`Registry::new_dedicated_client`]. Subscription
//! traffic on it cannot interleave with replies on the pooled connection, and
//! its lifecycle is owned entirely by the caller:
//!
//! ```ignore
//! let session = registry.new_dedicated_client().await?;
//! session
//!     .stream_logs(&["all"], |entry| {
//!         match tx.send(entry) {
//!             Ok(()) => ControlFlow::Continue(()),
//!             Err(_) => ControlFlow::Break(()),
//!         }
//!     })
//!     .await?;
//! ```
//!
//! [`Registry::new_dedicated_client`]: crate::Registry::new_dedicated_client

use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use ircd_rpc_core::methods;
use serde_json::{Value, json};

use crate::config::STREAMING_ISSUER;
use crate::error::{ClientError, TransportError};
use crate::transport::Transport;

/// Log sources subscribed to when none are given.
pub const DEFAULT_LOG_SOURCES: &[&str] = &["all"];

/// An unregistered session for event streaming. Close it when done; a
/// session dropped while open is closed in the background.
pub struct DedicatedSession {
    name: String,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    subscribed: AtomicBool,
}

impl std::fmt::Debug for DedicatedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedicatedSession")
            .field("name", &self.name)
            .field("subscribed", &self.subscribed.load(Ordering::Acquire))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DedicatedSession {
    pub(crate) fn new(name: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            name,
            transport: Mutex::new(Some(transport)),
            subscribed: AtomicBool::new(false),
        }
    }

    /// Endpoint this session is connected to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label of the session. It is never announced to the daemon.
    pub fn issuer(&self) -> &str {
        STREAMING_ISSUER
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                TransportError::Closed(format!("streaming session to {} is closed", self.name))
                    .into()
            })
    }

    /// Send one request on this session.
    pub async fn query(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.transport()?.query(method, params).await
    }

    /// Subscribe to log events from `sources`, or [`DEFAULT_LOG_SOURCES`] if empty.
    pub async fn subscribe(&self, sources: &[&str]) -> Result<(), ClientError> {
        let sources = if sources.is_empty() {
            DEFAULT_LOG_SOURCES
        } else {
            sources
        };
        self.query(methods::LOG_SUBSCRIBE, json!({ "sources": sources }))
            .await?;
        self.subscribed.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.name, ?sources, "subscribed to log events");
        Ok(())
    }

    /// Wait for the next event.
    ///
    /// Returns a `Closed` transport error once the session has ended.
    pub async fn next_event(&self) -> Result<Value, ClientError> {
        Ok(self.transport()?.next_event().await?)
    }

    /// Stop log streaming. A no-op if not subscribed.
    pub async fn unsubscribe(&self) -> Result<(), ClientError> {
        if !self.subscribed.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.query(methods::LOG_UNSUBSCRIBE, json!({})).await?;
        Ok(())
    }

    /// Whether the session has been closed, locally or by the peer.
    pub fn is_closed(&self) -> bool {
        match self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(transport) => transport.is_closed(),
            None => true,
        }
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) {
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(transport) = transport {
            transport.close().await;

            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %self.name, "dedicated streaming session closed");
        }
    }

    /// Subscribe, pass every log entry to `handler` until it breaks or the
    /// session ends, then unsubscribe and close.
    ///
    /// Unsubscribe and close run on every exit path, including a panic in
    /// `handler`, which is resumed afterwards. Events that are not log
    /// entries (objects with a `msg` or `message` member) are skipped.
    ///
    /// Returns `Ok(())` when the handler stopped the stream and the error
    /// that ended it otherwise.
    pub async fn stream_logs<H>(self, sources: &[&str], mut handler: H) -> Result<(), ClientError>
    where
        H: FnMut(Value) -> ControlFlow<()>,
    {
        if let Err(e) = self.subscribe(sources).await {
            self.close().await;
            return Err(e);
        }

        let outcome = AssertUnwindSafe(async {
            loop {
                let event = self.next_event().await?;
                if !is_log_entry(&event) {
                    continue;
                }
                if handler(event).is_break() {
                    return Ok::<(), ClientError>(());
                }
            }
        })
        .catch_unwind()
        .await;

        if let Err(_e) = self.unsubscribe().await {
            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %self.name, error = %_e, "unsubscribe failed during cleanup");
        }
        self.close().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for DedicatedSession {
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
        tracing::debug!(endpoint = %self.name, "dedicated streaming session dropped while open");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                transport.close().await;
            });
        }
    }
}

fn is_log_entry(event: &Value) -> bool {
    event
        .as_object()
        .is_some_and(|entry| entry.contains_key("msg") || entry.contains_key("message"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, RpcServers};
    use crate::registry::Registry;
    use crate::testing::{MockDialer, MockTransport};

    fn session(transport: Arc<MockTransport>) -> DedicatedSession {
        DedicatedSession::new("prod".to_string(), transport)
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let transport = MockTransport::new();
        let session = session(transport.clone());

        session.subscribe(&[]).await.unwrap();
        session.unsubscribe().await.unwrap();
        session.unsubscribe().await.unwrap();

        assert_eq!(
            transport.queries(),
            vec!["log.subscribe".to_string(), "log.unsubscribe".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stream_logs_until_session_ends() {
        let transport = MockTransport::new();
        transport.push_event(Ok(json!(true)));
        transport.push_event(Ok(json!({"msg": "first", "level": "info"})));
        transport.push_event(Ok(json!({"message": "second"})));
        transport.push_event(Err(TransportError::Closed("closed by peer".into())));

        let mut seen = Vec::new();
        let err = session(transport.clone())
            .stream_logs(&["all"], |entry| {
                seen.push(entry);
                ControlFlow::Continue(())
            })
            .await
            .unwrap_err();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["msg"], "first");
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Closed(_))
        ));
        assert_eq!(
            transport.queries(),
            vec!["log.subscribe".to_string(), "log.unsubscribe".to_string()]
        );
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_logs_handler_stops() {
        let transport = MockTransport::new();
        transport.push_event(Ok(json!({"msg": "one"})));
        transport.push_event(Ok(json!({"msg": "two"})));

        let mut count = 0;
        session(transport.clone())
            .stream_logs(&[], |_| {
                count += 1;
                ControlFlow::Break(())
            })
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_logs_closes_on_handler_panic() {
        let transport = MockTransport::new();
        transport.push_event(Ok(json!({"msg": "boom"})));

        let result = AssertUnwindSafe(session(transport.clone()).stream_logs(&[], |_| {
            panic!("handler failed");
        }))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert_eq!(transport.close_count(), 1);
        assert!(transport.queries().contains(&"log.unsubscribe".to_string()));
    }

    #[tokio::test]
    async fn test_stream_logs_subscribe_failure_closes() {
        let transport = MockTransport::new();
        transport.push_reply(Err(ClientError::other("unknown log source")));

        let err = session(transport.clone())
            .stream_logs(&["bogus"], |_| ControlFlow::Continue(()))
            .await
            .unwrap_err();

        assert_eq!(err.message(), "unknown log source");
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_queries() {
        let session = session(MockTransport::new());
        session.close().await;
        session.close().await;

        assert!(session.is_closed());
        assert!(matches!(
            session.next_event().await,
            Err(ClientError::Transport(TransportError::Closed(_)))
        ));
    }

    #[tokio::test]
    async fn test_drop_closes_open_session() {
        let transport = MockTransport::new();
        drop(session(transport.clone()));
        tokio::task::yield_now().await;
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_session_survives_pooled_disconnect_and_reconnect() {
        let dialer = MockDialer::new();
        let prod = EndpointConfig::new("prod", "prod.example.net", 8600);
        let registry = Registry::builder(Arc::new(RpcServers::new(vec![prod.clone()]).unwrap()))
            .dialer(dialer.clone())
            .build()
            .unwrap();
        registry.connect(&prod, "webpanel").await.unwrap();

        let session = registry.new_dedicated_client().await.unwrap();
        let streaming = dialer.last_transport();
        streaming.push_event(Ok(json!({"msg": "still here"})));

        registry.reconnect("prod").await.unwrap();
        registry.disconnect("prod").await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(dialer.transports()[0].close_count(), 1);
        assert_eq!(dialer.transports()[2].close_count(), 1);
        assert!(!session.is_closed());
        assert_eq!(session.next_event().await.unwrap()["msg"], "still here");

        session.close().await;
        assert_eq!(streaming.close_count(), 1);
        assert!(registry.get_client("prod").await.is_none());
    }
}
