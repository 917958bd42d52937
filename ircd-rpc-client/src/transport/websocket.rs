//! JSON-RPC over WebSocket.
//!
//! A [`WsSession`] splits the socket: the write half sits behind an async
//! mutex shared by all callers, the read half is owned by a reader task that
//! routes replies to the request waiting on their `id` and queues
//! server-initiated events. A frame that fails to decode ends the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use ircd_rpc_core::{Frame, decode_frame, encode_request, methods};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};

use super::{Dialer, Transport};
use crate::config::{DialOptions, EndpointConfig};
use crate::error::{ClientError, TransportError};

/// Default transport timeouts.
pub mod defaults {
    use std::time::Duration;

    /// Upper bound on TCP connect, TLS and WebSocket upgrade together.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Upper bound on waiting for the reply to one request.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Upper bound on sending the close frame.
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type Reply = Result<Value, ClientError>;
type Event = Result<Value, TransportError>;

/// Dials daemons over `ws://` or `wss://`.
///
/// # Example
///
/// ```ignore
/// use ircd_rpc_client::transport::WsDialer;
/// use std::time::Duration;
///
/// let dialer = WsDialer::new().request_timeout(Duration::from_secs(5));
/// ```
#[derive(Clone)]
pub struct WsDialer {
    connect_timeout: Duration,
    request_timeout: Duration,
    tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl std::fmt::Debug for WsDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsDialer")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("tls_config", &self.tls_config.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl Default for WsDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl WsDialer {
    pub fn new() -> Self {
        Self {
            connect_timeout: defaults::CONNECT_TIMEOUT,
            request_timeout: defaults::REQUEST_TIMEOUT,
            tls_config: None,
        }
    }

    /// Set the dial timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request reply timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use this TLS configuration for every `wss://` endpoint instead of the
    /// one selected by the endpoint's `tls_verify_cert` flag.
    pub fn tls_config(mut self, config: rustls::ClientConfig) -> Self {
        self.tls_config = Some(Arc::new(config));
        self
    }

    async fn open(&self, endpoint: &EndpointConfig) -> Result<WsStream, TransportError> {
        let url = endpoint.url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Dial(format!("{url}: {e}")))?;

        let credentials = STANDARD.encode(endpoint.api_login());
        let authorization = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| TransportError::Dial(format!("invalid credentials: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, authorization);

        tokio::time::timeout(self.connect_timeout, self.handshake(request, endpoint))
            .await
            .map_err(|_| {
                TransportError::Timeout(format!(
                    "connecting to {url} took longer than {:?}",
                    self.connect_timeout
                ))
            })?
    }

    #[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
    async fn handshake(
        &self,
        request: Request,
        endpoint: &EndpointConfig,
    ) -> Result<WsStream, TransportError> {
        use tokio_tungstenite::Connector;

        let connector = if endpoint.tls {
            let config = match &self.tls_config {
                Some(config) => Arc::clone(config),
                None => super::connector::tls_config_for(endpoint.tls_verify_cert)?,
            };
            Connector::Rustls(config)
        } else {
            Connector::Plain
        };

        let (stream, _response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(connector))
                .await
                .map_err(|e| TransportError::Dial(format!("{}: {e}", endpoint.url())))?;
        Ok(stream)
    }

    #[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
    async fn handshake(
        &self,
        request: Request,
        endpoint: &EndpointConfig,
    ) -> Result<WsStream, TransportError> {
        if endpoint.tls {
            return Err(TransportError::Tls(
                "wss:// requires the `tls-native-roots` or `tls-webpki-roots` feature".into(),
            ));
        }

        let (stream, _response) = tokio_tungstenite::connect_async_with_config(request, None, false)
            .await
            .map_err(|e| TransportError::Dial(format!("{}: {e}", endpoint.url())))?;
        Ok(stream)
    }
}

impl Dialer for WsDialer {
    fn dial<'a>(
        &'a self,
        endpoint: &'a EndpointConfig,
        options: &'a DialOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, TransportError>> {
        async move {
            let stream = self.open(endpoint).await?;
            let session = WsSession::start(stream, endpoint.name.clone(), self.request_timeout);

            if options.announces_issuer() {
                if let Err(e) = session.announce_issuer(options.issuer()).await {
                    session.shutdown().await;
                    return Err(e);
                }
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                endpoint = %endpoint.name,
                issuer = %options.issuer(),
                announced = options.announces_issuer(),
                "websocket session established"
            );

            Ok(Arc::new(session) as Arc<dyn Transport>)
        }
        .boxed()
    }
}

/// State shared between a session and its reader task.
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    closed: AtomicBool,
}

impl Shared {
    fn register(&self, id: u64, tx: oneshot::Sender<Reply>) -> Result<(), TransportError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so fail_all cannot miss this entry.
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed("session is closed".into()));
        }
        pending.insert(id, tx);
        Ok(())
    }

    fn take(&self, id: u64) -> Option<oneshot::Sender<Reply>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    fn fail_all(&self, reason: &TransportError) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::Release);
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(reason.clone().into()));
        }
    }

    /// Route one text frame.
    ///
    /// Replies go to the request waiting on their id. Only server-initiated
    /// events are queued; a reply nobody waits for is dropped. A frame that
    /// does not decode is an error, and the caller ends the session.
    fn dispatch(
        &self,
        text: &str,
        events: &mpsc::UnboundedSender<Event>,
    ) -> Result<(), TransportError> {
        match decode_frame(text)? {
            Frame::Response { id, outcome } => match id.and_then(|id| self.take(id)) {
                Some(tx) => {
                    let _ = tx.send(outcome.map_err(ClientError::Rpc));
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(
                        ?id,
                        ok = outcome.is_ok(),
                        "dropping reply with no pending request"
                    );
                }
            },
            Frame::Event { id, payload, .. } => match id.and_then(|id| self.take(id)) {
                Some(tx) => {
                    let _ = tx.send(Ok(payload));
                }
                None => {
                    let _ = events.send(Ok(payload));
                }
            },
        }
        Ok(())
    }
}

/// An established WebSocket session.
pub struct WsSession {
    endpoint: String,
    sink: tokio::sync::Mutex<WsSink>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    closing: AtomicBool,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.shared.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl WsSession {
    fn start(stream: WsStream, endpoint: String, request_timeout: Duration) -> Self {
        let (sink, source) = stream.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let reader = tokio::spawn(read_loop(source, Arc::clone(&shared), events_tx));

        Self {
            endpoint,
            sink: tokio::sync::Mutex::new(sink),
            events: tokio::sync::Mutex::new(events_rx),
            shared,
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            request_timeout,
            reader: Mutex::new(Some(reader)),
        }
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await.map_err(socket_error)
    }

    /// Send `rpc.set_issuer` without waiting for the reply.
    async fn announce_issuer(&self, issuer: &str) -> Result<(), TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = encode_request(id, methods::SET_ISSUER, &json!({ "name": issuer }))?;

        // The receiver is dropped: the reply is consumed here instead of
        // surfacing as an event.
        let (tx, _rx) = oneshot::channel();
        self.shared.register(id, tx)?;

        if let Err(e) = self.send_text(text).await {
            self.shared.take(id);
            return Err(e);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(endpoint = %self.endpoint, issuer, "issuer announced");
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = encode_request(id, method, &params)?;

        let (tx, rx) = oneshot::channel();
        self.shared.register(id, tx)?;

        if let Err(e) = self.send_text(text).await {
            self.shared.take(id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(TransportError::Closed("session closed before reply".into()).into()),
            Err(_) => {
                self.shared.take(id);
                Err(TransportError::Timeout(format!(
                    "no reply to {method} within {:?}",
                    self.request_timeout
                ))
                .into())
            }
        }
    }

    async fn recv_event(&self) -> Event {
        let mut events = self.events.lock().await;
        match events.recv().await {
            Some(event) => event,
            None => Err(TransportError::Closed("session closed".into())),
        }
    }

    async fn shutdown(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut sink = self.sink.lock().await;
            let _ = tokio::time::timeout(defaults::CLOSE_TIMEOUT, sink.close()).await;
        }

        self.shared
            .fail_all(&TransportError::Closed("session closed locally".into()));
        self.stop_reader();

        #[cfg(feature = "tracing")]
        tracing::trace!(endpoint = %self.endpoint, "websocket session closed");
    }

    fn stop_reader(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl Transport for WsSession {
    fn query<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Value, ClientError>> {
        self.request(method, params).boxed()
    }

    fn next_event(&self) -> BoxFuture<'_, Result<Value, TransportError>> {
        self.recv_event().boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.shutdown().boxed()
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.shared
            .fail_all(&TransportError::Closed("session dropped".into()));
        self.stop_reader();
    }
}

async fn read_loop(
    mut source: WsSource,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<Event>,
) {
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = shared.dispatch(&text, &events) {
                    break e;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("closed by peer ({}): {}", f.code, f.reason))
                    .unwrap_or_else(|| "closed by peer".to_string());
                break TransportError::Closed(reason);
            }
            // Ping/pong are answered by tungstenite; binary frames are not
            // part of the protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => break socket_error(e),
            None => break TransportError::Closed("stream ended".into()),
        }
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(reason = %reason, "websocket reader stopped");

    shared.fail_all(&reason);
    let _ = events.send(Err(reason));
}

fn socket_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed(err.to_string())
        }
        tungstenite::Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Io(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Shared {
        Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    #[test]
    fn test_dispatch_routes_reply_to_pending_request() {
        let shared = shared();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = oneshot::channel();
        shared.register(7, tx).unwrap();

        shared
            .dispatch(r#"{"jsonrpc":"2.0","id":7,"result":{"list":[]}}"#, &events_tx)
            .unwrap();

        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"list": []}));
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_drops_unmatched_replies() {
        let shared = shared();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        // A late reply to a request that already timed out.
        shared
            .dispatch(r#"{"jsonrpc":"2.0","id":41,"result":true}"#, &events_tx)
            .unwrap();
        shared
            .dispatch(r#"{"jsonrpc":"2.0","id":null,"result":true}"#, &events_tx)
            .unwrap();
        shared
            .dispatch(
                r#"{"jsonrpc":"2.0","id":42,"error":{"code":-32603,"message":"boom"}}"#,
                &events_tx,
            )
            .unwrap();

        assert!(events_rx.try_recv().is_err());
        assert!(!shared.closed.load(Ordering::Acquire));
    }

    #[test]
    fn test_dispatch_queues_events() {
        let shared = shared();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        shared
            .dispatch(
                r#"{"jsonrpc":"2.0","method":"log.subscribe","id":3,"result":{"msg":"hi"}}"#,
                &events_tx,
            )
            .unwrap();

        assert_eq!(events_rx.try_recv().unwrap().unwrap(), json!({"msg": "hi"}));
    }

    #[test]
    fn test_dispatch_rejects_garbage() {
        let shared = shared();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        let err = shared.dispatch("{not json", &events_tx).unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));

        let err = shared
            .dispatch(r#"{"jsonrpc":"1.0","id":1,"result":true}"#, &events_tx)
            .unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn test_fail_all_wakes_pending_with_decode_error() {
        let shared = shared();
        let (tx, mut rx) = oneshot::channel();
        shared.register(1, tx).unwrap();

        shared.fail_all(&TransportError::Decode("expected value".into()));

        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Decode(_))
        ));
        assert!(err.is_connection_error());
        let (tx, _rx) = oneshot::channel();
        assert!(shared.register(2, tx).is_err());
    }
}
