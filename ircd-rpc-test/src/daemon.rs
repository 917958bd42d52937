//! A mock IRC daemon speaking JSON-RPC over WebSocket.
//!
//! Each scenario starts its own daemon on an ephemeral localhost port, so the
//! counters it exposes only reflect that scenario's traffic.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use ircd_rpc_client::{EndpointConfig, Registry, RpcServers, WsDialer};
use ircd_rpc_core::{Code, ErrorObject, methods};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;

pub const USER: &str = "panel";
pub const PASSWORD: &str = "hunter2";

/// Answered with a frame that is not JSON.
pub const GARBLED_METHOD: &str = "debug.garble";

/// Log lines emitted after every successful `log.subscribe`.
pub const LOG_LINES: &[&str] = &[
    "Server linked: hub.example.net",
    "Client connecting: alice",
    "Client exiting: bob (Quit)",
];

#[derive(Default)]
struct State {
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    ended: AtomicUsize,
    issuers: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl State {
    /// Replies to one request frame, in send order.
    fn handle(&self, text: &str) -> Vec<String> {
        let request: Value = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                let error = ErrorObject::new(Code::ParseError, e.to_string());
                return vec![error_reply(&Value::Null, error)];
            }
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap().push(method.clone());

        match method.as_str() {
            methods::SET_ISSUER => {
                let name = request["params"]["name"].as_str().unwrap_or_default();
                self.issuers.lock().unwrap().push(name.to_string());
                vec![result_reply(&id, &method, json!(true))]
            }
            methods::INFO => vec![result_reply(
                &id,
                &method,
                json!({ "methods": { "rpc.info": {}, "user.list": {}, "log.subscribe": {} } }),
            )],
            "user.list" => vec![result_reply(
                &id,
                &method,
                json!({ "list": [{ "name": "alice" }, { "name": "bob" }] }),
            )],
            methods::LOG_SUBSCRIBE => {
                let mut replies = vec![result_reply(&id, &method, json!(true))];
                // The daemon tags log events with the subscribe request's id.
                replies.extend(LOG_LINES.iter().map(|line| {
                    result_reply(
                        &id,
                        &method,
                        json!({ "level": "info", "subsystem": "link", "msg": line }),
                    )
                }));
                replies
            }
            methods::LOG_UNSUBSCRIBE => vec![result_reply(&id, &method, json!(true))],
            GARBLED_METHOD => vec![format!("{{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":")],
            _ => vec![error_reply(
                &id,
                ErrorObject::new(Code::MethodNotFound, "Method not found"),
            )],
        }
    }
}

fn result_reply(id: &Value, method: &str, result: Value) -> String {
    json!({ "jsonrpc": "2.0", "method": method, "id": id, "result": result }).to_string()
}

fn error_reply(id: &Value, error: ErrorObject) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "error": error }).to_string()
}

pub struct MockDaemon {
    addr: SocketAddr,
    state: Arc<State>,
    kill: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MockDaemon {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State::default());
        let (kill, _) = broadcast::channel(4);

        let task = tokio::spawn(accept_loop(listener, Arc::clone(&state), kill.clone()));
        tracing::debug!(%addr, "mock daemon listening");

        Ok(Self {
            addr,
            state,
            kill,
            task,
        })
    }

    /// Endpoint pointing at this daemon with valid credentials.
    pub fn endpoint(&self, name: &str) -> EndpointConfig {
        EndpointConfig::new(name, self.addr.ip().to_string(), self.addr.port())
            .credentials(USER, PASSWORD)
            .plaintext()
    }

    /// Registry whose only, default endpoint is this daemon.
    pub fn registry(&self, name: &str) -> anyhow::Result<Registry> {
        let servers = RpcServers::new(vec![self.endpoint(name).default_endpoint(true)])?;
        let dialer = WsDialer::new()
            .connect_timeout(Duration::from_secs(2))
            .request_timeout(Duration::from_secs(5));
        Ok(Registry::builder(Arc::new(servers))
            .dialer(Arc::new(dialer))
            .build()?)
    }

    /// Drop every open socket without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.kill.send(());
    }

    /// WebSocket upgrades that passed authentication.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Upgrades refused for bad credentials.
    pub fn rejected(&self) -> usize {
        self.state.rejected.load(Ordering::SeqCst)
    }

    /// Authenticated sessions that have since ended.
    pub fn ended(&self) -> usize {
        self.state.ended.load(Ordering::SeqCst)
    }

    /// Issuer names announced via `rpc.set_issuer`, in order.
    pub fn issuers(&self) -> Vec<String> {
        self.state.issuers.lock().unwrap().clone()
    }

    /// Methods called on any session, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Close the listener and every open socket.
    pub async fn stop(self) {
        self.drop_connections();
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<State>, kill: broadcast::Sender<()>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "mock daemon accept failed");
                continue;
            }
        };
        let state = Arc::clone(&state);
        let kill = kill.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, state, kill).await {
                tracing::debug!(%peer, error = %e, "mock daemon session ended");
            }
        });
    }
}

async fn serve(
    stream: TcpStream,
    state: Arc<State>,
    mut kill: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let expected = format!("Basic {}", STANDARD.encode(format!("{USER}:{PASSWORD}")));
    let authorize = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let provided = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if provided == Some(expected.as_str()) {
            Ok(response)
        } else {
            let mut denied = ErrorResponse::new(Some("invalid credentials".to_string()));
            *denied.status_mut() = StatusCode::UNAUTHORIZED;
            Err(denied)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, authorize).await {
        Ok(ws) => ws,
        Err(e) => {
            state.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(e.into());
        }
    };
    state.accepted.fetch_add(1, Ordering::SeqCst);

    let result = session(ws, &state, &mut kill).await;
    state.ended.fetch_add(1, Ordering::SeqCst);
    result
}

async fn session(
    ws: WebSocketStream<TcpStream>,
    state: &State,
    kill: &mut broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            _ = kill.recv() => return Ok(()),
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    for reply in state.handle(&text) {
                        sink.send(Message::Text(reply)).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

/// Poll `condition` until it holds, failing after two seconds.
pub async fn eventually<F>(what: &str, condition: F) -> anyhow::Result<()>
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
