//! In-memory dialer and transport for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::config::{DialOptions, EndpointConfig};
use crate::error::{ClientError, TransportError};
use crate::transport::{Dialer, Transport};

/// Scripted transport. Replies and events are served in push order.
#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<Result<Value, ClientError>>>,
    events: Mutex<VecDeque<Result<Value, TransportError>>>,
    queries: Mutex<Vec<String>>,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_reply(&self, reply: Result<Value, ClientError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub(crate) fn push_event(&self, event: Result<Value, TransportError>) {
        self.events.lock().unwrap().push_back(event);
    }

    /// Method names queried so far.
    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn query<'a>(&'a self, method: &'a str, _params: Value) -> BoxFuture<'a, Result<Value, ClientError>> {
        async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed("mock closed".into()).into());
            }
            self.queries.lock().unwrap().push(method.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Value::Null))
        }
        .boxed()
    }

    fn next_event(&self) -> BoxFuture<'_, Result<Value, TransportError>> {
        async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed("mock closed".into()));
            }
            self.events
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Closed("no more events".into())))
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.close_count.fetch_add(1, Ordering::SeqCst);
            }
        }
        .boxed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Dialer that counts dials and hands out [`MockTransport`]s.
#[derive(Default)]
pub(crate) struct MockDialer {
    dials: Mutex<Vec<(String, DialOptions)>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl MockDialer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every dial sleeps for `delay` before completing.
    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Make subsequent dials fail (or succeed again).
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    /// Endpoint names and options of every dial attempt, in order.
    pub(crate) fn dials(&self) -> Vec<(String, DialOptions)> {
        self.dials.lock().unwrap().clone()
    }

    /// Transports produced by successful dials, in order.
    pub(crate) fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().unwrap().clone()
    }

    pub(crate) fn last_transport(&self) -> Arc<MockTransport> {
        self.transports.lock().unwrap().last().cloned().unwrap()
    }
}

impl Dialer for MockDialer {
    fn dial<'a>(
        &'a self,
        endpoint: &'a EndpointConfig,
        options: &'a DialOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, TransportError>> {
        async move {
            self.dials
                .lock()
                .unwrap()
                .push((endpoint.name.clone(), options.clone()));

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Dial(format!(
                    "{}: connection refused",
                    endpoint.url()
                )));
            }

            let transport = MockTransport::new();
            self.transports.lock().unwrap().push(Arc::clone(&transport));
            Ok(transport as Arc<dyn Transport>)
        }
        .boxed()
    }
}
