use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ircd_rpc_client::{ClientError, DEFAULT_ISSUER, Registry, TransportError};
use serde_json::{Value, json};

use crate::daemon::{GARBLED_METHOD, MockDaemon, eventually};
use crate::report;

pub async fn run() -> anyhow::Result<()> {
    let daemon = MockDaemon::start().await?;
    let registry = daemon.registry("local")?;

    let mut cases = vec![
        report::case(
            "retry after daemon drops the socket",
            dropped_socket(&daemon, &registry),
        )
        .await,
        report::case(
            "explicit reconnect replaces the entry",
            explicit_reconnect(&daemon, &registry),
        )
        .await,
        report::case(
            "with_retry redials after disconnect",
            after_disconnect(&daemon, &registry),
        )
        .await,
        report::case(
            "garbled reply fails fast and retries",
            garbled_reply(&daemon, &registry),
        )
        .await,
    ];

    daemon.stop().await;
    cases.push(report::case("daemon gone reports both failures", daemon_gone(&registry)).await);

    report::print("Reconnect Tests", &cases)
}

async fn list_users(registry: &Registry) -> Result<Value, ClientError> {
    registry
        .with_retry(|conn| async move { conn.query("user.list", json!({})).await })
        .await
}

async fn dropped_socket(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let first = registry
        .connect(&daemon.endpoint("local"), DEFAULT_ISSUER)
        .await?;
    list_users(registry).await?;

    daemon.drop_connections();
    eventually("the pooled session to notice the drop", || first.is_closed()).await?;

    list_users(registry).await?;

    let fresh = registry.get_active().await?;
    if Arc::ptr_eq(&first, &fresh) {
        anyhow::bail!("dead connection is still active");
    }
    if daemon.accepted() != 2 {
        anyhow::bail!("expected 2 sessions, daemon accepted {}", daemon.accepted());
    }
    // The replacement announces the same issuer as the connection it replaced.
    if daemon.issuers() != [DEFAULT_ISSUER, DEFAULT_ISSUER] {
        anyhow::bail!("unexpected issuers: {:?}", daemon.issuers());
    }
    if fresh.health().error_count != 0 {
        anyhow::bail!("fresh connection inherited errors: {:?}", fresh.health());
    }
    Ok(())
}

async fn explicit_reconnect(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let old = registry.get_active().await?;
    let fresh = registry.reconnect("local").await?;

    if Arc::ptr_eq(&old, &fresh) {
        anyhow::bail!("reconnect returned the old connection");
    }
    if registry.list_connections().await != ["local"] {
        anyhow::bail!("unexpected connections: {:?}", registry.list_connections().await);
    }
    fresh.query("rpc.info", json!({})).await?;
    if daemon.accepted() != 3 {
        anyhow::bail!("expected 3 sessions, daemon accepted {}", daemon.accepted());
    }

    // A handle taken before the reconnect keeps working until it is dropped.
    old.query("user.list", json!({})).await?;
    let ended = daemon.ended();
    drop(old);
    eventually("the superseded session to be released", || {
        daemon.ended() == ended + 1
    })
    .await?;
    Ok(())
}

async fn after_disconnect(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let old = registry.get_active().await?;
    registry.disconnect("local").await?;

    if !old.is_closed() {
        anyhow::bail!("disconnect left the session open");
    }
    if registry.active_name().await.is_some() {
        anyhow::bail!("active connection survived disconnect");
    }

    // Nothing is active, so the configured default endpoint is dialed.
    list_users(registry).await?;
    if registry.active_name().await.as_deref() != Some("local") {
        anyhow::bail!("default endpoint did not become active");
    }
    if daemon.accepted() != 4 {
        anyhow::bail!("expected 4 sessions, daemon accepted {}", daemon.accepted());
    }
    Ok(())
}

async fn garbled_reply(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let garbled = registry.get_active().await?;
    let attempts = AtomicUsize::new(0);
    let first_error = Mutex::new(None);
    let (attempts, first_error) = (&attempts, &first_error);

    // Well under the 5 second request timeout.
    let users = tokio::time::timeout(
        Duration::from_secs(2),
        registry.with_retry(|conn| async move {
            if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                return conn.query("user.list", json!({})).await;
            }
            let result = conn.query(GARBLED_METHOD, json!({})).await;
            if let Err(e) = &result {
                *first_error.lock().unwrap() = Some(e.clone());
            }
            result
        }),
    )
    .await??;

    match first_error.lock().unwrap().take() {
        Some(ClientError::Transport(TransportError::Decode(_))) => {}
        other => anyhow::bail!("expected a decode error, got {other:?}"),
    }
    if users["list"].as_array().map(Vec::len) != Some(2) {
        anyhow::bail!("unexpected user list: {users}");
    }
    if attempts.load(Ordering::SeqCst) != 2 {
        anyhow::bail!("expected 2 attempts, got {}", attempts.load(Ordering::SeqCst));
    }
    if !garbled.is_closed() {
        anyhow::bail!("session survived an undecodable frame");
    }
    if daemon.accepted() != 5 {
        anyhow::bail!("expected 5 sessions, daemon accepted {}", daemon.accepted());
    }
    Ok(())
}

async fn daemon_gone(registry: &Registry) -> anyhow::Result<()> {
    let conn = registry.get_active().await?;
    eventually("the pooled session to notice the shutdown", || conn.is_closed()).await?;

    match list_users(registry).await {
        Err(ClientError::ConnectionLost { original, reconnect }) => {
            if !original.is_connection_error() {
                anyhow::bail!("original failure is not a connection error: {original}");
            }
            if !matches!(*reconnect, ClientError::Reconnect { .. }) {
                anyhow::bail!("unexpected reconnect failure: {reconnect}");
            }
        }
        other => anyhow::bail!("expected ConnectionLost, got {other:?}"),
    }

    // The failed reconnect keeps the existing entry.
    if registry.active_name().await.as_deref() != Some("local") {
        anyhow::bail!("failed reconnect dropped the active connection");
    }
    Ok(())
}
