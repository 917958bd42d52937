use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use ircd_rpc_client::{DEFAULT_ISSUER, Registry, methods};
use serde_json::json;

use crate::daemon::{LOG_LINES, MockDaemon, eventually};
use crate::report;

pub async fn run() -> anyhow::Result<()> {
    let daemon = MockDaemon::start().await?;
    let registry = daemon.registry("local")?;

    let cases = vec![
        report::case(
            "stream log entries until the handler stops",
            stream_entries(&daemon, &registry),
        )
        .await,
        report::case(
            "streaming leaves the pooled connection alone",
            pooled_untouched(&daemon, &registry),
        )
        .await,
        report::case(
            "session outlives pooled reconnect",
            outlives_reconnect(&daemon, &registry),
        )
        .await,
    ];

    daemon.stop().await;
    report::print("Log Streaming Tests", &cases)
}

async fn stream_entries(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    registry
        .connect(&daemon.endpoint("local"), DEFAULT_ISSUER)
        .await?;
    let session = registry.new_dedicated_client().await?;

    let mut lines = Vec::new();
    let streamed = session.stream_logs(&[], |entry| {
        lines.push(entry["msg"].as_str().unwrap_or_default().to_string());
        if lines.len() == LOG_LINES.len() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    tokio::time::timeout(Duration::from_secs(5), streamed).await??;

    if lines != LOG_LINES {
        anyhow::bail!("unexpected log lines: {lines:?}");
    }

    eventually("log.unsubscribe to reach the daemon", || {
        daemon.calls().iter().any(|m| m == methods::LOG_UNSUBSCRIBE)
    })
    .await?;

    // The streaming session never announces an issuer.
    if daemon.issuers() != [DEFAULT_ISSUER] {
        anyhow::bail!("unexpected issuers: {:?}", daemon.issuers());
    }
    if daemon.accepted() != 2 {
        anyhow::bail!("expected 2 sessions, daemon accepted {}", daemon.accepted());
    }
    Ok(())
}

async fn pooled_untouched(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let pooled = registry.get_active().await?;
    if pooled.is_closed() {
        anyhow::bail!("closing the streaming session closed the pooled one");
    }

    registry
        .with_retry(|conn| async move { conn.query("user.list", json!({})).await })
        .await?;

    if !Arc::ptr_eq(&pooled, &registry.get_active().await?) {
        anyhow::bail!("pooled connection was replaced");
    }
    if registry.list_connections().await != ["local"] {
        anyhow::bail!("streaming session was registered: {:?}", registry.list_connections().await);
    }
    if daemon.accepted() != 2 {
        anyhow::bail!("expected 2 sessions, daemon accepted {}", daemon.accepted());
    }
    Ok(())
}

async fn outlives_reconnect(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let session = registry.new_dedicated_client().await?;

    registry.reconnect("local").await?;
    if session.is_closed() {
        anyhow::bail!("pooled reconnect closed the streaming session");
    }

    session.query(methods::INFO, json!({})).await?;
    session.close().await;
    if !session.is_closed() {
        anyhow::bail!("session still open after close");
    }
    if daemon.accepted() != 4 {
        anyhow::bail!("expected 4 sessions, daemon accepted {}", daemon.accepted());
    }
    Ok(())
}
