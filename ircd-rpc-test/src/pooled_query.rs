use std::sync::Arc;

use ircd_rpc_client::{ClientError, Code, DEFAULT_ISSUER, Registry};
use serde_json::json;

use crate::daemon::MockDaemon;
use crate::report;

pub async fn run() -> anyhow::Result<()> {
    let daemon = MockDaemon::start().await?;
    let registry = daemon.registry("local")?;

    let cases = vec![
        report::case("connect and query user.list", query_users(&daemon, &registry)).await,
        report::case("connect is idempotent", connect_twice(&daemon, &registry)).await,
        report::case("daemon error is not retried", unknown_method(&daemon, &registry)).await,
        report::case("set_active rejects unknown name", set_active_unknown(&registry)).await,
    ];

    daemon.stop().await;
    report::print("Pooled Query Tests", &cases)
}

async fn query_users(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    registry
        .connect(&daemon.endpoint("local"), DEFAULT_ISSUER)
        .await?;

    let users = registry
        .with_retry(|conn| async move { conn.query("user.list", json!({})).await })
        .await?;

    let names: Vec<_> = users["list"]
        .as_array()
        .map(|list| list.iter().filter_map(|u| u["name"].as_str()).collect())
        .unwrap_or_default();
    if names != ["alice", "bob"] {
        anyhow::bail!("unexpected user list: {users}");
    }

    // The issuer announce precedes user.list on the same socket.
    if daemon.issuers() != [DEFAULT_ISSUER] {
        anyhow::bail!("expected issuer {DEFAULT_ISSUER:?}, got {:?}", daemon.issuers());
    }
    if registry.active_name().await.as_deref() != Some("local") {
        anyhow::bail!("expected \"local\" to be active");
    }
    if registry.list_connections().await != ["local"] {
        anyhow::bail!("unexpected connections: {:?}", registry.list_connections().await);
    }

    let health = registry.get_active().await?.health();
    if health.error_count != 0 || health.last_success_at.is_none() {
        anyhow::bail!("expected a recorded success, got {health:?}");
    }
    Ok(())
}

async fn connect_twice(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let first = registry.get_active().await?;
    let second = registry
        .connect(&daemon.endpoint("local"), DEFAULT_ISSUER)
        .await?;

    if !Arc::ptr_eq(&first, &second) {
        anyhow::bail!("second connect replaced the existing connection");
    }
    if daemon.accepted() != 1 {
        anyhow::bail!("expected 1 session, daemon accepted {}", daemon.accepted());
    }
    Ok(())
}

async fn unknown_method(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let result = registry
        .with_retry(|conn| async move { conn.query("spamfilter.explode", json!({})).await })
        .await;

    match result {
        Err(ref e) if e.code() == Some(Code::MethodNotFound) => {}
        other => anyhow::bail!("expected method not found, got {other:?}"),
    }
    if daemon.accepted() != 1 {
        anyhow::bail!("daemon error triggered a reconnect");
    }

    let health = registry.get_active().await?.health();
    if health.error_count != 1 {
        anyhow::bail!("expected one recorded error, got {health:?}");
    }
    Ok(())
}

async fn set_active_unknown(registry: &Registry) -> anyhow::Result<()> {
    match registry.set_active("elsewhere").await {
        Err(ClientError::NotConnected(name)) if name == "elsewhere" => {}
        other => anyhow::bail!("expected NotConnected, got {other:?}"),
    }
    if registry.active_name().await.as_deref() != Some("local") {
        anyhow::bail!("failed set_active changed the active connection");
    }
    Ok(())
}
