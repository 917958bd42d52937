use ircd_rpc_client::{ClientError, EndpointConfig, Registry, methods};
use tokio::net::TcpListener;

use crate::daemon::{MockDaemon, USER, eventually};
use crate::report;

pub async fn run() -> anyhow::Result<()> {
    let daemon = MockDaemon::start().await?;
    let registry = daemon.registry("local")?;

    let cases = vec![
        report::case("check succeeds without registering", check_ok(&daemon, &registry)).await,
        report::case("check with wrong password", wrong_password(&daemon, &registry)).await,
        report::case("check with nothing listening", nothing_listening(&registry)).await,
    ];

    daemon.stop().await;
    report::print("Connection Check Tests", &cases)
}

async fn check_ok(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    registry.test_connection(&daemon.endpoint("local")).await?;

    if daemon.calls() != [methods::INFO] {
        anyhow::bail!("unexpected calls: {:?}", daemon.calls());
    }
    if !registry.list_connections().await.is_empty() {
        anyhow::bail!("connection check registered a connection");
    }
    if registry.active_name().await.is_some() {
        anyhow::bail!("connection check set an active connection");
    }
    Ok(())
}

async fn wrong_password(daemon: &MockDaemon, registry: &Registry) -> anyhow::Result<()> {
    let endpoint = daemon.endpoint("local").credentials(USER, "wrong");

    match registry.test_connection(&endpoint).await {
        Err(ClientError::Connect { name, .. }) if name == "local" => {}
        other => anyhow::bail!("expected a connect error, got {other:?}"),
    }
    eventually("the daemon to reject the upgrade", || daemon.rejected() == 1).await?;
    Ok(())
}

async fn nothing_listening(registry: &Registry) -> anyhow::Result<()> {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let endpoint = EndpointConfig::new("gone", "127.0.0.1", port)
        .credentials(USER, "irrelevant")
        .plaintext();

    match registry.test_connection(&endpoint).await {
        Err(e @ ClientError::Connect { .. }) if e.is_connection_error() => Ok(()),
        other => anyhow::bail!("expected a connect error, got {other:?}"),
    }
}
