mod daemon;
mod report;

mod connection_check;
mod log_streaming;
mod pooled_query;
mod reconnect;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    pooled_query::run().await?;
    reconnect::run().await?;
    log_streaming::run().await?;
    connection_check::run().await
}
