//! Relay binary entry point.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use weft_relay::mailer::LogMailer;
use weft_relay::{routes, RelayConfig, RelayContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => RelayConfig::load(&PathBuf::from(path))?,
        None => RelayConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    let listen_addr = config.listen_addr.clone();
    let ctx = RelayContext::open(config, Arc::new(LogMailer))?;
    let app = routes::router(ctx);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(%listen_addr, "relay listening");
    axum::serve(listener, app).await?;
    Ok(())
}
