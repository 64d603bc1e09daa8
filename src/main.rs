use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use minco::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = ServerConfig::parse();
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "minco",
        "minco starting: RUST_LOG='{}', http_port={}, issuer='{}', token_ttl_secs={}",
        rust_log, config.http_port, config.jwt.issuer, config.jwt.expires_in_secs
    );

    minco::server::run(config).await
}
