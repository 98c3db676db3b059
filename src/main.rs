use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use forwardauth::api::{self, AppState};
use forwardauth::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "forwardauth", about = "OAuth2/OIDC forward-auth service for edge proxies")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "FORWARDAUTH_CONFIG", default_value = "forwardauth.json")]
    config: PathBuf,

    /// Address to bind.
    #[arg(long, env = "FORWARDAUTH_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "FORWARDAUTH_PORT", default_value_t = 4181)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;
    info!(domain = %config.domain, applications = config.applications.len(), "configuration loaded");

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .timeout(Duration::from_secs(5))
        .build()?;

    // Fails here, before binding, if the JWKS endpoint is unreachable.
    let state = AppState::from_config(&config, client).await?;
    let router = api::router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}
