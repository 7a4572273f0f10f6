use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use knowlex::api::{router, ApiState, RateLimiter};
use knowlex::{logging, ServiceArgs};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "knowlex-api",
    about = "HTTP API returning reranked clauses and co-located figures for a question"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "KNOWLEX_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Max requests per minute allowed (0 disables rate limiting).
    #[arg(long, default_value_t = 120)]
    max_requests_per_minute: u32,

    /// Rate-limit burst size (tokens available instantly).
    #[arg(long, default_value_t = 12)]
    rate_limit_burst: u32,

    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = ApiCli::parse();
    let service = cli.service.clone();
    // Blocking HTTP clients must be built and dropped off the async runtime.
    let pipeline = tokio::task::spawn_blocking(move || service.build_pipeline())
        .await
        .map_err(|err| anyhow!("pipeline setup task failed: {err}"))??;
    let state = ApiState::new(
        Arc::new(pipeline),
        RateLimiter::new(cli.max_requests_per_minute, cli.rate_limit_burst),
    );
    let app = router(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "knowlex-api listening");
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}
