use clap::Parser;
use mcp_guard::{ConfigLoader, ProxyPolicy, UriValidator};
use mcp_relay::{ProxyServer, Relay, RelayService, RouteTable};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mcp-relay")]
#[command(about = "SSRF-safe HTTP/SSE relay for MCP tool servers")]
struct Args {
    /// Configuration file (merged over the built-in defaults)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG takes precedence over --verbose
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if args.verbose { "debug" } else { "info" }.to_string()
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = ConfigLoader::load_for_startup(args.config, args.listen)?;
    let policy = Arc::new(ProxyPolicy::from_config(&config)?);
    let routes = RouteTable::from_config(&config.routes)?;

    if args.check {
        println!("Configuration OK: {} routes", routes.len());
        return Ok(());
    }

    let listen: SocketAddr = config.server.listen.parse()?;
    let validator = UriValidator::new(policy);
    let relay = Relay::new(validator.clone())?;
    let service = Arc::new(RelayService::new(
        validator,
        relay,
        routes,
        config.server.max_request_body_bytes,
    ));

    tracing::info!("Starting mcp-relay with {} routes", config.routes.len());
    let server = ProxyServer::bind(listen, service).await?;

    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    Ok(())
}
