use anyhow::Result;
use clap::Parser;
use sheetpatch_mcp::config::{CliArgs, ServerConfig, TransportKind};
use sheetpatch_mcp::server::SheetPatchServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Stdio transport owns stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = ServerConfig::from_args(args)?;
    let transport = config.transport;
    tracing::info!(%transport, workspace = %config.workspace_root.display(), "starting server");

    let server = SheetPatchServer::new(config)?;
    match transport {
        TransportKind::Stdio => server.run_stdio().await,
        TransportKind::Http => server.run_http().await,
    }
}
