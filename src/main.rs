//! `ccr` binary: thin CLI front-end over the registry operations.
//!
//! The router itself has no binary entry point of its own: it's a library
//! consumed by a transport. This binary only exposes the registry
//! management surface.

use clap::Parser;
use ccr_router::cli::{self, Cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let code = cli::run(cli).await;
    std::process::exit(code);
}
