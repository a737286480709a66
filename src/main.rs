mod backend;
mod completion;
mod config;
mod context;
mod diagnostics;
mod error;
mod hover;
mod loader;
mod schema;
mod snippet;
mod syntax;
mod text;
mod watcher;

use backend::Backend;
use tower_lsp::{LspService, Server};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ABILITY_LSP_LOG";

#[tokio::main]
async fn main() {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;
}
