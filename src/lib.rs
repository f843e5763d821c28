pub mod config;
pub mod errors;
pub mod kernel;
pub mod model;
pub mod notebook;
pub mod server;
pub mod service;
pub mod state;
pub mod tools;

pub use config::{CliArgs, ExecutionConfig, ServerConfig, TransportKind};
pub use server::NotebookServer;
pub use service::NotebookService;

use anyhow::Result;
use std::sync::Arc;

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    tracing::info!(
        workspace = %config.workspace_root.display(),
        transport = %config.transport,
        kernel = %config.kernel.command,
        "starting notebook mcp server"
    );

    let server = NotebookServer::new(config.clone()).await?;
    match config.transport {
        TransportKind::Stdio => server.run_stdio().await,
        TransportKind::Http => server.run_http(config.http_bind_address).await,
    }
}
