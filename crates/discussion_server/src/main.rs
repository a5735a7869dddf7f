//! `discussion-server` entry point.
//!
//! # Responsibility
//! - Wire config, logging, the consistency table and the HTTP router.
//! - On Ctrl-C: cancel in-flight requests, drain, then close the table.

use discussion_core::{
    init_logging, ConsistencyTable, Context, Handler, MemoryTable, MessageService, SqliteTable,
    TableMessageRepository,
};
use discussion_server::api::{self, AppState};
use discussion_server::config::{ServerConfig, TableBackend};
use log::{error, info};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=server_exit module=server status=error error={err}");
            eprintln!("discussion-server: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::from_env()?;
    init_logging(&config.log_level, config.log_dir.as_deref())?;

    let table: Arc<dyn ConsistencyTable> = match config.backend {
        TableBackend::Sqlite => Arc::new(SqliteTable::open(&config.db_path)?),
        TableBackend::Memory => Arc::new(MemoryTable::new()),
    };
    let repo = TableMessageRepository::with_options(Arc::clone(&table), config.store);

    let (root, root_handler) = Context::new();
    let app = api::router(AppState::new(
        MessageService::new(repo),
        root,
        config.request_timeout,
    ));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        "event=server_start module=server status=ok addr={} backend={} timeout_ms={}",
        config.bind_addr,
        config.backend,
        config.request_timeout.as_millis()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(root_handler))
        .await?;

    table.close().await?;
    info!("event=server_stop module=server status=ok");
    Ok(())
}

/// Resolves on Ctrl-C after cancelling the root context.
async fn shutdown_signal(root_handler: Handler) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("event=server_signal module=server status=error error={err}");
    }
    info!("event=server_shutdown module=server status=start");
    root_handler.cancel();
}
