//! fileferry daemon entry point.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fileferry_server::{FileService, Limits, ServerConfig, TransferServer};
use fileferry_storage::FileStore;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting fileferry daemon"
    );

    // Load configuration.
    let config = config::Config::load()?;
    tracing::info!(
        port = config.port,
        storage_dir = %config.storage_dir,
        "configuration loaded"
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("daemon shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let store = Arc::new(FileStore::new(&config.storage_dir)?);
    let service = FileService::new(
        store,
        Limits {
            max_uploads: config.max_uploads,
            max_downloads: config.max_downloads,
            max_lists: config.max_lists,
        },
    );
    let server = TransferServer::new(ServerConfig { port: config.port }, service);

    let runner = Arc::clone(&server);
    let mut task = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        // The server exited on its own (e.g. the bind failed).
        result = &mut task => result??,

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            server.shutdown();
            task.await??;
        }
    }

    Ok(())
}
