//! VISE server - main entry point
//!
//! Bootstraps the event queue, the search engine, and the HTTP listener on
//! a multi-thread runtime whose worker count is operator-configurable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vise_common::EventQueue;
use vise_server::config::{resolve_data_dir, ServerConfig};
use vise_server::engine::{ExternalToolBackend, SearchEngine};
use vise_server::http::{server, ServerContext};
use vise_server::resources::ResourceCache;

/// Command-line arguments for the vise server
#[derive(Parser, Debug)]
#[command(name = "vise")]
#[command(about = "VISE image search engine server")]
#[command(version)]
struct Args {
    /// Port to listen on; the server only ever binds localhost
    #[arg(short, long, default_value = "9971", env = "VISE_PORT")]
    port: u16,

    /// Worker threads serving connections
    #[arg(short, long, default_value = "4", env = "VISE_THREADS")]
    threads: usize,

    /// Data directory holding the engines and logs
    #[arg(short, long, env = "VISE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory of UI assets
    #[arg(short, long, default_value = "./resources", env = "VISE_RESOURCE_DIR")]
    resource_dir: PathBuf,

    /// Directory of the external indexing tools
    #[arg(long, default_value = "./tools", env = "VISE_TOOL_DIR")]
    tool_dir: PathBuf,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vise_server=debug,vise_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = ServerConfig {
        // Only ever serve localhost; the UI assumes a single local browser.
        bind_addr: "127.0.0.1".to_string(),
        port: args.port,
        threads: args.threads.max(1),
        data_dir: resolve_data_dir(args.data_dir.as_ref()),
        resource_dir: args.resource_dir,
        tool_dir: args.tool_dir,
    };

    std::fs::create_dir_all(config.engine_dir())
        .with_context(|| format!("failed to create {}", config.engine_dir().display()))?;
    std::fs::create_dir_all(config.log_dir())
        .with_context(|| format!("failed to create {}", config.log_dir().display()))?;

    info!("data directory: {}", config.data_dir.display());
    info!("resource directory: {}", config.resource_dir.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads)
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: ServerConfig) -> Result<()> {
    let queue = Arc::new(EventQueue::new());
    let backend = Arc::new(ExternalToolBackend::new(config.tool_dir.clone()));
    let engine = Arc::new(SearchEngine::new(
        config.engine_dir(),
        config.tool_dir.clone(),
        queue.clone(),
        backend,
    ));
    let resources = Arc::new(ResourceCache::new(config.resource_dir.clone()));

    let ctx = Arc::new(ServerContext {
        config,
        engine,
        queue: queue.clone(),
        resources,
    });

    server::run(ctx).await.context("server error")?;

    // Give in-flight producers a moment to flush their events.
    let _ = tokio::time::timeout(Duration::from_secs(1), queue.drain_wait()).await;
    info!("server shutdown complete");
    Ok(())
}
