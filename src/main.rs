//! hybrid-router - Entry Point
//!
//! Starts the HTTP server that exposes the task API, or runs a single
//! `generate`/`optimize` command and prints its output.

use clap::Parser;
use hybrid_router::{api, cli::Cli, Coordinator};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let filter: tracing_subscriber::EnvFilter = match cli.log_level {
        Some(level) => level.filter().into(),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "hybrid_router=debug,tower_http=debug".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = cli.load_config()?;
    info!(
        "Loaded configuration: strategy={:?}, remote={}",
        config.routing.strategy,
        config
            .remote
            .endpoint
            .as_ref()
            .map(|url| url.as_str())
            .unwrap_or("(local fallback)")
    );

    // Runtime workers follow WORKER_THREADS, never fewer than 2
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.execution.worker_threads.max(2))
        .enable_all()
        .build()?;

    if cli.serves() {
        return runtime.block_on(async move {
            info!("Starting server on {}:{}", config.host, config.port);
            api::serve(config).await
        });
    }

    runtime.block_on(async move {
        let coordinator = Coordinator::from_config(&config)?;
        if let Some(output) = cli.run_once(&coordinator).await? {
            print!("{}", output);
            if !output.ends_with('\n') {
                println!();
            }
        }
        Ok(())
    })
}
