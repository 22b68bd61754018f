use clap::Parser;
use tokio::sync::broadcast;
use tracecast_core::TracecastConfig;
use tracing_subscriber::{fmt, EnvFilter};

use tracecast_server::{http, service};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tracecast.toml")]
    config: String,

    /// Override the trace file path from the config
    #[arg(long)]
    trace_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let mut config = match TracecastConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if let Some(path) = args.trace_file {
        config.trace.path = path;
    }

    // Init logging: RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let (handle, service_task) = service::spawn(&config, tx.subscribe());

    let result = http::start_http_server(handle, config, tx.subscribe()).await;
    if let Err(e) = &result {
        tracing::error!("HTTP server error: {}", e);
        let _ = tx.send(());
    }

    if let Err(e) = service_task.await {
        tracing::error!("Trace service task failed: {}", e);
    }

    result
}
