use clap::Parser;
use pollkv::{Config, Server};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 1234)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Threads that free large values (0 = config default)
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Create configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config {
            bind_addr: args.bind.clone(),
            port: args.port,
            log_level: args.log_level.clone(),
            ..Default::default()
        }
    };
    if args.workers > 0 {
        config.worker_threads = args.workers;
    }

    // Initialize tracing
    let log_level = if args.verbose {
        "debug"
    } else {
        &config.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("pollkv={}", log_level))
        .init();

    info!(
        "Starting pollkv v{} on {}:{} ({} worker threads)",
        env!("CARGO_PKG_VERSION"),
        config.bind_addr,
        config.port,
        config.worker_threads
    );

    // Create and run server
    let server = Arc::new(Server::new(config)?);

    // Setup signal handlers for graceful shutdown
    let server_clone = Arc::clone(&server);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, shutting down gracefully...");
        server_clone.shutdown();
    })?;

    // Run the server
    if let Err(e) = server.run() {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
