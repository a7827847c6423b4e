use clap::Parser;
use log::{error, info};
use server::app;
use server::config::Cli;

/// Main-method of the application.
/// Parses command-line arguments, starts the room and the HTTP server, then
/// waits for Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut running = app::launch(&cli).await?;

    tokio::select! {
        result = running.http_stopped() => {
            if let Err(e) = result {
                error!("HTTP server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    running.shutdown().await?;
    Ok(())
}
