//! nimd
//!
//! Nim game server. Takes the listen port as its only argument.

use std::sync::Arc;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use nimd::{GameServer, ServerConfig, VERSION};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("nimd v{}", VERSION);

    let server = Arc::new(GameServer::bind(ServerConfig::with_port(args.port)).await?);

    let mut server_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = &mut server_handle => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            server.shutdown();
            if let Err(e) = server_handle.await? {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
