//! Real-time Chat Session Server - Entry Point
//!
//! Starts the chat session actor and the TCP listener, accepting
//! connections until Ctrl+C.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_session::{serve, Args, ChatConfig, ChatSession};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_session=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_session=info")),
        )
        .init();

    let config = ChatConfig::from(Args::parse());

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;

    let session = ChatSession::start(&config);

    let result = serve(listener, session.handle(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;

    info!("Shutting down");
    session.shutdown().await;
    result?;
    Ok(())
}
