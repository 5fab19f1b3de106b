//! WebSocket router - Entry Point
//!
//! Serves `EchoService` on `/echo` and `ChatService` on `/chat`; any other
//! request gets a plain-text answer.
//!
//! Usage: `ws_router [bind_addr] [config.json]`

use std::env;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ws_router::{
    handle_connection, ChatService, EchoService, PathRouter, RouterContainer, ServerConfig,
    TextContainer,
};

const INDEX: &str = "WebSocket endpoints: /echo, /chat\n";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG to control log level, e.g. RUST_LOG=ws_router=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ws_router=info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let bind_override = args.next();
    let mut config = match args.next() {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = bind_override {
        config.bind_addr = addr;
    }

    let runtime = config.build_runtime()?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("WebSocket router listening on {}", config.bind_addr);

    let router = PathRouter::new()
        .service("/echo", Arc::new(EchoService))
        .service("/chat", Arc::new(ChatService::new()));
    let container: Arc<RouterContainer<BufReader<TcpStream>>> = Arc::new(RouterContainer::new(
        Arc::new(TextContainer::new(INDEX)),
        Arc::new(router),
        config,
    )?);
    container.start();

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let container = Arc::clone(&container);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, container).await {
                        error!("Connection {} error: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
