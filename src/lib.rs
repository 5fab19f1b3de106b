//! WebSocket routing library
//!
//! An RFC 6455 server side that sits in front of an ordinary HTTP request
//! handler: upgrade requests are validated, turned into sessions and routed
//! to application services, everything else passes through.
//!
//! # Features
//! - Opening handshake validation and 101 / 400 responses
//! - Frame codec with masking, fragmentation and size limits
//! - Per-session ordered writer and closing handshake
//! - Keepalive sweep: periodic pings, expiry of silent or idle sessions
//! - Path-based routing with a plain HTTP fallback
//!
//! # Architecture
//! - `RouterContainer` asks its `Router` for a `Service`; unclaimed requests
//!   go to the wrapped `Container`
//! - `ServiceDispatcher` builds sessions through `SessionBuilder`, keeps the
//!   registry and runs the sweep
//! - Each session's `FrameChannel` reads on its own task and writes through
//!   a dedicated writer task
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::io::BufReader;
//! use tokio::net::{TcpListener, TcpStream};
//! use ws_router::{handle_connection, EchoService, PathRouter, RouterContainer, ServerConfig, TextContainer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let container: Arc<RouterContainer<BufReader<TcpStream>>> = Arc::new(RouterContainer::new(
//!         Arc::new(TextContainer::new("hello")),
//!         Arc::new(PathRouter::new().service("/echo", Arc::new(EchoService))),
//!         ServerConfig::default(),
//!     ).unwrap());
//!     container.start();
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, Arc::clone(&container)));
//!     }
//! }
//! ```

pub mod builder;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod http;
pub mod message;
pub mod router;
pub mod service;
pub mod services;
pub mod session;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use builder::SessionBuilder;
pub use channel::{ChannelObserver, FrameChannel};
pub use config::ServerConfig;
pub use dispatcher::{ServiceDispatcher, SweepReport};
pub use error::{ConfigError, HandshakeError, ProtocolError, SendError, WsError};
pub use frame::{CloseCode, CloseReason, Frame, FrameCodec, Opcode};
pub use handler::handle_connection;
pub use http::Request;
pub use message::Message;
pub use router::{Container, DirectRouter, PathRouter, Router, RouterContainer};
pub use service::Service;
pub use services::{ChatService, EchoService, TextContainer};
pub use session::Session;
pub use types::{SessionId, SessionState};
