//! Session construction
//!
//! Turns an upgrade request plus its stream into an open `Session` and the
//! `FrameChannel` that will drive it. On a bad handshake the client gets an
//! HTTP 400 and the stream is shut down; no session exists.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::channel::FrameChannel;
use crate::config::ServerConfig;
use crate::error::WsError;
use crate::handshake;
use crate::http::Request;
use crate::session::Session;
use crate::types::SessionId;

/// Builds sessions with one set of limits
#[derive(Debug, Clone, Copy)]
pub struct SessionBuilder<'a> {
    config: &'a ServerConfig,
}

impl<'a> SessionBuilder<'a> {
    pub fn new(config: &'a ServerConfig) -> Self {
        Self { config }
    }

    /// Validate the handshake, commit the 101 response and open a session
    ///
    /// The response is flushed before the channel exists, so no frame can
    /// precede it on the wire.
    pub async fn create<S>(
        &self,
        request: &Request,
        mut stream: S,
    ) -> Result<(Session, FrameChannel<S>), WsError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handshake = match handshake::validate(request) {
            Ok(handshake) => handshake,
            Err(err) => {
                warn!("Rejected handshake for {}: {}", request.path(), err);
                if let Err(io_err) = write_and_close(&mut stream, &handshake::reject(&err)).await {
                    debug!("Failed to send handshake rejection: {}", io_err);
                }
                return Err(err.into());
            }
        };

        if let Err(err) = commit(&mut stream, &handshake.response()).await {
            let _ = stream.shutdown().await;
            return Err(err.into());
        }

        let id = SessionId::new();
        let channel = FrameChannel::new(stream, id, request.path(), self.config);
        let session = channel.open();
        debug!(
            "Session {} upgraded on {} (protocol {:?})",
            id,
            request.path(),
            handshake.protocol
        );
        Ok((session, channel))
    }
}

async fn commit<S>(stream: &mut S, bytes: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await
}

async fn write_and_close<S>(stream: &mut S, bytes: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    commit(stream, bytes).await?;
    stream.shutdown().await
}
