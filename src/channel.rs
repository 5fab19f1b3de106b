//! Per-connection frame I/O
//!
//! A `FrameChannel` owns the upgraded stream. The read half runs in
//! `FrameChannel::run`; the write half belongs to a spawned writer task fed
//! by the session's queue, so every outbound frame is written whole and in
//! queue order.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ProtocolError, WsError};
use crate::frame::{CloseReason, Frame, FrameCodec, Opcode};
use crate::message::{Message, MessageAssembler};
use crate::session::{outbound_queue, Outbound, Session};
use crate::types::{SessionId, SessionState};

/// Receives the events of one channel
///
/// Called on the channel's task; implementations must not block.
pub trait ChannelObserver: Send + Sync {
    fn on_message(&self, session: &Session, message: Message);
    fn on_error(&self, session: &Session, error: &WsError);
    /// Called exactly once, after the connection is gone
    fn on_close(&self, session: &Session, reason: &CloseReason);
}

/// Framed view of one upgraded connection
pub struct FrameChannel<S> {
    session: Session,
    frames: FramedRead<ReadHalf<S>, FrameCodec>,
    writer: JoinHandle<Result<(), WsError>>,
    assembler: MessageAssembler,
    close_timeout: Duration,
}

impl<S> FrameChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split `stream` and start its writer task
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(stream: S, id: SessionId, path: &str, config: &ServerConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (queue, outbound) = outbound_queue(config.max_queued_frames);
        let session = Session::new(id, path, queue, config.max_frame_size);

        let sink = FramedWrite::new(write_half, FrameCodec::server(config.max_frame_size));
        let writer = tokio::spawn(write_frames(
            sink,
            outbound,
            session.shutdown_token(),
            config.close_timeout(),
            id,
        ));

        Self {
            session,
            frames: FramedRead::new(read_half, FrameCodec::server(config.max_frame_size)),
            writer,
            assembler: MessageAssembler::new(config.max_message_size),
            close_timeout: config.close_timeout(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Move the session to `Open` and hand out a handle to it
    pub fn open(&self) -> Session {
        self.session.open();
        self.session.clone()
    }

    /// Read frames until the connection ends, then report `on_close` once
    pub async fn run(self, observer: Arc<dyn ChannelObserver>) {
        let FrameChannel {
            session,
            mut frames,
            mut writer,
            mut assembler,
            close_timeout,
        } = self;
        let id = session.id();
        let shutdown = session.shutdown_token();
        let mut writer_done = false;

        let reason = loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    break session.take_close_reason().unwrap_or_else(CloseReason::abnormal);
                }
                joined = &mut writer, if !writer_done => {
                    writer_done = true;
                    match joined {
                        Ok(Ok(())) => {
                            break session.take_close_reason().unwrap_or_else(CloseReason::abnormal);
                        }
                        Ok(Err(err)) => {
                            warn!("Session {} write failed: {}", id, err);
                            observer.on_error(&session, &err);
                            break CloseReason::abnormal();
                        }
                        Err(err) => {
                            warn!("Session {} writer task failed: {}", id, err);
                            break CloseReason::abnormal();
                        }
                    }
                }
                next = frames.next() => {
                    match next {
                        None => {
                            debug!("Session {} connection closed by peer", id);
                            break CloseReason::abnormal();
                        }
                        Some(Err(WsError::Protocol(err))) => {
                            break fail(&session, &*observer, err);
                        }
                        Some(Err(err)) => {
                            warn!("Session {} read failed: {}", id, err);
                            observer.on_error(&session, &err);
                            break CloseReason::abnormal();
                        }
                        Some(Ok(frame)) => {
                            match handle_frame(&session, &mut assembler, &*observer, frame) {
                                Ok(Some(reason)) => break reason,
                                Ok(None) => {}
                                Err(err) => break fail(&session, &*observer, err),
                            }
                        }
                    }
                }
            }
        };

        // A forced close outranks whatever ended the loop
        let reason = session.take_close_reason().unwrap_or(reason);
        session.mark_closed();
        drop(frames);
        if !writer_done {
            match time::timeout(close_timeout, &mut writer).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => debug!("Session {} flush on close failed: {}", id, err),
                Ok(Err(err)) => warn!("Session {} writer task failed: {}", id, err),
                Err(_) => {
                    debug!("Session {} writer did not finish, aborting", id);
                    writer.abort();
                }
            }
        }

        info!("Session {} closed ({})", id, u16::from(reason.code));
        observer.on_close(&session, &reason);
    }
}

/// Returns the close reason once the peer's close frame has been handled
fn handle_frame(
    session: &Session,
    assembler: &mut MessageAssembler,
    observer: &dyn ChannelObserver,
    frame: Frame,
) -> Result<Option<CloseReason>, ProtocolError> {
    match frame.opcode {
        Opcode::Ping => {
            session.record_inbound(false);
            session.enqueue_pong(frame.payload);
        }
        Opcode::Pong => session.record_inbound(false),
        Opcode::Close => {
            let reason = CloseReason::parse(&frame.payload)?;
            session.record_inbound(false);
            debug!("Session {} received close ({})", session.id(), u16::from(reason.code));
            session.acknowledge_close(&reason);
            return Ok(Some(reason));
        }
        Opcode::Text | Opcode::Binary | Opcode::Continuation => {
            session.record_inbound(true);
            // Data arriving after our close frame is dropped
            if session.state() != SessionState::Open {
                return Ok(None);
            }
            if let Some(message) = assembler.push(frame)? {
                observer.on_message(session, message);
            }
        }
    }
    Ok(None)
}

fn fail(session: &Session, observer: &dyn ChannelObserver, err: ProtocolError) -> CloseReason {
    warn!("Session {} protocol error: {}", session.id(), err);
    let reason = CloseReason::new(err.close_code(), err.to_string());
    session.fail(&reason);
    observer.on_error(session, &WsError::Protocol(err));
    reason
}

/// Drain the session queue into the socket
///
/// After a close frame only `Shutdown` is awaited; if it does not arrive
/// within `close_timeout` the session is cancelled.
async fn write_frames<W>(
    mut sink: FramedWrite<WriteHalf<W>, FrameCodec>,
    mut outbound: mpsc::Receiver<Outbound>,
    shutdown: CancellationToken,
    close_timeout: Duration,
    id: SessionId,
) -> Result<(), WsError>
where
    W: AsyncWrite,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                let is_close = frame.opcode == Opcode::Close;
                sink.send(frame).await?;
                if is_close {
                    if time::timeout(close_timeout, wait_for_shutdown(&mut outbound))
                        .await
                        .is_err()
                    {
                        debug!("Session {} close handshake timed out", id);
                        shutdown.cancel();
                    }
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    sink.close().await
}

async fn wait_for_shutdown(outbound: &mut mpsc::Receiver<Outbound>) {
    while let Some(item) = outbound.recv().await {
        if matches!(item, Outbound::Shutdown) {
            return;
        }
    }
}
