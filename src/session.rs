//! Session handle
//!
//! A `Session` is the application's view of one upgraded connection. It is
//! cheap to clone; every clone talks to the same writer queue. The registry
//! in `ServiceDispatcher` decides the session's lifetime, services only
//! borrow it.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SendError;
use crate::frame::{CloseCode, CloseReason, Frame, MAX_CONTROL_PAYLOAD};
use crate::message::Message;
use crate::types::{SessionId, SessionState};

/// Work item for a connection's writer task
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame),
    /// Flush what is queued, then shut the write half down
    Shutdown,
}

/// Queue slots reserved for the close frame and the shutdown marker
const CLOSE_HEADROOM: usize = 2;

/// Bounded writer queue holding up to `max_queued_frames` outbound frames
pub(crate) fn outbound_queue(
    max_queued_frames: usize,
) -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
    mpsc::channel(max_queued_frames + CLOSE_HEADROOM)
}

/// State and queue guarded together so a state check and the enqueue that
/// depends on it cannot be split by another sender.
struct Link {
    state: SessionState,
    queue: mpsc::Sender<Outbound>,
    shutdown_queued: bool,
}

impl Link {
    /// Queue `frames` as a unit or not at all
    ///
    /// Every push happens under the session lock, so free capacity can only
    /// grow between the check and the sends.
    fn push(&self, frames: Vec<Frame>) -> Result<(), SendError> {
        if self.queue.is_closed() {
            return Err(SendError::SessionClosed);
        }
        if self.queue.capacity() < frames.len() + CLOSE_HEADROOM {
            return Err(SendError::QueueFull);
        }
        for frame in frames {
            self.queue
                .try_send(Outbound::Frame(frame))
                .map_err(|_| SendError::SessionClosed)?;
        }
        Ok(())
    }

    /// Close frames go into the reserved headroom
    fn push_close(&self, reason: &CloseReason) {
        let _ = self.queue.try_send(Outbound::Frame(Frame::close(reason)));
    }

    fn shutdown(&mut self) {
        if !self.shutdown_queued {
            self.shutdown_queued = true;
            let _ = self.queue.try_send(Outbound::Shutdown);
        }
    }
}

struct SessionInner {
    id: SessionId,
    path: String,
    link: Mutex<Link>,
    /// Last inbound data frame
    last_activity: Mutex<Instant>,
    /// Pings sent since the last inbound frame
    missed_pings: AtomicU32,
    /// Reason recorded by a forced close, reported instead of 1006
    close_reason: Mutex<Option<CloseReason>>,
    shutdown: CancellationToken,
    max_frame_size: usize,
}

/// Handle to one WebSocket session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        path: &str,
        queue: mpsc::Sender<Outbound>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                path: path.to_string(),
                link: Mutex::new(Link {
                    state: SessionState::HandshakeDone,
                    queue,
                    shutdown_queued: false,
                }),
                last_activity: Mutex::new(Instant::now()),
                missed_pings: AtomicU32::new(0),
                close_reason: Mutex::new(None),
                shutdown: CancellationToken::new(),
                max_frame_size,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Path of the request that opened the session
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn state(&self) -> SessionState {
        self.inner.link.lock().state
    }

    /// Time since the last inbound data frame
    pub fn idle_time(&self) -> Duration {
        self.inner.last_activity.lock().elapsed()
    }

    /// Pings sent without any inbound frame since
    pub fn missed_pings(&self) -> u32 {
        self.inner.missed_pings.load(Ordering::Acquire)
    }

    /// Queue a message, fragmenting it if it exceeds the frame limit
    ///
    /// All frames of one message are queued before any other send can
    /// queue its own. Fails with `SendError::QueueFull` when the writer is
    /// too far behind to take the whole message.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        let frames = message.into_frames(self.inner.max_frame_size);
        let link = self.inner.link.lock();
        if !link.state.is_writable() {
            return Err(SendError::SessionClosed);
        }
        link.push(frames)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(Message::Binary(data.into()))
    }

    /// Send an empty ping
    pub fn ping(&self) -> Result<(), SendError> {
        self.send_control(Frame::ping(Bytes::new()))
    }

    fn send_control(&self, frame: Frame) -> Result<(), SendError> {
        if frame.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(SendError::ControlTooLarge(frame.payload.len()));
        }
        let link = self.inner.link.lock();
        if !link.state.is_writable() {
            return Err(SendError::SessionClosed);
        }
        link.push(vec![frame])
    }

    /// Start the closing handshake
    ///
    /// Later sends fail with `SendError::SessionClosed`. Closing an already
    /// closing or closed session does nothing.
    pub fn close(&self, code: CloseCode, reason: &str) {
        let reason = CloseReason::new(code, reason);
        let mut link = self.inner.link.lock();
        if !link.state.is_writable() {
            return;
        }
        link.state = SessionState::Closing;
        debug!("Session {} closing ({})", self.inner.id, u16::from(reason.code));
        link.push_close(&reason);
    }

    pub(crate) fn open(&self) {
        let mut link = self.inner.link.lock();
        if link.state == SessionState::HandshakeDone {
            link.state = SessionState::Open;
        }
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Any inbound frame clears the ping counter; only data frames count as activity
    pub(crate) fn record_inbound(&self, data: bool) {
        self.inner.missed_pings.store(0, Ordering::Release);
        if data {
            *self.inner.last_activity.lock() = Instant::now();
        }
    }

    /// Queue a keepalive ping and count it; false if the session is not open
    /// or its queue is full
    pub(crate) fn send_keepalive(&self, payload: Bytes) -> bool {
        let link = self.inner.link.lock();
        if link.state != SessionState::Open || link.push(vec![Frame::ping(payload)]).is_err() {
            return false;
        }
        self.inner.missed_pings.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub(crate) fn enqueue_pong(&self, payload: Bytes) {
        let link = self.inner.link.lock();
        if link.state.is_writable() {
            let _ = link.push(vec![Frame::pong(payload)]);
        }
    }

    /// Peer sent a close frame: echo it unless we sent ours first
    pub(crate) fn acknowledge_close(&self, reason: &CloseReason) {
        let mut link = self.inner.link.lock();
        match link.state {
            SessionState::HandshakeDone | SessionState::Open => {
                link.state = SessionState::Closing;
                link.push_close(&CloseReason::new(reason.code, ""));
                link.shutdown();
            }
            SessionState::Closing => link.shutdown(),
            SessionState::Closed => {}
        }
    }

    /// Protocol failure: best-effort close frame, then shut down
    pub(crate) fn fail(&self, reason: &CloseReason) {
        let mut link = self.inner.link.lock();
        if link.state.is_writable() {
            link.push_close(reason);
        }
        if link.state != SessionState::Closed {
            link.state = SessionState::Closing;
            link.shutdown();
        }
    }

    /// Tear the session down without waiting for the peer
    pub(crate) fn force_close(&self, reason: CloseReason) {
        {
            let mut link = self.inner.link.lock();
            if link.state == SessionState::Closed {
                return;
            }
            if link.state.is_writable() {
                link.push_close(&reason);
            }
            link.state = SessionState::Closing;
            link.shutdown();
        }
        self.inner.close_reason.lock().get_or_insert(reason);
        self.inner.shutdown.cancel();
    }

    pub(crate) fn mark_closed(&self) {
        let mut link = self.inner.link.lock();
        link.state = SessionState::Closed;
        link.shutdown();
    }

    pub(crate) fn take_close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.lock().take()
    }

    #[cfg(test)]
    pub(crate) fn set_missed_pings(&self, count: u32) {
        self.inner.missed_pings.store(count, Ordering::Release);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("path", &self.inner.path)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Opcode;

    fn detached(max_frame_size: usize) -> (Session, mpsc::Receiver<Outbound>) {
        detached_with_queue(max_frame_size, 64)
    }

    fn detached_with_queue(
        max_frame_size: usize,
        max_queued_frames: usize,
    ) -> (Session, mpsc::Receiver<Outbound>) {
        let (tx, rx) = outbound_queue(max_queued_frames);
        let session = Session::new(SessionId::new(), "/test", tx, max_frame_size);
        session.open();
        (session, rx)
    }

    fn frames(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Frame(frame) = item {
                out.push(frame);
            }
        }
        out
    }

    #[test]
    fn test_send_after_close_fails() {
        let (session, mut rx) = detached(1024);
        session.send_text("hello").unwrap();
        session.close(CloseCode::Normal, "bye");

        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(session.send_text("late"), Err(SendError::SessionClosed));
        assert_eq!(session.ping(), Err(SendError::SessionClosed));

        let sent = frames(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].opcode, Opcode::Close);
    }

    #[test]
    fn test_close_twice_sends_one_close_frame() {
        let (session, mut rx) = detached(1024);
        session.close(CloseCode::Normal, "");
        session.close(CloseCode::GoingAway, "");
        assert_eq!(frames(&mut rx).len(), 1);
    }

    #[test]
    fn test_keepalive_counts_and_inbound_resets() {
        let (session, mut rx) = detached(1024);
        assert!(session.send_keepalive(Bytes::from_static(b"1")));
        assert!(session.send_keepalive(Bytes::from_static(b"2")));
        assert_eq!(session.missed_pings(), 2);
        assert_eq!(frames(&mut rx).len(), 2);

        let idle_before = session.idle_time();
        session.record_inbound(false);
        assert_eq!(session.missed_pings(), 0);
        assert!(session.idle_time() >= idle_before);
    }

    #[test]
    fn test_keepalive_skips_closing_session() {
        let (session, _rx) = detached(1024);
        session.close(CloseCode::Normal, "");
        assert!(!session.send_keepalive(Bytes::new()));
        assert_eq!(session.missed_pings(), 0);
    }

    #[test]
    fn test_large_message_is_fragmented() {
        let (session, mut rx) = detached(4);
        session.send_binary(vec![0u8; 10]).unwrap();
        let sent = frames(&mut rx);
        assert_eq!(sent.len(), 3);
        assert!(sent[2].fin);
    }

    #[test]
    fn test_force_close_records_reason_and_cancels() {
        let (session, mut rx) = detached(1024);
        let token = session.shutdown_token();
        session.force_close(CloseReason::expired());

        assert!(token.is_cancelled());
        assert_eq!(session.take_close_reason(), Some(CloseReason::expired()));
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        assert!(matches!(&items[0], Outbound::Frame(f) if f.opcode == Opcode::Close));
        assert!(matches!(items[1], Outbound::Shutdown));
    }

    #[test]
    fn test_ping_payload_limit() {
        let (session, _rx) = detached(1024);
        assert_eq!(
            session.send_control(Frame::ping(vec![0u8; 126])),
            Err(SendError::ControlTooLarge(126))
        );
    }

    #[test]
    fn test_full_queue_rejects_sends_but_still_closes() {
        let (session, mut rx) = detached_with_queue(4, 3);
        session.send_text("abc").unwrap();
        session.send_text("def").unwrap();
        // two frames do not fit in the one remaining slot
        assert_eq!(session.send_text("ghijk"), Err(SendError::QueueFull));
        session.send_text("ghi").unwrap();
        assert_eq!(session.send_text("x"), Err(SendError::QueueFull));
        assert_eq!(session.ping(), Err(SendError::QueueFull));
        assert!(!session.send_keepalive(Bytes::new()));
        assert_eq!(session.missed_pings(), 0);

        session.force_close(CloseReason::expired());
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        assert_eq!(items.len(), 5);
        assert!(matches!(&items[3], Outbound::Frame(f) if f.opcode == Opcode::Close));
        assert!(matches!(items[4], Outbound::Shutdown));
    }

    #[test]
    fn test_shutdown_queued_once() {
        let (session, mut rx) = detached(1024);
        session.acknowledge_close(&CloseReason::normal());
        session.mark_closed();
        let shutdowns = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|item| matches!(item, Outbound::Shutdown))
            .count();
        assert_eq!(shutdowns, 1);
    }
}
