//! Helpers shared by the unit tests

use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::FramedRead;

use crate::channel::ChannelObserver;
use crate::error::WsError;
use crate::frame::{encode_frame, CloseReason, Frame, FrameCodec};
use crate::http::Request;
use crate::message::Message;
use crate::service::Service;
use crate::session::Session;
use crate::types::SessionId;

const WAIT: Duration = Duration::from_secs(2);

pub(crate) fn handshake_request(path: &str) -> Request {
    Request::new("GET", path)
        .with_header("Host", "localhost")
        .with_header("Upgrade", "websocket")
        .with_header("Connection", "Upgrade")
        .with_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
        .with_header("Sec-WebSocket-Version", "13")
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RecordedEvent {
    Open(SessionId),
    Message(SessionId, Message),
    Error(SessionId, String),
    Close(SessionId, CloseReason),
}

/// Records every callback, usable as a service or a channel observer
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl Recorder {
    fn record(&self, event: RecordedEvent) {
        self.events.lock().push(event);
    }

    pub(crate) fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn closes(&self) -> Vec<CloseReason> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RecordedEvent::Close(_, reason) => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn close_count(&self, id: SessionId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RecordedEvent::Close(closed, _) if *closed == id))
            .count()
    }

    /// Wait for the first event matching `pred`
    pub(crate) async fn wait_for(&self, pred: impl Fn(&RecordedEvent) -> bool) -> RecordedEvent {
        let poll = async {
            loop {
                if let Some(event) = self.events.lock().iter().find(|e| pred(e)) {
                    return event.clone();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(WAIT, poll)
            .await
            .expect("timed out waiting for event")
    }
}

impl ChannelObserver for Recorder {
    fn on_message(&self, session: &Session, message: Message) {
        self.record(RecordedEvent::Message(session.id(), message));
    }

    fn on_error(&self, session: &Session, error: &WsError) {
        self.record(RecordedEvent::Error(session.id(), error.to_string()));
    }

    fn on_close(&self, session: &Session, reason: &CloseReason) {
        self.record(RecordedEvent::Close(session.id(), reason.clone()));
    }
}

impl Service for Recorder {
    fn on_open(&self, session: &Session) {
        self.record(RecordedEvent::Open(session.id()));
    }

    fn on_frame(&self, session: &Session, message: Message) {
        self.record(RecordedEvent::Message(session.id(), message));
    }

    fn on_error(&self, session: &Session, error: &WsError) {
        self.record(RecordedEvent::Error(session.id(), error.to_string()));
    }

    fn on_close(&self, session: &Session, reason: &CloseReason) {
        self.record(RecordedEvent::Close(session.id(), reason.clone()));
    }
}

/// Client end of an in-memory connection
pub(crate) struct TestClient {
    frames: FramedRead<BufReader<ReadHalf<DuplexStream>>, FrameCodec>,
    writer: WriteHalf<DuplexStream>,
}

impl TestClient {
    /// Wrap a stream that is already past the handshake
    pub(crate) fn upgraded(stream: DuplexStream) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            frames: FramedRead::new(BufReader::new(read_half), FrameCodec::client(usize::MAX)),
            writer,
        }
    }

    /// Read the HTTP response head, returning its lines
    pub(crate) async fn handshake(stream: DuplexStream) -> (Self, Vec<String>) {
        let (read_half, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut head = Vec::new();
        loop {
            let mut line = String::new();
            let n = tokio::time::timeout(WAIT, reader.read_line(&mut line))
                .await
                .expect("timed out reading response head")
                .unwrap();
            let line = line.trim_end().to_string();
            if n == 0 || line.is_empty() {
                break;
            }
            head.push(line);
        }
        let client = Self {
            frames: FramedRead::new(reader, FrameCodec::client(usize::MAX)),
            writer,
        };
        (client, head)
    }

    pub(crate) async fn send(&mut self, frame: Frame) {
        let key: [u8; 4] = rand::thread_rng().gen();
        self.write_frame(&frame.masked(key)).await;
    }

    pub(crate) async fn send_unmasked(&mut self, frame: Frame) {
        self.write_frame(&frame).await;
    }

    async fn write_frame(&mut self, frame: &Frame) {
        let mut buf = BytesMut::new();
        encode_frame(frame, &mut buf).unwrap();
        self.send_raw(&buf).await;
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Next server frame, or `None` once the server closed the stream
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(WAIT, self.frames.next())
            .await
            .expect("timed out waiting for frame")
            .map(|frame| frame.unwrap())
    }
}
