//! Built-in services and the plain HTTP fallback
//!
//! - `EchoService`: sends every message back unchanged
//! - `ChatService`: broadcast chat room speaking tagged JSON
//! - `TextContainer`: answers non-WebSocket requests with a fixed text body

use std::collections::HashMap;
use std::io;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::frame::CloseReason;
use crate::http::Request;
use crate::message::Message;
use crate::router::Container;
use crate::service::Service;
use crate::session::Session;
use crate::types::SessionId;

/// Echoes every message back to its sender
#[derive(Debug, Default)]
pub struct EchoService;

impl Service for EchoService {
    fn on_open(&self, session: &Session) {
        debug!("Echo session {} opened", session.id());
    }

    fn on_frame(&self, session: &Session, message: Message) {
        if let Err(e) = session.send(message) {
            debug!("Echo to {} dropped: {}", session.id(), e);
        }
    }

    fn on_close(&self, session: &Session, reason: &CloseReason) {
        debug!(
            "Echo session {} closed ({})",
            session.id(),
            u16::from(reason.code)
        );
    }
}

/// Client → server chat message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatRequest {
    /// Change the display name
    SetName { name: String },
    /// Say something to the room
    Chat { content: String },
}

/// Server → client chat message
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Welcome { session_id: String, name: String },
    Joined { name: String },
    Renamed { from: String, to: String },
    Chat { from: String, content: String },
    Left { name: String },
    Error { message: String },
}

struct Member {
    session: Session,
    name: String,
}

/// One shared room; every member sees every message
#[derive(Default)]
pub struct ChatService {
    members: Mutex<HashMap<SessionId, Member>>,
}

impl ChatService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().len()
    }

    fn send_to(session: &Session, event: &ChatEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if let Err(e) = session.send_text(json) {
                    debug!("Chat event to {} dropped: {}", session.id(), e);
                }
            }
            Err(e) => warn!("Failed to serialize chat event: {}", e),
        }
    }

    fn broadcast(&self, event: &ChatEvent) {
        let sessions: Vec<Session> = self
            .members
            .lock()
            .values()
            .map(|member| member.session.clone())
            .collect();
        for session in &sessions {
            Self::send_to(session, event);
        }
    }

    fn name_of(&self, id: SessionId) -> Option<String> {
        self.members.lock().get(&id).map(|member| member.name.clone())
    }
}

impl Service for ChatService {
    fn on_open(&self, session: &Session) {
        let id = session.id().to_string();
        let name = format!("guest-{}", &id[..8]);
        self.members.lock().insert(
            session.id(),
            Member {
                session: session.clone(),
                name: name.clone(),
            },
        );
        info!("{} joined the chat", name);
        Self::send_to(
            session,
            &ChatEvent::Welcome {
                session_id: id,
                name: name.clone(),
            },
        );
        self.broadcast(&ChatEvent::Joined { name });
    }

    fn on_frame(&self, session: &Session, message: Message) {
        let Message::Text(text) = message else {
            Self::send_to(
                session,
                &ChatEvent::Error {
                    message: "binary messages are not supported".into(),
                },
            );
            return;
        };
        let Some(from) = self.name_of(session.id()) else {
            return;
        };

        match serde_json::from_str::<ChatRequest>(&text) {
            Ok(ChatRequest::Chat { content }) => {
                self.broadcast(&ChatEvent::Chat { from, content });
            }
            Ok(ChatRequest::SetName { name }) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    Self::send_to(
                        session,
                        &ChatEvent::Error {
                            message: "name must not be empty".into(),
                        },
                    );
                    return;
                }
                if let Some(member) = self.members.lock().get_mut(&session.id()) {
                    member.name = name.clone();
                }
                self.broadcast(&ChatEvent::Renamed { from, to: name });
            }
            Err(e) => {
                warn!("Invalid chat message from {}: {}", session.id(), e);
                Self::send_to(
                    session,
                    &ChatEvent::Error {
                        message: format!("invalid message: {}", e),
                    },
                );
            }
        }
    }

    fn on_close(&self, session: &Session, _reason: &CloseReason) {
        let removed = self.members.lock().remove(&session.id());
        if let Some(member) = removed {
            info!("{} left the chat", member.name);
            self.broadcast(&ChatEvent::Left { name: member.name });
        }
    }
}

/// Answers every request with `200 OK` and a text body
#[derive(Debug, Clone)]
pub struct TextContainer {
    body: String,
}

impl TextContainer {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

impl<S> Container<S> for TextContainer
where
    S: AsyncWrite + Unpin + Send + 'static,
{
    fn handle(&self, request: Request, mut stream: S) -> BoxFuture<'static, io::Result<()>> {
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Connection: close\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            self.body.len(),
            self.body
        );
        debug!("Serving {} {}", request.method, request.target);
        Box::pin(async move {
            stream.write_all(response.as_bytes()).await?;
            stream.shutdown().await
        })
    }
}
