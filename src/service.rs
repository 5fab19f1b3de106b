//! Application callbacks

use tracing::debug;

use crate::error::WsError;
use crate::frame::CloseReason;
use crate::message::Message;
use crate::session::Session;

/// Application logic bound to a route
///
/// One service instance is shared by every session routed to it, and its
/// callbacks run concurrently on the worker pool. `on_close` is called once
/// per session, whatever ended it.
pub trait Service: Send + Sync + 'static {
    fn on_open(&self, session: &Session);

    /// A complete message arrived
    fn on_frame(&self, session: &Session, message: Message);

    fn on_error(&self, session: &Session, error: &WsError) {
        debug!("Session {} error: {}", session.id(), error);
    }

    fn on_close(&self, session: &Session, reason: &CloseReason);
}
