//! Session registry and keepalive sweep
//!
//! The dispatcher owns every open session. Each accepted upgrade is built,
//! registered and announced to its service before the channel starts
//! reading. A session leaves the registry when its channel ends or when a
//! sweep expires it, whichever comes first. The service's `on_close` always
//! comes from the channel task, after its last `on_frame` or `on_error`.
//!
//! # Sweep
//! Every `ping_interval` the sweeper visits each open session:
//! - `missed_pings >= ping_failure_threshold` or idle longer than `expiry`:
//!   removed and force-closed; the channel reports 1001 to the service
//! - otherwise: pinged, `missed_pings` incremented

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::builder::SessionBuilder;
use crate::channel::ChannelObserver;
use crate::config::ServerConfig;
use crate::error::{ConfigError, WsError};
use crate::frame::CloseReason;
use crate::http::Request;
use crate::message::Message;
use crate::service::Service;
use crate::session::Session;
use crate::types::{SessionId, SessionState};

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: Vec<SessionId>,
    pub expired: Vec<SessionId>,
}

#[derive(Clone)]
struct Entry {
    session: Session,
    service: Arc<dyn Service>,
}

struct Shared {
    config: ServerConfig,
    registry: Mutex<HashMap<SessionId, Entry>>,
    /// Serializes sweeps
    sweep_pass: Mutex<()>,
    sweeps: AtomicU64,
}

/// Owns open sessions and runs the keepalive sweep
pub struct ServiceDispatcher {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<CancellationToken>>,
}

impl ServiceDispatcher {
    /// Fails if `config` does not pass `ServerConfig::validate`
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                registry: Mutex::new(HashMap::new()),
                sweep_pass: Mutex::new(()),
                sweeps: AtomicU64::new(0),
            }),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Upgrade `stream`, register the session and start its channel
    ///
    /// `service.on_open` has returned before the first inbound frame is read.
    pub async fn dispatch<S>(
        &self,
        request: Request,
        stream: S,
        service: Arc<dyn Service>,
    ) -> Result<Session, WsError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (session, channel) = SessionBuilder::new(&self.shared.config)
            .create(&request, stream)
            .await?;

        self.shared.registry.lock().insert(
            session.id(),
            Entry {
                session: session.clone(),
                service: Arc::clone(&service),
            },
        );
        info!("Session {} opened on {}", session.id(), session.path());
        service.on_open(&session);

        let route: Arc<dyn ChannelObserver> = Arc::new(Route {
            shared: Arc::clone(&self.shared),
            service,
        });
        tokio::spawn(channel.run(route));
        Ok(session)
    }

    pub fn session_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.shared
            .registry
            .lock()
            .get(&id)
            .map(|entry| entry.session.clone())
    }

    /// Run one sweep now
    pub fn sweep(&self) -> SweepReport {
        self.shared.sweep()
    }

    /// Start the periodic sweep; a second call is a no-op
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let period = shared.config.ping_interval();
        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = shared.sweep();
                        debug!(
                            "Sweep pinged {} sessions, expired {}",
                            report.pinged.len(),
                            report.expired.len()
                        );
                    }
                    () = token.cancelled() => break,
                }
            }
            debug!("Sweeper stopped");
        });

        *sweeper = Some(cancel);
        info!("Sweeper started (every {:?})", period);
    }

    /// Stop the periodic sweep
    ///
    /// Open sessions are left alone; in-flight callbacks finish normally.
    pub fn stop(&self) {
        if let Some(cancel) = self.sweeper.lock().take() {
            cancel.cancel();
            info!("Sweeper stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl Drop for ServiceDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    /// Remove `id`; false if a sweep already took it out
    fn deregister(&self, id: SessionId) -> bool {
        let removed = self.registry.lock().remove(&id).is_some();
        if removed {
            debug!("Session {} deregistered", id);
        }
        removed
    }

    fn sweep(&self) -> SweepReport {
        let _pass = self.sweep_pass.lock();
        let sequence = self.sweeps.fetch_add(1, Ordering::Relaxed) + 1;
        let payload = Bytes::copy_from_slice(&sequence.to_be_bytes());
        let threshold = self.config.ping_failure_threshold;
        let expiry = self.config.expiry();

        let ids: Vec<SessionId> = self.registry.lock().keys().copied().collect();
        let mut report = SweepReport::default();

        for id in ids {
            let expired = {
                let mut registry = self.registry.lock();
                let Some(entry) = registry.get(&id) else {
                    continue;
                };
                if entry.session.state() != SessionState::Open {
                    continue;
                }
                let missed = entry.session.missed_pings();
                if missed >= threshold || entry.session.idle_time() > expiry {
                    debug!(
                        "Session {} expiring (missed {} pings, idle {:?})",
                        id,
                        missed,
                        entry.session.idle_time()
                    );
                    registry.remove(&id)
                } else {
                    if entry.session.send_keepalive(payload.clone()) {
                        report.pinged.push(id);
                    }
                    None
                }
            };

            if let Some(entry) = expired {
                info!("Session {} expired", id);
                entry.session.force_close(CloseReason::expired());
                report.expired.push(id);
            }
        }
        report
    }
}

/// Connects one channel to its service and the registry
struct Route {
    shared: Arc<Shared>,
    service: Arc<dyn Service>,
}

impl ChannelObserver for Route {
    fn on_message(&self, session: &Session, message: Message) {
        self.service.on_frame(session, message);
    }

    fn on_error(&self, session: &Session, error: &WsError) {
        self.service.on_error(session, error);
    }

    /// The channel reports each session's close exactly once
    fn on_close(&self, session: &Session, reason: &CloseReason) {
        self.shared.deregister(session.id());
        self.service.on_close(session, reason);
    }
}
