//! Request routing
//!
//! `RouterContainer` sits in front of an ordinary request handler. Upgrade
//! requests its router claims go to the `ServiceDispatcher`; everything
//! else, including upgrades nobody claims, falls through to the wrapped
//! container untouched.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::config::ServerConfig;
use crate::dispatcher::ServiceDispatcher;
use crate::error::{ConfigError, WsError};
use crate::http::Request;
use crate::service::Service;

/// Picks the service for a request, if any
pub trait Router: Send + Sync {
    fn route(&self, request: &Request) -> Option<Arc<dyn Service>>;
}

impl<F> Router for F
where
    F: Fn(&Request) -> Option<Arc<dyn Service>> + Send + Sync,
{
    fn route(&self, request: &Request) -> Option<Arc<dyn Service>> {
        self(request)
    }
}

/// Routes every upgrade request to one service
pub struct DirectRouter {
    service: Arc<dyn Service>,
}

impl DirectRouter {
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self { service }
    }
}

impl Router for DirectRouter {
    fn route(&self, request: &Request) -> Option<Arc<dyn Service>> {
        request.is_upgrade().then(|| Arc::clone(&self.service))
    }
}

/// Routes upgrade requests by exact path
#[derive(Default)]
pub struct PathRouter {
    routes: HashMap<String, Arc<dyn Service>>,
    fallback: Option<Arc<dyn Service>>,
}

impl PathRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, path: impl Into<String>, service: Arc<dyn Service>) -> Self {
        self.routes.insert(path.into(), service);
        self
    }

    /// Service for upgrade requests on unknown paths
    pub fn fallback(mut self, service: Arc<dyn Service>) -> Self {
        self.fallback = Some(service);
        self
    }
}

impl Router for PathRouter {
    fn route(&self, request: &Request) -> Option<Arc<dyn Service>> {
        if !request.is_upgrade() {
            return None;
        }
        self.routes
            .get(request.path())
            .or(self.fallback.as_ref())
            .cloned()
    }
}

/// Handler for requests that are not WebSocket sessions
pub trait Container<S>: Send + Sync {
    fn handle(&self, request: Request, stream: S) -> BoxFuture<'static, io::Result<()>>;
}

/// Routes WebSocket upgrades to services, everything else to `container`
pub struct RouterContainer<S> {
    dispatcher: ServiceDispatcher,
    container: Arc<dyn Container<S>>,
    router: Arc<dyn Router>,
}

impl<S> RouterContainer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Fails if `config` does not pass `ServerConfig::validate`
    pub fn new(
        container: Arc<dyn Container<S>>,
        router: Arc<dyn Router>,
        config: ServerConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            dispatcher: ServiceDispatcher::new(config)?,
            container,
            router,
        })
    }

    /// Handle one request whose head has already been read from `stream`
    pub async fn handle(&self, request: Request, stream: S) -> Result<(), WsError> {
        match self.router.route(&request) {
            Some(service) => {
                self.dispatcher.dispatch(request, stream, service).await?;
                Ok(())
            }
            None => {
                debug!("{} {} passed to container", request.method, request.target);
                self.container.handle(request, stream).await?;
                Ok(())
            }
        }
    }

    /// Start the keepalive sweep
    pub fn start(&self) {
        self.dispatcher.start();
    }

    pub fn stop(&self) {
        self.dispatcher.stop();
    }

    pub fn dispatcher(&self) -> &ServiceDispatcher {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::message::Message;
    use crate::test_support::{handshake_request, RecordedEvent, Recorder, TestClient};
    use parking_lot::Mutex;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Answers 200 and records the paths it saw
    #[derive(Default)]
    struct PlainContainer {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Container<DuplexStream> for PlainContainer {
        fn handle(&self, request: Request, mut stream: DuplexStream) -> BoxFuture<'static, io::Result<()>> {
            self.seen.lock().push(request.target.clone());
            Box::pin(async move {
                stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await?;
                stream.shutdown().await
            })
        }
    }

    fn container_with(router: Arc<dyn Router>) -> (RouterContainer<DuplexStream>, Arc<Mutex<Vec<String>>>) {
        let plain = PlainContainer::default();
        let seen = Arc::clone(&plain.seen);
        (
            RouterContainer::new(Arc::new(plain), router, ServerConfig::default()).unwrap(),
            seen,
        )
    }

    #[test]
    fn test_path_router() {
        let echo: Arc<dyn Service> = Arc::new(Recorder::default());
        let router = PathRouter::new().service("/echo", echo);

        assert!(router.route(&handshake_request("/echo")).is_some());
        assert!(router.route(&handshake_request("/echo?x=1")).is_some());
        assert!(router.route(&handshake_request("/other")).is_none());
        assert!(router.route(&Request::new("GET", "/echo")).is_none());

        let router = router.fallback(Arc::new(Recorder::default()));
        assert!(router.route(&handshake_request("/other")).is_some());
    }

    #[test]
    fn test_direct_router_ignores_plain_requests() {
        let router = DirectRouter::new(Arc::new(Recorder::default()));
        assert!(router.route(&handshake_request("/anything")).is_some());
        assert!(router.route(&Request::new("GET", "/index.html")).is_none());
    }

    #[tokio::test]
    async fn test_plain_request_goes_to_container() {
        let service = Arc::new(Recorder::default());
        let routed: Arc<dyn Service> = service.clone();
        let (container, seen) = container_with(Arc::new(DirectRouter::new(routed)));
        let (mut client, server) = duplex(4096);

        container
            .handle(Request::new("GET", "/index.html"), server)
            .await
            .unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(*seen.lock(), vec!["/index.html".to_string()]);
        assert!(service.events().is_empty());
        assert_eq!(container.dispatcher().session_count(), 0);
    }

    #[tokio::test]
    async fn test_closure_router_declines_to_container() {
        let router = |_: &Request| -> Option<Arc<dyn Service>> { None };
        let (container, seen) = container_with(Arc::new(router));
        let (_client, server) = duplex(4096);

        container.handle(handshake_request("/ws"), server).await.unwrap();
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(container.dispatcher().session_count(), 0);
    }

    #[tokio::test]
    async fn test_upgrade_goes_to_service() {
        let service = Arc::new(Recorder::default());
        let routed: Arc<dyn Service> = service.clone();
        let (container, seen) = container_with(Arc::new(PathRouter::new().service("/echo", routed)));
        let (client, server) = duplex(64 * 1024);

        container.handle(handshake_request("/echo"), server).await.unwrap();
        assert!(seen.lock().is_empty());
        assert_eq!(container.dispatcher().session_count(), 1);

        let (mut client, head) = TestClient::handshake(client).await;
        assert_eq!(head[0], "HTTP/1.1 101 Switching Protocols");
        client.send(Frame::text("routed")).await;
        service
            .wait_for(|e| matches!(e, RecordedEvent::Message(_, m) if m == &Message::text("routed")))
            .await;
    }

    #[tokio::test]
    async fn test_bad_upgrade_is_rejected_without_service() {
        let service = Arc::new(Recorder::default());
        let routed: Arc<dyn Service> = service.clone();
        let (container, seen) = container_with(Arc::new(DirectRouter::new(routed)));
        let (mut client, server) = duplex(4096);

        let request = Request::new("GET", "/ws")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .with_header("Sec-WebSocket-Version", "12");
        let result = container.handle(request, server).await;
        assert!(matches!(result, Err(WsError::Handshake(_))));

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(seen.lock().is_empty());
        assert!(service.events().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let router: Arc<dyn Router> = Arc::new(PathRouter::new());
        let config = ServerConfig {
            ping_interval_ms: 0,
            ..ServerConfig::default()
        };
        let result = RouterContainer::<DuplexStream>::new(
            Arc::new(PlainContainer::default()),
            router,
            config,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
