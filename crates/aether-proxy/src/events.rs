//! The seven interceptor event families (§4.F) as closed enums, plus the
//! `Interceptors` struct bundling one `Dispatcher` per family.
//!
//! §9 calls out that `std::shared_ptr` cycles in the original are absent
//! by construction because the connection pair exclusively owns both
//! endpoints, and recommends `Arc<Mutex<Flow>>` with handlers closing
//! over cloned handles rather than raw back-references. Context structs
//! here follow that recommendation literally: they hold `Arc<Mutex<_>>`
//! clones rather than borrows, so `aether_core::Dispatcher<Event, Ctx>`
//! can be instantiated with a plain owned `Ctx` type and no lifetime
//! parameter ever needs to thread through the callback signature.

use std::sync::{Arc, Mutex};

use aether_core::{CertificateInterface, Dispatcher, Exchange, FlowError, InterceptorId};

use crate::flow::ConnectionFlow;
use crate::websocket::{InterceptedMessage, WebSocketSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpEvent {
    Request,
    Connect,
    AnyRequest,
    WebSocketHandshake,
    Response,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelEvent {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsEvent {
    Established,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SslCertificateEvent {
    Search,
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebSocketEvent {
    Start,
    Stop,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebSocketMessageEvent {
    Received,
}

pub type FlowHandle = Arc<Mutex<ConnectionFlow>>;

/// Context handed to every `server.*` callback.
#[derive(Clone)]
pub struct ServerCtx {
    pub flow: FlowHandle,
}

/// Context handed to every `http.*` callback. `exchange` is `None` for
/// `http.connect` (fired before a request has even been parsed into an
/// exchange) and for `http.error` when the failure predates one.
#[derive(Clone)]
pub struct HttpCtx {
    pub flow: FlowHandle,
    pub exchange: Option<Arc<Mutex<Exchange>>>,
    pub error: Option<Arc<FlowError>>,
}

#[derive(Clone)]
pub struct TunnelCtx {
    pub flow: FlowHandle,
}

#[derive(Clone)]
pub struct TlsCtx {
    pub flow: FlowHandle,
    pub error: Option<Arc<FlowError>>,
}

/// Context for `ssl_certificate.{search,create}` (§4.F). `search` fires
/// on a cache hit, `create` on a cache miss that triggers minting (§4.C,
/// S3 in §8).
#[derive(Clone)]
pub struct SslCertificateCtx {
    pub flow: FlowHandle,
    pub interface: Arc<CertificateInterface>,
}

#[derive(Clone)]
pub struct WebSocketCtx {
    pub flow: FlowHandle,
    pub session: Arc<Mutex<WebSocketSession>>,
}

/// `websocket_message.received` payload: `message` may be mutated in
/// place (content rewrite) and `blocked` set to suppress forwarding
/// entirely (§4.I step 3).
#[derive(Clone)]
pub struct WebSocketMessageCtx {
    pub flow: FlowHandle,
    pub session: Arc<Mutex<WebSocketSession>>,
    pub message: Arc<Mutex<InterceptedMessage>>,
}

/// One dispatcher per event family (§4.F), bundled so `main` can attach
/// interceptor hubs in one place and the connection state machine can
/// fire events without threading seven separate dispatchers through
/// every function signature.
#[derive(Default)]
pub struct Interceptors {
    pub server: Dispatcher<ServerEvent, ServerCtx>,
    pub http: Dispatcher<HttpEvent, HttpCtx>,
    pub tunnel: Dispatcher<TunnelEvent, TunnelCtx>,
    pub tls: Dispatcher<TlsEvent, TlsCtx>,
    pub ssl_certificate: Dispatcher<SslCertificateEvent, SslCertificateCtx>,
    pub websocket: Dispatcher<WebSocketEvent, WebSocketCtx>,
    pub websocket_message: Dispatcher<WebSocketMessageEvent, WebSocketMessageCtx>,
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A stable handle set returned by `InterceptorHub::attach_all`, so a
/// whole hub can be detached in one call (§4.F "stable detach semantics",
/// §9 "interceptor hubs ... wiring registers each non-default method").
#[derive(Debug, Clone, Default)]
pub struct HubHandle {
    pub http: Vec<(HttpEvent, InterceptorId)>,
    pub server: Vec<(ServerEvent, InterceptorId)>,
    pub tunnel: Vec<(TunnelEvent, InterceptorId)>,
    pub tls: Vec<(TlsEvent, InterceptorId)>,
    pub ssl_certificate: Vec<(SslCertificateEvent, InterceptorId)>,
    pub websocket: Vec<(WebSocketEvent, InterceptorId)>,
    pub websocket_message: Vec<(WebSocketMessageEvent, InterceptorId)>,
}

impl HubHandle {
    pub fn detach_all(&self, interceptors: &mut Interceptors) {
        for (_, id) in &self.http {
            interceptors.http.detach(*id);
        }
        for (_, id) in &self.server {
            interceptors.server.detach(*id);
        }
        for (_, id) in &self.tunnel {
            interceptors.tunnel.detach(*id);
        }
        for (_, id) in &self.tls {
            interceptors.tls.detach(*id);
        }
        for (_, id) in &self.ssl_certificate {
            interceptors.ssl_certificate.detach(*id);
        }
        for (_, id) in &self.websocket {
            interceptors.websocket.detach(*id);
        }
        for (_, id) in &self.websocket_message {
            interceptors.websocket_message.detach(*id);
        }
    }
}

/// Shared, read-mostly components every connection needs a handle to:
/// the certificate store, TLS configs, and the interceptor tables.
/// `interceptors` sits behind a mutex because `Dispatcher::dispatch`
/// takes `&mut self` to call its boxed `FnMut` callbacks, and many
/// connection tasks dispatch concurrently (§5 "Shared state", §9).
pub struct ServerComponents {
    pub config: crate::config::ProxyConfig,
    pub cert_store: Arc<aether_tls::CertificateStore>,
    pub client_tls_config: Arc<rustls::ClientConfig>,
    pub server_tls_config: Arc<rustls::ServerConfig>,
    pub interceptors: Arc<Mutex<Interceptors>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::{TcpListener, TcpStream};

    async fn dummy_flow() -> FlowHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let _keep_alive = connected.unwrap();
        let (stream, _) = accepted.unwrap();
        Arc::new(Mutex::new(ConnectionFlow::with_client(
            1,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Transport::Plain(stream),
        )))
    }

    #[tokio::test]
    async fn http_dispatcher_fires_attached_callbacks() {
        let mut interceptors = Interceptors::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        interceptors.http.attach(HttpEvent::AnyRequest, move |ctx: &mut HttpCtx| {
            seen_clone.lock().unwrap().push(ctx.flow.lock().unwrap().id);
        });

        let mut ctx = HttpCtx {
            flow: dummy_flow().await,
            exchange: None,
            error: None,
        };
        interceptors.http.dispatch(HttpEvent::AnyRequest, &mut ctx);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
