//! Connection state machine, transport, interceptor hubs, WebSocket
//! relay, and I/O runtime for the aether proxy (§4.A, §4.E–§4.J).
//!
//! This crate is the orchestrator: it depends on `aether-tls`,
//! `aether-http`, and `aether-ws` and wires their leaf components into
//! one end-to-end connection lifecycle. Nothing above this crate (only
//! the `aether` binary) should need to reach into `aether-core` or the
//! leaf crates directly for anything but constructing a `ProxyConfig`
//! and attaching interceptor hubs.

pub mod config;
pub mod connection;
pub mod events;
pub mod hub;
pub mod runtime;
pub mod transport;
pub mod websocket;

mod flow;

pub use config::{ProxyConfig, SslPassthrough, WebSocketPassthrough};
pub use events::{
    HttpCtx, HttpEvent, HubHandle, Interceptors, ServerComponents, ServerCtx, ServerEvent, SslCertificateCtx,
    SslCertificateEvent, TlsCtx, TlsEvent, TunnelCtx, TunnelEvent, WebSocketCtx, WebSocketEvent, WebSocketMessageCtx,
    WebSocketMessageEvent,
};
pub use flow::{ConnectionFlow, ConnectionId};
pub use hub::{DisableH2c, HttpLogger, InterceptorHub};
pub use runtime::Runtime;
pub use transport::{tls_acceptor, tls_connector, Transport};
