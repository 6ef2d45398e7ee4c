//! `ConnectionFlow` (§3): the per-connection aggregate threaded through
//! the state machine and every interceptor callback. Grounded on
//! `connection_flow.hpp` in the original implementation — same fields
//! (id, target host/port, `intercept_tls`/`intercept_websocket` flags,
//! error state), same invariant that the client side always exists while
//! the server side is optional until a successful connect.

use std::net::IpAddr;

use aether_core::FlowError;

use crate::transport::Transport;

/// Monotonic connection id, assigned by the acceptor (§3).
pub type ConnectionId = u64;

/// The per-connection aggregate (§3). `server` is `None` until
/// `set_server`+a successful connect (§3 invariant: "the server
/// connection is optional until it is set").
pub struct ConnectionFlow {
    pub id: ConnectionId,
    pub client_addr: IpAddr,
    /// `None` only while a phase of the state machine (currently:
    /// the WebSocket relay, §4.I) has checked the socket out via
    /// `take_transports` for exclusive, lock-free use.
    pub client: Option<Transport>,
    pub server: Option<Transport>,
    pub target_host: String,
    pub target_port: u16,
    pub intercept_tls: bool,
    pub intercept_websocket: bool,
    pub error: Option<FlowError>,
}

impl ConnectionFlow {
    pub fn with_client(id: ConnectionId, client_addr: IpAddr, client: Transport) -> Self {
        Self {
            id,
            client_addr,
            client: Some(client),
            server: None,
            target_host: String::new(),
            target_port: 0,
            intercept_tls: false,
            intercept_websocket: false,
            error: None,
        }
    }

    /// Sets the upstream target. Any existing server connection is
    /// dropped (§4.A "Sets the server to connect to later. Any existing
    /// server connection is closed.").
    pub fn set_server_target(&mut self, host: String, port: u16) {
        self.target_host = host;
        self.target_port = port;
        self.server = None;
    }

    pub fn server_connected(&self) -> bool {
        self.server.is_some()
    }

    pub fn should_intercept_tls(&self) -> bool {
        self.intercept_tls
    }

    pub fn should_intercept_websocket(&self) -> bool {
        self.intercept_websocket
    }

    /// Checks both sockets out for exclusive, lock-free ownership by a
    /// relay phase (§4.I: the WebSocket loop reads both directions
    /// concurrently and cannot do that through a shared mutex without
    /// risking deadlock against interceptors that lock the flow for
    /// metadata). Returns `None` if either side isn't connected.
    pub fn take_transports(&mut self) -> Option<(Transport, Transport)> {
        let client = self.client.take()?;
        match self.server.take() {
            Some(server) => Some((client, server)),
            None => {
                self.client = Some(client);
                None
            }
        }
    }

    /// Returns sockets checked out by `take_transports` once a relay
    /// phase is done with them, so later phases (or final shutdown) can
    /// still reach them through the flow.
    pub fn put_transports(&mut self, client: Transport, server: Transport) {
        self.client = Some(client);
        self.server = Some(server);
    }
}
