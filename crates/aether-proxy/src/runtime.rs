//! The I/O runtime (§4.J): binds the listening socket, accepts
//! connections, and hands each one to [`connection::handle_connection`]
//! on a shared multi-threaded `tokio` runtime. Grounded on `server.cpp`
//! and `signal_handler.cpp` in the newer `src/aether/**` tree of the
//! original implementation (§9 "treat the newer versions ... as
//! authoritative") — that acceptor owns a fixed pool of
//! `boost::asio::io_context` threads and a signal set shared across
//! them; here `tokio`'s own work-stealing scheduler plays the role of
//! the thread pool (§4.J "fixed-size pool of single-threaded event
//! loops"; a `tokio` task never runs on two threads *at once*, which is
//! the invariant §5 actually needs — per-connection ordering, not
//! literal thread pinning).
//!
//! Shutdown is signal-driven: `SIGINT`/`SIGTERM`/`SIGQUIT` cancel a
//! shared [`CancellationToken`], which both stops the acceptor and ends
//! every in-flight connection task at its next await point. `pause`/
//! `unpause` let an embedder (the out-of-scope interactive shell, §4.J)
//! suspend that reaction temporarily without tearing down the listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use aether_core::error::StartupError;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::handle_connection;
use crate::events::ServerComponents;

/// Owns the listening socket and the shutdown signal for one proxy
/// instance. `components` is shared read-only (beyond its own internal
/// mutexes) across every accepted connection (§5 "Shared state").
pub struct Runtime {
    components: Arc<ServerComponents>,
    shutdown: CancellationToken,
    signals_paused: Arc<AtomicBool>,
    next_connection_id: AtomicU64,
}

impl Runtime {
    pub fn new(components: Arc<ServerComponents>) -> Self {
        Self {
            components,
            shutdown: CancellationToken::new(),
            signals_paused: Arc::new(AtomicBool::new(false)),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Builds the `tokio` multi-threaded runtime with `thread_pool_size`
    /// worker threads (§4.J default `2 * hardware_concurrency`) and runs
    /// [`Runtime::serve`] to completion on it. Kept separate from `serve`
    /// so the `aether` binary can use `#[tokio::main]` directly in tests
    /// while production `main` builds the pool size from config.
    pub fn run_blocking(self, addr: SocketAddr) -> Result<(), StartupError> {
        let rt = Builder::new_multi_thread()
            .worker_threads(self.components.config.thread_pool_size.max(1))
            .thread_name("aether-io")
            .enable_all()
            .build()
            .map_err(|e| StartupError::AcceptorError(format!("building tokio runtime: {e}")))?;
        rt.block_on(self.serve(addr))
    }

    /// Binds the listening socket and accepts connections until the
    /// shutdown token fires. Each accepted connection is spawned as an
    /// independent task and raced against shutdown so an in-flight
    /// connection is cancelled rather than leaked when the process is
    /// asked to stop (§4.J "cancels all outstanding I/O on all
    /// connections").
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), StartupError> {
        let listener = bind_listener(addr, self.components.config.ipv6, self.components.config.connection_queue_limit)?;
        info!(target: "aether::runtime", %addr, "accepting connections");

        self.spawn_signal_task();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(target: "aether::runtime", "shutdown requested, stopping acceptor");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => warn!(target: "aether::runtime", error = %e, "accept failed"),
                    }
                }
            }
        }
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let components = self.components.clone();
        let shutdown = self.shutdown.clone();
        stream.set_nodelay(true).ok();
        tokio::spawn(async move {
            tokio::select! {
                _ = handle_connection(id, stream, peer.ip(), components) => {}
                _ = shutdown.cancelled() => {
                    debug_shutdown(id);
                }
            }
        });
    }

    /// Installs `SIGINT`/`SIGTERM`/`SIGQUIT` handlers (where available)
    /// that cancel the shared shutdown token, unless signal handling has
    /// been [`Runtime::pause_signals`]d (§4.J "pause/unpause API allows
    /// the interactive shell to temporarily detach signal handling").
    fn spawn_signal_task(&self) {
        let shutdown = self.shutdown.clone();
        let paused = self.signals_paused.clone();
        tokio::spawn(async move {
            loop {
                wait_for_shutdown_signal().await;
                if paused.load(Ordering::SeqCst) {
                    continue;
                }
                info!(target: "aether::runtime", "received shutdown signal");
                shutdown.cancel();
                return;
            }
        });
    }

    /// Detaches signal handling so an embedder (the out-of-scope
    /// interactive REPL) can take over `Ctrl-C` temporarily (§4.J).
    pub fn pause_signals(&self) {
        self.signals_paused.store(true, Ordering::SeqCst);
    }

    pub fn unpause_signals(&self) {
        self.signals_paused.store(false, Ordering::SeqCst);
    }

    /// The shared cancellation token, so an embedder can trigger shutdown
    /// programmatically (e.g. a REPL `quit` command) without going
    /// through a process signal at all.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

fn debug_shutdown(id: u64) {
    tracing::debug!(connection_id = id, "connection cancelled by shutdown");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("installing SIGQUIT handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
        _ = sigquit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    // SIGQUIT has no Windows equivalent (§6 "SIGQUIT where available").
    let _ = tokio::signal::ctrl_c().await;
}

/// Binds the proxy's listening socket via `socket2` rather than
/// `TcpListener::bind` directly, so the accept backlog can be set from
/// `--connection-limit` (§6 "Accept backlog = connection_queue_limit")
/// and IPv6 dual-stack (§6 `--ipv6`) can be requested explicitly rather
/// than relying on the OS default.
fn bind_listener(addr: SocketAddr, ipv6: bool, backlog: u32) -> Result<TcpListener, StartupError> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| StartupError::AcceptorError(format!("creating socket: {e}")))?;

    if addr.is_ipv6() {
        socket.set_only_v6(!ipv6).map_err(|e| StartupError::Ipv6Unavailable(e.to_string()))?;
    }
    socket.set_reuse_address(true).ok();
    socket
        .bind(&addr.into())
        .map_err(|e| StartupError::AcceptorError(format!("binding {addr}: {e}")))?;
    socket
        .listen(backlog as i32)
        .map_err(|e| StartupError::AcceptorError(format!("listening on {addr}: {e}")))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| StartupError::AcceptorError(format!("setting non-blocking: {e}")))?;

    TcpListener::from_std(socket.into())
        .map_err(|e| StartupError::AcceptorError(format!("registering listener with tokio: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_listener_accepts_loopback_connections() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), false, 128).unwrap();
        let addr = listener.local_addr().unwrap();

        let (accepted, connected) = tokio::join!(listener.accept(), tokio::net::TcpStream::connect(addr));
        assert!(accepted.is_ok());
        assert!(connected.is_ok());
    }

    #[tokio::test]
    async fn pause_then_unpause_round_trips() {
        let components = Arc::new(test_components());
        let runtime = Runtime::new(components);
        assert!(!runtime.signals_paused.load(Ordering::SeqCst));
        runtime.pause_signals();
        assert!(runtime.signals_paused.load(Ordering::SeqCst));
        runtime.unpause_signals();
        assert!(!runtime.signals_paused.load(Ordering::SeqCst));
    }

    fn test_components() -> ServerComponents {
        let dir = tempfile::tempdir().unwrap();
        let cert_store = Arc::new(
            aether_tls::CertificateStore::bootstrap(dir.path(), &aether_tls::CaSubject::default(), 10).unwrap(),
        );
        let server_tls_config = aether_tls::build_server_config(cert_store.clone()).unwrap();
        let client_tls_config = aether_tls::build_client_config(None).unwrap();
        ServerComponents {
            config: crate::config::ProxyConfig::default(),
            cert_store,
            client_tls_config: Arc::new(client_tls_config),
            server_tls_config: Arc::new(server_tls_config),
            interceptors: Arc::new(std::sync::Mutex::new(crate::events::Interceptors::new())),
        }
    }
}
