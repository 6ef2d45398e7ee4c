//! Transport (§3, §4.A): either a plain TCP stream or a TLS stream over
//! one, each read/write bounded by a per-operation deadline. Grounded on
//! `base_connection`/`server_connection` in the original implementation,
//! which wrap a `boost::asio` socket with a deadline timer per operation;
//! here that becomes `tokio::time::timeout` around the underlying I/O call.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use aether_core::error::TransportError;
use aether_tls::ReplayPrefixed;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// The client-facing socket once its ClientHello has been peeked: the
/// handshake replays the bytes already consumed by `read_client_hello`
/// in front of the live socket (§4.B, §8 property 4), so the server-side
/// TLS stream is always over this wrapper rather than a bare `TcpStream`.
pub type ClientSocket = ReplayPrefixed<TcpStream>;

/// Either a plain TCP stream or a TLS stream layered over one (§3). Two
/// distinct TLS variants exist because the client leg (terminated by the
/// proxy acting as server, using a minted cert) and the server leg
/// (the proxy acting as client toward the real origin) wrap different
/// inner stream types.
pub enum Transport {
    Plain(TcpStream),
    ClientTls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    ServerTls(Box<tokio_rustls::server::TlsStream<ClientSocket>>),
}

impl Transport {
    pub async fn connect(host: &str, port: u16, deadline: Duration) -> Result<Self, TransportError> {
        let addr = format!("{host}:{port}");
        let stream = timeout(deadline, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::UpstreamConnectFailed {
                host: host.to_string(),
                port,
                source: e,
            })?;
        stream.set_nodelay(true).ok();
        Ok(Transport::Plain(stream))
    }

    /// Upgrades an already-connected plain transport to TLS as a client,
    /// optionally overriding the SNI sent (§4.A: "optional SNI override,
    /// defaults to target host").
    pub async fn upgrade_client_tls(
        self,
        connector: TlsConnector,
        sni: &str,
        deadline: Duration,
    ) -> Result<Self, TransportError> {
        let Transport::Plain(stream) = self else {
            return Err(TransportError::Io(io::Error::other("transport is not plain TCP")));
        };
        let name = ServerName::try_from(sni.to_string())
            .map_err(|e| TransportError::Io(io::Error::other(format!("invalid SNI {sni:?}: {e}"))))?;
        let tls = timeout(deadline, connector.connect(name, stream))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;
        Ok(Transport::ClientTls(Box::new(tls)))
    }

    /// Terminates TLS with the client over the prefix-replayed socket,
    /// using a minted leaf certificate resolved per-SNI (§4.C, §4.E
    /// `HandshakeWithClient` transition).
    pub async fn accept_client_tls(
        socket: ClientSocket,
        acceptor: TlsAcceptor,
        deadline: Duration,
    ) -> Result<Self, TransportError> {
        let tls = timeout(deadline, acceptor.accept(socket))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;
        Ok(Transport::ServerTls(Box::new(tls)))
    }

    pub async fn read(&mut self, buf: &mut [u8], deadline: Duration) -> Result<usize, TransportError> {
        let n = timeout(deadline, async {
            match self {
                Transport::Plain(s) => s.read(buf).await,
                Transport::ClientTls(s) => s.read(buf).await,
                Transport::ServerTls(s) => s.read(buf).await,
            }
        })
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(n)
    }

    pub async fn write_all(&mut self, buf: &[u8], deadline: Duration) -> Result<(), TransportError> {
        timeout(deadline, async {
            match self {
                Transport::Plain(s) => s.write_all(buf).await,
                Transport::ClientTls(s) => s.write_all(buf).await,
                Transport::ServerTls(s) => s.write_all(buf).await,
            }
        })
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(TransportError::Io)
    }

    pub async fn shutdown(&mut self) {
        let _ = match self {
            Transport::Plain(s) => s.shutdown().await,
            Transport::ClientTls(s) => s.shutdown().await,
            Transport::ServerTls(s) => s.shutdown().await,
        };
    }

    /// The peer's certificate chain, when this transport is TLS (§4.A
    /// `peer_chain()`). Used to harvest the real upstream identity when
    /// `ssl_supply_server_chain_to_client` is set (§4.E).
    pub fn peer_chain(&self) -> Option<Vec<rustls_pki_types::CertificateDer<'static>>> {
        match self {
            Transport::ClientTls(s) => s.get_ref().1.peer_certificates().map(|c| c.to_vec()),
            Transport::ServerTls(s) => s.get_ref().1.peer_certificates().map(|c| c.to_vec()),
            Transport::Plain(_) => None,
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Transport::Plain(_))
    }
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::ClientTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Transport::ServerTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::ClientTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Transport::ServerTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::ClientTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Transport::ServerTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::ClientTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Transport::ServerTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

pub fn tls_acceptor(config: Arc<rustls::ServerConfig>) -> TlsAcceptor {
    TlsAcceptor::from(config)
}

pub fn tls_connector(config: Arc<rustls::ClientConfig>) -> TlsConnector {
    TlsConnector::from(config)
}
