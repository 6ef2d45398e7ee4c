use thiserror::Error;

/// Startup and socket-setup failures. Fatal: the process logs and exits with code 1.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("malformed properties file: {0}")]
    PropertiesMalformed(String),
    #[error("could not bind acceptor: {0}")]
    AcceptorError(String),
    #[error("IPv6 dual-stack socket unavailable: {0}")]
    Ipv6Unavailable(String),
}

/// Transport-level failures (§4.A).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("DNS resolution failed for {host}: {source}")]
    DnsUnresolved {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to upstream {host}:{port}: {source}")]
    UpstreamConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("operation timed out")]
    Timeout,
    #[error("transport closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// TLS-layer failures (§4.B, §4.C).
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("invalid client hello: {0}")]
    InvalidClientHello(String),
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("TLS context error: {0}")]
    ContextError(String),
    #[error("certificate store creation error: {0}")]
    StoreCreationError(String),
    #[error("certificate creation error: {0}")]
    CertificateCreationError(String),
    #[error("invalid trusted certificates file: {0}")]
    InvalidTrustedCertificatesFile(String),
}

/// HTTP/1 codec failures (§4.D).
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("invalid HTTP version: {0}")]
    InvalidVersion(String),
    #[error("invalid status code: {0}")]
    InvalidStatus(String),
    #[error("header not found: {0}")]
    HeaderNotFound(String),
    #[error("body exceeds configured limit of {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("malformed chunked encoding: {0}")]
    MalformedChunked(String),
    #[error("need more bytes to parse")]
    Incomplete,
}

/// WebSocket framing / extension failures (§4.G, §4.H).
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),
    #[error("unexpected opcode for current state")]
    UnexpectedOpcode,
    #[error("frame serialization error: {0}")]
    SerializationError(String),
    #[error("zlib error: {0}")]
    ZlibError(String),
    #[error("need more bytes to parse")]
    Incomplete,
}

/// The single ambient error channel plumbed through `Flow::error_state` (§9).
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    WebSocket(#[from] WebSocketError),
}

impl FlowError {
    /// Error kind name used for interceptor dispatch and synthetic responses (§7).
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Transport(TransportError::DnsUnresolved { .. }) => "dns_unresolved",
            FlowError::Transport(TransportError::UpstreamConnectFailed { .. }) => {
                "upstream_connect_failed"
            }
            FlowError::Transport(TransportError::Timeout) => "timeout",
            FlowError::Transport(TransportError::Closed) => "closed",
            FlowError::Transport(TransportError::Io(_)) => "io_error",
            FlowError::Tls(TlsError::InvalidClientHello(_)) => "invalid_client_hello",
            FlowError::Tls(TlsError::HandshakeFailed(_)) => "tls_handshake_failed",
            FlowError::Tls(TlsError::ContextError(_)) => "tls_context_error",
            FlowError::Tls(TlsError::StoreCreationError(_)) => "store_creation_error",
            FlowError::Tls(TlsError::CertificateCreationError(_)) => "certificate_creation_error",
            FlowError::Tls(TlsError::InvalidTrustedCertificatesFile(_)) => {
                "invalid_trusted_certificates_file"
            }
            FlowError::Http(HttpError::InvalidMethod(_)) => "invalid_method",
            FlowError::Http(HttpError::InvalidVersion(_)) => "invalid_version",
            FlowError::Http(HttpError::InvalidStatus(_)) => "invalid_status",
            FlowError::Http(HttpError::HeaderNotFound(_)) => "header_not_found",
            FlowError::Http(HttpError::BodyTooLarge { .. }) => "body_too_large",
            FlowError::Http(HttpError::MalformedChunked(_)) => "malformed_chunked",
            FlowError::Http(HttpError::Incomplete) => "incomplete",
            FlowError::WebSocket(WebSocketError::InvalidFrame(_)) => "invalid_frame",
            FlowError::WebSocket(WebSocketError::InvalidOpcode(_)) => "invalid_opcode",
            FlowError::WebSocket(WebSocketError::UnexpectedOpcode) => "unexpected_opcode",
            FlowError::WebSocket(WebSocketError::SerializationError(_)) => "serialization_error",
            FlowError::WebSocket(WebSocketError::ZlibError(_)) => "zlib_error",
            FlowError::WebSocket(WebSocketError::Incomplete) => "incomplete",
        }
    }

    /// Whether this error may still be converted into a synthetic response
    /// (§4.E failure semantics): true only before any response byte left the proxy.
    pub fn is_pre_response(&self) -> bool {
        matches!(
            self,
            FlowError::Transport(
                TransportError::DnsUnresolved { .. }
                    | TransportError::UpstreamConnectFailed { .. }
                    | TransportError::Timeout
            )
        )
    }
}
