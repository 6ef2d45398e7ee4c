//! Proxy-wide configuration (§6 CLI surface). Plain data, built by the
//! `aether` binary's `clap::Parser` struct and handed in by reference —
//! mirrors `program::options` in the original implementation, which is
//! likewise a flat struct of every flag the proxy consults at runtime.

use std::path::PathBuf;
use std::time::Duration;

/// `--ssl-passthrough`/`--ssl-passthrough-strict` (§4.E CONNECT decision rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslPassthrough {
    /// Splice TLS by default; an interceptor may still opt in to passthrough.
    #[default]
    Off,
    /// Tunnel unless an interceptor sets `flow.intercept_tls`.
    Default,
    /// Always tunnel, no interceptor override possible.
    Strict,
}

/// `--ws-passthrough`/`--ws-passthrough-strict`/`--ws-intercept-default` (§4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebSocketPassthrough {
    #[default]
    Off,
    Default,
    Strict,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub ipv6: bool,
    pub thread_pool_size: usize,
    pub connection_queue_limit: u32,
    pub timeout: Duration,
    pub tunnel_timeout: Duration,
    pub body_size_limit: usize,

    pub ssl_passthrough: SslPassthrough,
    pub ssl_verify: bool,
    pub ssl_negotiate_ciphers: bool,
    pub ssl_negotiate_alpn: bool,
    pub ssl_supply_server_chain_to_client: bool,
    pub ssl_certificate_dir: PathBuf,
    pub ssl_certificate_properties: Option<PathBuf>,
    pub ssl_dhparam_file: Option<PathBuf>,
    pub upstream_trusted_ca_file: Option<PathBuf>,
    pub max_num_certs: usize,

    pub ws_passthrough: WebSocketPassthrough,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            ipv6: false,
            thread_pool_size: 2 * std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            connection_queue_limit: 1024,
            timeout: Duration::from_millis(120_000),
            tunnel_timeout: Duration::from_millis(30_000),
            body_size_limit: 200 * 1024 * 1024,
            ssl_passthrough: SslPassthrough::default(),
            ssl_verify: true,
            ssl_negotiate_ciphers: false,
            ssl_negotiate_alpn: true,
            ssl_supply_server_chain_to_client: false,
            ssl_certificate_dir: default_cert_store_dir(),
            ssl_certificate_properties: None,
            ssl_dhparam_file: None,
            upstream_trusted_ca_file: None,
            max_num_certs: 100,
            ws_passthrough: WebSocketPassthrough::default(),
        }
    }
}

fn default_cert_store_dir() -> PathBuf {
    std::env::var_os("AETHER_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("aether"))
        .join("cert_store")
}

impl ProxyConfig {
    /// Whether the CONNECT handler should tunnel opaquely rather than splice,
    /// absent any interceptor override (§4.E).
    pub fn tunnels_by_default(&self) -> bool {
        matches!(self.ssl_passthrough, SslPassthrough::Default | SslPassthrough::Strict)
    }

    pub fn strict_passthrough(&self) -> bool {
        matches!(self.ssl_passthrough, SslPassthrough::Strict)
    }

    /// Mirrors `tunnels_by_default` for the WebSocket upgrade decision (§4.I).
    pub fn ws_tunnels_by_default(&self) -> bool {
        matches!(self.ws_passthrough, WebSocketPassthrough::Default | WebSocketPassthrough::Strict)
    }

    pub fn ws_strict_passthrough(&self) -> bool {
        matches!(self.ws_passthrough, WebSocketPassthrough::Strict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_splices_tls() {
        let cfg = ProxyConfig::default();
        assert!(!cfg.tunnels_by_default());
        assert!(!cfg.strict_passthrough());
    }

    #[test]
    fn strict_passthrough_implies_tunnels_by_default() {
        let cfg = ProxyConfig {
            ssl_passthrough: SslPassthrough::Strict,
            ..ProxyConfig::default()
        };
        assert!(cfg.tunnels_by_default());
        assert!(cfg.strict_passthrough());
    }
}
