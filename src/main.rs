//! `aether`: CLI entry point (§6). Parses the CLI surface into a
//! `ProxyConfig`, bootstraps the certificate store and TLS configs,
//! wires the built-in interceptor hubs, and hands everything to the I/O
//! runtime. Grounded on `aether/program/options.cpp`/`main.cpp` in the
//! newer `src/aether/**` tree of the original implementation (§9
//! "treat the newer versions as authoritative"); option parsing itself
//! (§1 Non-goals: "command-line option parsing and help rendering") is
//! out of scope for the core, so this binary leans entirely on `clap`
//! rather than reimplementing the original's hand-rolled parser.

use std::fs::OpenOptions;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aether_proxy::config::{ProxyConfig, SslPassthrough, WebSocketPassthrough};
use aether_proxy::{DisableH2c, HttpLogger, InterceptorHub, Interceptors, Runtime, ServerComponents};
use aether_tls::{CaSubject, CertificateStore, Properties};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// The CLI surface (§6, abridged): long options only, `clap` renders
/// `--help`/`-h` and short aliases for free rather than this binary
/// hand-rolling usage text.
#[derive(Parser, Debug)]
#[command(name = "aether", about = "Intercepting HTTP/HTTPS/WebSocket proxy", version)]
struct Cli {
    /// Port the acceptor listens on.
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,

    /// Accept on an IPv6 dual-stack socket instead of IPv4-only.
    #[arg(long)]
    ipv6: bool,

    /// Size of the I/O runtime's worker thread pool (default: 2x CPUs).
    #[arg(long)]
    threads: Option<usize>,

    /// Accept backlog / maximum queued connections.
    #[arg(long = "connection-limit")]
    connection_limit: Option<u32>,

    /// Per-operation I/O deadline in milliseconds.
    #[arg(long, default_value_t = 120_000)]
    timeout: u64,

    /// Per-operation I/O deadline for opaque tunnels, in milliseconds.
    #[arg(long = "tunnel-timeout", default_value_t = 30_000)]
    tunnel_timeout: u64,

    /// Maximum buffered HTTP body size, in bytes.
    #[arg(long = "body-size-limit", default_value_t = 200 * 1024 * 1024)]
    body_size_limit: usize,

    /// Tunnel CONNECTs opaquely by default (an interceptor may still opt back in to splicing).
    #[arg(long = "ssl-passthrough")]
    ssl_passthrough: bool,

    /// Always tunnel CONNECTs opaquely; no interceptor can force a splice.
    #[arg(long = "ssl-passthrough-strict")]
    ssl_passthrough_strict: bool,

    /// Verify upstream certificates against the trust store (default on).
    #[arg(long = "ssl-verify", default_value_t = true)]
    ssl_verify: bool,

    /// Negotiate upstream cipher suites from what the client's ClientHello offered.
    #[arg(long = "ssl-negotiate-ciphers")]
    ssl_negotiate_ciphers: bool,

    /// Echo the client's requested ALPN protocols to the upstream connection (default on).
    #[arg(long = "ssl-negotiate-alpn", default_value_t = true)]
    ssl_negotiate_alpn: bool,

    /// Harvest the real upstream certificate chain before completing the client-facing handshake.
    #[arg(long = "ssl-supply-server-chain")]
    ssl_supply_server_chain: bool,

    /// `proxy.properties`-format file supplying the CA's subject fields.
    #[arg(long = "ssl-certificate-properties")]
    ssl_certificate_properties: Option<PathBuf>,

    /// Directory holding the CA keypair, minted-cert cache, and DH params.
    #[arg(long = "ssl-certificate-dir")]
    ssl_certificate_dir: Option<PathBuf>,

    /// Path to the `dhparam.pem` file (§6 on-disk contract; required).
    #[arg(long = "ssl-dhparam-file")]
    ssl_dhparam_file: Option<PathBuf>,

    /// Extra trusted CA bundle for verifying upstream servers.
    #[arg(long = "upstream-trusted-ca-file")]
    upstream_trusted_ca_file: Option<PathBuf>,

    /// Pass WebSocket upgrades through without interception by default.
    #[arg(long = "ws-passthrough")]
    ws_passthrough: bool,

    /// Always pass WebSocket traffic through opaquely.
    #[arg(long = "ws-passthrough-strict")]
    ws_passthrough_strict: bool,

    /// Intercept (decode/expose) WebSocket messages by default.
    #[arg(long = "ws-intercept-default")]
    ws_intercept_default: bool,

    /// Launch the interactive command shell (not implemented by this build; see §1 Non-goals).
    #[arg(long)]
    interactive: bool,

    /// Enable the sample request logger interceptor hub.
    #[arg(long = "logs")]
    logs: bool,

    /// Suppress all logging below `error`.
    #[arg(short = 's', long)]
    silent: bool,

    /// Mirror logs to this file in addition to stderr.
    #[arg(short = 'l', long = "log-file")]
    log_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    if cli.interactive {
        tracing::warn!(
            target: "aether::main",
            "--interactive was requested but the command REPL is out of scope for this build; continuing headless"
        );
    }

    let config = build_config(&cli);
    let properties = load_properties(&cli)?;
    let subject = CaSubject::from_properties(&properties);

    let cert_store = Arc::new(
        CertificateStore::bootstrap(&config.ssl_certificate_dir, &subject, config.max_num_certs)
            .map_err(|e| anyhow::anyhow!("failed to bootstrap certificate store: {e}"))?,
    );

    if let Some(dhparam) = &config.ssl_dhparam_file {
        // Required on disk per §6, even though modern `rustls` never
        // consumes it directly (see `DhParams::load`'s doc comment).
        aether_tls::DhParams::load(dhparam).map_err(|e| anyhow::anyhow!("loading dhparam file: {e}"))?;
    }

    let server_tls_config = aether_tls::build_server_config(cert_store.clone())
        .map_err(|e| anyhow::anyhow!("building server TLS config: {e}"))?;
    let client_tls_config = aether_tls::build_client_config(config.upstream_trusted_ca_file.as_deref())
        .map_err(|e| anyhow::anyhow!("building client TLS config: {e}"))?;

    let mut interceptors = Interceptors::new();
    let _h2c_handle = DisableH2c.attach_all(&mut interceptors);
    if cli.logs {
        let _logger_handle = HttpLogger.attach_all(&mut interceptors);
    }

    let components = Arc::new(ServerComponents {
        config,
        cert_store,
        client_tls_config: Arc::new(client_tls_config),
        server_tls_config: Arc::new(server_tls_config),
        interceptors: Arc::new(Mutex::new(interceptors)),
    });

    let bind_ip = if components.config.ipv6 {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    let addr = SocketAddr::new(bind_ip, components.config.port);

    let runtime = Runtime::new(components);
    runtime
        .run_blocking(addr)
        .map_err(|e| anyhow::anyhow!("fatal startup error: {e}"))?;

    Ok(())
}

fn build_config(cli: &Cli) -> ProxyConfig {
    let defaults = ProxyConfig::default();

    let ssl_passthrough = if cli.ssl_passthrough_strict {
        SslPassthrough::Strict
    } else if cli.ssl_passthrough {
        SslPassthrough::Default
    } else {
        SslPassthrough::Off
    };

    let ws_passthrough = if cli.ws_passthrough_strict {
        WebSocketPassthrough::Strict
    } else if cli.ws_passthrough {
        WebSocketPassthrough::Default
    } else {
        WebSocketPassthrough::Off
    };

    ProxyConfig {
        port: cli.port,
        ipv6: cli.ipv6,
        thread_pool_size: cli.threads.unwrap_or(defaults.thread_pool_size),
        connection_queue_limit: cli.connection_limit.unwrap_or(defaults.connection_queue_limit),
        timeout: Duration::from_millis(cli.timeout),
        tunnel_timeout: Duration::from_millis(cli.tunnel_timeout),
        body_size_limit: cli.body_size_limit,
        ssl_passthrough,
        ssl_verify: cli.ssl_verify,
        ssl_negotiate_ciphers: cli.ssl_negotiate_ciphers,
        ssl_negotiate_alpn: cli.ssl_negotiate_alpn,
        ssl_supply_server_chain_to_client: cli.ssl_supply_server_chain,
        ssl_certificate_dir: cli.ssl_certificate_dir.clone().unwrap_or(defaults.ssl_certificate_dir),
        ssl_certificate_properties: cli.ssl_certificate_properties.clone(),
        ssl_dhparam_file: cli.ssl_dhparam_file.clone(),
        upstream_trusted_ca_file: cli.upstream_trusted_ca_file.clone(),
        max_num_certs: defaults.max_num_certs,
        ws_passthrough,
    }
}

fn load_properties(cli: &Cli) -> anyhow::Result<Properties> {
    match &cli.ssl_certificate_properties {
        Some(path) => {
            Properties::load(path).map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))
        }
        None => Ok(Properties::default()),
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let default_filter = if cli.silent { "error" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter);

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("opening log file {}: {e}", path.display()))?;
            subscriber.with_writer(Mutex::new(file)).init();
        }
        None => subscriber.init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use aether_proxy::config::ProxyConfig;
    use aether_proxy::{connection, Interceptors, ServerComponents};
    use aether_tls::{CaSubject, CertificateStore};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn test_components(cert_dir: &std::path::Path) -> ServerComponents {
        let cert_store =
            Arc::new(CertificateStore::bootstrap(cert_dir, &CaSubject::default(), 10).expect("bootstrap cert store"));
        let server_tls_config = aether_tls::build_server_config(cert_store.clone()).expect("server tls config");
        let client_tls_config = aether_tls::build_client_config(None).expect("client tls config");
        ServerComponents {
            config: ProxyConfig::default(),
            cert_store,
            client_tls_config: Arc::new(client_tls_config),
            server_tls_config: Arc::new(server_tls_config),
            interceptors: Arc::new(Mutex::new(Interceptors::new())),
        }
    }

    /// End-to-end: a plain HTTP request placed through the acceptor
    /// reaches a real upstream listener and the response comes back
    /// byte-for-byte (the cleartext passthrough path through `connection`).
    #[tokio::test]
    async fn http_get_is_forwarded_and_response_relayed_verbatim() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
        let upstream_addr = upstream.local_addr().expect("upstream addr");
        tokio::spawn(async move {
            let (mut sock, _) = upstream.accept().await.expect("accept upstream");
            let mut buf = [0u8; 4096];
            let n = sock.read(&mut buf).await.expect("read upstream request");
            assert!(n > 0, "proxy forwarded an empty request");
            sock.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.expect("write upstream response");
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let components = Arc::new(test_components(dir.path()).await);

        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
        let proxy_addr = proxy_listener.local_addr().expect("proxy addr");

        let server = tokio::spawn(async move {
            let (stream, peer) = proxy_listener.accept().await.expect("accept client");
            connection::handle_connection(1, stream, peer.ip(), components).await;
        });

        let mut client = TcpStream::connect(proxy_addr).await.expect("connect to proxy");
        let request =
            format!("GET http://{upstream_addr}/ HTTP/1.1\r\nHost: {upstream_addr}\r\nConnection: close\r\n\r\n");
        client.write_all(request.as_bytes()).await.expect("write request to proxy");

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.expect("read response from proxy");

        assert_eq!(response, b"HTTP/1.1 204 No Content\r\n\r\n");
        server.await.expect("connection task panicked");
    }
}
