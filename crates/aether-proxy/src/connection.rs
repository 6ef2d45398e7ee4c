//! The per-connection state machine (§4.E): accept → HTTP(S) detection →
//! optional TLS splice → HTTP request/response exchange → tunnel or
//! WebSocket. Grounded on `connection_flow.cpp`/`.hpp`, `server.cpp`, and
//! `tunnel_service.cpp` in the original implementation — `tunnel_service`
//! starts two `tunnel_loop`s (upstream/downstream) and stops once both
//! finish; `run_opaque_tunnel` below is the same shape with
//! `tokio::io::copy_bidirectional` standing in for the two loops.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aether_core::error::{FlowError, HttpError, TransportError};
use aether_core::{Exchange, HeaderMap, HttpMethod, HttpVersion, Request, Response, Url};
use aether_http::{serialize_request, serialize_response, DecodeLimits, RequestDecoder, ResponseContext, ResponseDecoder};
use aether_ws::handshake::{accept_key, negotiate_permessage_deflate, render_extensions_header};
use aether_tls::client_hello::read_client_hello;
use aether_tls::ReplayPrefixed;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::events::{
    HttpCtx, HttpEvent, Interceptors, ServerCtx, ServerEvent, SslCertificateCtx, SslCertificateEvent, TlsCtx,
    TlsEvent, TunnelCtx, TunnelEvent, WebSocketCtx, WebSocketEvent, ServerComponents,
};
use crate::flow::ConnectionFlow;
use crate::transport::{tls_acceptor, tls_connector, Transport};
use crate::websocket::{build_pipelines, WebSocketSession};

/// Drives one accepted connection end-to-end. Never returns an error to
/// its caller — every failure is either surfaced to the client as a
/// synthetic response or simply closes the connection, per §7's
/// propagation policy; the caller (the I/O runtime) only needs to know
/// when the task is done.
pub async fn handle_connection(
    id: u64,
    client: TcpStream,
    client_addr: IpAddr,
    components: Arc<ServerComponents>,
) {
    let flow = Arc::new(Mutex::new(ConnectionFlow::with_client(id, client_addr, Transport::Plain(client))));

    {
        let mut ctx = ServerCtx { flow: flow.clone() };
        components.interceptors.lock().expect("interceptors lock poisoned").server.dispatch(ServerEvent::Connect, &mut ctx);
    }

    if let Err(err) = run(&flow, &components).await {
        debug!(connection_id = id, error = %err, "connection ended with error");
    }

    {
        let mut guard = flow.lock().expect("flow lock poisoned");
        if let Some(mut client) = guard.client.take() {
            client.shutdown().await;
        }
        if let Some(mut server) = guard.server.take() {
            server.shutdown().await;
        }
    }

    let mut ctx = ServerCtx { flow: flow.clone() };
    components.interceptors.lock().expect("interceptors lock poisoned").server.dispatch(ServerEvent::Disconnect, &mut ctx);
}

/// Top-level loop: keeps re-entering the "first byte" decision (§4.E
/// `Accepted`) so that a `CONNECT`-then-TLS-splice sequence and a bare
/// TLS connection (no `CONNECT` at all) share the same detection code.
async fn run(flow: &Arc<Mutex<ConnectionFlow>>, components: &Arc<ServerComponents>) -> Result<(), FlowError> {
    loop {
        let first_byte = match peek_first_byte(flow, components.config.timeout).await? {
            Some(b) => b,
            None => return Ok(()), // client closed before sending anything
        };

        if first_byte == 0x16 {
            match maybe_tls(flow, components).await? {
                TlsOutcome::Tunneled => return Ok(()),
                TlsOutcome::Spliced => continue,
            }
        } else {
            match http_proxy_loop(flow, components).await? {
                HttpLoopOutcome::ConnectTunnel => continue,
                HttpLoopOutcome::Done => return Ok(()),
            }
        }
    }
}

/// Peeks the connection's next byte without consuming it, so the
/// decision below can hand the untouched stream to either the HTTP
/// decoder or the ClientHello reader (§4.E, §4.B non-destructive peek).
///
/// Checks the client transport out of `flow` for the duration of the
/// peek rather than holding the flow's mutex across the `.await` — a
/// `std::sync::MutexGuard` held across an await point would make this
/// connection's task future non-`Send`, which `tokio::spawn` requires.
async fn peek_first_byte(flow: &Arc<Mutex<ConnectionFlow>>, deadline: Duration) -> Result<Option<u8>, FlowError> {
    let mut client = {
        let mut guard = flow.lock().expect("flow lock poisoned");
        guard.client.take().expect("client transport always present")
    };

    let mut buf = [0u8; 1];
    let result = match &mut client {
        Transport::Plain(stream) => match tokio::time::timeout(deadline, stream.peek(&mut buf)).await {
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => Ok(Some(buf[0])),
            Ok(Err(e)) => Err(FlowError::from(TransportError::Io(e))),
            Err(_) => Err(FlowError::from(TransportError::Timeout)),
        },
        // Already TLS-terminated (e.g. re-entering after a splice
        // handshake) — treat as opaque application data.
        _ => Ok(Some(1)),
    };

    flow.lock().expect("flow lock poisoned").client = Some(client);
    result
}

enum TlsOutcome {
    /// The connection was handed off as an opaque byte tunnel and is done.
    Tunneled,
    /// TLS was terminated with a minted cert; caller should go back to
    /// the HTTP proxy loop over the now-decrypted stream.
    Spliced,
}

/// §4.E `MaybeTls`: peeks the ClientHello, decides splice vs. tunnel,
/// and either opens an opaque TCP tunnel or completes a client-facing
/// TLS handshake using a minted leaf certificate.
async fn maybe_tls(flow: &Arc<Mutex<ConnectionFlow>>, components: &Arc<ServerComponents>) -> Result<TlsOutcome, FlowError> {
    let raw_client = {
        let mut guard = flow.lock().expect("flow lock poisoned");
        match guard.client.take().expect("client transport always present") {
            Transport::Plain(stream) => stream,
            other => {
                guard.client = Some(other);
                return Ok(TlsOutcome::Spliced);
            }
        }
    };

    let mut raw_client = raw_client;
    let (hello, consumed) = match read_client_hello(&mut raw_client).await {
        Ok(pair) => pair,
        Err(e) => {
            let flow_err = FlowError::from(e);
            let mut ctx = TlsCtx {
                flow: flow.clone(),
                error: Some(Arc::new(flow_err)),
            };
            components.interceptors.lock().expect("interceptors lock poisoned").tls.dispatch(TlsEvent::Error, &mut ctx);
            return Err(TransportError::Closed.into());
        }
    };

    let sni = hello.sni().map(|s| s.to_string());
    {
        let mut guard = flow.lock().expect("flow lock poisoned");
        if let Some(host) = &sni {
            // SNI supersedes whatever Host the CONNECT carried (§4.E "SNI" rule).
            guard.target_host = host.clone();
            if guard.target_port == 0 {
                guard.target_port = 443;
            }
        }
    }

    let wants_tunnel = {
        let guard = flow.lock().expect("flow lock poisoned");
        components.config.strict_passthrough() || !guard.intercept_tls
    };

    if wants_tunnel {
        let client_socket = ReplayPrefixed::new(consumed, raw_client);
        run_opaque_tunnel_from_client_socket(flow, components, client_socket).await?;
        return Ok(TlsOutcome::Tunneled);
    }

    let host = sni.unwrap_or_else(|| {
        let guard = flow.lock().expect("flow lock poisoned");
        guard.target_host.clone()
    });

    let (_minted, was_cached) = components
        .cert_store
        .certificate_for(&host)
        .map_err(FlowError::Tls)?;
    {
        let interface = aether_core::CertificateInterface::for_host(&host);
        let mut ctx = SslCertificateCtx {
            flow: flow.clone(),
            interface: Arc::new(interface),
        };
        let event = if was_cached { SslCertificateEvent::Search } else { SslCertificateEvent::Create };
        components.interceptors.lock().expect("interceptors lock poisoned").ssl_certificate.dispatch(event, &mut ctx);
    }

    let client_socket = ReplayPrefixed::new(consumed, raw_client);
    let acceptor = tls_acceptor(components.server_tls_config.clone());
    let tls_deadline = components.config.timeout;
    match Transport::accept_client_tls(client_socket, acceptor, tls_deadline).await {
        Ok(tls_transport) => {
            let mut guard = flow.lock().expect("flow lock poisoned");
            guard.client = Some(tls_transport);
            drop(guard);
            let mut ctx = TlsCtx { flow: flow.clone(), error: None };
            components.interceptors.lock().expect("interceptors lock poisoned").tls.dispatch(TlsEvent::Established, &mut ctx);
            Ok(TlsOutcome::Spliced)
        }
        Err(e) => {
            let mut ctx = TlsCtx {
                flow: flow.clone(),
                error: Some(Arc::new(FlowError::from(e))),
            };
            components.interceptors.lock().expect("interceptors lock poisoned").tls.dispatch(TlsEvent::Error, &mut ctx);
            Err(TransportError::Closed.into())
        }
    }
}

/// Opens a plain TCP connection to the flow's target and copies bytes
/// opaquely in both directions until either side closes (§4.E
/// `ConnectTunnel`, Testable Scenario S2).
async fn run_opaque_tunnel_from_client_socket<S>(
    flow: &Arc<Mutex<ConnectionFlow>>,
    components: &Arc<ServerComponents>,
    mut client_socket: ReplayPrefixed<S>,
) -> Result<(), FlowError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (host, port) = {
        let guard = flow.lock().expect("flow lock poisoned");
        (guard.target_host.clone(), guard.target_port)
    };

    {
        let mut ctx = TunnelCtx { flow: flow.clone() };
        components.interceptors.lock().expect("interceptors lock poisoned").tunnel.dispatch(TunnelEvent::Start, &mut ctx);
    }

    let server = Transport::connect(&host, port, components.config.timeout).await;
    let outcome = match server {
        Ok(Transport::Plain(mut server_stream)) => {
            tokio::io::copy_bidirectional(&mut client_socket, &mut server_stream).await.map(|_| ())
        }
        Ok(_) => unreachable!("Transport::connect always yields Plain"),
        Err(e) => {
            warn!(target: "aether::tunnel", host = %host, port, error = %e, "failed to connect upstream for tunnel");
            return Err(e.into());
        }
    };

    {
        let mut ctx = TunnelCtx { flow: flow.clone() };
        components.interceptors.lock().expect("interceptors lock poisoned").tunnel.dispatch(TunnelEvent::Stop, &mut ctx);
    }

    outcome.map_err(|e| FlowError::Transport(TransportError::Io(e)))
}

enum HttpLoopOutcome {
    /// A `CONNECT` was handled and the loop should re-peek the next
    /// bytes (either more HTTP or a TLS ClientHello).
    ConnectTunnel,
    Done,
}

/// §4.E `HttpProxy`: decodes one request at a time, dispatches
/// interceptors, forwards to upstream (or serves a synthesized
/// response), and loops for keep-alive until a `Connection: close`
/// tie-break or a CONNECT/WebSocket transition ends the loop.
async fn http_proxy_loop(flow: &Arc<Mutex<ConnectionFlow>>, components: &Arc<ServerComponents>) -> Result<HttpLoopOutcome, FlowError> {
    let limits = DecodeLimits {
        max_head_bytes: 64 * 1024,
        max_body_bytes: Some(components.config.body_size_limit),
    };
    let mut decoder = RequestDecoder::new();

    loop {
        let request = match read_request(flow, &mut decoder, &limits, components.config.timeout).await? {
            Some(req) => req,
            None => return Ok(HttpLoopOutcome::Done),
        };

        if request.method == HttpMethod::Connect {
            handle_connect(flow, components, request).await?;
            return Ok(HttpLoopOutcome::ConnectTunnel);
        }

        let mut request = request;
        request.headers.remove("Upgrade-Insecure-Requests");
        if request.headers.has_value("Upgrade", "h2c") {
            request.headers.remove("Upgrade");
        }

        if request.target.netloc.is_none() {
            if let Some(host) = request.host_header().map(|h| h.to_string()) {
                let (host, port) = split_host_port(&host, default_port(flow));
                let mut guard = flow.lock().expect("flow lock poisoned");
                if guard.target_host.is_empty() {
                    guard.target_host = host;
                    guard.target_port = port;
                }
            }
        } else if let Some(netloc) = request.target.netloc.clone() {
            let mut guard = flow.lock().expect("flow lock poisoned");
            if guard.target_host.is_empty() {
                guard.target_host = netloc.host.clone();
                guard.target_port = netloc.port.unwrap_or(default_port(flow));
            }
        }

        let is_upgrade = request.is_websocket_upgrade();
        let wants_close_request = request.wants_close();
        let request_method = request.method;

        let exchange = Arc::new(Mutex::new(Exchange::new(request)));
        {
            let mut ctx = HttpCtx { flow: flow.clone(), exchange: Some(exchange.clone()), error: None };
            let mut interceptors = components.interceptors.lock().expect("interceptors lock poisoned");
            interceptors.http.dispatch(HttpEvent::AnyRequest, &mut ctx);
            interceptors.http.dispatch(HttpEvent::Request, &mut ctx);
        }

        let synthesized = exchange.lock().expect("exchange lock poisoned").is_synthesized();
        if synthesized {
            let response = exchange.lock().expect("exchange lock poisoned").response().cloned().expect("synthesized response set");
            write_response(flow, &response, components.config.timeout).await?;
            if wants_close_request || response.wants_close() {
                return Ok(HttpLoopOutcome::Done);
            }
            continue;
        }

        let mut connect_err = None;
        if !ensure_server_connected(flow, components, &mut connect_err).await? {
            let err = connect_err.unwrap_or(TransportError::Closed);
            let response = synthesize_gateway_error(flow, components, request_method, err).await;
            write_response(flow, &response, components.config.timeout).await?;
            return Ok(HttpLoopOutcome::Done);
        }

        if is_upgrade {
            let handled = websocket_handoff(flow, components, &exchange).await?;
            if handled {
                return Ok(HttpLoopOutcome::Done);
            }
            continue;
        }

        let (response, close_after) = match forward_exchange(flow, components, &exchange, request_method).await {
            Ok(pair) => pair,
            Err(err) => {
                dispatch_http_error(flow, components, &exchange, &err).await;
                if err.is_pre_response() {
                    let response = match &err {
                        FlowError::Transport(TransportError::Timeout) => Response::gateway_timeout(),
                        _ => Response::bad_gateway(),
                    };
                    write_response(flow, &response, components.config.timeout).await.ok();
                }
                return Ok(HttpLoopOutcome::Done);
            }
        };

        {
            let mut ctx = HttpCtx { flow: flow.clone(), exchange: Some(exchange.clone()), error: None };
            components.interceptors.lock().expect("interceptors lock poisoned").http.dispatch(HttpEvent::Response, &mut ctx);
        }

        let final_response = exchange.lock().expect("exchange lock poisoned").response().cloned().unwrap_or(response);
        write_response(flow, &final_response, components.config.timeout).await?;

        if wants_close_request || close_after {
            return Ok(HttpLoopOutcome::Done);
        }
    }
}

fn default_port(flow: &Arc<Mutex<ConnectionFlow>>) -> u16 {
    let guard = flow.lock().expect("flow lock poisoned");
    if guard.intercept_tls {
        443
    } else {
        80
    }
}

fn split_host_port(host_header: &str, default: u16) -> (String, u16) {
    match host_header.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            (host.to_string(), port.parse().unwrap_or(default))
        }
        _ => (host_header.to_string(), default),
    }
}

/// Checks the client transport out of `flow` so the caller can run an
/// `.await` on it without holding `flow`'s `std::sync::Mutex` across
/// the await point (see `peek_first_byte`'s doc comment for why that
/// matters).
fn take_client(flow: &Arc<Mutex<ConnectionFlow>>) -> Transport {
    flow.lock().expect("flow lock poisoned").client.take().expect("client transport always present")
}

fn put_client(flow: &Arc<Mutex<ConnectionFlow>>, client: Transport) {
    flow.lock().expect("flow lock poisoned").client = Some(client);
}

fn take_server(flow: &Arc<Mutex<ConnectionFlow>>) -> Transport {
    flow.lock().expect("flow lock poisoned").server.take().expect("server transport connected before forwarding")
}

fn put_server(flow: &Arc<Mutex<ConnectionFlow>>, server: Transport) {
    flow.lock().expect("flow lock poisoned").server = Some(server);
}

async fn read_request(
    flow: &Arc<Mutex<ConnectionFlow>>,
    decoder: &mut RequestDecoder,
    limits: &DecodeLimits,
    deadline: Duration,
) -> Result<Option<Request>, FlowError> {
    loop {
        if let Some(req) = decoder.decode(limits).map_err(FlowError::Http)? {
            return Ok(Some(req));
        }
        let mut buf = [0u8; 16 * 1024];
        let mut client = take_client(flow);
        let read = client.read(&mut buf, deadline).await;
        put_client(flow, client);
        let n = match read {
            Ok(n) => n,
            Err(TransportError::Closed) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decoder.feed(&buf[..n]);
    }
}

async fn read_response(
    flow: &Arc<Mutex<ConnectionFlow>>,
    decoder: &mut ResponseDecoder,
    limits: &DecodeLimits,
    ctx: ResponseContext,
    deadline: Duration,
) -> Result<Response, FlowError> {
    loop {
        if let Some(resp) = decoder.decode(limits, ctx).map_err(FlowError::Http)? {
            return Ok(resp);
        }
        let mut buf = [0u8; 16 * 1024];
        let mut server = take_server(flow);
        let read = server.read(&mut buf, deadline).await;
        put_server(flow, server);
        let n = match read {
            Ok(n) => n,
            Err(TransportError::Closed) => {
                return decoder.finish_on_close().map_err(FlowError::Http);
            }
            Err(e) => return Err(e.into()),
        };
        decoder.feed(&buf[..n]);
    }
}

async fn write_response(flow: &Arc<Mutex<ConnectionFlow>>, response: &Response, deadline: Duration) -> Result<(), FlowError> {
    let bytes = serialize_response(response);
    let mut client = take_client(flow);
    let result = client.write_all(&bytes, deadline).await.map_err(FlowError::Transport);
    put_client(flow, client);
    result
}

/// Ensures `flow.server` is connected, dialing the flow's current target
/// if it is not. Returns `Ok(true)` once connected; on a dial/TLS
/// failure returns `Ok(false)` but stashes the real `TransportError` via
/// `out_err` so the caller can tell a `timeout` apart from any other
/// `upstream_connect_failed` and synthesize a 504 vs. 502 per §4.E/§7.
async fn ensure_server_connected(
    flow: &Arc<Mutex<ConnectionFlow>>,
    components: &Arc<ServerComponents>,
    out_err: &mut Option<TransportError>,
) -> Result<bool, FlowError> {
    let already_connected = flow.lock().expect("flow lock poisoned").server_connected();
    if already_connected {
        return Ok(true);
    }

    let (host, port, intercept_tls) = {
        let guard = flow.lock().expect("flow lock poisoned");
        (guard.target_host.clone(), guard.target_port, guard.intercept_tls)
    };
    if host.is_empty() {
        return Err(FlowError::Http(HttpError::HeaderNotFound("Host".into())));
    }

    let plain = match Transport::connect(&host, port, components.config.timeout).await {
        Ok(t) => t,
        Err(e) => {
            *out_err = Some(e);
            return Ok(false);
        }
    };

    let server = if intercept_tls {
        let connector = tls_connector(components.client_tls_config.clone());
        match plain.upgrade_client_tls(connector, &host, components.config.timeout).await {
            Ok(t) => t,
            Err(e) => {
                *out_err = Some(e);
                return Ok(false);
            }
        }
    } else {
        plain
    };

    flow.lock().expect("flow lock poisoned").server = Some(server);
    Ok(true)
}

/// Builds the 502/504 the client sees when the upstream dial itself
/// failed (§4.E "Upstream DNS or connect failure ... synthesised 502 Bad
/// Gateway (or 504 Gateway Timeout on deadline)"): a `timeout` surfaces
/// as 504, everything else (DNS, refused, etc.) as 502.
async fn synthesize_gateway_error(
    flow: &Arc<Mutex<ConnectionFlow>>,
    components: &Arc<ServerComponents>,
    request_method: HttpMethod,
    err: TransportError,
) -> Response {
    let _ = request_method;
    let is_timeout = matches!(err, TransportError::Timeout);
    let mut ctx = HttpCtx {
        flow: flow.clone(),
        exchange: None,
        error: Some(Arc::new(FlowError::Transport(err))),
    };
    components.interceptors.lock().expect("interceptors lock poisoned").http.dispatch(HttpEvent::Error, &mut ctx);
    if is_timeout {
        Response::gateway_timeout()
    } else {
        Response::bad_gateway()
    }
}

/// Forwards one exchange's request upstream and reads back the response,
/// returning whether the connection should close after this exchange.
async fn forward_exchange(
    flow: &Arc<Mutex<ConnectionFlow>>,
    components: &Arc<ServerComponents>,
    exchange: &Arc<Mutex<Exchange>>,
    request_method: HttpMethod,
) -> Result<(Response, bool), FlowError> {
    let bytes = {
        let exchange = exchange.lock().expect("exchange lock poisoned");
        serialize_request(exchange.request())
    };

    let mut server = take_server(flow);
    let sent = server.write_all(&bytes, components.config.timeout).await.map_err(FlowError::Transport);
    put_server(flow, server);
    sent?;

    let mut decoder = ResponseDecoder::new();
    let limits = DecodeLimits {
        max_head_bytes: 64 * 1024,
        max_body_bytes: Some(components.config.body_size_limit),
    };
    let ctx = ResponseContext { request_method: Some(request_method) };
    let response = read_response(flow, &mut decoder, &limits, ctx, components.config.timeout).await?;
    let close_after = response.wants_close();
    Ok((response, close_after))
}

async fn dispatch_http_error(flow: &Arc<Mutex<ConnectionFlow>>, components: &Arc<ServerComponents>, exchange: &Arc<Mutex<Exchange>>, err: &FlowError) {
    let mut ctx = HttpCtx {
        flow: flow.clone(),
        exchange: Some(exchange.clone()),
        error: Some(Arc::new(match err {
            FlowError::Transport(TransportError::Timeout) => FlowError::Transport(TransportError::Timeout),
            FlowError::Transport(TransportError::Closed) => FlowError::Transport(TransportError::Closed),
            other => FlowError::Transport(TransportError::Io(std::io::Error::other(other.to_string()))),
        })),
    };
    components.interceptors.lock().expect("interceptors lock poisoned").http.dispatch(HttpEvent::Error, &mut ctx);
}

/// §4.E `CONNECT` handling: sets the flow's target, lets interceptors
/// react via `http.connect`, and either tunnels immediately (strict
/// passthrough) or replies `200 Connection Established` and leaves the
/// connection ready for the next `Accepted`-style detection pass to
/// find the client's ClientHello.
async fn handle_connect(flow: &Arc<Mutex<ConnectionFlow>>, components: &Arc<ServerComponents>, request: Request) -> Result<(), FlowError> {
    let netloc = Url::parse_authority(&request.target.path)
        .or_else(|| request.host_header().and_then(Url::parse_authority))
        .ok_or_else(|| FlowError::Http(HttpError::InvalidMethod("CONNECT target is not host:port".into())))?;

    {
        let mut guard = flow.lock().expect("flow lock poisoned");
        guard.set_server_target(netloc.host.clone(), netloc.port.unwrap_or(443));
        // Default per §4.E decision rules: splice unless passthrough is
        // configured to tunnel by default; either way an interceptor may
        // still flip this before `MaybeTls` reads it.
        guard.intercept_tls = !components.config.tunnels_by_default();
    }

    {
        let mut ctx = HttpCtx { flow: flow.clone(), exchange: None, error: None };
        components.interceptors.lock().expect("interceptors lock poisoned").http.dispatch(HttpEvent::Connect, &mut ctx);
    }

    let response = Response::new(HttpVersion::Http11, 200, "Connection Established");
    write_response(flow, &response, components.config.timeout).await?;
    Ok(())
}

/// §4.E `HttpProxy on Upgrade: websocket`: forwards the upgrade request
/// upstream, and only if the origin actually answers `101` does the
/// proxy hand the connection off to the WebSocket relay; otherwise the
/// origin's real response (e.g. a plain `200` ignoring the upgrade) is
/// relayed as an ordinary HTTP exchange and the keep-alive loop
/// continues. Returns `true` if the connection is now fully consumed by
/// the WebSocket relay.
async fn websocket_handoff(
    flow: &Arc<Mutex<ConnectionFlow>>,
    components: &Arc<ServerComponents>,
    exchange: &Arc<Mutex<Exchange>>,
) -> Result<bool, FlowError> {
    let bytes = {
        let exchange = exchange.lock().expect("exchange lock poisoned");
        serialize_request(exchange.request())
    };
    let mut server = take_server(flow);
    let sent = server.write_all(&bytes, components.config.timeout).await.map_err(FlowError::Transport);
    put_server(flow, server);
    sent?;

    let mut decoder = ResponseDecoder::new();
    let limits = DecodeLimits { max_head_bytes: 64 * 1024, max_body_bytes: Some(components.config.body_size_limit) };
    let ctx = ResponseContext { request_method: Some(HttpMethod::Get) };
    let response = read_response(flow, &mut decoder, &limits, ctx, components.config.timeout).await?;

    if !response.is_websocket_switch() {
        write_response(flow, &response, components.config.timeout).await?;
        return Ok(false);
    }

    exchange.lock().expect("exchange lock poisoned").set_response(response.clone());
    {
        let mut ctx = HttpCtx { flow: flow.clone(), exchange: Some(exchange.clone()), error: None };
        components.interceptors.lock().expect("interceptors lock poisoned").http.dispatch(HttpEvent::WebSocketHandshake, &mut ctx);
    }

    write_response(flow, &response, components.config.timeout).await?;

    let deflate = response
        .headers
        .get("Sec-WebSocket-Extensions")
        .and_then(negotiate_permessage_deflate);

    let intercepted = {
        let guard = flow.lock().expect("flow lock poisoned");
        !components.config.ws_strict_passthrough()
            && (!components.config.ws_tunnels_by_default() || guard.intercept_websocket)
    };
    let session = Arc::new(Mutex::new(WebSocketSession::new(intercepted)));

    {
        let mut ctx = WebSocketCtx { flow: flow.clone(), session: session.clone() };
        components.interceptors.lock().expect("interceptors lock poisoned").websocket.dispatch(WebSocketEvent::Start, &mut ctx);
    }

    let (client, server) = {
        let mut guard = flow.lock().expect("flow lock poisoned");
        guard.take_transports().expect("both sides connected before websocket handoff")
    };

    let (to_client, to_server) = build_pipelines(deflate);
    let result = crate::websocket::run(
        flow.clone(),
        session.clone(),
        client,
        server,
        to_client,
        to_server,
        components.config.tunnel_timeout,
        &components.interceptors,
    )
    .await;

    match result {
        Ok((client, server)) => {
            flow.lock().expect("flow lock poisoned").put_transports(client, server);
        }
        Err(e) => {
            let mut ctx = WebSocketCtx { flow: flow.clone(), session: session.clone() };
            let mut interceptors = components.interceptors.lock().expect("interceptors lock poisoned");
            interceptors.websocket.dispatch(WebSocketEvent::Error, &mut ctx);
            drop(interceptors);
            warn!(target: "aether::websocket", error = %e, "websocket relay ended with error");
        }
    }

    {
        let mut ctx = WebSocketCtx { flow: flow.clone(), session: session.clone() };
        components.interceptors.lock().expect("interceptors lock poisoned").websocket.dispatch(WebSocketEvent::Stop, &mut ctx);
    }

    Ok(true)
}

/// Computes the response this proxy would send if it were answering the
/// WebSocket upgrade itself rather than relaying the origin's. Currently
/// unused by the relay path (the origin's own `101` is always relayed
/// verbatim, per RFC 6455 — the proxy never invents its own accept key),
/// kept as a building block for a future synthesized-handshake mode
/// (e.g. `make_response` short-circuiting a WS upgrade).
#[allow(dead_code)]
fn synthesize_handshake_response(request_headers: &HeaderMap) -> Option<Response> {
    let key = request_headers.get("Sec-WebSocket-Key")?;
    let mut response = Response::new(HttpVersion::Http11, 101, "Switching Protocols");
    response.headers.set("Upgrade", "websocket");
    response.headers.set("Connection", "Upgrade");
    response.headers.set("Sec-WebSocket-Accept", accept_key(key));
    if let Some(extensions) = request_headers.get("Sec-WebSocket-Extensions") {
        if let Some(params) = negotiate_permessage_deflate(extensions) {
            response.headers.set("Sec-WebSocket-Extensions", render_extensions_header(&params));
        }
    }
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_host_port_parses_explicit_port() {
        assert_eq!(split_host_port("example.test:8080", 80), ("example.test".to_string(), 8080));
    }

    #[test]
    fn split_host_port_falls_back_to_default() {
        assert_eq!(split_host_port("example.test", 80), ("example.test".to_string(), 80));
    }
}
