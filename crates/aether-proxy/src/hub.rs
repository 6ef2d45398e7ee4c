//! `InterceptorHub`: a set of related callbacks attached and detached as
//! one unit, plus the two built-in hubs the proxy ships (§4.F, §9).
//! Grounded on `disable_h2c.hpp`/`.cpp` and `http_logger.hpp` in the
//! original implementation, where each "interceptor service" is a small
//! class overriding one `operator()` and naming the single event family
//! it wants. Here a hub is a function that attaches zero or more
//! callbacks across the seven `Interceptors` dispatchers and returns the
//! `HubHandle` needed to detach them later.

use tracing::info;

use crate::events::{HttpCtx, HttpEvent, HubHandle, Interceptors};
use crate::flow::ConnectionFlow;

/// Implemented by anything that wires a related set of callbacks into
/// `Interceptors` in one call. The default methods of `Interceptors`
/// itself have no notion of "hubs" — this trait exists purely to give
/// built-in and user-supplied bundles of callbacks a common shape.
pub trait InterceptorHub {
    fn attach_all(&self, interceptors: &mut Interceptors) -> HubHandle;
}

/// Strips `Upgrade: h2c` from every request, so an HTTP/1.1 client can
/// never trick an intercepted connection into upgrading to cleartext
/// HTTP/2 mid-stream (the proxy has no h2c support and would otherwise
/// pass the upgrade through to an origin that does).
pub struct DisableH2c;

impl InterceptorHub for DisableH2c {
    fn attach_all(&self, interceptors: &mut Interceptors) -> HubHandle {
        let id = interceptors.http.attach(HttpEvent::AnyRequest, |ctx: &mut HttpCtx| {
            let Some(exchange) = &ctx.exchange else { return };
            let mut exchange = exchange.lock().expect("exchange lock poisoned");
            let req = exchange.request_mut();
            if req.headers.has_value("Upgrade", "h2c") {
                req.headers.remove("Upgrade");
            }
        });
        HubHandle {
            http: vec![(HttpEvent::AnyRequest, id)],
            ..Default::default()
        }
    }
}

/// Logs the absolute request line of every HTTP/1.1 request the proxy
/// sees, the way the original's `http_logger` does for its configured
/// log stream — here routed through `tracing` instead of a templated
/// output stream, matching how the rest of the workspace logs (§9).
pub struct HttpLogger;

impl InterceptorHub for HttpLogger {
    fn attach_all(&self, interceptors: &mut Interceptors) -> HubHandle {
        let id = interceptors.http.attach(HttpEvent::AnyRequest, |ctx: &mut HttpCtx| {
            let Some(exchange) = &ctx.exchange else { return };
            let exchange = exchange.lock().expect("exchange lock poisoned");
            let flow = ctx.flow.lock().expect("flow lock poisoned");
            info!(target: "aether::http", "{}", absolute_request_line(&flow, exchange.request()));
        });
        HubHandle {
            http: vec![(HttpEvent::AnyRequest, id)],
            ..Default::default()
        }
    }
}

/// Renders `METHOD scheme://host[:port]path?query HTTP/x.y`, filling in
/// scheme/host/port from the flow's connect target when the request
/// target itself is origin-form (the common case once a CONNECT tunnel
/// is established and interception has started).
fn absolute_request_line(flow: &ConnectionFlow, req: &aether_core::Request) -> String {
    if req.target.netloc.is_some() {
        return format!("{} {} {}", req.method, req.target, req.version);
    }
    let scheme = if flow.should_intercept_tls() { "https" } else { "http" };
    let mut target = format!("{scheme}://{}", flow.target_host);
    if flow.target_port != 0 && flow.target_port != default_port(scheme) {
        target.push_str(&format!(":{}", flow.target_port));
    }
    target.push_str(&req.target.path);
    if let Some(q) = &req.target.query {
        target.push('?');
        target.push_str(q);
    }
    format!("{} {} {}", req.method, target, req.version)
}

fn default_port(scheme: &str) -> u16 {
    if scheme == "https" {
        443
    } else {
        80
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::{HttpMethod, HttpVersion, Request, Url};

    #[test]
    fn disable_h2c_strips_upgrade_header() {
        let mut interceptors = Interceptors::new();
        let handle = DisableH2c.attach_all(&mut interceptors);
        assert_eq!(handle.http.len(), 1);

        let mut req = Request::new(HttpMethod::Get, Url::parse("/"), HttpVersion::Http11);
        req.headers.set("Connection", "Upgrade");
        req.headers.set("Upgrade", "h2c");
        let exchange = std::sync::Arc::new(std::sync::Mutex::new(aether_core::Exchange::new(req)));

        let mut ctx = HttpCtx {
            flow: test_flow(),
            exchange: Some(exchange.clone()),
            error: None,
        };
        interceptors.http.dispatch(HttpEvent::AnyRequest, &mut ctx);

        assert!(!exchange.lock().unwrap().request().headers.contains("Upgrade"));
    }

    #[test]
    fn absolute_request_line_fills_in_origin_form_target() {
        let mut flow_guard = test_flow();
        {
            let mut flow = flow_guard.lock().unwrap();
            flow.target_host = "example.test".to_string();
            flow.target_port = 443;
            flow.intercept_tls = true;
        }
        let req = Request::new(HttpMethod::Get, Url::parse("/a/b?x=1"), HttpVersion::Http11);
        let line = absolute_request_line(&flow_guard.lock().unwrap(), &req);
        assert_eq!(line, "GET https://example.test/a/b?x=1 HTTP/1.1");
        drop(flow_guard);
    }

    fn test_flow() -> crate::events::FlowHandle {
        use crate::transport::Transport;
        use std::net::{IpAddr, Ipv4Addr};
        use std::sync::{Arc, Mutex};
        use tokio::net::{TcpListener, TcpStream};

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
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
        })
    }
}
