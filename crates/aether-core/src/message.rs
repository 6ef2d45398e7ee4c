use crate::headers::HeaderMap;
use crate::method::{HttpMethod, HttpVersion};
use crate::url::Url;

/// An HTTP request (§3). `body` always holds the decoded payload —
/// dechunked if `Transfer-Encoding: chunked` was present on the wire.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: HttpMethod,
    pub target: Url,
    pub version: HttpVersion,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: HttpMethod, target: Url, version: HttpVersion) -> Self {
        Self {
            method,
            target,
            version,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn host_header(&self) -> Option<&str> {
        self.headers.get("Host")
    }

    /// The effective target host, preferring the absolute-form URL's host
    /// over the `Host` header (origin-form requests carry only the latter).
    pub fn target_host(&self) -> Option<&str> {
        self.target
            .netloc
            .as_ref()
            .map(|n| n.host.as_str())
            .or_else(|| self.host_header().map(|h| h.split(':').next().unwrap_or(h)))
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.headers.has_value("Connection", "upgrade") && self.headers.has_value("Upgrade", "websocket")
    }

    /// Whether keep-alive should continue after this request, per the
    /// `Connection` header tie-break rule (§4.E); version-based defaults
    /// are applied by the caller using `HttpVersion::implies_close`.
    pub fn wants_close(&self) -> bool {
        self.headers.has_value("Connection", "close")
    }
}

/// An HTTP response (§3).
#[derive(Debug, Clone)]
pub struct Response {
    pub version: HttpVersion,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(version: HttpVersion, status: u16, reason: impl Into<String>) -> Self {
        Self {
            version,
            status,
            reason: reason.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Builds a short synthetic response, as the proxy emits for
    /// pre-response failures and for `make_response` short-circuits (§4.E, §4.F).
    pub fn synthetic(status: u16, reason: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let mut resp = Response::new(HttpVersion::Http11, status, reason);
        resp.headers.set("Content-Type", content_type);
        resp.headers.set("Content-Length", body.len().to_string());
        resp.headers.set("Connection", "close");
        resp.body = body;
        resp
    }

    pub fn bad_gateway() -> Self {
        Self::synthetic(502, "Bad Gateway", "text/plain", "Bad Gateway".as_bytes().to_vec())
    }

    pub fn gateway_timeout() -> Self {
        Self::synthetic(504, "Gateway Timeout", "text/plain", "Gateway Timeout".as_bytes().to_vec())
    }

    pub fn wants_close(&self) -> bool {
        self.headers.has_value("Connection", "close")
            || (self.version.implies_close() && !self.headers.has_value("Connection", "keep-alive"))
    }

    pub fn is_websocket_switch(&self) -> bool {
        self.status == 101 && self.headers.has_value("Upgrade", "websocket")
    }
}

/// Binds one request to at most one response (§3). The response may be
/// synthesised by an interceptor via `make_response`, short-circuiting
/// upstream I/O entirely.
#[derive(Debug, Clone)]
pub struct Exchange {
    request: Request,
    response: Option<Response>,
    synthesized: bool,
}

impl Exchange {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
            synthesized: false,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    /// Short-circuits upstream I/O: an interceptor supplies the response directly.
    pub fn make_response(&mut self, response: Response) {
        self.response = Some(response);
        self.synthesized = true;
    }

    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_host_prefers_absolute_form() {
        let req = Request::new(
            HttpMethod::Get,
            Url::parse("http://example.test/"),
            HttpVersion::Http11,
        );
        assert_eq!(req.target_host(), Some("example.test"));
    }

    #[test]
    fn target_host_falls_back_to_host_header() {
        let mut req = Request::new(HttpMethod::Get, Url::parse("/"), HttpVersion::Http11);
        req.headers.set("Host", "example.test:8080");
        assert_eq!(req.target_host(), Some("example.test"));
    }

    #[test]
    fn websocket_upgrade_detection() {
        let mut req = Request::new(HttpMethod::Get, Url::parse("/ws"), HttpVersion::Http11);
        req.headers.set("Connection", "Upgrade");
        req.headers.set("Upgrade", "websocket");
        assert!(req.is_websocket_upgrade());
    }

    #[test]
    fn make_response_marks_synthesized() {
        let req = Request::new(HttpMethod::Get, Url::parse("/"), HttpVersion::Http11);
        let mut exch = Exchange::new(req);
        exch.make_response(Response::synthetic(404, "Not Found", "text/plain", "nope"));
        assert!(exch.is_synthesized());
        assert_eq!(exch.response().unwrap().status, 404);
    }
}
