//! Incremental HTTP/1 request decoding and serialization (§4.D).

use aether_core::error::HttpError;
use aether_core::{HeaderMap, HttpMethod, HttpVersion, Request, Url};

use crate::chunked::{encode_chunked, try_decode_chunked};
use crate::limits::DecodeLimits;

#[derive(Debug, Clone, Copy)]
enum BodyMode {
    None,
    Fixed(usize),
    Chunked,
}

/// Accumulates bytes read from the client and yields one `Request` per
/// call once a full message is available, leaving any bytes belonging
/// to a pipelined next request in the buffer.
#[derive(Default)]
pub struct RequestDecoder {
    buf: Vec<u8>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Tries to decode one complete request from the buffered bytes.
    /// Returns `Ok(None)` when more bytes are required.
    pub fn decode(&mut self, limits: &DecodeLimits) -> Result<Option<Request>, HttpError> {
        let head_end = match find_double_crlf(&self.buf) {
            Some(idx) => idx,
            None => {
                if self.buf.len() > limits.max_head_bytes {
                    return Err(HttpError::HeaderNotFound("request head exceeds size limit".into()));
                }
                return Ok(None);
            }
        };

        let head = std::str::from_utf8(&self.buf[..head_end])
            .map_err(|_| HttpError::InvalidMethod("request head is not valid UTF-8".into()))?;
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or("");
        let mut parts = request_line.splitn(3, ' ');
        let method_str = parts.next().unwrap_or("");
        let target_str = parts.next().unwrap_or("");
        let version_str = parts.next().unwrap_or("");

        let method: HttpMethod = method_str.parse()?;
        let version: HttpVersion = version_str.parse()?;
        let target = Url::parse(target_str);

        let mut headers = HeaderMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpError::HeaderNotFound(format!("malformed header line: {line:?}")))?;
            headers.append(name.trim(), value.trim());
        }

        let mode = body_mode(&headers)?;
        let body_start = head_end + 4;

        let (body, body_end) = match mode {
            BodyMode::None => (Vec::new(), body_start),
            BodyMode::Fixed(len) => {
                if let Some(max) = limits.max_body_bytes {
                    if len > max {
                        return Err(HttpError::BodyTooLarge { limit: max });
                    }
                }
                if self.buf.len() < body_start + len {
                    return Ok(None);
                }
                (self.buf[body_start..body_start + len].to_vec(), body_start + len)
            }
            BodyMode::Chunked => match try_decode_chunked(&self.buf[body_start..], limits)? {
                Some((body, consumed)) => (body, body_start + consumed),
                None => return Ok(None),
            },
        };

        let mut request = Request::new(method, target, version);
        request.headers = headers;
        request.body = body;

        self.buf.drain(..body_end);
        Ok(Some(request))
    }
}

fn body_mode(headers: &HeaderMap) -> Result<BodyMode, HttpError> {
    if headers.has_value("Transfer-Encoding", "chunked") {
        return Ok(BodyMode::Chunked);
    }
    if let Some(len) = headers.get("Content-Length") {
        let len: usize = len
            .trim()
            .parse()
            .map_err(|_| HttpError::MalformedChunked(format!("invalid Content-Length: {len:?}")))?;
        return Ok(BodyMode::Fixed(len));
    }
    Ok(BodyMode::None)
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Serializes `request` onto the wire. If the body is non-empty and no
/// `Content-Length`/`Transfer-Encoding` survived interception, a
/// `Content-Length` is added; an explicit `chunked` request is
/// re-chunked rather than flattened, so intercepted edits don't silently
/// change the framing the origin server was told to expect.
pub fn serialize_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("{} {} {}\r\n", request.method, request.target, request.version).as_bytes());

    let wants_chunked = request.headers.has_value("Transfer-Encoding", "chunked");
    let mut wrote_length = false;
    for (name, value) in request.headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            if wants_chunked {
                continue;
            }
            wrote_length = true;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if !wrote_length && !wants_chunked && !request.body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", request.body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");

    if wants_chunked {
        out.extend_from_slice(&encode_chunked(&request.body));
    } else {
        out.extend_from_slice(&request.body);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_get() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"GET /a/b HTTP/1.1\r\nHost: example.test\r\n\r\n");
        let req = decoder.decode(&DecodeLimits::default()).unwrap().unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.headers.get("Host"), Some("example.test"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn waits_for_more_bytes_on_partial_head() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"GET / HTTP/1.1\r\nHost: ex");
        assert!(decoder.decode(&DecodeLimits::default()).unwrap().is_none());
    }

    #[test]
    fn decodes_fixed_length_body() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        let req = decoder.decode(&DecodeLimits::default()).unwrap().unwrap();
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn decodes_chunked_body() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"POST /submit HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n");
        let req = decoder.decode(&DecodeLimits::default()).unwrap().unwrap();
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn leaves_pipelined_bytes_in_buffer() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
        let first = decoder.decode(&DecodeLimits::default()).unwrap().unwrap();
        assert_eq!(first.target.path, "/a");
        let second = decoder.decode(&DecodeLimits::default()).unwrap().unwrap();
        assert_eq!(second.target.path, "/b");
    }

    #[test]
    fn serializes_request_with_content_length() {
        let mut req = Request::new(HttpMethod::Post, Url::parse("/x"), HttpVersion::Http11);
        req.body = b"abc".to_vec();
        let bytes = serialize_request(&req);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("POST /x HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.ends_with("abc"));
    }
}
