//! Incremental HTTP/1 response decoding and serialization (§4.D).
//!
//! Response body framing depends on more than just the response's own
//! headers (RFC 7230 §3.3.3): a response to a `HEAD` request, or with a
//! `1xx`/`204`/`304` status, never has a body no matter what
//! `Content-Length` says, and a response with neither `Content-Length`
//! nor `chunked` runs until the connection closes. Callers supply that
//! context via `ResponseContext`.

use aether_core::error::HttpError;
use aether_core::{HeaderMap, HttpMethod, HttpVersion, Response};

use crate::chunked::{encode_chunked, try_decode_chunked};
use crate::limits::DecodeLimits;

#[derive(Debug, Clone, Copy)]
enum BodyMode {
    None,
    Fixed(usize),
    Chunked,
    UntilClose,
}

/// What the decoder needs to know beyond the response's own bytes to
/// apply RFC 7230 §3.3.3's body-framing exceptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseContext {
    pub request_method: Option<HttpMethod>,
}

#[derive(Default)]
pub struct ResponseDecoder {
    buf: Vec<u8>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Tries to decode one complete response. For `UntilClose` framing
    /// this always returns `Ok(None)` until `finish_on_close` is called,
    /// since completion can only be known when the upstream connection
    /// actually closes.
    pub fn decode(
        &mut self,
        limits: &DecodeLimits,
        ctx: ResponseContext,
    ) -> Result<Option<Response>, HttpError> {
        let head_end = match find_double_crlf(&self.buf) {
            Some(idx) => idx,
            None => {
                if self.buf.len() > limits.max_head_bytes {
                    return Err(HttpError::HeaderNotFound("response head exceeds size limit".into()));
                }
                return Ok(None);
            }
        };

        let head = std::str::from_utf8(&self.buf[..head_end])
            .map_err(|_| HttpError::InvalidStatus("response head is not valid UTF-8".into()))?;
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or("");
        let mut parts = status_line.splitn(3, ' ');
        let version_str = parts.next().unwrap_or("");
        let status_str = parts.next().unwrap_or("");
        let reason = parts.next().unwrap_or("").to_string();

        let version: HttpVersion = version_str.parse()?;
        let status: u16 = status_str
            .parse()
            .map_err(|_| HttpError::InvalidStatus(status_str.to_string()))?;

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

        let mode = body_mode(status, ctx.request_method, &headers)?;
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
            BodyMode::UntilClose => return Ok(None),
        };

        let mut response = Response::new(version, status, reason);
        response.headers = headers;
        response.body = body;

        self.buf.drain(..body_end);
        Ok(Some(response))
    }

    /// Finalizes a close-delimited response once the upstream connection
    /// has actually closed: whatever head + body bytes were buffered
    /// become the response verbatim.
    pub fn finish_on_close(&mut self) -> Result<Response, HttpError> {
        let head_end = find_double_crlf(&self.buf)
            .ok_or_else(|| HttpError::Incomplete)?;
        let head = std::str::from_utf8(&self.buf[..head_end])
            .map_err(|_| HttpError::InvalidStatus("response head is not valid UTF-8".into()))?;
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or("");
        let mut parts = status_line.splitn(3, ' ');
        let version: HttpVersion = parts.next().unwrap_or("").parse()?;
        let status_str = parts.next().unwrap_or("");
        let status: u16 = status_str
            .parse()
            .map_err(|_| HttpError::InvalidStatus(status_str.to_string()))?;
        let reason = parts.next().unwrap_or("").to_string();

        let mut headers = HeaderMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.append(name.trim(), value.trim());
            }
        }

        let mut response = Response::new(version, status, reason);
        let body = self.buf[head_end + 4..].to_vec();
        self.buf.clear();
        response.headers = headers;
        response.body = body;
        Ok(response)
    }
}

fn body_mode(status: u16, request_method: Option<HttpMethod>, headers: &HeaderMap) -> Result<BodyMode, HttpError> {
    if matches!(request_method, Some(HttpMethod::Head)) || status < 200 || status == 204 || status == 304 {
        return Ok(BodyMode::None);
    }
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
    Ok(BodyMode::UntilClose)
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Serializes `response` onto the wire, same re-chunking rule as
/// `serialize_request`.
pub fn serialize_response(response: &Response) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        format!("{} {} {}\r\n", response.version, response.status, response.reason).as_bytes(),
    );

    let wants_chunked = response.headers.has_value("Transfer-Encoding", "chunked");
    let mut wrote_length = false;
    for (name, value) in response.headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            if wants_chunked {
                continue;
            }
            wrote_length = true;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if !wrote_length && !wants_chunked && !response.body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", response.body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");

    if wants_chunked {
        out.extend_from_slice(&encode_chunked(&response.body));
    } else {
        out.extend_from_slice(&response.body);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fixed_length_response() {
        let mut decoder = ResponseDecoder::new();
        decoder.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
        let resp = decoder
            .decode(&DecodeLimits::default(), ResponseContext::default())
            .unwrap()
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hi");
    }

    #[test]
    fn head_response_has_no_body_even_with_content_length() {
        let mut decoder = ResponseDecoder::new();
        decoder.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n");
        let ctx = ResponseContext {
            request_method: Some(HttpMethod::Head),
        };
        let resp = decoder.decode(&DecodeLimits::default(), ctx).unwrap().unwrap();
        assert!(resp.body.is_empty());
    }

    #[test]
    fn no_content_length_waits_for_close() {
        let mut decoder = ResponseDecoder::new();
        decoder.feed(b"HTTP/1.1 200 OK\r\n\r\nsome data");
        assert!(decoder
            .decode(&DecodeLimits::default(), ResponseContext::default())
            .unwrap()
            .is_none());
        let resp = decoder.finish_on_close().unwrap();
        assert_eq!(resp.body, b"some data");
    }

    #[test]
    fn status_204_has_no_body() {
        let mut decoder = ResponseDecoder::new();
        decoder.feed(b"HTTP/1.1 204 No Content\r\n\r\n");
        let resp = decoder
            .decode(&DecodeLimits::default(), ResponseContext::default())
            .unwrap()
            .unwrap();
        assert!(resp.body.is_empty());
    }
}
