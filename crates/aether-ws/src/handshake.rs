//! WebSocket upgrade handshake helpers (RFC 6455 §1.3, §4.I): computing
//! `Sec-WebSocket-Accept` and negotiating the `permessage-deflate`
//! extension (RFC 7692) from whatever the client offered.

use base64::Engine;
use sha1::{Digest, Sha1};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a given
/// `Sec-WebSocket-Key`, per RFC 6455 §1.3: SHA-1 of the key concatenated
/// with the magic GUID, base64-encoded.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Negotiated `permessage-deflate` parameters (RFC 7692 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermessageDeflateParams {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
}

impl Default for PermessageDeflateParams {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
        }
    }
}

/// Parses a `Sec-WebSocket-Extensions` header value and, if one of the
/// offers names `permessage-deflate`, returns the parameters the proxy
/// will accept. The proxy always accepts the first `permessage-deflate`
/// offer it sees and answers with the client's own window-bits values
/// capped to a valid range, never renegotiating a stricter one of its own.
pub fn negotiate_permessage_deflate(extensions_header: &str) -> Option<PermessageDeflateParams> {
    for offer in extensions_header.split(',') {
        let mut params = offer.split(';').map(str::trim);
        let name = params.next()?;
        if !name.eq_ignore_ascii_case("permessage-deflate") {
            continue;
        }

        let mut result = PermessageDeflateParams::default();
        for param in params {
            if param.is_empty() {
                continue;
            }
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            match key {
                "server_no_context_takeover" => result.server_no_context_takeover = true,
                "client_no_context_takeover" => result.client_no_context_takeover = true,
                "server_max_window_bits" => {
                    if let Ok(bits) = value.parse::<u8>() {
                        result.server_max_window_bits = bits.clamp(8, 15);
                    }
                }
                "client_max_window_bits" => {
                    if let Ok(bits) = value.parse::<u8>() {
                        result.client_max_window_bits = bits.clamp(8, 15);
                    }
                }
                _ => {}
            }
        }
        return Some(result);
    }
    None
}

/// Renders the `Sec-WebSocket-Extensions` response value for accepted
/// `permessage-deflate` parameters.
pub fn render_extensions_header(params: &PermessageDeflateParams) -> String {
    let mut parts = vec!["permessage-deflate".to_string()];
    if params.server_no_context_takeover {
        parts.push("server_no_context_takeover".to_string());
    }
    if params.client_no_context_takeover {
        parts.push("client_no_context_takeover".to_string());
    }
    parts.push(format!("server_max_window_bits={}", params.server_max_window_bits));
    parts.push(format!("client_max_window_bits={}", params.client_max_window_bits));
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_known_accept_value() {
        // Example key/value pair from RFC 6455 §1.3.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn negotiates_permessage_deflate_with_params() {
        let params =
            negotiate_permessage_deflate("permessage-deflate; client_max_window_bits=10; server_no_context_takeover")
                .unwrap();
        assert_eq!(params.client_max_window_bits, 10);
        assert!(params.server_no_context_takeover);
        assert!(!params.client_no_context_takeover);
    }

    #[test]
    fn returns_none_when_not_offered() {
        assert!(negotiate_permessage_deflate("x-other-extension").is_none());
    }
}
