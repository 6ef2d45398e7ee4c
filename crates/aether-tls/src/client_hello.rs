//! TLS record peeking and `ClientHello` parsing (§4.B). Reads the raw
//! bytes of the first TLS record from the client *before* any handshake
//! is started, so the proxy can inspect SNI/ALPN and decide whether to
//! splice or tunnel. The bytes consumed are handed back to the caller so
//! they can be replayed into the eventual handshake — `read_client_hello`
//! never discards what it reads (Testable Property 4 in the original spec).

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use aether_core::error::TlsError;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;
const CLIENT_HELLO_HANDSHAKE_TYPE: u8 = 0x01;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_ALPN: u16 = 0x0010;

/// A single SNI entry. `name_type` is `0` for `host_name`, the only type
/// defined by RFC 6066, but other values are passed through unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerName {
    pub name_type: u8,
    pub host_name: String,
}

/// The subset of a TLS 1.0–1.2-framed ClientHello the proxy cares about (§3).
#[derive(Debug, Clone, Default)]
pub struct ClientHello {
    pub legacy_version: (u8, u8),
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub server_names: Vec<ServerName>,
    pub alpn: Vec<Vec<u8>>,
    pub extensions: HashMap<u16, Vec<u8>>,
}

impl ClientHello {
    pub fn has_server_names(&self) -> bool {
        !self.server_names.is_empty()
    }

    pub fn has_alpn(&self) -> bool {
        !self.alpn.is_empty()
    }

    /// The first `host_name`-typed SNI entry, if any.
    pub fn sni(&self) -> Option<&str> {
        self.server_names
            .iter()
            .find(|sn| sn.name_type == 0)
            .map(|sn| sn.host_name.as_str())
    }

    pub fn alpn_strings(&self) -> Vec<String> {
        self.alpn
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    /// Parses a ClientHello from the full raw bytes of one TLS record
    /// (record header + handshake header + body), mirroring
    /// `client_hello::from_raw_data` in the original implementation.
    pub fn from_raw_record(raw: &[u8]) -> Result<Self, TlsError> {
        if raw.len() < RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN {
            return Err(TlsError::InvalidClientHello("record too short".into()));
        }

        let record_header = &raw[0..RECORD_HEADER_LEN];
        if record_header[0] != 0x16 || record_header[1] != 0x03 || record_header[2] > 0x03 {
            return Err(TlsError::InvalidClientHello("not a TLS handshake record".into()));
        }
        let record_len = u16::from_be_bytes([record_header[3], record_header[4]]) as usize;
        if raw.len() != RECORD_HEADER_LEN + record_len {
            return Err(TlsError::InvalidClientHello("record length mismatch".into()));
        }

        let handshake_header = &raw[RECORD_HEADER_LEN..RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN];
        if handshake_header[0] != CLIENT_HELLO_HANDSHAKE_TYPE {
            return Err(TlsError::InvalidClientHello("not a ClientHello message".into()));
        }
        let handshake_len =
            ((handshake_header[1] as usize) << 16) | ((handshake_header[2] as usize) << 8) | handshake_header[3] as usize;
        if handshake_len != record_len - HANDSHAKE_HEADER_LEN {
            return Err(TlsError::InvalidClientHello("handshake length mismatch".into()));
        }

        let body = &raw[RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN..];
        let mut cursor = Cursor { data: body, pos: 0 };

        let mut result = ClientHello::default();
        result.legacy_version = (cursor.take_byte()?, cursor.take_byte()?);
        cursor.skip(32)?; // random

        let session_id_len = cursor.take_byte()? as usize;
        cursor.skip(session_id_len)?;

        let ciphers_len = cursor.take_u16()? as usize;
        let ciphers_end = cursor.pos + ciphers_len;
        while cursor.pos < ciphers_end {
            result.cipher_suites.push(cursor.take_u16()?);
        }
        if cursor.pos != ciphers_end {
            return Err(TlsError::InvalidClientHello("invalid cipher suites length".into()));
        }

        let compression_len = cursor.take_byte()? as usize;
        result.compression_methods = cursor.take_bytes(compression_len)?.to_vec();

        if cursor.remaining() == 0 {
            return Ok(result);
        }

        let extensions_len = cursor.take_u16()? as usize;
        let extensions_end = cursor.pos + extensions_len;
        while cursor.pos < extensions_end {
            let ext_type = cursor.take_u16()?;
            let ext_len = cursor.take_u16()? as usize;

            if ext_type == EXT_SERVER_NAME {
                let list_len = cursor.take_u16()? as usize;
                let list_end = cursor.pos + list_len;
                while cursor.pos < list_end {
                    let name_type = cursor.take_byte()?;
                    let name_len = cursor.take_u16()? as usize;
                    let name = cursor.take_bytes(name_len)?;
                    result.server_names.push(ServerName {
                        name_type,
                        host_name: String::from_utf8_lossy(name).into_owned(),
                    });
                }
                if cursor.pos != list_end {
                    return Err(TlsError::InvalidClientHello("malformed server_name extension".into()));
                }
            } else if ext_type == EXT_ALPN {
                let list_len = cursor.take_u16()? as usize;
                let list_end = cursor.pos + list_len;
                while cursor.pos < list_end {
                    let proto_len = cursor.take_byte()? as usize;
                    let proto = cursor.take_bytes(proto_len)?;
                    result.alpn.push(proto.to_vec());
                }
                if cursor.pos != list_end {
                    return Err(TlsError::InvalidClientHello("malformed ALPN extension".into()));
                }
            } else {
                let data = cursor.take_bytes(ext_len)?;
                if result.extensions.insert(ext_type, data.to_vec()).is_some() {
                    return Err(TlsError::InvalidClientHello("duplicate extension".into()));
                }
            }
        }
        if cursor.pos != extensions_end {
            return Err(TlsError::InvalidClientHello("invalid extensions length".into()));
        }
        if cursor.remaining() != 0 {
            return Err(TlsError::InvalidClientHello("trailing bytes after ClientHello".into()));
        }

        Ok(result)
    }
}

/// Bounds-checked cursor over a byte slice; any out-of-bounds read becomes
/// `invalid_client_hello` rather than a panic.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.pos + n > self.data.len() {
            return Err(TlsError::InvalidClientHello("not enough data available".into()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_byte(&mut self) -> Result<u8, TlsError> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, TlsError> {
        let b = self.take_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), TlsError> {
        self.take_bytes(n)?;
        Ok(())
    }
}

/// Reads one TLS record containing a ClientHello from `stream`, without
/// consuming it from the handshake's point of view: the exact bytes read
/// are returned alongside the parsed structure so the caller can splice
/// them back in front of the live socket before handing it to the TLS
/// library (§4.B, §8 property 4).
pub async fn read_client_hello<R>(stream: &mut R) -> Result<(ClientHello, Bytes), TlsError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; RECORD_HEADER_LEN];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| TlsError::InvalidClientHello(format!("failed to read record header: {e}")))?;

    if buf[0] != 0x16 || buf[1] != 0x03 || buf[2] > 0x03 {
        return Err(TlsError::InvalidClientHello("not a TLS handshake record".into()));
    }
    let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;

    let mut rest = vec![0u8; record_len];
    stream
        .read_exact(&mut rest)
        .await
        .map_err(|e| TlsError::InvalidClientHello(format!("failed to read record body: {e}")))?;
    buf.extend_from_slice(&rest);

    let hello = ClientHello::from_raw_record(&buf)?;
    Ok((hello, Bytes::from(buf)))
}

/// Splices previously-consumed bytes back in front of a live stream so
/// the TLS handshake sees exactly what the client sent, as if the
/// ClientHello peek never happened.
pub struct ReplayPrefixed<S> {
    prefix: Bytes,
    prefix_pos: usize,
    inner: S,
}

impl<S> ReplayPrefixed<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self {
            prefix,
            prefix_pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayPrefixed<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.prefix_pos < this.prefix.len() {
            let remaining = &this.prefix[this.prefix_pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.prefix_pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReplayPrefixed<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_be(v: u16) -> [u8; 2] {
        v.to_be_bytes()
    }

    /// Builds a minimal but well-formed ClientHello record with the given
    /// SNI host and ALPN protocols, for round-trip testing.
    fn build_client_hello_record(sni: &str, alpn: &[&str]) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(0x03);
        body.push(0x03); // legacy_version = TLS 1.2
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session_id_len = 0
        body.extend_from_slice(&u16_be(2)); // cipher suites length
        body.extend_from_slice(&[0x00, 0x2f]); // one cipher suite
        body.push(1); // compression methods length
        body.push(0); // null compression

        let mut extensions = Vec::new();

        // server_name extension
        let mut sni_list = Vec::new();
        sni_list.push(0u8); // host_name type
        sni_list.extend_from_slice(&u16_be(sni.len() as u16));
        sni_list.extend_from_slice(sni.as_bytes());
        let mut sni_ext = Vec::new();
        sni_ext.extend_from_slice(&u16_be(sni_list.len() as u16));
        sni_ext.extend_from_slice(&sni_list);
        extensions.extend_from_slice(&u16_be(EXT_SERVER_NAME));
        extensions.extend_from_slice(&u16_be(sni_ext.len() as u16));
        extensions.extend_from_slice(&sni_ext);

        // ALPN extension
        if !alpn.is_empty() {
            let mut alpn_list = Vec::new();
            for proto in alpn {
                alpn_list.push(proto.len() as u8);
                alpn_list.extend_from_slice(proto.as_bytes());
            }
            let mut alpn_ext = Vec::new();
            alpn_ext.extend_from_slice(&u16_be(alpn_list.len() as u16));
            alpn_ext.extend_from_slice(&alpn_list);
            extensions.extend_from_slice(&u16_be(EXT_ALPN));
            extensions.extend_from_slice(&u16_be(alpn_ext.len() as u16));
            extensions.extend_from_slice(&alpn_ext);
        }

        body.extend_from_slice(&u16_be(extensions.len() as u16));
        body.extend_from_slice(&extensions);

        let mut handshake = Vec::new();
        handshake.push(CLIENT_HELLO_HANDSHAKE_TYPE);
        let len = body.len() as u32;
        handshake.push((len >> 16) as u8);
        handshake.push((len >> 8) as u8);
        handshake.push(len as u8);
        handshake.extend_from_slice(&body);

        let mut record = Vec::new();
        record.push(0x16);
        record.push(0x03);
        record.push(0x03);
        record.extend_from_slice(&u16_be(handshake.len() as u16));
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn parses_sni_and_alpn() {
        let record = build_client_hello_record("example.test", &["http/1.1", "h2"]);
        let hello = ClientHello::from_raw_record(&record).unwrap();
        assert_eq!(hello.sni(), Some("example.test"));
        assert_eq!(hello.alpn_strings(), vec!["http/1.1".to_string(), "h2".to_string()]);
    }

    #[test]
    fn rejects_non_tls_record() {
        let data = [0x47, 0x45, 0x54, 0x20]; // "GET "
        assert!(ClientHello::from_raw_record(&data).is_err());
    }

    #[tokio::test]
    async fn read_client_hello_is_non_destructive() {
        let record = build_client_hello_record("example.test", &["http/1.1"]);
        let mut cursor = std::io::Cursor::new(record.clone());
        let (hello, consumed) = read_client_hello(&mut cursor).await.unwrap();
        assert_eq!(hello.sni(), Some("example.test"));
        assert_eq!(consumed.as_ref(), record.as_slice());
    }

    #[tokio::test]
    async fn replay_prefixed_returns_consumed_bytes_then_the_rest() {
        let record = build_client_hello_record("example.test", &[]);
        let mut cursor = std::io::Cursor::new(record.clone());
        let (_, consumed) = read_client_hello(&mut cursor).await.unwrap();

        let trailing = b"trailing application data";
        let mut rest = cursor.into_inner();
        rest.extend_from_slice(trailing);
        let full_stream = std::io::Cursor::new(rest[record.len()..].to_vec());

        let mut replayed = ReplayPrefixed::new(consumed, full_stream);
        let mut out = vec![0u8; record.len() + trailing.len()];
        replayed.read_exact(&mut out).await.unwrap();
        assert_eq!(&out[..record.len()], record.as_slice());
        assert_eq!(&out[record.len()..], trailing);
    }
}
