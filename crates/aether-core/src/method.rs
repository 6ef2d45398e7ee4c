use std::fmt;
use std::str::FromStr;

/// HTTP request method. Includes WebDAV and other extension methods the
/// proxy must still be able to parse and forward even though it only
/// gives special treatment to a handful of them (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Options,
    Put,
    Delete,
    Trace,
    Connect,
    Copy,
    Lock,
    Mkcol,
    Move,
    Propfind,
    Proppatch,
    Unlock,
    Search,
    Bind,
    Rebind,
    Unbind,
    Acl,
    Report,
    Mkactivity,
    Checkout,
    Merge,
    Msearch,
    Notify,
    Subscribe,
    Unsubscribe,
    Patch,
    Mkcalendar,
    Link,
    Unlink,
    Purge,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Copy => "COPY",
            HttpMethod::Lock => "LOCK",
            HttpMethod::Mkcol => "MKCOL",
            HttpMethod::Move => "MOVE",
            HttpMethod::Propfind => "PROPFIND",
            HttpMethod::Proppatch => "PROPPATCH",
            HttpMethod::Unlock => "UNLOCK",
            HttpMethod::Search => "SEARCH",
            HttpMethod::Bind => "BIND",
            HttpMethod::Rebind => "REBIND",
            HttpMethod::Unbind => "UNBIND",
            HttpMethod::Acl => "ACL",
            HttpMethod::Report => "REPORT",
            HttpMethod::Mkactivity => "MKACTIVITY",
            HttpMethod::Checkout => "CHECKOUT",
            HttpMethod::Merge => "MERGE",
            HttpMethod::Msearch => "M-SEARCH",
            HttpMethod::Notify => "NOTIFY",
            HttpMethod::Subscribe => "SUBSCRIBE",
            HttpMethod::Unsubscribe => "UNSUBSCRIBE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Mkcalendar => "MKCALENDAR",
            HttpMethod::Link => "LINK",
            HttpMethod::Unlink => "UNLINK",
            HttpMethod::Purge => "PURGE",
        }
    }

    pub const fn is_connect(self) -> bool {
        matches!(self, HttpMethod::Connect)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = crate::error::HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "OPTIONS" => HttpMethod::Options,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "TRACE" => HttpMethod::Trace,
            "CONNECT" => HttpMethod::Connect,
            "COPY" => HttpMethod::Copy,
            "LOCK" => HttpMethod::Lock,
            "MKCOL" => HttpMethod::Mkcol,
            "MOVE" => HttpMethod::Move,
            "PROPFIND" => HttpMethod::Propfind,
            "PROPPATCH" => HttpMethod::Proppatch,
            "UNLOCK" => HttpMethod::Unlock,
            "SEARCH" => HttpMethod::Search,
            "BIND" => HttpMethod::Bind,
            "REBIND" => HttpMethod::Rebind,
            "UNBIND" => HttpMethod::Unbind,
            "ACL" => HttpMethod::Acl,
            "REPORT" => HttpMethod::Report,
            "MKACTIVITY" => HttpMethod::Mkactivity,
            "CHECKOUT" => HttpMethod::Checkout,
            "MERGE" => HttpMethod::Merge,
            "M-SEARCH" => HttpMethod::Msearch,
            "NOTIFY" => HttpMethod::Notify,
            "SUBSCRIBE" => HttpMethod::Subscribe,
            "UNSUBSCRIBE" => HttpMethod::Unsubscribe,
            "PATCH" => HttpMethod::Patch,
            "MKCALENDAR" => HttpMethod::Mkcalendar,
            "LINK" => HttpMethod::Link,
            "UNLINK" => HttpMethod::Unlink,
            "PURGE" => HttpMethod::Purge,
            other => return Err(crate::error::HttpError::InvalidMethod(other.to_string())),
        })
    }
}

/// HTTP protocol version (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    Http20,
}

impl HttpVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Http20 => "HTTP/2.0",
        }
    }

    /// HTTP/1.0 implies connection-close semantics unless overridden by a
    /// `Connection: keep-alive` header (§4.E tie-break rule).
    pub const fn implies_close(self) -> bool {
        matches!(self, HttpVersion::Http10)
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVersion {
    type Err = crate::error::HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/1.0" => Ok(HttpVersion::Http10),
            "HTTP/1.1" => Ok(HttpVersion::Http11),
            "HTTP/2.0" | "HTTP/2" => Ok(HttpVersion::Http20),
            other => Err(crate::error::HttpError::InvalidVersion(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_known_methods() {
        for m in [HttpMethod::Get, HttpMethod::Connect, HttpMethod::Purge, HttpMethod::Patch] {
            assert_eq!(m.as_str().parse::<HttpMethod>().unwrap(), m);
        }
    }

    #[test]
    fn rejects_unknown_method() {
        assert!("FROB".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn http10_implies_close() {
        assert!(HttpVersion::Http10.implies_close());
        assert!(!HttpVersion::Http11.implies_close());
    }
}
