use std::fmt;

/// The authority component of a URL: `userinfo@host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Netloc {
    pub userinfo: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl fmt::Display for Netloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ui) = &self.userinfo {
            write!(f, "{ui}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// A parsed URL, as it appears either in an origin-form request target
/// (`/path?query`) or an absolute-form one (`http://host/path`), per §3.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Url {
    pub scheme: Option<String>,
    pub netloc: Option<Netloc>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl Url {
    /// Parses a CONNECT target of the form `host:port`.
    pub fn parse_authority(s: &str) -> Option<Netloc> {
        let (host, port) = s.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Some(Netloc {
            userinfo: None,
            host: host.to_string(),
            port: Some(port),
        })
    }

    /// Parses an absolute-form or origin-form request target.
    pub fn parse(target: &str) -> Self {
        if let Some(rest) = target
            .strip_prefix("http://")
            .or_else(|| target.strip_prefix("https://"))
        {
            let scheme = if target.starts_with("https://") {
                "https"
            } else {
                "http"
            };
            let (authority, path_and_rest) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, "/"),
            };
            let netloc = Self::split_authority(authority);
            let (path, query, fragment) = Self::split_path(path_and_rest);
            return Url {
                scheme: Some(scheme.to_string()),
                netloc: Some(netloc),
                path,
                query,
                fragment,
            };
        }

        let (path, query, fragment) = Self::split_path(target);
        Url {
            scheme: None,
            netloc: None,
            path,
            query,
            fragment,
        }
    }

    fn split_authority(authority: &str) -> Netloc {
        let (userinfo, host_port) = match authority.rsplit_once('@') {
            Some((ui, rest)) => (Some(ui.to_string()), rest),
            None => (None, authority),
        };
        if let Some(rest) = host_port.strip_prefix('[') {
            // IPv6 literal: [::1]:8080
            if let Some((host, port)) = rest.split_once(']') {
                let port = port.strip_prefix(':').and_then(|p| p.parse().ok());
                return Netloc {
                    userinfo,
                    host: host.to_string(),
                    port,
                };
            }
        }
        match host_port.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
                Netloc {
                    userinfo,
                    host: host.to_string(),
                    port: port.parse().ok(),
                }
            }
            _ => Netloc {
                userinfo,
                host: host_port.to_string(),
                port: None,
            },
        }
    }

    fn split_path(s: &str) -> (String, Option<String>, Option<String>) {
        let (path_and_query, fragment) = match s.split_once('#') {
            Some((p, f)) => (p, Some(f.to_string())),
            None => (s, None),
        };
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path_and_query.to_string(), None),
        };
        let path = if path.is_empty() { "/".to_string() } else { path };
        (path, query, fragment)
    }

    /// Case-insensitive match against `name`, ignoring port.
    pub fn is_host(&self, name: &str) -> bool {
        self.netloc
            .as_ref()
            .is_some_and(|n| n.host.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive match against `name`, requiring `port` (or the
    /// scheme's default when the URL omits a port) to equal `port`.
    pub fn is_host_port(&self, name: &str, port: u16) -> bool {
        self.is_host(name) && self.port_or_default(default_port_for_scheme(self.scheme.as_deref())) == Some(port)
    }

    /// Fills in a missing port from the scheme's default, or from `default`
    /// when the scheme is unknown.
    pub fn port_or_default(&self, default: Option<u16>) -> Option<u16> {
        self.netloc.as_ref().and_then(|n| n.port).or(default)
    }
}

fn default_port_for_scheme(scheme: Option<&str>) -> Option<u16> {
    match scheme {
        Some("http") => Some(80),
        Some("https") => Some(443),
        _ => None,
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(scheme), Some(netloc)) = (&self.scheme, &self.netloc) {
            write!(f, "{scheme}://{netloc}")?;
        }
        write!(f, "{}", self.path)?;
        if let Some(q) = &self.query {
            write!(f, "?{q}")?;
        }
        if let Some(frag) = &self.fragment {
            write!(f, "#{frag}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_form() {
        let url = Url::parse("http://example.test:8080/a/b?x=1#frag");
        assert_eq!(url.scheme.as_deref(), Some("http"));
        assert_eq!(url.netloc.as_ref().unwrap().host, "example.test");
        assert_eq!(url.netloc.as_ref().unwrap().port, Some(8080));
        assert_eq!(url.path, "/a/b");
        assert_eq!(url.query.as_deref(), Some("x=1"));
        assert_eq!(url.fragment.as_deref(), Some("frag"));
    }

    #[test]
    fn parses_origin_form() {
        let url = Url::parse("/a/b?x=1");
        assert!(url.scheme.is_none());
        assert!(url.netloc.is_none());
        assert_eq!(url.path, "/a/b");
    }

    #[test]
    fn is_host_case_insensitive() {
        let url = Url::parse("http://Example.TEST/");
        assert!(url.is_host("example.test"));
    }

    #[test]
    fn port_or_default_fills_from_scheme() {
        let url = Url::parse("https://example.test/");
        assert_eq!(url.port_or_default(None), Some(443));
    }

    #[test]
    fn parse_authority_connect_target() {
        let netloc = Url::parse_authority("example.test:443").unwrap();
        assert_eq!(netloc.host, "example.test");
        assert_eq!(netloc.port, Some(443));
    }
}
