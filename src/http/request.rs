//! Request handling and transformation.
//!
//! # Responsibilities
//! - Parse the CONNECT target into host and port
//! - Rewrite tunneled requests to their real destination
//! - Generate per-request IDs for log correlation
//!
//! # Design Decisions
//! - A CONNECT target without a port means 443
//! - IPv6 targets are bracketed in URIs and bare everywhere else
//! - An existing Host header is left as the client sent it

use std::fmt;

use hyper::header::{HeaderValue, HOST};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{Request, Uri};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_TLS_PORT: u16 = 443;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("CONNECT request has no target authority")]
    Missing,

    #[error("invalid CONNECT target {0:?}")]
    Invalid(String),
}

/// Host and port named by a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Hostname or IP literal, without brackets.
    pub host: String,
    pub port: u16,
}

impl ConnectTarget {
    /// Parse `host[:port]`, `[v6][:port]` or a bare host.
    pub fn parse(authority: &str) -> Result<Self, TargetError> {
        let invalid = || TargetError::Invalid(authority.to_string());
        if authority.is_empty() {
            return Err(TargetError::Missing);
        }

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match after {
                "" => None,
                _ => Some(after.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                // Unbracketed IPv6 has several colons and no usable port split.
                Some((host, _)) if host.contains(':') => return Err(invalid()),
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c == '/' || c == '@') {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(invalid)?,
            None => DEFAULT_TLS_PORT,
        };

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// Parse the authority of a CONNECT request URI.
    pub fn from_uri(uri: &Uri) -> Result<Self, TargetError> {
        let authority = uri.authority().ok_or(TargetError::Missing)?;
        Self::parse(authority.as_str())
    }

    fn is_ipv6(&self) -> bool {
        self.host.contains(':')
    }

    /// `host:port` suitable for a URI, bracketing IPv6.
    pub fn authority(&self) -> String {
        if self.is_ipv6() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for a Host header; the default port is omitted.
    pub fn host_header(&self) -> String {
        if self.port == DEFAULT_TLS_PORT {
            if self.is_ipv6() {
                format!("[{}]", self.host)
            } else {
                self.host.clone()
            }
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// `https://<target>` plus the path and query of `uri`.
pub fn destination(uri: &Uri, target: &ConnectTarget) -> Result<Uri, TargetError> {
    let authority = Authority::try_from(target.authority().as_str())
        .map_err(|_| TargetError::Invalid(target.to_string()))?;
    let path_and_query = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    Uri::builder()
        .scheme(Scheme::HTTPS)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|_| TargetError::Invalid(target.to_string()))
}

/// Point a tunneled request at its real destination.
///
/// Sets the absolute `https` URI and fills Host when the client sent none.
pub fn rewrite_destination<B>(request: &mut Request<B>, target: &ConnectTarget) -> Result<(), TargetError> {
    let uri = destination(request.uri(), target)?;
    *request.uri_mut() = uri;

    if !request.headers().contains_key(HOST) {
        let host = HeaderValue::from_str(&target.host_header())
            .map_err(|_| TargetError::Invalid(target.to_string()))?;
        request.headers_mut().insert(HOST, host);
    }
    Ok(())
}

/// Path and query only, as sent on an HTTP/1.1 origin connection.
pub fn origin_form(uri: &Uri) -> Uri {
    let path_and_query = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    Uri::from(path_and_query)
}

/// Unique identifier for a tunneled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_targets() {
        assert_eq!(
            ConnectTarget::parse("api.example.com:8443").unwrap(),
            ConnectTarget {
                host: "api.example.com".into(),
                port: 8443
            }
        );
        assert_eq!(ConnectTarget::parse("Example.COM").unwrap().port, 443);
        assert_eq!(ConnectTarget::parse("Example.COM").unwrap().host, "example.com");

        let v6 = ConnectTarget::parse("[::1]:9443").unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.port, 9443);
        assert_eq!(v6.authority(), "[::1]:9443");
        assert_eq!(ConnectTarget::parse("[2001:db8::1]").unwrap().port, 443);
    }

    #[test]
    fn rejects_bad_targets() {
        assert_eq!(ConnectTarget::parse(""), Err(TargetError::Missing));
        for bad in ["host:", "host:abc", "host:0", "host:70000", ":443", "[::1", "[::1]x", "::1:443", "a b:1"] {
            assert!(ConnectTarget::parse(bad).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn destination_keeps_path_and_query() {
        let target = ConnectTarget::parse("api.example.com:443").unwrap();
        let uri: Uri = "/v1/items?page=2&sort=asc".parse().unwrap();
        assert_eq!(
            destination(&uri, &target).unwrap(),
            "https://api.example.com:443/v1/items?page=2&sort=asc"
        );

        let bare: Uri = "http://ignored.example/".parse().unwrap();
        assert_eq!(destination(&bare, &target).unwrap().path(), "/");
    }

    #[test]
    fn rewrite_fills_missing_host_only() {
        let target = ConnectTarget::parse("api.example.com:8443").unwrap();

        let mut request = Request::builder().uri("/a?b=c").body(()).unwrap();
        rewrite_destination(&mut request, &target).unwrap();
        assert_eq!(request.uri(), "https://api.example.com:8443/a?b=c");
        assert_eq!(request.headers()[HOST], "api.example.com:8443");

        let mut request = Request::builder()
            .uri("/")
            .header(HOST, "custom.example")
            .body(())
            .unwrap();
        rewrite_destination(&mut request, &target).unwrap();
        assert_eq!(request.headers()[HOST], "custom.example");
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(ConnectTarget::parse("example.com").unwrap().host_header(), "example.com");
        assert_eq!(ConnectTarget::parse("[::1]").unwrap().host_header(), "[::1]");
    }

    #[test]
    fn origin_form_drops_scheme_and_authority() {
        let uri: Uri = "https://example.com:443/x/y?z=1".parse().unwrap();
        assert_eq!(origin_form(&uri), "/x/y?z=1");
    }
}
