//! URI parsing and emission.
//!
//! Covers the subset of RFC 3986 the stores and the wire surface need:
//! scheme, host and port, a percent-decoded path, raw query parameters, and
//! a fragment. Userinfo is rejected outright, and dot segments are rejected
//! unless explicitly permitted. Emission percent-encodes each component
//! against its own allow set.

use crate::error::{Result, StoreError};

const HOST_ALLOWED: &[u8] =
    b"!$&'()*+,-.0123456789:;=ABCDEFGHIJKLMNOPQRSTUVWXYZ[]_abcdefghijklmnopqrstuvwxyz~";
const PATH_ALLOWED: &[u8] =
    b"!$&'()*+,-.0123456789:;=@ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz~";
const QUERY_ALLOWED: &[u8] =
    b"!$'()*+,-./0123456789:;=?@ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz~";
const FRAGMENT_ALLOWED: &[u8] =
    b"!$&'()*+,-./0123456789:;=?@ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz~";

/// A parsed URI.
///
/// Path segments and query parameters are stored percent-decoded;
/// `encode()` re-applies the escaping. `rootless` distinguishes `a/b`
/// from `/a/b`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub rootless: bool,
    pub path_segments: Vec<String>,
    pub query_params: Vec<String>,
    pub fragment: String,
    /// When false, slashes inside path segments are emitted literally
    /// rather than percent-escaped (used for head names, which may
    /// themselves contain slashes).
    pub escape_slashes_in_segments: bool,
}

impl Uri {
    /// Parse, rejecting `.` and `..` path segments.
    pub fn parse(input: &str) -> Result<Uri> {
        Self::parse_with_options(input, false)
    }

    /// Parse, optionally allowing dot segments.
    pub fn parse_with_options(input: &str, allow_dot_segments: bool) -> Result<Uri> {
        let invalid = || StoreError::InvalidUri(input.to_string());

        let mut uri = Uri {
            escape_slashes_in_segments: true,
            rootless: true,
            ..Uri::default()
        };

        let mut rest = input;

        if let Some(colon) = rest.find(':') {
            let candidate = &rest[..colon];
            if is_scheme(candidate) {
                uri.scheme = candidate.to_ascii_lowercase();
                rest = &rest[colon + 1..];
            }
        }

        if let Some(after) = rest.strip_prefix("//") {
            let end = after
                .find(|c| matches!(c, '/' | '?' | '#'))
                .unwrap_or(after.len());
            let authority = &after[..end];
            rest = &after[end..];

            if authority.contains('@') {
                // userinfo is not supported
                return Err(invalid());
            }
            let (host_raw, port_raw) = if let Some(stripped) = authority.strip_prefix('[') {
                let close = stripped.find(']').ok_or_else(invalid)?;
                let host = &authority[..close + 2];
                let tail = &stripped[close + 1..];
                let port = match tail.strip_prefix(':') {
                    Some(p) => p,
                    None if tail.is_empty() => "",
                    None => return Err(invalid()),
                };
                (host, port)
            } else {
                match authority.split_once(':') {
                    Some((h, p)) => (h, p),
                    None => (authority, ""),
                }
            };
            uri.host = percent_decode(host_raw)
                .ok_or_else(invalid)?
                .to_ascii_lowercase();
            if !port_raw.is_empty() {
                uri.port = Some(port_raw.parse().map_err(|_| invalid())?);
            }
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) => (r, f),
            None => (rest, ""),
        };
        let (path, query) = match rest.split_once('?') {
            Some((p, q)) => (p, q),
            None => (rest, ""),
        };
        uri.fragment = percent_decode(fragment).ok_or_else(invalid)?;

        if !path.is_empty() {
            let path = match path.strip_prefix('/') {
                Some(stripped) => {
                    uri.rootless = false;
                    stripped
                }
                None => path,
            };
            for segment in path.split('/') {
                let decoded = percent_decode(segment).ok_or_else(invalid)?;
                if !allow_dot_segments && (decoded == "." || decoded == "..") {
                    return Err(invalid());
                }
                uri.path_segments.push(decoded);
            }
        }

        if !query.is_empty() {
            for param in query.split('&') {
                uri.query_params
                    .push(percent_decode(param).ok_or_else(invalid)?);
            }
        }

        Ok(uri)
    }

    /// Emit the URI, percent-encoding each component against its allow set.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if !self.scheme.is_empty() {
            out.push_str(&self.scheme.to_ascii_lowercase());
            out.push(':');
        }
        if !self.host.is_empty() || self.port.is_some() {
            out.push_str("//");
            percent_encode_into(&mut out, &self.host.to_ascii_lowercase(), HOST_ALLOWED, false);
            if let Some(port) = self.port {
                out.push(':');
                out.push_str(&port.to_string());
            }
        }
        if !self.rootless {
            out.push('/');
        }
        if !self.path_segments.is_empty() {
            for (i, segment) in self.path_segments.iter().enumerate() {
                if i > 0 {
                    out.push('/');
                }
                percent_encode_into(
                    &mut out,
                    segment,
                    PATH_ALLOWED,
                    !self.escape_slashes_in_segments,
                );
            }
        }
        if !self.query_params.is_empty() {
            out.push('?');
            for (i, param) in self.query_params.iter().enumerate() {
                if i > 0 {
                    out.push('&');
                }
                percent_encode_into(&mut out, param, QUERY_ALLOWED, false);
            }
        }
        if !self.fragment.is_empty() {
            out.push('#');
            percent_encode_into(&mut out, &self.fragment, FRAGMENT_ALLOWED, false);
        }
        out
    }

    /// Join the path segments from `from` onward with slashes, undoing the
    /// segment split. Used to recover head names, which may contain
    /// slashes of their own.
    pub fn path_string(&self, from: usize) -> String {
        self.path_segments
            .get(from..)
            .unwrap_or(&[])
            .join("/")
    }

    /// The path as a filesystem path string (for file-backed store URIs
    /// like `sqlite:/var/db/x.db` or `car:bundle.car`).
    pub fn file_path(&self) -> String {
        let joined = self.path_segments.join("/");
        if self.rootless {
            joined
        } else {
            format!("/{joined}")
        }
    }

    /// True when the URI has no scheme, authority, query, or fragment --
    /// the shape name URIs must have.
    pub fn is_bare_path(&self) -> bool {
        self.scheme.is_empty()
            && self.host.is_empty()
            && self.port.is_none()
            && self.query_params.is_empty()
            && self.fragment.is_empty()
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut bytes = candidate.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
}

fn percent_decode(input: &str) -> Option<String> {
    if !input.contains('%') {
        return Some(input.to_string());
    }
    let mut out = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            let byte = u8::from_str_radix(hex, 16).ok()?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn percent_encode_into(out: &mut String, input: &str, allowed: &[u8], allow_slash: bool) {
    for &byte in input.as_bytes() {
        if allowed.contains(&byte) || (allow_slash && byte == b'/') {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(char::from_digit(u32::from(byte >> 4), 16).unwrap().to_ascii_uppercase());
            out.push(char::from_digit(u32::from(byte & 0xf), 16).unwrap().to_ascii_uppercase());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_store_uri_with_scheme() {
        let uri = Uri::parse("sqlite:/var/db/store.db").unwrap();
        assert_eq!(uri.scheme, "sqlite");
        assert!(!uri.rootless);
        assert_eq!(uri.path_segments, ["var", "db", "store.db"]);
        assert_eq!(uri.file_path(), "/var/db/store.db");
    }

    #[test]
    fn parse_rootless_path() {
        let uri = Uri::parse("car:bundle.car").unwrap();
        assert_eq!(uri.scheme, "car");
        assert!(uri.rootless);
        assert_eq!(uri.file_path(), "bundle.car");
    }

    #[test]
    fn parse_http_with_host_and_port() {
        let uri = Uri::parse("http://example.com:8080/cid/x?a=1&b=2#frag").unwrap();
        assert_eq!(uri.scheme, "http");
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, Some(8080));
        assert_eq!(uri.path_segments, ["cid", "x"]);
        assert_eq!(uri.query_params, ["a=1", "b=2"]);
        assert_eq!(uri.fragment, "frag");
    }

    #[test]
    fn parse_bare_path() {
        let uri = Uri::parse("/head/a/b").unwrap();
        assert!(uri.scheme.is_empty());
        assert!(uri.is_bare_path());
        assert!(!uri.rootless);
        assert_eq!(uri.path_segments, ["head", "a", "b"]);
        assert_eq!(uri.path_string(1), "a/b");
    }

    #[test]
    fn colon_in_later_segment_is_not_a_scheme() {
        let uri = Uri::parse("/call/f/b:ar").unwrap();
        assert!(uri.scheme.is_empty());
        assert_eq!(uri.path_segments, ["call", "f", "b:ar"]);
    }

    #[test]
    fn scheme_is_lowercased() {
        assert_eq!(Uri::parse("SQLite:x").unwrap().scheme, "sqlite");
    }

    #[test]
    fn userinfo_is_rejected() {
        assert!(Uri::parse("http://user@example.com/").is_err());
    }

    #[test]
    fn dot_segments_are_rejected_by_default() {
        assert!(Uri::parse("/head/../etc/passwd").is_err());
        assert!(Uri::parse_with_options("/head/../x", true).is_ok());
    }

    #[test]
    fn percent_decoding_applies_to_segments() {
        let uri = Uri::parse("/head/a%2Fb%20c").unwrap();
        assert_eq!(uri.path_segments, ["head", "a/b c"]);
    }

    #[test]
    fn invalid_percent_escape_is_rejected() {
        assert!(Uri::parse("/head/a%zz").is_err());
        assert!(Uri::parse("/head/a%2").is_err());
    }

    #[test]
    fn ipv6_host() {
        let uri = Uri::parse("http://[::1]:9000/").unwrap();
        assert_eq!(uri.host, "[::1]");
        assert_eq!(uri.port, Some(9000));
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(Uri::parse("http://example.com:notaport/").is_err());
    }

    #[test]
    fn encode_roundtrip() {
        for input in [
            "/cid/bafyabc",
            "/head/some/nested/name",
            "sqlite:/tmp/db",
            "http://example.com:8080/call/f/a,b?x=1#top",
        ] {
            let uri = Uri::parse(input).unwrap();
            assert_eq!(uri.encode(), input, "round-trip of {input}");
        }
    }

    #[test]
    fn encode_escapes_specials() {
        let uri = Uri {
            rootless: false,
            path_segments: vec!["head".into(), "with space".into()],
            escape_slashes_in_segments: true,
            ..Uri::default()
        };
        assert_eq!(uri.encode(), "/head/with%20space");
    }

    #[test]
    fn encode_can_keep_segment_slashes() {
        let uri = Uri {
            rootless: false,
            path_segments: vec!["head".into(), "a/b".into()],
            escape_slashes_in_segments: false,
            ..Uri::default()
        };
        assert_eq!(uri.encode(), "/head/a/b");
    }

    #[test]
    fn escaped_slash_segment_roundtrips_when_escaping() {
        let uri = Uri {
            rootless: false,
            path_segments: vec!["cid".into(), "a/b".into()],
            escape_slashes_in_segments: true,
            ..Uri::default()
        };
        let encoded = uri.encode();
        assert_eq!(encoded, "/cid/a%2Fb");
        let parsed = Uri::parse(&encoded).unwrap();
        assert_eq!(parsed.path_segments, ["cid", "a/b"]);
    }
}
