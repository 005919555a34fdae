//! Upgrade request and response types.
//!
//! The client speaks just enough HTTP/1.1 to upgrade: one GET request with a
//! fixed header block, and a response whose status line must be 101.

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::FrameReader;
use super::handshake::HandshakeChallenge;
use super::stream::read_line;
use crate::error::{Error, Result};
use crate::transport::Target;

// ============================================================================
// Constants
// ============================================================================

/// Characters that may not appear in a header name.
static INVALID_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n:]").expect("static regex"));

/// Characters that may not appear in a header value.
static INVALID_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n]").expect("static regex"));

/// Status line of a successful upgrade.
static SWITCHING_PROTOCOLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HTTP/[^ ]+ 101( |$)").expect("static regex"));

/// Response header carrying the negotiated subprotocol (lowercased).
pub const PROTOCOL_HEADER: &str = "sec-websocket-protocol";

// ============================================================================
// Headers
// ============================================================================

/// Ordered request headers with case-insensitive names.
///
/// Every entry has passed [`validate_header`], so the block can be written to
/// the wire verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header block.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and sets a header, replacing any entry with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if the name or value contains CR, LF,
    /// or (for names) a colon.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        validate_header(&name, &value)?;

        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        Ok(())
    }

    /// Returns the value for `name`, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if a header named `name` is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of headers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no headers.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checks that a header can be written without breaking the request.
///
/// # Errors
///
/// Returns [`Error::InvalidHeader`] describing the first problem found.
pub fn validate_header(name: &str, value: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_header(name, "name is empty"));
    }
    if INVALID_NAME.is_match(name) {
        return Err(Error::invalid_header(name, "name contains CR, LF or ':'"));
    }
    if INVALID_VALUE.is_match(value) {
        return Err(Error::invalid_header(name, "value contains CR or LF"));
    }
    Ok(())
}

/// Response header map, keyed by lowercased name.
pub type ResponseHeaders = FxHashMap<String, String>;

// ============================================================================
// UpgradeRequest
// ============================================================================

/// The HTTP GET that asks the server to switch to WebSocket.
///
/// # Format
///
/// ```text
/// GET /chat HTTP/1.1
/// Upgrade: WebSocket
/// Connection: Upgrade
/// Host: example.com
/// Sec-WebSocket-Key1: 4 @1  46546xW%0l 1 5
/// Sec-WebSocket-Key2: 12998 5 Y3 1  .P00
/// Sec-WebSocket-Protocol: chat superchat
///
/// ```
///
/// The 8-byte challenge nonce follows the blank line and is not part of the
/// request text.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    resource: String,
    headers: Headers,
}

impl UpgradeRequest {
    /// Builds the request for `target`.
    ///
    /// Protocol headers come first, then `extra` (draft-specific), then
    /// caller headers. A caller header that names a protocol header is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if a protocol or extra header is
    /// malformed.
    pub fn new(
        target: &Target,
        challenge: &HandshakeChallenge,
        protocols: &[String],
        extra: &[(&str, &str)],
        caller: &Headers,
    ) -> Result<Self> {
        let mut headers = Headers::new();
        headers.insert("Upgrade", "WebSocket")?;
        headers.insert("Connection", "Upgrade")?;
        headers.insert("Host", target.host_header())?;
        headers.insert("Sec-WebSocket-Key1", challenge.key1())?;
        headers.insert("Sec-WebSocket-Key2", challenge.key2())?;
        for (name, value) in extra {
            headers.insert(*name, *value)?;
        }
        if !protocols.is_empty() {
            headers.insert("Sec-WebSocket-Protocol", protocols.join(" "))?;
        }

        for (name, value) in caller.iter() {
            if headers.contains(name) {
                debug!(header = name, "Ignoring caller header that overrides the handshake");
                continue;
            }
            headers.insert(name, value)?;
        }

        Ok(Self {
            resource: target.resource().to_owned(),
            headers,
        })
    }

    /// Path and query being requested.
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// All headers in the order they are sent.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Serializes the request line and headers, ending with the blank line.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("GET {} HTTP/1.1\r\n", self.resource);
        for (name, value) in self.headers.iter() {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

// ============================================================================
// UpgradeResponse
// ============================================================================

/// Status line and headers of the server's upgrade response.
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    status_line: String,
    headers: ResponseHeaders,
}

impl UpgradeResponse {
    /// Reads the status line and headers up to the blank line.
    ///
    /// Header names are lowercased. A repeated header keeps its last value.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the status is not 101 or a header line has no
    ///   `": "` separator
    /// - [`Error::Transport`] if the stream ends before the blank line
    pub async fn read(input: &mut FrameReader) -> Result<Self> {
        let status_line = read_line(input).await?;
        if !SWITCHING_PROTOCOLS.is_match(&status_line) {
            return Err(Error::protocol(format!(
                "unexpected handshake status line {status_line:?}"
            )));
        }

        let mut headers = ResponseHeaders::default();
        loop {
            let line = read_line(input).await?;
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(": ") else {
                return Err(Error::protocol(format!("malformed header line {line:?}")));
            };
            headers.insert(name.to_ascii_lowercase(), value.to_owned());
        }

        Ok(Self {
            status_line,
            headers,
        })
    }

    /// The raw status line.
    #[inline]
    #[must_use]
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    /// Response headers keyed by lowercased name.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    /// Subprotocol the server selected, if any.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.headers.get(PROTOCOL_HEADER).map(String::as_str)
    }

    /// Consumes the response and returns its headers.
    #[inline]
    #[must_use]
    pub fn into_headers(self) -> ResponseHeaders {
        self.headers
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn challenge() -> HandshakeChallenge {
        HandshakeChallenge::new("4 @1  46546xW%0l 1 5", "12998 5 Y3 1  .P00", *b"^n:ds[4U")
    }

    #[test]
    fn test_headers_replace_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Origin", "http://a").unwrap();
        headers.insert("origin", "http://b").unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("ORIGIN"), Some("http://b"));
    }

    #[test]
    fn test_validate_header_rejects_injection() {
        assert!(validate_header("X-Ok", "fine value").is_ok());
        assert!(validate_header("X-Bad\r\nEvil", "v").is_err());
        assert!(validate_header("X:Bad", "v").is_err());
        assert!(validate_header("X-Bad", "line\nbreak").is_err());
        assert!(validate_header("", "v").is_err());
        // Colons are fine in values.
        assert!(validate_header("Origin", "http://localhost:8080").is_ok());
    }

    #[test]
    fn test_rejected_header_not_stored() {
        let mut headers = Headers::new();
        let err = headers.insert("X-Evil", "a\r\nInjected: yes").unwrap_err();
        assert!(err.is_usage_error());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_request_layout() {
        let target = Target::parse("ws://example.com:8080/chat?room=1").unwrap();
        let mut caller = Headers::new();
        caller.insert("Origin", "http://example.com").unwrap();
        caller.insert("host", "spoofed").unwrap();

        let request = UpgradeRequest::new(
            &target,
            &challenge(),
            &["chat".to_owned(), "superchat".to_owned()],
            &[],
            &caller,
        )
        .unwrap();

        let text = String::from_utf8(request.to_bytes()).unwrap();
        assert!(text.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(text.contains("\r\nHost: example.com:8080\r\n"));
        assert!(text.contains("\r\nSec-WebSocket-Protocol: chat superchat\r\n"));
        assert!(text.contains("\r\nOrigin: http://example.com\r\n"));
        assert!(!text.contains("spoofed"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_request_without_protocols() {
        let target = Target::parse("ws://example.com/").unwrap();
        let request =
            UpgradeRequest::new(&target, &challenge(), &[], &[], &Headers::new()).unwrap();
        assert!(!request.headers().contains("Sec-WebSocket-Protocol"));
        assert_eq!(request.headers().get("host"), Some("example.com"));
    }

    #[test]
    fn test_extra_headers_follow_keys() {
        let target = Target::parse("ws://example.com/").unwrap();
        let request = UpgradeRequest::new(
            &target,
            &challenge(),
            &[],
            &[("Sec-WebSocket-Draft", "2")],
            &Headers::new(),
        )
        .unwrap();
        let names: Vec<&str> = request.headers().iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "Upgrade",
                "Connection",
                "Host",
                "Sec-WebSocket-Key1",
                "Sec-WebSocket-Key2",
                "Sec-WebSocket-Draft"
            ]
        );
    }

    #[tokio::test]
    async fn test_response_parse() {
        let mut input = Cursor::new(
            b"HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
              Upgrade: WebSocket\r\n\
              Sec-WebSocket-Protocol: chat\r\n\
              \r\nDIGEST"
                .to_vec(),
        );
        let response = UpgradeResponse::read(&mut input).await.unwrap();
        assert_eq!(response.protocol(), Some("chat"));
        assert_eq!(response.headers().get("upgrade").map(String::as_str), Some("WebSocket"));
        assert_eq!(input.position(), 95);
    }

    #[tokio::test]
    async fn test_response_wrong_status() {
        let mut input = Cursor::new(b"HTTP/1.1 200 OK\r\n\r\n".to_vec());
        let err = UpgradeResponse::read(&mut input).await.unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_response_status_requires_exact_code() {
        let mut input = Cursor::new(b"HTTP/1.1 1010 Nope\r\n\r\n".to_vec());
        assert!(UpgradeResponse::read(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_response_malformed_header() {
        let mut input = Cursor::new(b"HTTP/1.1 101 Switching\r\nNoSeparator\r\n\r\n".to_vec());
        let err = UpgradeResponse::read(&mut input).await.unwrap_err();
        assert!(err.is_protocol_error());
    }
}
