//! URL resolution.
//!
//! | Scheme | Transport | Default port |
//! |--------|-----------|--------------|
//! | `ws`, `http` | plain TCP | 80 |
//! | `wss`, `https` | TLS | 443 |

use url::{Host, Url};

use crate::error::{Error, Result};

/// Whether a target needs TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Security {
    /// Plain TCP.
    Plain,
    /// TLS over TCP.
    Secure,
}

impl Security {
    /// Default port for the security level.
    #[inline]
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Plain => 80,
            Self::Secure => 443,
        }
    }
}

/// Where a socket connects and what it requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    security: Security,
    host: String,
    port: u16,
    host_header: String,
    resource: String,
}

impl Target {
    /// Resolves a WebSocket URL.
    ///
    /// The `Host` header carries the port only if the URL spells one out.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if the URL does not parse or has no host
    /// - [`Error::UnsupportedScheme`] for anything but ws, wss, http, https
    ///
    /// # Example
    ///
    /// ```
    /// use wsclient_drafts::transport::{Security, Target};
    ///
    /// let target = Target::parse("wss://example.com/chat?room=1").unwrap();
    /// assert_eq!(target.security(), Security::Secure);
    /// assert_eq!(target.port(), 443);
    /// assert_eq!(target.host_header(), "example.com");
    /// assert_eq!(target.resource(), "/chat?room=1");
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;

        let security = match parsed.scheme() {
            "ws" | "http" => Security::Plain,
            "wss" | "https" => Security::Secure,
            other => return Err(Error::unsupported_scheme(other)),
        };

        let host = match parsed.host() {
            Some(Host::Domain(domain)) => domain.to_owned(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::invalid_url(format!("{url} has no host"))),
        };
        // Bracketed for IPv6.
        let host_literal = parsed.host_str().unwrap_or(&host).to_owned();

        let (port, host_header) = match parsed.port() {
            Some(port) => (port, format!("{host_literal}:{port}")),
            None => (security.default_port(), host_literal),
        };

        let mut resource = match parsed.path() {
            "" => "/".to_owned(),
            path => path.to_owned(),
        };
        if let Some(query) = parsed.query() {
            resource.push('?');
            resource.push_str(query);
        }

        Ok(Self {
            security,
            host,
            port,
            host_header,
            resource,
        })
    }

    /// Plain or TLS.
    #[inline]
    #[must_use]
    pub fn security(&self) -> Security {
        self.security
    }

    /// Host to connect to, without IPv6 brackets.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port to connect to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value of the `Host` request header.
    #[inline]
    #[must_use]
    pub fn host_header(&self) -> &str {
        &self.host_header
    }

    /// Path plus query, never empty.
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }
}
