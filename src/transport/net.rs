//! TCP and TLS transport factories.
//!
//! [`NetConfig`] picks the factory for a [`Security`] level. Unset slots fall
//! back to [`TcpTransportFactory`] and [`TlsTransportFactory`] with the
//! bundled webpki root store.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, trace};

use super::{BoxedTransport, Security, TransportFactory};
use crate::error::{Error, Result};

// ============================================================================
// TcpTransportFactory
// ============================================================================

/// Plain TCP with Nagle disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransportFactory;

impl TcpTransportFactory {
    async fn open(host: &str, port: u16) -> Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        trace!(host, port, "TCP connected");
        Ok(stream)
    }
}

#[async_trait]
impl TransportFactory for TcpTransportFactory {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedTransport> {
        Ok(Box::new(Self::open(host, port).await?))
    }
}

// ============================================================================
// TlsTransportFactory
// ============================================================================

/// TLS over TCP using rustls.
#[derive(Clone)]
pub struct TlsTransportFactory {
    connector: TlsConnector,
}

impl TlsTransportFactory {
    /// Creates a factory that trusts the webpki root certificates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the crypto provider rejects the default
    /// protocol versions.
    pub fn new() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self::with_config(Arc::new(config)))
    }

    /// Creates a factory from a prepared rustls configuration.
    #[must_use]
    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(config),
        }
    }
}

impl fmt::Debug for TlsTransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTransportFactory").finish_non_exhaustive()
    }
}

#[async_trait]
impl TransportFactory for TlsTransportFactory {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedTransport> {
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| Error::tls(format!("invalid server name {host:?}: {e}")))?;

        let tcp = TcpTransportFactory::open(host, port).await?;
        let stream = self.connector.connect(server_name, tcp).await?;
        debug!(host, port, "TLS session established");
        Ok(Box::new(stream))
    }
}

// ============================================================================
// NetConfig
// ============================================================================

/// Transport factories for plain and secure targets.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use wsclient_drafts::transport::{NetConfig, TcpTransportFactory};
///
/// let config = NetConfig::new().with_plain_factory(Arc::new(TcpTransportFactory));
/// ```
#[derive(Debug, Clone, Default)]
pub struct NetConfig {
    plain: Option<Arc<dyn TransportFactory>>,
    secure: Option<Arc<dyn TransportFactory>>,
}

impl NetConfig {
    /// Uses the default factories for both security levels.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the factory for `ws://` and `http://` targets.
    #[must_use]
    pub fn with_plain_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.plain = Some(factory);
        self
    }

    /// Sets the factory for `wss://` and `https://` targets.
    #[must_use]
    pub fn with_secure_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.secure = Some(factory);
        self
    }

    /// Returns the factory for `security`, building the default if unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the default TLS factory cannot be built.
    pub fn factory_for(&self, security: Security) -> Result<Arc<dyn TransportFactory>> {
        let configured = match security {
            Security::Plain => &self.plain,
            Security::Secure => &self.secure,
        };
        if let Some(factory) = configured {
            return Ok(Arc::clone(factory));
        }

        match security {
            Security::Plain => Ok(Arc::new(TcpTransportFactory)),
            Security::Secure => Ok(Arc::new(TlsTransportFactory::new()?)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
