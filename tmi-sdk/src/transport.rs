//! Socket establishment.
//!
//! The connection manager never opens sockets itself: it asks a
//! [`Connector`] for an [`EstablishedConnection`]. [`TcpConnector`] is the
//! real implementation (TCP, optionally wrapped in TLS); tests plug in an
//! in-memory duplex stream instead.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::DuplexStream;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::config::ConnectionOptions;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A connection that has completed TCP (and optionally TLS) but has not yet
/// sent the login handshake.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    /// In-process stream, used by tests and embedders.
    Memory(DuplexStream),
}

/// Opens transport sockets for the connection manager.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, options: &'a ConnectionOptions) -> BoxFuture<'a, Result<EstablishedConnection>>;
}

/// Connects over TCP, with TLS when `options.secure` is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, options: &'a ConnectionOptions) -> BoxFuture<'a, Result<EstablishedConnection>> {
        Box::pin(establish_connection(options))
    }
}

/// Establish TCP (and optionally TLS) connection to the server.
pub async fn establish_connection(options: &ConnectionOptions) -> Result<EstablishedConnection> {
    let addr = format!("{}:{}", options.server, options.port);
    let mode = if options.secure { "TLS" } else { "plain" };

    tracing::debug!("Resolving {addr}...");
    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {addr} failed: {e}"))?;
    tcp.set_nodelay(true)?;
    tracing::debug!("TCP connected to {addr} ({mode})");

    if !options.secure {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let connector = TlsConnector::from(Arc::new(rustls_default_config()));
    let dns_name = rustls::pki_types::ServerName::try_from(options.server.clone())
        .map_err(|_| crate::error::ClientError::InvalidServerName(options.server.clone()))?;
    let tls_stream = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|e| anyhow::anyhow!("TLS handshake with {addr} failed: {e}"))?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
}

fn install_crypto_provider() {
    // ring is preferred when both are enabled.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}
