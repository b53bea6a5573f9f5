//! Low-level SMTP stream handling.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::{Error, Result};
use crate::transport::with_deadline;

/// SMTP stream (TCP or TLS).
#[derive(Debug)]
pub enum SmtpStream {
    /// Plain TCP connection.
    Tcp(TcpStream),
    /// TLS-encrypted connection (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl SmtpStream {
    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Upgrades a TCP stream to TLS.
    ///
    /// The server name is always sent and, unless `skip_cert_verify` is set,
    /// the certificate chain is checked against the webpki roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already TLS, the hostname is not a
    /// valid server name, or the handshake fails or times out.
    pub async fn upgrade_to_tls(
        self,
        hostname: &str,
        skip_cert_verify: bool,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let tcp_stream = match self {
            Self::Tcp(stream) => stream,
            Self::Tls(_) => return Err(Error::InvalidState("Stream is already TLS".into())),
        };

        let connector = create_tls_connector(skip_cert_verify);
        let server_name = ServerName::try_from(hostname.to_string())?;

        let tls_stream = with_deadline(timeout, async {
            Ok::<_, Error>(connector.connect(server_name, tcp_stream).await?)
        })
        .await?;
        Ok(Self::Tls(Box::new(tls_stream)))
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Connects to an SMTP server over plain TCP within `timeout`.
///
/// # Errors
///
/// Returns a connection error if the dial fails or does not complete in time.
pub async fn connect(address: &str, timeout: Duration) -> Result<SmtpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(SmtpStream::Tcp(stream))
        }
        Ok(Err(e)) => Err(Error::Connection(format!("dial {address}: {e}"))),
        Err(_) => Err(Error::Connection(format!(
            "dial {address}: timed out after {timeout:?}"
        ))),
    }
}

/// Creates a TLS connector with the webpki root certificates.
fn create_tls_connector(skip_cert_verify: bool) -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if skip_cert_verify {
        let verifier = NoVerifier {
            provider: Arc::clone(config.crypto_provider()),
        };
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(verifier));
    }

    TlsConnector::from(Arc::new(config))
}

/// A certificate verifier that accepts any server certificate.
///
/// Handshake signatures are still checked with the provider's algorithms, so
/// only the chain of trust is skipped.
#[derive(Debug)]
struct NoVerifier {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tls_connectors() {
        let _strict = create_tls_connector(false);
        let _relaxed = create_tls_connector(true);
    }

    #[test]
    fn test_no_verifier_advertises_schemes() {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        let verifier = NoVerifier {
            provider: Arc::clone(config.crypto_provider()),
        };
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(&addr.to_string(), Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
