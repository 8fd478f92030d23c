//! Stream types for IMAP connections.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::{Error, Result};

/// TLS settings for a connection.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// When false, certificate verification is disabled entirely.
    pub verify: bool,
    /// Optional PEM bundle replacing the built-in webpki roots.
    pub ca_bundle: Option<PathBuf>,
}

impl TlsOptions {
    /// Verifying configuration with the built-in roots.
    #[must_use]
    pub const fn verified() -> Self {
        Self { verify: true, ca_bundle: None }
    }
}

/// A stream that can be either plaintext or TLS.
pub enum ImapStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl ImapStream {
    /// Upgrades a plaintext stream to TLS (STARTTLS).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TlsVerify`] on certificate rejection, or an I/O
    /// / TLS error otherwise. Upgrading an already-TLS stream is a
    /// protocol error.
    pub async fn upgrade_to_tls(self, host: &str, tls: &TlsOptions) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let connector = tls_connector(tls)?;
                let server_name = ServerName::try_from(host.to_string())?;
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(classify_handshake_error)?;
                Ok(Self::Tls(Box::new(stream)))
            }
            Self::Tls(_) => Err(Error::Protocol("stream is already TLS".to_string())),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Connects with implicit TLS (the `imaps://` scheme).
///
/// # Errors
///
/// Fails with [`Error::TlsVerify`] on certificate rejection, or an I/O /
/// TLS error otherwise.
pub async fn connect_tls(host: &str, port: u16, tls: &TlsOptions) -> Result<ImapStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    let connector = tls_connector(tls)?;
    let server_name = ServerName::try_from(host.to_string())?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(classify_handshake_error)?;
    Ok(ImapStream::Tls(Box::new(stream)))
}

/// Connects without TLS (the `imap://` scheme, before STARTTLS).
///
/// # Errors
///
/// Fails on I/O errors.
pub async fn connect_plain(host: &str, port: u16) -> Result<ImapStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(ImapStream::Plain(tcp))
}

/// Builds a TLS connector honoring the verification options.
fn tls_connector(tls: &TlsOptions) -> Result<TlsConnector> {
    let config = if tls.verify {
        let roots = match &tls.ca_bundle {
            Some(path) => roots_from_pem(path)?,
            None => rustls::RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            },
        };
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert::new()))
            .with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Loads a root store from a PEM bundle on disk.
fn roots_from_pem(path: &Path) -> Result<rustls::RootCertStore> {
    let pem = std::fs::read(path)?;
    let mut reader = io::Cursor::new(pem);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert?)?;
    }
    if roots.is_empty() {
        return Err(Error::TlsVerify(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

/// Maps a handshake failure to [`Error::TlsVerify`] when the cause is a
/// certificate rejection; those are never retried.
fn classify_handshake_error(err: io::Error) -> Error {
    let is_cert = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|tls| matches!(tls, rustls::Error::InvalidCertificate(_)));
    if is_cert {
        Error::TlsVerify(err.to_string())
    } else {
        Error::Io(err)
    }
}

/// Certificate verifier that accepts anything (`ssl-verify: false`).
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl AcceptAnyCert {
    fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ensure_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    #[test]
    fn connector_with_builtin_roots() {
        ensure_crypto_provider();
        assert!(tls_connector(&TlsOptions::verified()).is_ok());
    }

    #[test]
    fn connector_without_verification() {
        ensure_crypto_provider();
        let tls = TlsOptions { verify: false, ca_bundle: None };
        assert!(tls_connector(&tls).is_ok());
    }

    #[test]
    fn missing_bundle_is_an_error() {
        let tls = TlsOptions {
            verify: true,
            ca_bundle: Some(PathBuf::from("/nonexistent/bundle.pem")),
        };
        assert!(tls_connector(&tls).is_err());
    }
}
