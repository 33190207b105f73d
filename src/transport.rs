//! Socket-level transport: one connected stream (plain or TLS) to one broker
//! host, wrapped in a [`Framed`] STOMP codec.
//!
//! The transport is only ever driven by the connection's dispatch task, which
//! serializes all writes through a single sink; callers never touch the
//! socket directly.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::StompCodec;
use crate::config::{ClientConfig, Endpoint};
use crate::error::StompError;
use crate::version::ProtocolVersion;

/// The byte stream under the codec: plain TCP or TLS-wrapped TCP.
pub(crate) enum StompStream {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

pub(crate) type FramedTransport = Framed<StompStream, StompCodec>;

impl AsyncRead for StompStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StompStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            StompStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for StompStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            StompStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            StompStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StompStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            StompStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            StompStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            StompStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Open a socket to `endpoint` within the configured connect timeout and
/// wrap it in the STOMP codec.
///
/// For TLS endpoints the handshake verifies the broker certificate chain and
/// identity against the endpoint host name, unless verification is disabled
/// in [`crate::config::TlsOptions`]. Verification failure fails this attempt
/// like any other connect error, feeding the failover policy.
pub(crate) async fn connect(
    endpoint: &Endpoint,
    config: &ClientConfig,
) -> Result<FramedTransport, StompError> {
    let addr = endpoint.addr();
    let codec = StompCodec::with_options(ProtocolVersion::V1_2, config.use_crlf);

    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(StompError::ConnectFailed {
                endpoint: addr,
                reason: e.to_string(),
            });
        }
        Err(_) => {
            return Err(StompError::ConnectFailed {
                endpoint: addr,
                reason: "connect timed out".to_string(),
            });
        }
    };
    debug!(endpoint = %addr, tls = endpoint.use_tls, "tcp connected");

    if endpoint.use_tls {
        return tls_handshake(endpoint, config, stream, codec).await;
    }
    Ok(Framed::new(StompStream::Tcp(stream), codec))
}

#[cfg(feature = "tls")]
async fn tls_handshake(
    endpoint: &Endpoint,
    config: &ClientConfig,
    stream: TcpStream,
    codec: StompCodec,
) -> Result<FramedTransport, StompError> {
    use rustls_pki_types::ServerName;

    let addr = endpoint.addr();
    let connector = tls_connector(&config.tls)?;
    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|_| StompError::Config(format!("'{}' is not a valid TLS name", endpoint.host)))?;

    match tokio::time::timeout(
        config.connect_timeout,
        connector.connect(server_name, stream),
    )
    .await
    {
        Ok(Ok(tls_stream)) => {
            debug!(endpoint = %addr, "tls handshake complete");
            Ok(Framed::new(StompStream::Tls(Box::new(tls_stream)), codec))
        }
        Ok(Err(e)) => Err(StompError::ConnectFailed {
            endpoint: addr,
            reason: format!("tls handshake failed: {e}"),
        }),
        Err(_) => Err(StompError::ConnectFailed {
            endpoint: addr,
            reason: "tls handshake timed out".to_string(),
        }),
    }
}

#[cfg(not(feature = "tls"))]
async fn tls_handshake(
    endpoint: &Endpoint,
    _config: &ClientConfig,
    _stream: TcpStream,
    _codec: StompCodec,
) -> Result<FramedTransport, StompError> {
    // Unreachable in practice: config validation rejects TLS endpoints when
    // the feature is off.
    Err(StompError::Config(format!(
        "endpoint '{}' requires TLS but the crate was built without the `tls` feature",
        endpoint.host
    )))
}

#[cfg(feature = "tls")]
fn tls_connector(opts: &crate::config::TlsOptions) -> Result<tokio_rustls::TlsConnector, StompError> {
    use std::sync::Arc;

    let tls_config = if opts.insecure_skip_verify {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerification::new()))
            .with_no_client_auth()
    } else {
        let roots = opts.roots.clone().ok_or_else(|| {
            StompError::Config("TLS endpoints require a root certificate store".to_string())
        })?;
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    Ok(tokio_rustls::TlsConnector::from(Arc::new(tls_config)))
}

#[cfg(feature = "tls")]
mod danger {
    use rustls::DigitallySignedStruct;
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};

    /// Certificate verifier for `insecure_skip_verify`: accepts any broker
    /// certificate while still validating handshake signatures.
    #[derive(Debug)]
    pub(super) struct NoVerification(CryptoProvider);

    impl NoVerification {
        pub(super) fn new() -> Self {
            Self(rustls::crypto::aws_lc_rs::default_provider())
        }
    }

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}
