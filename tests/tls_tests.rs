//! TLS handshake tests against a self-signed loopback peer

use color_eyre::eyre::Result;
use netframe::common::test_utils::{Event, RecordingHandler};
use netframe::{ClientConfig, NetClient, NetError, TlsOptions};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Self-signed certificate for `localhost` and its PKCS#8 key
fn self_signed() -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let key = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());
    Ok((cert.der().clone(), key))
}

/// Starts a TLS peer that echoes every byte it receives
async fn start_tls_echo(cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> Result<SocketAddr> {
    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else {
                    return;
                };
                let mut buffer = [0u8; 1024];
                while let Ok(n) = tls.read(&mut buffer).await {
                    if n == 0 || tls.write_all(&buffer[..n]).await.is_err() {
                        break;
                    }
                    let _ = tls.flush().await;
                }
            });
        }
    });
    Ok(addr)
}

/// Accepts exactly one pinned certificate and counts how often it is asked
#[derive(Debug)]
struct PinnedCertificate {
    expected: CertificateDer<'static>,
    calls: AtomicUsize,
    provider: Arc<CryptoProvider>,
}

impl PinnedCertificate {
    fn new(expected: CertificateDer<'static>) -> Self {
        Self {
            expected,
            calls: AtomicUsize::new(0),
            provider: provider(),
        }
    }
}

impl ServerCertVerifier for PinnedCertificate {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if end_entity.as_ref() == self.expected.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General("certificate does not match the pin".into()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

#[tokio::test]
async fn test_untrusted_certificate_rejected() -> Result<()> {
    let (cert, key) = self_signed()?;
    let addr = start_tls_echo(cert, key).await?;

    let (handler, _events) = RecordingHandler::new();
    let client = NetClient::new(ClientConfig::default(), handler)?;
    let result = client
        .connect_secure("localhost", addr.port(), TlsOptions::validate(true))
        .await;

    assert!(matches!(result, Err(NetError::HandshakeFailed(_))), "got {result:?}");
    assert!(!client.is_connected());
    Ok(())
}

#[tokio::test]
async fn test_disabled_validation_accepts_self_signed() -> Result<()> {
    let (cert, key) = self_signed()?;
    let addr = start_tls_echo(cert, key).await?;

    let (handler, mut events) = RecordingHandler::new();
    let client = NetClient::new(ClientConfig::default(), handler)?;
    client
        .connect_secure("localhost", addr.port(), TlsOptions::validate(false))
        .await?;

    let summary = events
        .next_matching(|e| matches!(e, Event::Log(m) if m.starts_with("TLS connection established")))
        .await;
    assert!(summary.is_some());

    client.send("PING")?;
    assert_eq!(events.next_text().await, Some((0, "PING".to_string())));

    client.disconnect();
    assert_eq!(
        events.next_lifecycle().await,
        Some(Event::Disconnected("disconnect requested".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn test_custom_verifier_decides() -> Result<()> {
    let (cert, key) = self_signed()?;
    let addr = start_tls_echo(cert.clone(), key).await?;

    let pinned = Arc::new(PinnedCertificate::new(cert));
    let (handler, mut events) = RecordingHandler::new();
    let client = NetClient::new(ClientConfig::default(), handler)?;
    client
        .connect_secure("localhost", addr.port(), TlsOptions::with_verifier(pinned.clone()))
        .await?;
    assert_eq!(pinned.calls.load(Ordering::SeqCst), 1);

    client.send("pinned")?;
    assert_eq!(events.next_text().await, Some((0, "pinned".to_string())));
    client.disconnect();

    let (other, _) = self_signed()?;
    let wrong_pin = Arc::new(PinnedCertificate::new(other));
    let (handler, _events) = RecordingHandler::new();
    let client = NetClient::new(ClientConfig::default(), handler)?;
    let result = client
        .connect_secure("localhost", addr.port(), TlsOptions::with_verifier(wrong_pin.clone()))
        .await;
    assert!(matches!(result, Err(NetError::HandshakeFailed(_))), "got {result:?}");
    assert_eq!(wrong_pin.calls.load(Ordering::SeqCst), 1);
    Ok(())
}
