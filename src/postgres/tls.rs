//! rustls client configuration for admin sessions

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::{PostgresError, PostgresResult};

/// How admin sessions protect the wire
#[derive(Debug, Clone)]
pub enum TlsMode {
    Disabled,
    /// Encrypt, but accept whatever certificate the server presents
    RequireUnverified,
    /// Encrypt and verify the server against a PEM bundle
    RequireVerified { ca_cert_pem: String },
}

/// rustls config for `mode`, `None` for plaintext sessions
pub fn client_config(mode: &TlsMode) -> PostgresResult<Option<ClientConfig>> {
    let config = match mode {
        TlsMode::Disabled => return Ok(None),
        TlsMode::RequireUnverified => ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(AcceptAnyCertificate::new())
            .with_no_client_auth(),
        TlsMode::RequireVerified { ca_cert_pem } => ClientConfig::builder()
            .with_root_certificates(root_store(ca_cert_pem)?)
            .with_no_client_auth(),
    };
    Ok(Some(config))
}

fn root_store(pem: &str) -> PostgresResult<RootCertStore> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PostgresError::InvalidCertificate(e.to_string()))?;

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(PostgresError::InvalidCertificate(format!(
            "no usable CA certificate in bundle ({ignored} rejected)"
        )));
    }
    Ok(store)
}

/// Skips chain and hostname checks but still verifies handshake signatures
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl AcceptAnyCertificate {
    fn new() -> Arc<Self> {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        Arc::new(Self(provider))
    }
}

impl ServerCertVerifier for AcceptAnyCertificate {
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

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
