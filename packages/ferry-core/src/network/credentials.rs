//! # Channel Credentials
//!
//! Certificate and private-key material for the authenticated tunnels, and
//! the rustls configuration built from it.
//!
//! Both transports authenticate the same way: the listener requires client
//! certificates chaining to its own material, and the sender verifies the
//! server against the same material; in the current design both sides hold
//! identical credentials. `insecure_skip_verify` disables the sender-side
//! server check only. The listener always verifies clients.

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};

use crate::error::{Error, Result};

/// ALPN protocol id spoken on both transports.
pub const ALPN_PROTOCOL: &[u8] = b"ferry";

static CRYPTO_PROVIDER: Lazy<()> = Lazy::new(|| {
    // A process may install a provider before us; losing that race is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();
});

fn ensure_crypto_provider() {
    Lazy::force(&CRYPTO_PROVIDER);
}

/// Channel credential material: a certificate chain and its private key.
#[derive(Debug)]
pub struct Credentials {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    insecure_skip_verify: bool,
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
            insecure_skip_verify: self.insecure_skip_verify,
        }
    }
}

impl Credentials {
    /// Load PEM-encoded credentials from disk.
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();
        let cert_pem = std::fs::read_to_string(cert_path)
            .map_err(|e| Error::Credentials(format!("read {}: {e}", cert_path.display())))?;
        let key_pem = std::fs::read_to_string(key_path)
            .map_err(|e| Error::Credentials(format!("read {}: {e}", key_path.display())))?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Parse PEM-encoded credentials.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let cert_chain = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| Error::Credentials(format!("bad certificate PEM: {e}")))?;
        if cert_chain.is_empty() {
            return Err(Error::Credentials(
                "no certificates found in PEM input".to_string(),
            ));
        }
        let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| Error::Credentials(format!("bad private-key PEM: {e}")))?
            .ok_or_else(|| Error::Credentials("no private key found in PEM input".to_string()))?;
        Ok(Self {
            cert_chain,
            key,
            insecure_skip_verify: false,
        })
    }

    /// Generate fresh self-signed credentials for the given hostnames.
    /// Used by tests, demos, and first-run setups.
    pub fn self_signed(hosts: &[&str]) -> Result<Self> {
        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| Error::Credentials(format!("key generation failed: {e}")))?;
        let params = rcgen::CertificateParams::new(
            hosts.iter().map(|h| h.to_string()).collect::<Vec<_>>(),
        )
        .map_err(|e| Error::Credentials(format!("bad subject names: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Credentials(format!("self-signing failed: {e}")))?;
        Ok(Self {
            cert_chain: vec![cert.der().clone()],
            key: PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
            insecure_skip_verify: false,
        })
    }

    /// Disable sender-side server-certificate verification.
    pub fn with_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Whether sender-side verification is disabled.
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    /// Root store trusting exactly this credential's chain.
    fn root_store(&self) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        for cert in &self.cert_chain {
            roots
                .add(cert.clone())
                .map_err(|e| Error::Credentials(format!("unusable trust anchor: {e}")))?;
        }
        Ok(roots)
    }

    /// Listener-side TLS configuration: requires client certificates
    /// chaining to this credential's material.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        ensure_crypto_provider();
        let verifier = WebPkiClientVerifier::builder(Arc::new(self.root_store()?))
            .build()
            .map_err(|e| Error::Credentials(format!("client verifier: {e}")))?;
        let mut config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())
            .map_err(|e| Error::Credentials(format!("server config: {e}")))?;
        config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
        Ok(Arc::new(config))
    }

    /// Sender-side TLS configuration: presents this credential's chain and
    /// verifies the server against the same material (unless skipped).
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        ensure_crypto_provider();
        let builder = ClientConfig::builder();
        let built = if self.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(SkipServerVerification::new())
                .with_client_auth_cert(self.cert_chain.clone(), self.key.clone_key())
        } else {
            builder
                .with_root_certificates(self.root_store()?)
                .with_client_auth_cert(self.cert_chain.clone(), self.key.clone_key())
        };
        let mut config =
            built.map_err(|e| Error::Credentials(format!("client config: {e}")))?;
        config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
        Ok(Arc::new(config))
    }
}

/// Server-certificate verifier that accepts anything. Signature checks on
/// the handshake itself still run.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self(Arc::new(rustls::crypto::ring::default_provider())))
    }
}

impl ServerCertVerifier for SkipServerVerification {
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
            &self.0.signature_verification_algorithms,
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
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_builds_both_configs() {
        let creds = Credentials::self_signed(&["localhost", "127.0.0.1"]).unwrap();
        creds.server_config().unwrap();
        creds.client_config().unwrap();
    }

    #[test]
    fn test_skip_verify_builds_client_config() {
        let creds = Credentials::self_signed(&["localhost"])
            .unwrap()
            .with_insecure_skip_verify(true);
        assert!(creds.insecure_skip_verify());
        creds.client_config().unwrap();
    }

    #[test]
    fn test_pem_round_trip() {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        let creds = Credentials::from_pem(&cert.pem(), &key_pair.serialize_pem()).unwrap();
        creds.server_config().unwrap();
        creds.client_config().unwrap();
    }

    #[test]
    fn test_garbage_pem_is_rejected() {
        let err = Credentials::from_pem("not a cert", "not a key").unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
    }
}
