//! TLS client settings for cluster API servers.

use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Where PEM material comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PemSource {
    File(PathBuf),
    /// PEM bytes embedded in a kubeconfig (`*-data` fields).
    Inline(Vec<u8>),
}

impl PemSource {
    fn read(&self) -> Result<Vec<u8>, String> {
        match self {
            PemSource::File(path) => std::fs::read(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display())),
            PemSource::Inline(bytes) => Ok(bytes.clone()),
        }
    }
}

/// TLS material for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TlsSettings {
    /// Skip server certificate verification.
    pub insecure: bool,
    /// Trusted CA bundle. The webpki roots are used when absent.
    pub ca: Option<PemSource>,
    pub client_cert: Option<PemSource>,
    pub client_key: Option<PemSource>,
}

/// Failure to turn [`TlsSettings`] into a client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterialError {
    /// Setting at fault: `ca_file`, `cert_file` or `key_file`.
    pub key: &'static str,
    pub reason: String,
}

impl TlsMaterialError {
    fn new(key: &'static str, reason: impl Into<String>) -> Self {
        Self {
            key,
            reason: reason.into(),
        }
    }
}

impl TlsSettings {
    /// Check that the client certificate and key come as a pair.
    pub fn check_client_auth(&self) -> Result<(), TlsMaterialError> {
        match (&self.client_cert, &self.client_key) {
            (Some(_), None) => Err(TlsMaterialError::new(
                "key_file",
                "a client certificate needs a client key",
            )),
            (None, Some(_)) => Err(TlsMaterialError::new(
                "cert_file",
                "a client key needs a client certificate",
            )),
            _ => Ok(()),
        }
    }

    /// Build the rustls client configuration, loading every PEM source.
    pub fn client_config(&self) -> Result<Arc<rustls::ClientConfig>, TlsMaterialError> {
        self.check_client_auth()?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsMaterialError::new("tls", e.to_string()))?;

        let builder = if self.insecure {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
        } else {
            let mut roots = rustls::RootCertStore::empty();
            match &self.ca {
                Some(ca) => {
                    for cert in load_certs("ca_file", ca)? {
                        roots
                            .add(cert)
                            .map_err(|e| TlsMaterialError::new("ca_file", e.to_string()))?;
                    }
                }
                None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
            }
            builder.with_root_certificates(roots)
        };

        let config = match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(load_certs("cert_file", cert)?, load_key(key)?)
                .map_err(|e| TlsMaterialError::new("key_file", e.to_string()))?,
            _ => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }
}

fn load_certs(
    key: &'static str,
    source: &PemSource,
) -> Result<Vec<CertificateDer<'static>>, TlsMaterialError> {
    let pem = source.read().map_err(|e| TlsMaterialError::new(key, e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsMaterialError::new(key, format!("malformed PEM: {e}")))?;
    if certs.is_empty() {
        return Err(TlsMaterialError::new(key, "no certificate found"));
    }
    Ok(certs)
}

fn load_key(source: &PemSource) -> Result<PrivateKeyDer<'static>, TlsMaterialError> {
    let pem = source
        .read()
        .map_err(|e| TlsMaterialError::new("key_file", e))?;
    rustls_pemfile::private_key(&mut BufReader::new(pem.as_slice()))
        .map_err(|e| TlsMaterialError::new("key_file", format!("malformed PEM: {e}")))?
        .ok_or_else(|| TlsMaterialError::new("key_file", "no private key found"))
}

/// Verifier for `insecure = true`: accepts any server certificate.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
