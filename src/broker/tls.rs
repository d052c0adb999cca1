//! TLS acceptor construction
//!
//! Loads PEM certificate chain, private key and an optional client trust
//! store, and produces the acceptor that wraps client sockets. The broker
//! itself treats the TLS stream as an opaque byte stream.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// TLS material locations
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Certificate chain (PEM)
    pub cert_path: String,
    /// Private key (PEM)
    pub key_path: String,
    /// Trust store for client certificates (PEM, optional)
    pub trust_store_path: Option<String>,
    /// Require a verified client certificate
    pub require_client_cert: bool,
}

/// TLS setup errors
#[derive(Debug)]
pub enum TlsError {
    Io(std::io::Error),
    Certificate(String),
    PrivateKey(String),
    Config(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "I/O error: {}", e),
            TlsError::Certificate(msg) => write!(f, "certificate error: {}", msg),
            TlsError::PrivateKey(msg) => write!(f, "private key error: {}", msg),
            TlsError::Config(msg) => write!(f, "TLS config error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<std::io::Error> for TlsError {
    fn from(e: std::io::Error) -> Self {
        TlsError::Io(e)
    }
}

fn load_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_reader_iter(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse {}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(TlsError::Certificate(format!(
            "no certificates found in {}",
            path
        )));
    }

    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    PrivateKeyDer::from_pem_reader(reader)
        .map_err(|e| TlsError::PrivateKey(format!("failed to parse {}: {}", path, e)))
}

fn load_trust_store(path: &str) -> Result<RootCertStore, TlsError> {
    let mut store = RootCertStore::empty();
    for cert in load_cert_chain(path)? {
        store
            .add(cert)
            .map_err(|e| TlsError::Certificate(format!("failed to add trust anchor: {}", e)))?;
    }
    Ok(store)
}

/// Build an acceptor from the configured material
pub fn build_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor, TlsError> {
    let certs = load_cert_chain(&settings.cert_path)?;
    let key = load_key(&settings.key_path)?;

    let server_config = match (&settings.trust_store_path, settings.require_client_cert) {
        (Some(trust_path), required) => {
            let store = load_trust_store(trust_path)?;
            let builder = WebPkiClientVerifier::builder(Arc::new(store));
            let verifier = if required {
                builder.build()
            } else {
                builder.allow_unauthenticated().build()
            }
            .map_err(|e| TlsError::Config(format!("client verifier: {}", e)))?;

            ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
        }
        (None, true) => {
            return Err(TlsError::Config(
                "trust_store is required when require_client_cert is set".to_string(),
            ))
        }
        (None, false) => ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key),
    }
    .map_err(|e| TlsError::Config(format!("server config: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TlsError::Certificate("bad chain".to_string());
        assert!(err.to_string().contains("certificate error"));

        let err = TlsError::Config("missing".to_string());
        assert!(err.to_string().contains("TLS config error"));
    }

    #[test]
    fn missing_material_is_an_error() {
        let settings = TlsSettings {
            cert_path: "/nonexistent/cert.pem".to_string(),
            key_path: "/nonexistent/key.pem".to_string(),
            trust_store_path: None,
            require_client_cert: false,
        };
        assert!(build_acceptor(&settings).is_err());
    }
}
