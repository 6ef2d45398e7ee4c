//! Wires `CertificateStore` into `rustls` server/client configs (§4.C).
//! The server-side resolver mints (or reuses) a leaf certificate for
//! whatever SNI name the client presented, handshake by handshake; the
//! client-side config trusts the system/webpki root set for proxy→origin
//! connections, plus any additional trusted certificates file the
//! operator supplies.

use std::path::Path;
use std::sync::Arc;

use aether_core::error::TlsError;
use rustls::server::{ClientHello as RustlsClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::cert_store::CertificateStore;

/// Resolves a `CertifiedKey` for each incoming handshake by minting (or
/// fetching a cached) leaf certificate from `CertificateStore`, keyed on
/// the client's SNI host name.
pub struct MintingCertResolver {
    store: Arc<CertificateStore>,
}

impl MintingCertResolver {
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for MintingCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintingCertResolver").finish()
    }
}

impl ResolvesServerCert for MintingCertResolver {
    fn resolve(&self, client_hello: RustlsClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello.server_name()?;
        let (minted, _was_cached) = self.store.certificate_for(host).ok()?;
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&minted.key_der).ok()?;
        Some(Arc::new(CertifiedKey::new(vec![minted.cert_der], signing_key)))
    }
}

/// Builds the server-facing TLS config used to terminate the client
/// connection after a CONNECT/SNI decision to intercept (§4.C, §4.E).
pub fn build_server_config(store: Arc<CertificateStore>) -> Result<ServerConfig, TlsError> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(MintingCertResolver::new(store)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Builds the client-facing TLS config used for the proxy's outbound
/// connection to the real origin server, trusting the platform's
/// webpki roots plus anything in `extra_trusted_certs_file`.
pub fn build_client_config(extra_trusted_certs_file: Option<&Path>) -> Result<ClientConfig, TlsError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = extra_trusted_certs_file {
        let pem = std::fs::read(path).map_err(|e| {
            TlsError::InvalidTrustedCertificatesFile(format!("reading {}: {e}", path.display()))
        })?;
        let mut reader = std::io::Cursor::new(pem);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| {
                TlsError::InvalidTrustedCertificatesFile(format!("parsing certificate: {e}"))
            })?;
            roots.add(cert).map_err(|e| {
                TlsError::InvalidTrustedCertificatesFile(format!("adding to trust store: {e}"))
            })?;
        }
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
