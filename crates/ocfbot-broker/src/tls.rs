//! TLS settings for broker links.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::BrokerError;

/// How the server certificate of a `rediss://` link is checked.
#[derive(Debug, Clone)]
pub enum CertVerification {
    /// Validate the chain against CAs loaded from a PEM bundle.
    Verified {
        /// Path to the PEM-encoded CA bundle.
        ca_certs: PathBuf,
    },
    /// Accept any certificate. The result backend is deployed this way.
    Disabled,
}

/// Make ring the process-wide rustls provider unless one is installed already.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Read a PEM CA bundle, checking that it holds at least one certificate.
pub fn load_ca_bundle(path: &Path) -> Result<Vec<u8>, BrokerError> {
    let pem = std::fs::read(path).map_err(|e| {
        BrokerError::Tls(format!("Failed to read CA bundle {}: {}", path.display(), e))
    })?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            BrokerError::Tls(format!("Failed to parse CA bundle {}: {}", path.display(), e))
        })?;
    if certs.is_empty() {
        return Err(BrokerError::Tls(format!(
            "No usable CA certificates in {}",
            path.display()
        )));
    }
    info!(ca_certs = %path.display(), count = certs.len(), "Loaded broker CA bundle");
    Ok(pem)
}

/// The URL with its fragment replaced by `#insecure`, which tells the redis
/// client to skip certificate validation.
pub fn insecure_url(url: &str) -> String {
    let base = url.split_once('#').map_or(url, |(base, _)| base);
    format!("{base}#insecure")
}
