use std::fs;
use std::io::{self, BufReader};
use std::sync::Arc;

use rustls::ServerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read '{path}': {source}")]
    Read { path: String, source: io::Error },
    #[error("no valid certificates found in '{0}'")]
    NoCerts(String),
    #[error("no valid private key found in '{0}'")]
    NoKey(String),
    #[error("failed to build TLS config: {0}")]
    Rustls(#[from] rustls::Error),
}

fn read_pem(path: &str) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_string(),
        source,
    })
}

/// Server config for the webhook listener. The API server only talks HTTPS to
/// admission webhooks; no client certificates are requested.
pub fn load_tls_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>, TlsError> {
    let cert_pem = read_pem(cert_path)?;
    let key_pem = read_pem(key_path)?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: cert_path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCerts(cert_path.to_string()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_slice()))
        .map_err(|source| TlsError::Read {
            path: key_path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoKey(key_path.to_string()))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}
