//! Mutual TLS for remote Docker endpoints
//!
//! Follows the Docker client convention of a certificate directory holding
//! `ca.pem`, `cert.pem` and `key.pem`.

use crate::error::RuntimeError;
use rustls_pemfile::Item;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use tokio_rustls::TlsConnector;

/// Build a TLS connector from a Docker certificate directory
pub fn load_tls_connector(cert_dir: &Path) -> Result<TlsConnector, RuntimeError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(&cert_dir.join("ca.pem"))? {
        roots
            .add(&cert)
            .map_err(|e| RuntimeError::Tls(format!("invalid CA certificate: {e}")))?;
    }

    let certs = read_certs(&cert_dir.join("cert.pem"))?;
    let key = read_key(&cert_dir.join("key.pem"))?;

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| RuntimeError::Tls(format!("invalid client certificate: {e}")))?;

    Ok(TlsConnector::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, RuntimeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| RuntimeError::Tls(format!("failed to read {}: {e}", path.display())))
}

fn read_certs(path: &Path) -> Result<Vec<Certificate>, RuntimeError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|e| RuntimeError::Tls(format!("failed to parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(RuntimeError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs.into_iter().map(Certificate).collect())
}

fn read_key(path: &Path) -> Result<PrivateKey, RuntimeError> {
    let mut reader = open(path)?;

    loop {
        let item = rustls_pemfile::read_one(&mut reader)
            .map_err(|e| RuntimeError::Tls(format!("failed to parse {}: {e}", path.display())))?;

        match item {
            Some(Item::RSAKey(key)) | Some(Item::PKCS8Key(key)) | Some(Item::ECKey(key)) => {
                return Ok(PrivateKey(key));
            }
            Some(_) => continue,
            None => break,
        }
    }

    Err(RuntimeError::Tls(format!(
        "no private key found in {}",
        path.display()
    )))
}
