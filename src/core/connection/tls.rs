//! TLS connector setup (spec §6 `connection.tls`): a `rustls`
//! `ClientConfig` built from the configured truststore, falling back to
//! the bundled Mozilla roots via `webpki-roots` when no truststore is
//! given.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::core::errors::ClientError;

pub fn build_connector(truststore_path: Option<&str>) -> Result<TlsConnector, ClientError> {
    let mut roots = RootCertStore::empty();
    match truststore_path {
        Some(path) => {
            let file = File::open(path)?;
            let mut reader = BufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| ClientError::Config(format!("invalid certificate in {path}: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| ClientError::Config(format!("failed to add trust anchor from {path}: {e}")))?;
            }
        }
        None => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, ClientError> {
    ServerName::try_from(host.to_string()).map_err(|e| ClientError::Config(format!("invalid TLS server name '{host}': {e}")))
}
