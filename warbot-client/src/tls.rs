//! TLS connector for websocket and HTTPS endpoints.

use crate::error::ClientError;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Creates a TLS connector trusting the bundled web PKI roots.
pub fn create_tls_connector() -> TlsConnector {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(client_config))
}

/// Converts a host into an SNI server name.
pub fn server_name(host: &str) -> Result<ServerName<'static>, ClientError> {
    ServerName::try_from(host.to_string())
        .map_err(|_| ClientError::TlsConfig(format!("invalid server name: {}", host)))
}
