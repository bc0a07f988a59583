/*
[INPUT]:  PEM-encoded certificate authority bundles
[OUTPUT]: rustls client configuration for `wss` endpoints behind a private CA
[POS]:    Transport layer - TLS trust setup
[UPDATE]: When supporting client certificates or other trust sources
*/

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Certificate authorities to trust for a secure connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustMaterial {
    pem: Vec<u8>,
}

impl TrustMaterial {
    pub fn from_pem(pem: impl Into<Vec<u8>>) -> Self {
        Self { pem: pem.into() }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|err| {
            ClientError::Tls(format!("read trust material {}: {err}", path.display()))
        })?;
        Ok(Self::from_pem(pem))
    }

    pub fn certificates(&self) -> Result<Vec<CertificateDer<'static>>> {
        let mut reader = BufReader::new(self.pem.as_slice());
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| ClientError::Tls(format!("parse PEM: {err}")))?;
        if certs.is_empty() {
            return Err(ClientError::Tls("no certificates in trust material".into()));
        }
        Ok(certs)
    }

    pub fn root_store(&self) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();
        for cert in self.certificates()? {
            if let Err(err) = store.add(cert) {
                warn!(error = %err, "skipping invalid certificate in trust material");
            }
        }
        if store.is_empty() {
            return Err(ClientError::Tls("trust material holds no usable roots".into()));
        }
        Ok(store)
    }

    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let roots = self.root_store()?;
        debug!(roots = roots.len(), "building TLS client config");
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|err| ClientError::Tls(err.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(Arc::new(config))
    }
}
