//! The peer identity presented to renew and revoke.
//!
//! Renewal and token-less revocation are authorized by the certificate the
//! caller holds. A [`PeerTransport`] supplies it: over a real connection it
//! would be the TLS peer chain, offline it is the certificate and key named
//! on the command line.

use std::fs;
use std::path::Path;

use openssl::pkey::{PKey, Private};
use openssl::x509::{X509Ref, X509};

use crate::pool::read_certificates;
use offca_core::{OffcaError, Result};

pub trait PeerTransport: Send + Sync {
    /// Peer chain, leaf first.
    fn peer_certificates(&self) -> &[X509];

    fn peer_leaf(&self) -> Result<&X509Ref> {
        self.peer_certificates()
            .first()
            .map(|cert| &**cert)
            .ok_or_else(|| OffcaError::Validation("no peer certificate presented".to_string()))
    }
}

/// A certificate chain and the private key proving possession of it.
pub struct MtlsIdentity {
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl MtlsIdentity {
    /// Load a PEM chain and an unencrypted PEM key, checking they match.
    pub fn load(cert: &Path, key: &Path) -> Result<Self> {
        let invalid = |e: OffcaError| OffcaError::Validation(e.to_string());
        let chain = read_certificates(cert).map_err(invalid)?;
        let pem = fs::read(key)
            .map_err(|e| OffcaError::Validation(format!("error reading {}: {e}", key.display())))?;
        let key = PKey::private_key_from_pem(&pem)
            .map_err(|e| OffcaError::Validation(format!("error parsing {}: {e}", key.display())))?;
        Self::new(chain, key)
    }

    pub fn new(chain: Vec<X509>, key: PKey<Private>) -> Result<Self> {
        let leaf = chain
            .first()
            .ok_or_else(|| OffcaError::Validation("empty certificate chain".to_string()))?;
        let matches = leaf
            .public_key()
            .map(|public| public.public_eq(&key))
            .unwrap_or(false);
        if !matches {
            return Err(OffcaError::Validation(
                "certificate does not match the private key".to_string(),
            ));
        }
        Ok(Self { chain, key })
    }

    #[must_use]
    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }
}

impl PeerTransport for MtlsIdentity {
    fn peer_certificates(&self) -> &[X509] {
        &self.chain
    }
}

/// No peer; operations needing one fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeer;

impl PeerTransport for NoPeer {
    fn peer_certificates(&self) -> &[X509] {
        &[]
    }
}
