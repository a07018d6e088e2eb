//! Certificate pools and chain verification.

use std::fs;
use std::path::Path;

use openssl::hash::MessageDigest;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509Ref, X509StoreContext, X509};

use offca_core::{OffcaError, Result};

/// An ordered set of certificates.
#[derive(Clone, Default)]
pub struct CertPool {
    certs: Vec<X509>,
}

impl CertPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every certificate in a PEM file.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Ok(Self {
            certs: read_certificates(path)?,
        })
    }

    pub fn add(&mut self, cert: X509) {
        self.certs.push(cert);
    }

    pub fn extend(&mut self, other: Self) {
        self.certs.extend(other.certs);
    }

    #[must_use]
    pub fn certs(&self) -> &[X509] {
        &self.certs
    }

    #[must_use]
    pub fn first(&self) -> Option<&X509> {
        self.certs.first()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }
}

impl std::fmt::Debug for CertPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertPool").field("len", &self.certs.len()).finish()
    }
}

/// Read all PEM certificates in `path`; at least one is required.
pub fn read_certificates(path: &Path) -> Result<Vec<X509>> {
    let data = fs::read(path)
        .map_err(|e| OffcaError::Config(format!("error reading {}: {e}", path.display())))?;
    let certs = X509::stack_from_pem(&data)
        .map_err(|e| OffcaError::Config(format!("error parsing {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(OffcaError::Config(format!(
            "error parsing {}: no certificate found",
            path.display()
        )));
    }
    Ok(certs)
}

/// Verify that `leaf` chains to one of `roots` through `intermediates`.
///
/// Failures are [`OffcaError::Validation`].
pub fn verify_chain(leaf: &X509Ref, roots: &CertPool, intermediates: &CertPool) -> Result<()> {
    let invalid = |e: openssl::error::ErrorStack| OffcaError::Validation(format!("error verifying certificate: {e}"));

    let mut store = X509StoreBuilder::new().map_err(invalid)?;
    for root in roots.certs() {
        store.add_cert(root.clone()).map_err(invalid)?;
    }
    let store = store.build();

    let mut chain = Stack::new().map_err(invalid)?;
    for cert in intermediates.certs() {
        chain.push(cert.clone()).map_err(invalid)?;
    }

    let mut context = X509StoreContext::new().map_err(invalid)?;
    let outcome = context
        .init(&store, leaf, &chain, |ctx| {
            let verified = ctx.verify_cert()?;
            Ok(if verified {
                None
            } else {
                Some(ctx.error().error_string().to_string())
            })
        })
        .map_err(invalid)?;

    match outcome {
        None => Ok(()),
        Some(reason) => Err(OffcaError::Validation(format!(
            "error verifying certificate: {reason}"
        ))),
    }
}

/// Hex-encoded SHA-256 of the DER certificate.
pub fn fingerprint(cert: &X509Ref) -> Result<String> {
    let digest = cert
        .digest(MessageDigest::sha256())
        .map_err(|e| OffcaError::Config(format!("error computing fingerprint: {e}")))?;
    Ok(hex::encode(digest))
}
