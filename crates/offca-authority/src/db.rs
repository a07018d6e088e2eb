//! Authority state: used token ids and revoked serial numbers.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use offca_core::{OffcaError, Result};

/// A recorded revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedCertificate {
    /// Decimal serial number
    pub serial: String,
    /// Provisioner that authorized the revocation; empty for mTLS
    pub provisioner_id: String,
    pub reason_code: u8,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
    /// Authorized by the certificate itself rather than a token
    pub mtls: bool,
    pub token_id: String,
}

/// Storage behind the authority.
pub trait AuthorityDb: Send + Sync {
    /// Record `id` as used. Returns `false` when it was already used.
    fn use_token(&self, id: &str, token: &str) -> Result<bool>;

    fn is_revoked(&self, serial: &str) -> Result<bool>;

    /// Record a revocation; revoking the same serial twice is an error.
    fn revoke(&self, entry: RevokedCertificate) -> Result<()>;

    fn revocation(&self, serial: &str) -> Result<Option<RevokedCertificate>>;
}

/// Process-local state, discarded with the authority.
#[derive(Debug, Default)]
pub struct MemoryDb {
    used_tokens: Mutex<HashMap<String, String>>,
    revoked: Mutex<HashMap<String, RevokedCertificate>>,
}

impl MemoryDb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> OffcaError {
    OffcaError::Revocation("authority database is unavailable".to_string())
}

impl AuthorityDb for MemoryDb {
    fn use_token(&self, id: &str, token: &str) -> Result<bool> {
        let mut used = self.used_tokens.lock().map_err(poisoned)?;
        if used.contains_key(id) {
            return Ok(false);
        }
        used.insert(id.to_string(), token.to_string());
        Ok(true)
    }

    fn is_revoked(&self, serial: &str) -> Result<bool> {
        Ok(self.revoked.lock().map_err(poisoned)?.contains_key(serial))
    }

    fn revoke(&self, entry: RevokedCertificate) -> Result<()> {
        let mut revoked = self.revoked.lock().map_err(poisoned)?;
        if revoked.contains_key(&entry.serial) {
            return Err(OffcaError::Revocation(format!(
                "certificate with serial number {} is already revoked",
                entry.serial
            )));
        }
        debug!(serial = %entry.serial, reason_code = entry.reason_code, "recording revocation");
        revoked.insert(entry.serial.clone(), entry);
        Ok(())
    }

    fn revocation(&self, serial: &str) -> Result<Option<RevokedCertificate>> {
        Ok(self.revoked.lock().map_err(poisoned)?.get(serial).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(serial: &str) -> RevokedCertificate {
        RevokedCertificate {
            serial: serial.to_string(),
            provisioner_id: "admin:kid".to_string(),
            reason_code: 1,
            reason: "key compromise".to_string(),
            revoked_at: Utc::now(),
            mtls: false,
            token_id: "jti".to_string(),
        }
    }

    #[test]
    fn token_ids_are_single_use() {
        let db = MemoryDb::new();
        assert!(db.use_token("abc", "t1").unwrap());
        assert!(!db.use_token("abc", "t2").unwrap());
        assert!(db.use_token("def", "t3").unwrap());
    }

    #[test]
    fn revoking_twice_fails() {
        let db = MemoryDb::new();
        db.revoke(entry("42")).unwrap();
        assert!(db.is_revoked("42").unwrap());
        assert!(!db.is_revoked("43").unwrap());
        assert_eq!(db.revocation("42").unwrap().unwrap().reason_code, 1);

        let err = db.revoke(entry("42")).unwrap_err();
        assert!(matches!(err, OffcaError::Revocation(_)));
        assert!(err.to_string().contains("already revoked"));
    }
}
