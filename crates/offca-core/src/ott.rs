//! Bootstrap one-time tokens signed with a JWK provisioner key.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::claims::{random_jti, Audience, ClaimSet, Claims, NumericDate};
use crate::jose::{self, jws};
use crate::provisioner::JwkProvisioner;
use crate::secret::SecretResolver;
use crate::{IssuanceStep, OffcaError, Result};

/// Lifetime of a token when the caller does not choose one.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::minutes(5);

/// Prompt used to unlock a provisioner key.
pub const PROVISIONER_KEY_PROMPT: &str = "Please enter the password to decrypt the provisioner key";

/// Claims carried by a bootstrap token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapClaims {
    #[serde(flatten)]
    pub claims: Claims,

    /// Names the certificate may carry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,

    /// SHA-256 fingerprint of the root certificate, hex encoded
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha: String,
}

/// What the token asserts and for how long.
#[derive(Debug, Clone)]
pub struct BootstrapRequest<'a> {
    pub subject: &'a str,
    pub audience: &'a str,
    pub root_fingerprint: &'a str,
    /// Defaults to the subject alone
    pub sans: Vec<String>,
    /// Defaults to now
    pub not_before: Option<DateTime<Utc>>,
    /// Defaults to `not_before` plus [`DEFAULT_TOKEN_LIFETIME`]
    pub not_after: Option<DateTime<Utc>>,
}

impl<'a> BootstrapRequest<'a> {
    #[must_use]
    pub const fn new(subject: &'a str, audience: &'a str, root_fingerprint: &'a str) -> Self {
        Self {
            subject,
            audience,
            root_fingerprint,
            sans: Vec::new(),
            not_before: None,
            not_after: None,
        }
    }
}

/// Decrypt the provisioner key and sign a bootstrap token with it.
pub fn issue_jwk_token(
    provisioner: &JwkProvisioner,
    request: &BootstrapRequest<'_>,
    secrets: &dyn SecretResolver,
) -> Result<String> {
    if provisioner.encrypted_key.is_empty() {
        return Err(OffcaError::Config(format!(
            "provisioner '{}' does not have an 'encryptedKey' property",
            provisioner.name
        )));
    }

    let decrypt = |e: OffcaError| OffcaError::issuance(IssuanceStep::Decrypt, e.to_string());
    let password = secrets.resolve(PROVISIONER_KEY_PROMPT).map_err(decrypt)?;
    let key = jose::decrypt_jwk(&provisioner.encrypted_key, &password).map_err(decrypt)?;

    let claims = build_claims(provisioner, request, Utc::now())
        .map_err(|e| OffcaError::issuance(IssuanceStep::Claims, e.to_string()))?;

    let sign = |e: OffcaError| OffcaError::issuance(IssuanceStep::Sign, e.to_string());
    let alg = key.resolve_algorithm(None, false).map_err(sign)?;
    let kid = provisioner.key.kid.as_deref().or(key.kid.as_deref());
    let token = jws::sign(&claims, &key, alg, kid).map_err(sign)?;

    info!(
        provisioner = %provisioner.name,
        subject = %request.subject,
        audience = %request.audience,
        "issued bootstrap token"
    );
    Ok(token)
}

fn build_claims(
    provisioner: &JwkProvisioner,
    request: &BootstrapRequest<'_>,
    now: DateTime<Utc>,
) -> Result<ClaimSet> {
    let not_before = request.not_before.unwrap_or(now);
    let not_after = request
        .not_after
        .unwrap_or(not_before + DEFAULT_TOKEN_LIFETIME);
    if not_after <= not_before {
        return Err(OffcaError::Usage(format!(
            "token expiry {} must be after its start {}",
            not_after.to_rfc3339(),
            not_before.to_rfc3339()
        )));
    }

    let claims = Claims {
        issuer: provisioner.name.clone(),
        subject: request.subject.to_string(),
        audience: Audience::from(request.audience),
        expiry: Some(NumericDate::new(not_after)),
        not_before: Some(NumericDate::new(not_before)),
        issued_at: Some(NumericDate::new(now)),
        id: random_jti(64),
    };
    let sans = if request.sans.is_empty() {
        vec![request.subject.to_string()]
    } else {
        request.sans.clone()
    };

    ClaimSet::from_claims(&claims)?.merge(&json!({
        "sans": sans,
        "sha": request.root_fingerprint,
    }))
}
