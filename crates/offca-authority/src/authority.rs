//! The signing authority: token authorization and certificate lifecycle.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::{debug, info};

use offca_core::claims::Expected;
use offca_core::config::{AuthorityConfig, CertDurations, TlsOptions};
use offca_core::jose::jws;
use offca_core::ott::BootstrapClaims;
use offca_core::provisioner::{JwkProvisioner, Provisioner};
use offca_core::secret::SecretResolver;
use offca_core::{OffcaError, Result};

use crate::api::{RevokeRequest, RevokeResponse, SignRequest, SignResponse};
use crate::db::{AuthorityDb, RevokedCertificate};
use crate::pool::{self, CertPool};
use crate::transport::PeerTransport;
use crate::x509::{self as certs, LeafTemplate, San};

/// Clock skew tolerated when validating token times.
pub const TOKEN_LEEWAY: Duration = Duration::seconds(60);

/// Prompt used to unlock an encrypted intermediate key.
pub const INTERMEDIATE_KEY_PROMPT: &str = "Please enter the password to decrypt the intermediate key";

/// What a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Sign,
    Revoke,
}

impl TokenType {
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Sign => "sign",
            Self::Revoke => "revoke",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A verified, unused token and the provisioner that issued it.
#[derive(Debug, Clone)]
pub struct AuthorizedToken {
    pub provisioner: Provisioner,
    pub claims: BootstrapClaims,
    pub durations: CertDurations,
}

impl AuthorizedToken {
    /// Names a certificate requested with this token may carry.
    #[must_use]
    pub fn allowed_sans(&self) -> Vec<String> {
        if self.claims.sans.is_empty() {
            vec![self.claims.claims.subject.clone()]
        } else {
            self.claims.sans.clone()
        }
    }
}

pub struct Authority {
    config: AuthorityConfig,
    roots: CertPool,
    intermediate: X509,
    intermediates: CertPool,
    signer: PKey<Private>,
    root_fingerprint: String,
    db: Arc<dyn AuthorityDb>,
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority")
            .field("dns_names", &self.config.dns_names)
            .field("roots", &self.roots)
            .field("root_fingerprint", &self.root_fingerprint)
            .finish_non_exhaustive()
    }
}

impl Authority {
    /// Load the roots, intermediate and signing key named by `config`.
    ///
    /// The intermediate must chain to a root and match its key. An encrypted
    /// key is opened with the configured password, or `secrets` if there is
    /// none.
    pub fn new(
        config: AuthorityConfig,
        db: Arc<dyn AuthorityDb>,
        secrets: &dyn SecretResolver,
    ) -> Result<Self> {
        let mut roots = CertPool::new();
        for path in &config.root {
            roots.extend(CertPool::from_pem_file(path)?);
        }
        let root_fingerprint = roots
            .first()
            .map(|root| pool::fingerprint(root))
            .transpose()?
            .ok_or_else(|| OffcaError::Config("root cannot be empty".to_string()))?;

        let intermediates = CertPool::from_pem_file(&config.intermediate_cert)?;
        let intermediate = intermediates.first().cloned().ok_or_else(|| {
            OffcaError::Config(format!(
                "error parsing {}: no certificate found",
                config.intermediate_cert.display()
            ))
        })?;
        let signer = load_signing_key(&config.intermediate_key, config.password.as_deref(), secrets)?;

        pool::verify_chain(&intermediate, &roots, &CertPool::new()).map_err(|e| {
            OffcaError::Config(format!("intermediate certificate does not chain to the root: {e}"))
        })?;
        let matches = intermediate
            .public_key()
            .map(|public| public.public_eq(&signer))
            .unwrap_or(false);
        if !matches {
            return Err(OffcaError::Config(
                "intermediate key does not match the intermediate certificate".to_string(),
            ));
        }

        debug!(fingerprint = %root_fingerprint, roots = roots.len(), "authority initialized");
        Ok(Self {
            config,
            roots,
            intermediate,
            intermediates,
            signer,
            root_fingerprint,
            db,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    #[must_use]
    pub const fn roots(&self) -> &CertPool {
        &self.roots
    }

    /// The first configured root.
    pub fn root(&self) -> Result<&X509> {
        self.roots
            .first()
            .ok_or_else(|| OffcaError::Config("root cannot be empty".to_string()))
    }

    #[must_use]
    pub const fn intermediate(&self) -> &X509 {
        &self.intermediate
    }

    /// Every certificate in the intermediate file. The first one signs.
    #[must_use]
    pub const fn intermediates(&self) -> &CertPool {
        &self.intermediates
    }

    #[must_use]
    pub fn root_fingerprint(&self) -> &str {
        &self.root_fingerprint
    }

    #[must_use]
    pub fn tls_options(&self) -> TlsOptions {
        self.config.tls_options()
    }

    /// Every audience a token for `purpose` may be addressed to.
    #[must_use]
    pub fn audiences(&self, purpose: TokenType) -> Vec<String> {
        self.config
            .dns_names
            .iter()
            .filter(|name| !name.is_empty())
            .flat_map(|name| {
                [
                    format!("https://{name}/{purpose}"),
                    format!("https://{name}/1.0/{purpose}"),
                ]
            })
            .collect()
    }

    /// Verify `ott` and consume its id.
    pub fn authorize(&self, ott: &str, purpose: TokenType) -> Result<AuthorizedToken> {
        let header = jws::peek_header(ott)?;
        let unverified: BootstrapClaims = jws::peek_claims(ott)?;
        let provisioner = self.token_provisioner(&unverified, header.kid.as_deref())?;

        provisioner
            .key
            .check_compatible(header.alg)
            .map_err(|e| OffcaError::Authorization(e.to_string()))?;
        let claims: BootstrapClaims = jws::verify(ott, &provisioner.key, header.alg)?;

        let audiences = self.audiences(purpose);
        claims
            .claims
            .validate(
                &Expected {
                    issuer: Some(&provisioner.name),
                    audiences: &audiences,
                    time: Utc::now(),
                },
                TOKEN_LEEWAY,
            )
            .map_err(|e| OffcaError::Authorization(format!("invalid token: {e}")))?;

        if claims.claims.subject.is_empty() {
            return Err(OffcaError::Authorization(
                "token subject (sub) cannot be empty".to_string(),
            ));
        }
        if claims.claims.id.is_empty() {
            return Err(OffcaError::Authorization("token id (jti) cannot be empty".to_string()));
        }
        if !claims.sha.is_empty() && !claims.sha.eq_ignore_ascii_case(&self.root_fingerprint) {
            return Err(OffcaError::Authorization(
                "token root fingerprint (sha) does not match the authority root".to_string(),
            ));
        }
        if !self.db.use_token(&claims.claims.id, ott)? {
            return Err(OffcaError::Authorization("token already used".to_string()));
        }

        let provisioner = Provisioner::Jwk(provisioner.clone());
        let durations = self.config.cert_durations(Some(&provisioner))?;
        debug!(
            provisioner = %provisioner.name(),
            subject = %claims.claims.subject,
            purpose = %purpose,
            "token authorized"
        );
        Ok(AuthorizedToken {
            provisioner,
            claims,
            durations,
        })
    }

    fn token_provisioner(&self, claims: &BootstrapClaims, kid: Option<&str>) -> Result<&JwkProvisioner> {
        let issuer = &claims.claims.issuer;
        let found = self.config.provisioners().iter().find_map(|p| match p {
            Provisioner::Jwk(jwk) if &jwk.name == issuer && jwk.key.kid.as_deref() == kid => Some(jwk),
            _ => None,
        });
        if let Some(provisioner) = found {
            return Ok(provisioner);
        }

        // Delegated tokens name their provisioner in the audience fragment or,
        // for OIDC, carry the client id as audience.
        let delegated = self.config.provisioners().iter().find(|p| match p {
            Provisioner::Jwk(_) => false,
            Provisioner::Oidc(oidc) => claims.claims.audience.contains(&oidc.client_id),
            other => {
                let id = other.id();
                claims
                    .claims
                    .audience
                    .iter()
                    .any(|aud| aud.rsplit_once('#').is_some_and(|(_, fragment)| fragment == id))
            }
        });
        match delegated {
            Some(p) => Err(OffcaError::Authorization(format!(
                "token from {} provisioner '{}' cannot be verified offline",
                p.kind(),
                p.name()
            ))),
            None => Err(OffcaError::Authorization(format!(
                "provisioner not found for token (iss: '{issuer}', kid: '{}')",
                kid.unwrap_or_default()
            ))),
        }
    }

    /// Sign a certificate request authorized by a sign token.
    pub fn sign(&self, request: &SignRequest) -> Result<SignResponse> {
        let token = self.authorize(&request.ott, TokenType::Sign)?;
        let csr = certs::inspect_csr(&request.csr)?;
        let subject = &token.claims.claims.subject;

        let common_name = csr.common_name.as_deref().unwrap_or_default();
        if common_name != subject {
            return Err(OffcaError::Authorization(format!(
                "certificate request common name '{common_name}' does not match the token subject '{subject}'"
            )));
        }
        let allowed = token.allowed_sans();
        if let Some(san) = csr.sans.iter().find(|san| !allowed.contains(&san.to_string())) {
            return Err(OffcaError::Authorization(format!(
                "certificate request SAN '{san}' is not allowed by the token"
            )));
        }

        let now = Utc::now();
        let not_before = request.not_before.map_or(now, |t| t.resolve(now));
        let not_after = request
            .not_after
            .map_or(not_before + token.durations.default, |t| t.resolve(now));
        check_duration(not_after - not_before, &token.durations)?;

        let leaf = certs::issue_leaf(
            &LeafTemplate {
                common_name: subject,
                sans: &csr.sans,
                public_key: &csr.public_key,
                not_before,
                not_after,
            },
            &self.intermediate,
            &self.signer,
        )?;
        info!(
            subject = %subject,
            provisioner = %token.provisioner.name(),
            serial = %certs::serial_string(&leaf)?,
            not_after = %not_after.to_rfc3339(),
            "certificate signed"
        );
        self.response(&leaf)
    }

    /// Reissue the peer's certificate with the same lifetime, starting now.
    pub fn renew(&self, peer: &dyn PeerTransport) -> Result<SignResponse> {
        let current = peer.peer_leaf()?;
        if !certs::issued_by(current, &self.intermediate) {
            return Err(OffcaError::Authorization(
                "certificate was not issued by this authority".to_string(),
            ));
        }
        let serial = certs::serial_string(current)?;
        if self.db.is_revoked(&serial)? {
            return Err(OffcaError::Authorization(format!(
                "certificate with serial number {serial} has been revoked"
            )));
        }
        let (not_before, not_after) = certs::validity(current)?;
        let now = Utc::now();
        if not_after < now {
            return Err(OffcaError::Authorization(format!(
                "certificate expired on {}",
                not_after.to_rfc3339()
            )));
        }
        let durations = self.config.cert_durations(None)?;
        if durations.disable_renewal {
            return Err(OffcaError::Authorization("renew is disabled".to_string()));
        }

        let common_name = certs::common_name(current.subject_name()).unwrap_or_default();
        let sans = certs::certificate_sans(current);
        let public_key = current
            .public_key()
            .map_err(|e| OffcaError::Validation(format!("error reading certificate key: {e}")))?;
        let leaf = certs::issue_leaf(
            &LeafTemplate {
                common_name: &common_name,
                sans: &sans,
                public_key: &public_key,
                not_before: now,
                not_after: now + (not_after - not_before),
            },
            &self.intermediate,
            &self.signer,
        )?;
        info!(
            subject = %common_name,
            previous = %serial,
            serial = %certs::serial_string(&leaf)?,
            "certificate renewed"
        );
        self.response(&leaf)
    }

    /// Record a passive revocation.
    ///
    /// A token must be a revoke token whose subject is the serial number;
    /// without one, the peer certificate must be the one being revoked.
    /// Token failures are [`OffcaError::Authorization`]. Bad requests, serial
    /// mismatches and store errors are [`OffcaError::Revocation`].
    pub fn revoke(&self, request: &RevokeRequest, peer: &dyn PeerTransport) -> Result<RevokeResponse> {
        let reason_code = request.validate()?;
        let serial = request.serial.trim();
        if serial.is_empty() {
            return Err(OffcaError::Revocation("serial number cannot be empty".to_string()));
        }

        let entry = if request.ott.is_empty() {
            let current = peer.peer_leaf()?;
            if certs::serial_string(current)? != serial {
                return Err(OffcaError::Revocation(format!(
                    "serial number {serial} does not match the peer certificate"
                )));
            }
            if !certs::issued_by(current, &self.intermediate) {
                return Err(OffcaError::Revocation(
                    "certificate was not issued by this authority".to_string(),
                ));
            }
            RevokedCertificate {
                serial: serial.to_string(),
                provisioner_id: String::new(),
                reason_code,
                reason: request.reason.clone(),
                revoked_at: Utc::now(),
                mtls: true,
                token_id: String::new(),
            }
        } else {
            let token = self.authorize(&request.ott, TokenType::Revoke)?;
            if token.claims.claims.subject != serial {
                return Err(OffcaError::Revocation(format!(
                    "token subject '{}' does not match the serial number {serial}",
                    token.claims.claims.subject
                )));
            }
            RevokedCertificate {
                serial: serial.to_string(),
                provisioner_id: token.provisioner.id(),
                reason_code,
                reason: request.reason.clone(),
                revoked_at: Utc::now(),
                mtls: false,
                token_id: token.claims.claims.id,
            }
        };

        let mtls = entry.mtls;
        self.db.revoke(entry)?;
        info!(serial = %serial, reason_code, mtls, "certificate revoked");
        Ok(RevokeResponse::ok())
    }

    fn response(&self, leaf: &X509) -> Result<SignResponse> {
        let pem = |cert: &X509| {
            cert.to_pem()
                .map_err(|e| OffcaError::Signing(format!("error encoding certificate: {e}")))
                .and_then(|bytes| {
                    String::from_utf8(bytes)
                        .map_err(|e| OffcaError::Signing(format!("error encoding certificate: {e}")))
                })
        };
        Ok(SignResponse {
            crt: pem(leaf)?,
            ca: pem(&self.intermediate)?,
            tls_options: self.tls_options(),
        })
    }
}

fn check_duration(requested: Duration, bounds: &CertDurations) -> Result<()> {
    use offca_core::duration::format_duration;

    if requested < bounds.min {
        return Err(OffcaError::Authorization(format!(
            "requested duration of {} is less than the authorized minimum certificate duration of {}",
            format_duration(requested),
            format_duration(bounds.min)
        )));
    }
    if requested > bounds.max {
        return Err(OffcaError::Authorization(format!(
            "requested duration of {} is more than the authorized maximum certificate duration of {}",
            format_duration(requested),
            format_duration(bounds.max)
        )));
    }
    Ok(())
}

fn load_signing_key(
    path: &Path,
    password: Option<&str>,
    secrets: &dyn SecretResolver,
) -> Result<PKey<Private>> {
    let pem = fs::read(path)
        .map_err(|e| OffcaError::Config(format!("error reading {}: {e}", path.display())))?;
    let parse = |e: openssl::error::ErrorStack| {
        OffcaError::Config(format!("error parsing {}: {e}", path.display()))
    };

    let encrypted = String::from_utf8_lossy(&pem).contains("ENCRYPTED");
    if !encrypted {
        return PKey::private_key_from_pem(&pem).map_err(parse);
    }
    match password {
        Some(password) if !password.is_empty() => {
            PKey::private_key_from_pem_passphrase(&pem, password.as_bytes()).map_err(parse)
        }
        _ => {
            debug!(path = %path.display(), "intermediate key is encrypted, asking for its password");
            let password = secrets.resolve(INTERMEDIATE_KEY_PROMPT)?;
            PKey::private_key_from_pem_passphrase(&pem, &password).map_err(parse)
        }
    }
}

/// Classify the SANs of a token or flag list.
#[must_use]
pub fn classify_sans(values: &[String]) -> Vec<San> {
    values.iter().map(|v| San::classify(v)).collect()
}
