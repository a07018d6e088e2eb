//! The general-purpose JWT signing workflow behind `crypto jwt sign`.
//!
//! Flags are checked before any file is touched, then the key is loaded and
//! checked against the key policy, and finally the claim policy is applied
//! unless the caller explicitly opts out with `subtle`.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::claims::{random_jti, Audience, ClaimSet, Claims, NumericDate};
use crate::jose::{self, jws, Jwk};
use crate::secret::SecretResolver;
use crate::{OffcaError, Result};

/// Length of a generated `jti`, in hex characters.
pub const GENERATED_JTI_LEN: usize = 40;

/// Where the signing key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A single key file
    Key(PathBuf),
    /// A JWK Set, from which `kid` selects the key
    Jwks { path: PathBuf, kid: String },
}

impl KeySource {
    /// Interpret the `--key`, `--jwks` and `--kid` flags.
    ///
    /// Performs no I/O.
    pub fn from_flags(key: Option<PathBuf>, jwks: Option<PathBuf>, kid: Option<&str>) -> Result<Self> {
        match (key, jwks) {
            (Some(_), Some(_)) => Err(OffcaError::Usage(
                "flag '--key' and flag '--jwks' are mutually exclusive".to_string(),
            )),
            (None, None) => Err(OffcaError::Usage(
                "either flag '--key' or flag '--jwks' is required".to_string(),
            )),
            (Some(path), None) => Ok(Self::Key(path)),
            (None, Some(path)) => match kid.filter(|k| !k.is_empty()) {
                Some(kid) => Ok(Self::Jwks {
                    path,
                    kid: kid.to_string(),
                }),
                None => Err(OffcaError::Usage(
                    "flag '--jwks' requires the '--kid' flag".to_string(),
                )),
            },
        }
    }
}

/// Read and parse the signing key.
pub fn load_signing_key(source: &KeySource, secrets: &dyn SecretResolver) -> Result<Jwk> {
    let read = |path: &PathBuf| {
        fs::read(path).map_err(|e| OffcaError::Config(format!("error reading {}: {e}", path.display())))
    };
    match source {
        KeySource::Key(path) => jose::parse_key(&read(path)?, secrets),
        KeySource::Jwks { path, kid } => {
            let set = jose::parse_key_set(&read(path)?, secrets)?;
            set.find(kid).cloned().ok_or_else(|| {
                OffcaError::Config(format!("cannot find key with kid {kid} on {}", path.display()))
            })
        }
    }
}

/// Claims and header options for a signed token.
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    pub alg: Option<String>,
    /// Header `kid`; defaults to the key's own
    pub kid: Option<String>,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub subject: Option<String>,
    /// Unix seconds
    pub expiry: Option<i64>,
    pub not_before: Option<i64>,
    pub issued_at: Option<i64>,
    /// `Some("")` asks for a generated identifier
    pub jti: Option<String>,
    /// Skip the claim policy and the algorithm mismatch check
    pub subtle: bool,
    pub no_kid: bool,
}

fn present(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

impl SignOptions {
    /// Apply the claim policy to the flags alone.
    pub fn check(&self, now: DateTime<Utc>) -> Result<()> {
        if self.subtle {
            return Ok(());
        }
        let required = |flag: &str| {
            Err(OffcaError::Policy(format!(
                "flag '--{flag}' is required unless '--subtle' is used"
            )))
        };
        if !present(self.issuer.as_ref()) {
            return required("iss");
        }
        if self.audience.iter().all(String::is_empty) {
            return required("aud");
        }
        if !present(self.subject.as_ref()) {
            return required("sub");
        }
        match self.expiry {
            None => required("exp"),
            Some(exp) if exp <= now.timestamp() => Err(OffcaError::Policy(
                "flag '--exp' must be in the future unless '--subtle' is used".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    fn claims(&self, now: DateTime<Utc>) -> Claims {
        let id = match self.jti.as_deref() {
            Some("") => random_jti(GENERATED_JTI_LEN),
            Some(jti) => jti.to_string(),
            None => String::new(),
        };
        Claims {
            issuer: self.issuer.clone().unwrap_or_default(),
            subject: self.subject.clone().unwrap_or_default(),
            audience: Audience::new(self.audience.iter().filter(|a| !a.is_empty()).cloned()),
            expiry: self.expiry.map(NumericDate::from_unix),
            not_before: Some(NumericDate::from_unix(self.not_before.unwrap_or(now.timestamp()))),
            issued_at: Some(NumericDate::from_unix(self.issued_at.unwrap_or(now.timestamp()))),
            id,
        }
    }
}

/// Sign `payload` with `key`, enforcing the key and claim policies.
///
/// Registered claims from `options` are merged first, then a single audience
/// is rewritten to a bare string, then `payload` members override both.
pub fn sign_payload(payload: &Map<String, Value>, key: &Jwk, options: &SignOptions) -> Result<String> {
    let now = Utc::now();
    key.check_signing_key()?;
    let alg = key.resolve_algorithm(options.alg.as_deref(), options.subtle)?;

    if options.subtle {
        warn!("'--subtle' is set: skipping the required claims and expiry checks");
    }
    options.check(now)?;

    let claims = ClaimSet::from_claims(&options.claims(now))?.merge(payload)?;
    let kid = if options.no_kid {
        None
    } else {
        options.kid.as_deref().or(key.kid.as_deref())
    };
    debug!(alg = jose::algorithm_name(alg), kid = ?kid, "signing JWT");
    jws::sign(&claims, key, alg, kid)
}

/// Parse a payload document; empty input is an empty object.
pub fn parse_payload(data: &[u8]) -> Result<Map<String, Value>> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(OffcaError::Usage(
            "error parsing payload: the payload must be a JSON object".to_string(),
        )),
        Err(e) => Err(OffcaError::Usage(format!("error parsing payload: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::NoSecret;
    use serde_json::json;

    fn valid_options() -> SignOptions {
        SignOptions {
            issuer: Some("joe".into()),
            audience: vec!["https://example.com".into()],
            subject: Some("subject".into()),
            expiry: Some(Utc::now().timestamp() + 300),
            ..SignOptions::default()
        }
    }

    #[test]
    fn key_flags_are_checked_without_io() {
        let err = KeySource::from_flags(
            Some("/does/not/exist".into()),
            Some("/also/missing".into()),
            Some("kid"),
        )
        .unwrap_err();
        assert!(err.is_usage_error());
        assert!(err.to_string().contains("mutually exclusive"));

        let err = KeySource::from_flags(None, Some("/x".into()), None).unwrap_err();
        assert!(err.to_string().contains("'--kid'"));
        assert!(KeySource::from_flags(None, None, None).unwrap_err().is_usage_error());
    }

    #[test]
    fn missing_audience_is_named() {
        let options = SignOptions {
            audience: Vec::new(),
            ..valid_options()
        };
        let key = Jwk::generate_p256().unwrap();
        let err = sign_payload(&Map::new(), &key, &options).unwrap_err();
        assert_eq!(err.to_string(), "flag '--aud' is required unless '--subtle' is used");
    }

    #[test]
    fn past_expiry_needs_subtle() {
        let key = Jwk::generate_p256().unwrap();
        let options = SignOptions {
            expiry: Some(Utc::now().timestamp() - 10),
            ..valid_options()
        };
        assert!(matches!(sign_payload(&Map::new(), &key, &options), Err(OffcaError::Policy(_))));

        let options = SignOptions {
            subtle: true,
            issuer: None,
            ..options
        };
        assert!(sign_payload(&Map::new(), &key, &options).is_ok());
    }

    #[test]
    fn single_audience_is_a_string_and_payload_wins() {
        let key = Jwk::generate_p256().unwrap();
        let token = sign_payload(&Map::new(), &key, &valid_options()).unwrap();
        let claims: Value = jws::peek_claims(&token).unwrap();
        assert_eq!(claims["aud"], "https://example.com");
        assert_eq!(claims["iss"], "joe");
        assert!(claims["nbf"].is_i64());
        assert!(claims.get("jti").is_none());

        let payload = parse_payload(br#"{"aud": ["x", "y"], "role": "admin"}"#).unwrap();
        let token = sign_payload(&payload, &key, &valid_options()).unwrap();
        let claims: Value = jws::peek_claims(&token).unwrap();
        assert_eq!(claims["aud"], json!(["x", "y"]));
        assert_eq!(claims["role"], "admin");
    }

    #[test]
    fn generated_jti_and_kid_handling() {
        let key = Jwk::generate_p256().unwrap();
        let options = SignOptions {
            jti: Some(String::new()),
            ..valid_options()
        };
        let token = sign_payload(&Map::new(), &key, &options).unwrap();
        let claims: Value = jws::peek_claims(&token).unwrap();
        assert_eq!(claims["jti"].as_str().unwrap().len(), GENERATED_JTI_LEN);
        assert_eq!(jws::peek_header(&token).unwrap().kid, key.kid);

        let options = SignOptions {
            no_kid: true,
            ..valid_options()
        };
        let token = sign_payload(&Map::new(), &key, &options).unwrap();
        assert!(jws::peek_header(&token).unwrap().kid.is_none());
    }

    #[test]
    fn public_keys_cannot_sign() {
        let key = Jwk::generate_p256().unwrap().public();
        let err = sign_payload(&Map::new(), &key, &valid_options()).unwrap_err();
        assert_eq!(err.to_string(), "cannot use a public key for signing");
    }

    #[test]
    fn loads_key_from_jwks_by_kid() {
        let dir = tempfile::tempdir().unwrap();
        let a = Jwk::generate_p256().unwrap();
        let b = Jwk::generate_p256().unwrap();
        let path = dir.path().join("keys.json");
        fs::write(&path, serde_json::to_vec(&json!({ "keys": [&a, &b] })).unwrap()).unwrap();

        let source = KeySource::from_flags(None, Some(path.clone()), b.kid.as_deref()).unwrap();
        assert_eq!(load_signing_key(&source, &NoSecret).unwrap(), b);

        let source = KeySource::from_flags(None, Some(path), Some("nope")).unwrap();
        assert!(load_signing_key(&source, &NoSecret).is_err());
    }

    #[test]
    fn payload_parsing() {
        assert!(parse_payload(b"").unwrap().is_empty());
        assert!(parse_payload(b" \n").unwrap().is_empty());
        assert!(parse_payload(b"[1]").unwrap_err().is_usage_error());
        assert!(parse_payload(b"{").is_err());
    }
}
