//! JOSE key handling: JWK, password-based JWE and compact JWS.
//!
//! [`parse_key`] accepts every format a signing key is distributed in and
//! normalizes it to a [`Jwk`].

pub mod jwe;
pub mod jwk;
pub mod jws;

pub use jwk::{algorithm_name, Jwk, JwkSet};

use openssl::pkey::PKey;
use tracing::debug;

use crate::secret::SecretResolver;
use crate::{OffcaError, Result};

/// Prompt shown when a key file needs a password.
pub const DECRYPT_KEY_PROMPT: &str = "Please enter the password to decrypt the key";

fn as_text(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data)
        .map(str::trim)
        .map_err(|_| OffcaError::Config("error reading key: unsupported key format".to_string()))
}

fn parse_json<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| OffcaError::Config(format!("error parsing key: {e}")))
}

/// Decrypt a compact JWE holding a JWK.
pub fn decrypt_jwk(jwe: &str, password: &[u8]) -> Result<Jwk> {
    let plaintext = jwe::decrypt(jwe, password)?;
    parse_json(&plaintext)
}

/// Parse a single key from JWK JSON, a JWE-wrapped JWK, or PEM.
///
/// Public keys and certificates parse to a public [`Jwk`]; callers that need
/// to sign reject them with [`Jwk::check_signing_key`].
pub fn parse_key(data: &[u8], secrets: &dyn SecretResolver) -> Result<Jwk> {
    let text = as_text(data)?;

    if text.starts_with('{') {
        let value: serde_json::Value = parse_json(text.as_bytes())?;
        if value.get("keys").is_some() {
            return Err(OffcaError::Config(
                "error parsing key: found a JWK Set, use '--jwks' with '--kid'".to_string(),
            ));
        }
        debug!("parsed JWK");
        return serde_json::from_value(value)
            .map_err(|e| OffcaError::Config(format!("error parsing key: {e}")));
    }

    if text.contains("-----BEGIN") {
        if !text.contains("PRIVATE KEY-----") {
            debug!("parsed PEM public key");
            return Jwk::from_public_pem(text.as_bytes());
        }
        let encrypted =
            text.contains("ENCRYPTED PRIVATE KEY") || text.contains("Proc-Type: 4,ENCRYPTED");
        let pkey = if encrypted {
            let password = secrets.resolve(DECRYPT_KEY_PROMPT)?;
            PKey::private_key_from_pem_passphrase(text.as_bytes(), &password)
        } else {
            PKey::private_key_from_pem(text.as_bytes())
        }
        .map_err(|e| OffcaError::Config(format!("error decoding PEM private key: {e}")))?;
        debug!(encrypted, "parsed PEM private key");
        return Jwk::from_private_pkey(&pkey);
    }

    if jwe::is_compact(text) {
        let password = secrets.resolve(DECRYPT_KEY_PROMPT)?;
        debug!("decrypting JWE key");
        return decrypt_jwk(text, &password);
    }

    Err(OffcaError::Config(
        "error reading key: unsupported key format".to_string(),
    ))
}

/// Parse a JWK Set from JSON or a JWE-wrapped JWK Set.
pub fn parse_key_set(data: &[u8], secrets: &dyn SecretResolver) -> Result<JwkSet> {
    let text = as_text(data)?;
    if jwe::is_compact(text) {
        let password = secrets.resolve(DECRYPT_KEY_PROMPT)?;
        let plaintext = jwe::decrypt(text, &password)?;
        return parse_json(&plaintext);
    }
    parse_json(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::{FixedSecret, NoSecret};

    #[test]
    fn parses_jwk_json() {
        let key = Jwk::generate_p256().unwrap();
        let json = serde_json::to_vec(&key).unwrap();
        assert_eq!(parse_key(&json, &NoSecret).unwrap(), key);
    }

    #[test]
    fn parses_password_protected_jwk() {
        let key = Jwk::generate_p256().unwrap();
        let jwe = jwe::encrypt(&serde_json::to_vec(&key).unwrap(), b"pass", Some("jwk+json")).unwrap();
        assert_eq!(parse_key(jwe.as_bytes(), &FixedSecret::new("pass")).unwrap(), key);
        assert!(parse_key(jwe.as_bytes(), &NoSecret).is_err());
    }

    #[test]
    fn parses_pem_private_and_public_keys() {
        let key = Jwk::generate_p256().unwrap();
        let pkey = key.to_private_pkey().unwrap();

        let pem = pkey.private_key_to_pem_pkcs8().unwrap();
        let parsed = parse_key(&pem, &NoSecret).unwrap();
        assert_eq!(parsed.d, key.d);

        let encrypted = pkey
            .private_key_to_pem_pkcs8_passphrase(openssl::symm::Cipher::aes_256_cbc(), b"pem-pass")
            .unwrap();
        let parsed = parse_key(&encrypted, &FixedSecret::new("pem-pass")).unwrap();
        assert_eq!(parsed.d, key.d);

        let public = pkey.public_key_to_pem().unwrap();
        let parsed = parse_key(&public, &NoSecret).unwrap();
        assert!(parsed.is_public());
        assert!(parsed.check_signing_key().is_err());
    }

    #[test]
    fn key_sets_are_rejected_as_single_keys() {
        let set = JwkSet {
            keys: vec![Jwk::generate_p256().unwrap()],
        };
        let json = serde_json::to_vec(&set).unwrap();
        assert!(parse_key(&json, &NoSecret).is_err());
        assert_eq!(parse_key_set(&json, &NoSecret).unwrap(), set);
    }

    #[test]
    fn unknown_formats_fail() {
        assert!(parse_key(b"hello", &NoSecret).is_err());
        assert!(parse_key(&[0xff, 0xfe], &NoSecret).is_err());
    }
}
