//! Compact JWS signing and verification on top of `jsonwebtoken`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Jwk;
use crate::{OffcaError, Result};

/// Sign `claims` as a compact JWT with header `typ=JWT` and an optional `kid`.
pub fn sign<T: Serialize>(
    claims: &T,
    key: &Jwk,
    alg: Algorithm,
    kid: Option<&str>,
) -> Result<String> {
    let mut header = Header::new(alg);
    header.typ = Some("JWT".to_string());
    header.kid = kid.filter(|k| !k.is_empty()).map(str::to_string);

    let encoding_key = key.encoding_key()?;
    encode(&header, claims, &encoding_key)
        .map_err(|e| OffcaError::Signing(format!("error signing token: {e}")))
}

/// Verify the signature of `token` with `key` and decode its claims.
///
/// Only the signature and algorithm are checked here; time and audience
/// rules belong to [`crate::claims::Claims::validate`].
pub fn verify<T: DeserializeOwned>(token: &str, key: &Jwk, alg: Algorithm) -> Result<T> {
    let mut validation = Validation::new(alg);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    let decoding_key = key.decoding_key()?;
    decode::<T>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| OffcaError::Authorization(format!("error verifying token: {e}")))
}

/// Read the header without verifying anything.
pub fn peek_header(token: &str) -> Result<Header> {
    decode_header(token).map_err(|e| OffcaError::Authorization(format!("error parsing token: {e}")))
}

/// Decode the payload without verifying the signature.
///
/// Used to find the provisioner that must verify the token.
pub fn peek_claims<T: DeserializeOwned>(token: &str) -> Result<T> {
    let malformed = || OffcaError::Authorization("error parsing token: malformed JWT".to_string());
    let mut parts = token.trim().split('.');
    let (Some(_), Some(payload), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| malformed())?;
    serde_json::from_slice(&bytes)
        .map_err(|e| OffcaError::Authorization(format!("error parsing token: {e}")))
}
