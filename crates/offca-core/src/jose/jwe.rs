//! Password-based JWE (RFC 7516 compact form, RFC 7518 section 4.8).
//!
//! Only the `PBES2-HS*+A*KW` key management algorithms with `A*GCM` content
//! encryption are supported; that is what protects provisioner keys.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use openssl::aes::{unwrap_key, wrap_key, AesKey};
use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use openssl::symm::{decrypt_aead, encrypt_aead, Cipher};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{OffcaError, Result};

/// PBKDF2 iteration count used when encrypting.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Protected header of a password-based JWE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    pub alg: String,
    pub enc: String,
    pub p2s: String,
    pub p2c: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
}

fn error(message: impl std::fmt::Display) -> OffcaError {
    OffcaError::Config(format!("error decrypting JWE: {message}"))
}

/// Returns true if `data` looks like a compact JWE (five dot-separated parts).
#[must_use]
pub fn is_compact(data: &str) -> bool {
    let data = data.trim();
    data.split('.').count() == 5 && !data.starts_with('{')
}

/// Key-wrap digest and KEK length for a `PBES2-*` algorithm.
fn key_management(alg: &str) -> Result<(MessageDigest, usize)> {
    match alg {
        "PBES2-HS256+A128KW" => Ok((MessageDigest::sha256(), 16)),
        "PBES2-HS384+A192KW" => Ok((MessageDigest::sha384(), 24)),
        "PBES2-HS512+A256KW" => Ok((MessageDigest::sha512(), 32)),
        other => Err(error(format!("unsupported key management algorithm '{other}'"))),
    }
}

fn content_cipher(enc: &str) -> Result<Cipher> {
    match enc {
        "A128GCM" => Ok(Cipher::aes_128_gcm()),
        "A192GCM" => Ok(Cipher::aes_192_gcm()),
        "A256GCM" => Ok(Cipher::aes_256_gcm()),
        other => Err(error(format!("unsupported content encryption '{other}'"))),
    }
}

fn derive_kek(header: &JweHeader, password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let (digest, len) = key_management(&header.alg)?;
    let p2s = URL_SAFE_NO_PAD.decode(&header.p2s).map_err(error)?;
    if header.p2c == 0 {
        return Err(error("invalid iteration count"));
    }

    let mut salt = Vec::with_capacity(header.alg.len() + 1 + p2s.len());
    salt.extend_from_slice(header.alg.as_bytes());
    salt.push(0);
    salt.extend_from_slice(&p2s);

    let mut kek = Zeroizing::new(vec![0_u8; len]);
    let iterations = usize::try_from(header.p2c).map_err(error)?;
    pbkdf2_hmac(password, &salt, iterations, digest, &mut kek).map_err(error)?;
    Ok(kek)
}

/// Decrypt a compact JWE with `password`.
pub fn decrypt(token: &str, password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    let [protected, encrypted_key, iv, ciphertext, tag] = parts[..] else {
        return Err(error("expected five compact parts"));
    };

    let decode = |part: &str| URL_SAFE_NO_PAD.decode(part).map_err(error);
    let header: JweHeader = serde_json::from_slice(&decode(protected)?)
        .map_err(|e| error(format!("invalid header: {e}")))?;
    debug!(alg = %header.alg, enc = %header.enc, p2c = header.p2c, "decrypting JWE");

    let cipher = content_cipher(&header.enc)?;
    let kek = derive_kek(&header, password)?;

    let wrapped = decode(encrypted_key)?;
    if wrapped.len() != cipher.key_len() + 8 {
        return Err(error("invalid encrypted key length"));
    }
    let unwrap = AesKey::new_decrypt(&kek).map_err(|_| error("invalid key encryption key"))?;
    let mut cek = Zeroizing::new(vec![0_u8; cipher.key_len()]);
    unwrap_key(&unwrap, None, &mut cek, &wrapped)
        .map_err(|_| error("wrong password or corrupted key"))?;

    let plaintext = decrypt_aead(
        cipher,
        &cek,
        Some(decode(iv)?.as_slice()),
        protected.as_bytes(),
        &decode(ciphertext)?,
        &decode(tag)?,
    )
    .map_err(|_| error("authentication failed"))?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt `plaintext` with `PBES2-HS256+A128KW` and `A256GCM`.
pub fn encrypt(plaintext: &[u8], password: &[u8], content_type: Option<&str>) -> Result<String> {
    let mut p2s = [0_u8; SALT_LEN];
    OsRng.fill_bytes(&mut p2s);
    let header = JweHeader {
        alg: "PBES2-HS256+A128KW".to_string(),
        enc: "A256GCM".to_string(),
        p2s: URL_SAFE_NO_PAD.encode(p2s),
        p2c: DEFAULT_ITERATIONS,
        cty: content_type.map(str::to_string),
    };
    let cipher = content_cipher(&header.enc)?;
    let kek = derive_kek(&header, password)?;

    let mut cek = Zeroizing::new(vec![0_u8; cipher.key_len()]);
    OsRng.fill_bytes(&mut cek);
    let wrap = AesKey::new_encrypt(&kek).map_err(|_| error("invalid key encryption key"))?;
    let mut wrapped = vec![0_u8; cek.len() + 8];
    wrap_key(&wrap, None, &mut wrapped, &cek).map_err(|_| error("key wrap failed"))?;

    let mut iv = [0_u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let mut tag = [0_u8; TAG_LEN];
    let ciphertext = encrypt_aead(cipher, &cek, Some(&iv[..]), protected.as_bytes(), plaintext, &mut tag)
        .map_err(error)?;

    Ok([
        protected,
        URL_SAFE_NO_PAD.encode(wrapped),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ]
    .join("."))
}
