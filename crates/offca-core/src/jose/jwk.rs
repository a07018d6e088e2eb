//! JSON Web Keys (RFC 7517) and their conversion to and from OpenSSL keys.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{OffcaError, Result};

/// A single JSON Web Key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

/// A JWK Set (`{"keys": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find the key with the given `kid`.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

fn invalid(e: ErrorStack) -> OffcaError {
    OffcaError::Config(format!("invalid key: {e}"))
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Curve name and coordinate size for a supported EC group.
fn curve_by_name(crv: &str) -> Option<(Nid, i32)> {
    match crv {
        "P-256" => Some((Nid::X9_62_PRIME256V1, 32)),
        "P-384" => Some((Nid::SECP384R1, 48)),
        "P-521" => Some((Nid::SECP521R1, 66)),
        _ => None,
    }
}

fn curve_by_nid(nid: Nid) -> Option<(&'static str, i32)> {
    match nid {
        Nid::X9_62_PRIME256V1 => Some(("P-256", 32)),
        Nid::SECP384R1 => Some(("P-384", 48)),
        Nid::SECP521R1 => Some(("P-521", 66)),
        _ => None,
    }
}

impl Jwk {
    /// Generate a fresh P-256 signing key with `kid` set to its thumbprint.
    pub fn generate_p256() -> Result<Self> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).map_err(invalid)?;
        let key = EcKey::generate(&group).map_err(invalid)?;
        let pkey = PKey::from_ec_key(key).map_err(invalid)?;
        let mut jwk = Self::from_private_pkey(&pkey)?;
        jwk.key_use = Some("sig".to_string());
        jwk.alg = Some("ES256".to_string());
        jwk.kid = Some(jwk.thumbprint()?);
        Ok(jwk)
    }

    /// Build a private JWK from an OpenSSL private key.
    pub fn from_private_pkey(pkey: &PKeyRef<Private>) -> Result<Self> {
        let mut jwk = public_members(pkey)?;
        match pkey.id() {
            Id::RSA => {
                let rsa = pkey.rsa().map_err(invalid)?;
                jwk.d = Some(b64(&rsa.d().to_vec()));
                jwk.p = rsa.p().map(|v| b64(&v.to_vec()));
                jwk.q = rsa.q().map(|v| b64(&v.to_vec()));
                jwk.dp = rsa.dmp1().map(|v| b64(&v.to_vec()));
                jwk.dq = rsa.dmq1().map(|v| b64(&v.to_vec()));
                jwk.qi = rsa.iqmp().map(|v| b64(&v.to_vec()));
            }
            Id::EC => {
                let ec = pkey.ec_key().map_err(invalid)?;
                let size = ec
                    .group()
                    .curve_name()
                    .and_then(curve_by_nid)
                    .map_or(32, |(_, size)| size);
                let d = ec.private_key().to_vec_padded(size).map_err(invalid)?;
                jwk.d = Some(b64(&d));
            }
            Id::ED25519 => {
                let d = Zeroizing::new(pkey.raw_private_key().map_err(invalid)?);
                jwk.d = Some(b64(&d));
            }
            other => {
                return Err(OffcaError::Config(format!(
                    "unsupported key type {other:?}"
                )))
            }
        }
        Ok(jwk)
    }

    /// Build a public JWK from an OpenSSL public key.
    pub fn from_public_pkey(pkey: &PKeyRef<Public>) -> Result<Self> {
        public_members(pkey)
    }

    /// Build a public JWK from a PEM public key or certificate.
    pub fn from_public_pem(pem: &[u8]) -> Result<Self> {
        let pkey = if String::from_utf8_lossy(pem).contains("CERTIFICATE") {
            X509::from_pem(pem).and_then(|c| c.public_key())
        } else {
            PKey::public_key_from_pem(pem)
        }
        .map_err(invalid)?;
        Self::from_public_pkey(&pkey)
    }

    /// Returns true if the key holds no private material.
    #[must_use]
    pub fn is_public(&self) -> bool {
        match self.kty.as_str() {
            "oct" => self.k.is_none(),
            _ => self.d.is_none(),
        }
    }

    /// A copy of this key with all private members removed.
    #[must_use]
    pub fn public(&self) -> Self {
        Self {
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            k: None,
            ..self.clone()
        }
    }

    /// RFC 7638 thumbprint, base64url-encoded SHA-256.
    pub fn thumbprint(&self) -> Result<String> {
        let s = |v: &Option<String>, name: &str| -> Result<String> {
            let value = v.as_deref().ok_or_else(|| {
                OffcaError::Config(format!("invalid {} key: missing '{name}'", self.kty))
            })?;
            Ok(serde_json::to_string(value)?)
        };
        let canonical = match self.kty.as_str() {
            "EC" => format!(
                r#"{{"crv":{},"kty":"EC","x":{},"y":{}}}"#,
                s(&self.crv, "crv")?,
                s(&self.x, "x")?,
                s(&self.y, "y")?
            ),
            "RSA" => format!(
                r#"{{"e":{},"kty":"RSA","n":{}}}"#,
                s(&self.e, "e")?,
                s(&self.n, "n")?
            ),
            "OKP" => format!(
                r#"{{"crv":{},"kty":"OKP","x":{}}}"#,
                s(&self.crv, "crv")?,
                s(&self.x, "x")?
            ),
            "oct" => format!(r#"{{"k":{},"kty":"oct"}}"#, s(&self.k, "k")?),
            other => {
                return Err(OffcaError::Config(format!(
                    "unsupported key type '{other}'"
                )))
            }
        };
        Ok(b64(&openssl::sha::sha256(canonical.as_bytes())))
    }

    /// Reject keys that may not be used to sign.
    pub fn check_signing_key(&self) -> Result<()> {
        if self.is_public() {
            return Err(OffcaError::Policy(
                "cannot use a public key for signing".to_string(),
            ));
        }
        match self.key_use.as_deref() {
            None | Some("" | "sig") => Ok(()),
            Some(other) => Err(OffcaError::Policy(format!(
                "invalid jwk use: found '{other}', expecting 'sig' (signature)"
            ))),
        }
    }

    /// Pick the signing algorithm from an explicit request, the key's `alg`,
    /// or the key's curve, and check it fits the key.
    pub fn resolve_algorithm(&self, requested: Option<&str>, subtle: bool) -> Result<Algorithm> {
        let requested = requested.filter(|a| !a.is_empty());
        let declared = self.alg.as_deref().filter(|a| !a.is_empty());
        if let (Some(req), Some(key_alg)) = (requested, declared) {
            if req != key_alg && !subtle {
                return Err(OffcaError::Policy(format!(
                    "alg '{req}' does not match the alg on the key '{key_alg}'"
                )));
            }
        }

        let name = match requested.or(declared) {
            Some(name) => name,
            None => self.inferred_algorithm().ok_or_else(|| {
                OffcaError::Policy("flag '--alg' is required with the given key".to_string())
            })?,
        };
        let alg: Algorithm = name
            .parse()
            .map_err(|_| OffcaError::Policy(format!("unsupported algorithm '{name}'")))?;
        self.check_compatible(alg)?;
        Ok(alg)
    }

    fn inferred_algorithm(&self) -> Option<&'static str> {
        match (self.kty.as_str(), self.crv.as_deref()) {
            ("EC", Some("P-256")) => Some("ES256"),
            ("EC", Some("P-384")) => Some("ES384"),
            ("OKP", Some("Ed25519")) => Some("EdDSA"),
            _ => None,
        }
    }

    /// Fail unless `alg` can be used with this key.
    pub fn check_compatible(&self, alg: Algorithm) -> Result<()> {
        use Algorithm::{EdDSA, ES256, ES384, HS256, HS384, HS512, PS256, PS384, PS512, RS256, RS384, RS512};

        let ok = match alg {
            HS256 | HS384 | HS512 => self.kty == "oct",
            RS256 | RS384 | RS512 | PS256 | PS384 | PS512 => self.kty == "RSA",
            ES256 => self.kty == "EC" && self.crv.as_deref() == Some("P-256"),
            ES384 => self.kty == "EC" && self.crv.as_deref() == Some("P-384"),
            EdDSA => self.kty == "OKP" && self.crv.as_deref() == Some("Ed25519"),
        };
        if ok {
            Ok(())
        } else {
            Err(OffcaError::Policy(format!(
                "alg '{}' is not compatible with the {} key",
                algorithm_name(alg),
                self.describe_type()
            )))
        }
    }

    fn describe_type(&self) -> String {
        match self.crv.as_deref() {
            Some(crv) => format!("{} {crv}", self.kty),
            None => self.kty.clone(),
        }
    }

    fn member(&self, name: &str, value: Option<&String>) -> Result<Zeroizing<Vec<u8>>> {
        let value = value.ok_or_else(|| {
            OffcaError::Config(format!("invalid {} key: missing '{name}'", self.kty))
        })?;
        URL_SAFE_NO_PAD
            .decode(value)
            .map(Zeroizing::new)
            .map_err(|e| OffcaError::Config(format!("invalid {} key member '{name}': {e}", self.kty)))
    }

    fn bignum(&self, name: &str, value: Option<&String>) -> Result<BigNum> {
        BigNum::from_slice(&self.member(name, value)?).map_err(invalid)
    }

    fn ec_group(&self) -> Result<EcGroup> {
        let crv = self.crv.as_deref().unwrap_or_default();
        let (nid, _) = curve_by_name(crv)
            .ok_or_else(|| OffcaError::Config(format!("unsupported elliptic curve '{crv}'")))?;
        EcGroup::from_curve_name(nid).map_err(invalid)
    }

    fn require_ed25519(&self) -> Result<()> {
        match self.crv.as_deref() {
            Some("Ed25519") => Ok(()),
            other => Err(OffcaError::Config(format!(
                "unsupported OKP curve '{}'",
                other.unwrap_or_default()
            ))),
        }
    }

    /// Convert a private RSA, EC or OKP key to an OpenSSL key.
    pub fn to_private_pkey(&self) -> Result<PKey<Private>> {
        match self.kty.as_str() {
            "RSA" => {
                let rsa = Rsa::from_private_components(
                    self.bignum("n", self.n.as_ref())?,
                    self.bignum("e", self.e.as_ref())?,
                    self.bignum("d", self.d.as_ref())?,
                    self.bignum("p", self.p.as_ref())?,
                    self.bignum("q", self.q.as_ref())?,
                    self.bignum("dp", self.dp.as_ref())?,
                    self.bignum("dq", self.dq.as_ref())?,
                    self.bignum("qi", self.qi.as_ref())?,
                )
                .map_err(invalid)?;
                PKey::from_rsa(rsa).map_err(invalid)
            }
            "EC" => {
                let group = self.ec_group()?;
                let x = self.bignum("x", self.x.as_ref())?;
                let y = self.bignum("y", self.y.as_ref())?;
                let d = self.bignum("d", self.d.as_ref())?;
                let public =
                    EcKey::from_public_key_affine_coordinates(&group, &x, &y).map_err(invalid)?;
                let key = EcKey::from_private_components(&group, &d, public.public_key())
                    .map_err(invalid)?;
                key.check_key().map_err(invalid)?;
                PKey::from_ec_key(key).map_err(invalid)
            }
            "OKP" => {
                self.require_ed25519()?;
                let d = self.member("d", self.d.as_ref())?;
                PKey::private_key_from_raw_bytes(&d, Id::ED25519).map_err(invalid)
            }
            other => Err(OffcaError::Config(format!(
                "key type '{other}' has no private key form"
            ))),
        }
    }

    /// Convert the public half to an OpenSSL key.
    pub fn to_public_pkey(&self) -> Result<PKey<Public>> {
        match self.kty.as_str() {
            "RSA" => {
                let rsa = Rsa::from_public_components(
                    self.bignum("n", self.n.as_ref())?,
                    self.bignum("e", self.e.as_ref())?,
                )
                .map_err(invalid)?;
                PKey::from_rsa(rsa).map_err(invalid)
            }
            "EC" => {
                let group = self.ec_group()?;
                let x = self.bignum("x", self.x.as_ref())?;
                let y = self.bignum("y", self.y.as_ref())?;
                let key =
                    EcKey::from_public_key_affine_coordinates(&group, &x, &y).map_err(invalid)?;
                PKey::from_ec_key(key).map_err(invalid)
            }
            "OKP" => {
                self.require_ed25519()?;
                let x = self.member("x", self.x.as_ref())?;
                PKey::public_key_from_raw_bytes(&x, Id::ED25519).map_err(invalid)
            }
            other => Err(OffcaError::Config(format!(
                "key type '{other}' has no public key form"
            ))),
        }
    }

    /// Key material for `jsonwebtoken::encode`.
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        match self.kty.as_str() {
            "oct" => Ok(EncodingKey::from_secret(&self.member("k", self.k.as_ref())?)),
            "RSA" => {
                let pkey = self.to_private_pkey()?;
                let der = Zeroizing::new(
                    pkey.rsa()
                        .and_then(|rsa| rsa.private_key_to_der())
                        .map_err(invalid)?,
                );
                Ok(EncodingKey::from_rsa_der(&der))
            }
            "EC" => {
                let der = Zeroizing::new(self.to_private_pkey()?.private_key_to_pkcs8().map_err(invalid)?);
                Ok(EncodingKey::from_ec_der(&der))
            }
            "OKP" => {
                let der = Zeroizing::new(self.to_private_pkey()?.private_key_to_pkcs8().map_err(invalid)?);
                Ok(EncodingKey::from_ed_der(&der))
            }
            other => Err(OffcaError::Config(format!("unsupported key type '{other}'"))),
        }
    }

    /// Key material for `jsonwebtoken::decode`.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        let missing = |name: &str| OffcaError::Config(format!("invalid {} key: missing '{name}'", self.kty));
        let parsed = match self.kty.as_str() {
            "oct" => return Ok(DecodingKey::from_secret(&self.member("k", self.k.as_ref())?)),
            "RSA" => DecodingKey::from_rsa_components(
                self.n.as_deref().ok_or_else(|| missing("n"))?,
                self.e.as_deref().ok_or_else(|| missing("e"))?,
            ),
            "EC" => DecodingKey::from_ec_components(
                self.x.as_deref().ok_or_else(|| missing("x"))?,
                self.y.as_deref().ok_or_else(|| missing("y"))?,
            ),
            "OKP" => DecodingKey::from_ed_components(self.x.as_deref().ok_or_else(|| missing("x"))?),
            other => return Err(OffcaError::Config(format!("unsupported key type '{other}'"))),
        };
        parsed.map_err(|e| OffcaError::Config(format!("invalid {} key: {e}", self.kty)))
    }
}

/// The JOSE name of a signature algorithm.
#[must_use]
pub const fn algorithm_name(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::EdDSA => "EdDSA",
    }
}

fn public_members<T: HasPublic>(pkey: &PKeyRef<T>) -> Result<Jwk> {
    match pkey.id() {
        Id::RSA => {
            let rsa = pkey.rsa().map_err(invalid)?;
            Ok(Jwk {
                kty: "RSA".to_string(),
                n: Some(b64(&rsa.n().to_vec())),
                e: Some(b64(&rsa.e().to_vec())),
                ..Jwk::default()
            })
        }
        Id::EC => {
            let ec = pkey.ec_key().map_err(invalid)?;
            let group = ec.group();
            let (crv, size) = group
                .curve_name()
                .and_then(curve_by_nid)
                .ok_or_else(|| OffcaError::Config("unsupported elliptic curve".to_string()))?;
            let mut ctx = BigNumContext::new().map_err(invalid)?;
            let mut x = BigNum::new().map_err(invalid)?;
            let mut y = BigNum::new().map_err(invalid)?;
            ec.public_key()
                .affine_coordinates_gfp(group, &mut x, &mut y, &mut ctx)
                .map_err(invalid)?;
            Ok(Jwk {
                kty: "EC".to_string(),
                crv: Some(crv.to_string()),
                x: Some(b64(&x.to_vec_padded(size).map_err(invalid)?)),
                y: Some(b64(&y.to_vec_padded(size).map_err(invalid)?)),
                ..Jwk::default()
            })
        }
        Id::ED25519 => Ok(Jwk {
            kty: "OKP".to_string(),
            crv: Some("Ed25519".to_string()),
            x: Some(b64(&pkey.raw_public_key().map_err(invalid)?)),
            ..Jwk::default()
        }),
        other => Err(OffcaError::Config(format!(
            "unsupported key type {other:?}"
        ))),
    }
}
