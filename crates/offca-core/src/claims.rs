//! The registered JWT claim set and the rules used to validate it.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{OffcaError, Result};

/// Seconds since the Unix epoch, as used by `exp`, `nbf` and `iat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumericDate(i64);

impl NumericDate {
    /// Wrap a Unix timestamp.
    #[must_use]
    pub const fn from_unix(secs: i64) -> Self {
        Self(secs)
    }

    /// The current time, truncated to seconds.
    #[must_use]
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Convert a chrono timestamp.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self(time.timestamp())
    }

    /// The raw Unix timestamp.
    #[must_use]
    pub const fn timestamp(self) -> i64 {
        self.0
    }

    /// Convert back to a chrono timestamp.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
    }
}

impl From<DateTime<Utc>> for NumericDate {
    fn from(time: DateTime<Utc>) -> Self {
        Self::new(time)
    }
}

/// The `aud` claim: one or many intended recipients.
///
/// Serializes as an array; [`ClaimSet::from_claims`] rewrites a single value
/// to a bare string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(Vec<String>);

impl Audience {
    /// Build from any list of recipients.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if `value` is one of the recipients.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|a| a == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// The recipient when there is exactly one.
    #[must_use]
    pub fn single(&self) -> Option<&str> {
        match self.0.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

impl From<&str> for Audience {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<String> for Audience {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<Vec<String>> for Audience {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl Serialize for Audience {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(s) => Self(vec![s]),
            OneOrMany::Many(v) => Self(v),
        })
    }
}

/// The registered claims of a JWT (RFC 7519 section 4.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "iss", default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,

    #[serde(rename = "sub", default, skip_serializing_if = "String::is_empty")]
    pub subject: String,

    #[serde(rename = "aud", default, skip_serializing_if = "Audience::is_empty")]
    pub audience: Audience,

    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<NumericDate>,

    #[serde(rename = "nbf", default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<NumericDate>,

    #[serde(rename = "iat", default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<NumericDate>,

    #[serde(rename = "jti", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// What a verifier expects of a claim set.
#[derive(Debug, Clone)]
pub struct Expected<'a> {
    /// Required issuer, if any
    pub issuer: Option<&'a str>,
    /// Acceptable audiences; the token must name at least one of them
    pub audiences: &'a [String],
    /// The verification time
    pub time: DateTime<Utc>,
}

/// A claim that failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimsViolation {
    #[error("invalid issuer claim (iss): expected '{expected}', found '{found}'")]
    InvalidIssuer { expected: String, found: String },

    #[error("invalid audience claim (aud)")]
    InvalidAudience,

    #[error("token is expired (exp)")]
    Expired,

    #[error("token is missing the expiration claim (exp)")]
    MissingExpiry,

    #[error("token not valid yet (nbf)")]
    NotValidYet,

    #[error("token issued in the future (iat)")]
    IssuedInTheFuture,
}

impl Claims {
    /// Validate against `expected`, tolerating clock skew of `leeway`.
    pub fn validate(
        &self,
        expected: &Expected<'_>,
        leeway: Duration,
    ) -> std::result::Result<(), ClaimsViolation> {
        if let Some(issuer) = expected.issuer {
            if self.issuer != issuer {
                return Err(ClaimsViolation::InvalidIssuer {
                    expected: issuer.to_string(),
                    found: self.issuer.clone(),
                });
            }
        }

        if !expected.audiences.is_empty()
            && !expected.audiences.iter().any(|a| self.audience.contains(a))
        {
            return Err(ClaimsViolation::InvalidAudience);
        }

        let now = expected.time.timestamp();
        let leeway = leeway.num_seconds();
        match self.expiry {
            Some(exp) if now > exp.timestamp() + leeway => return Err(ClaimsViolation::Expired),
            Some(_) => {}
            None => return Err(ClaimsViolation::MissingExpiry),
        }
        if let Some(nbf) = self.not_before {
            if now + leeway < nbf.timestamp() {
                return Err(ClaimsViolation::NotValidYet);
            }
        }
        if let Some(iat) = self.issued_at {
            if now + leeway < iat.timestamp() {
                return Err(ClaimsViolation::IssuedInTheFuture);
            }
        }
        Ok(())
    }
}

/// A JSON object of claims built by layering sources; later layers win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered claims with a single audience rewritten to a bare string.
    pub fn from_claims(claims: &Claims) -> Result<Self> {
        Self::new()
            .merge(claims)?
            .merge(&single_audience_override(claims))
    }

    /// Overlay the members of `layer`, which must serialize to a JSON object.
    pub fn merge<T: Serialize + ?Sized>(mut self, layer: &T) -> Result<Self> {
        match serde_json::to_value(layer)? {
            Value::Object(map) => {
                self.0.extend(map);
                Ok(self)
            }
            Value::Null => Ok(self),
            other => Err(OffcaError::Signing(format!(
                "claims must be a JSON object, found {other}"
            ))),
        }
    }

    /// Set a single claim.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl Serialize for ClaimSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// A random token identifier of `hex_len` hexadecimal characters.
#[must_use]
pub fn random_jti(hex_len: usize) -> String {
    let mut bytes = vec![0_u8; hex_len.div_ceil(2)];
    OsRng.fill_bytes(&mut bytes);
    let mut id = hex::encode(bytes);
    id.truncate(hex_len);
    id
}

// Some verifiers only accept "aud" as a string.
fn single_audience_override(claims: &Claims) -> Map<String, Value> {
    let mut layer = Map::new();
    if let Some(aud) = claims.audience.single() {
        layer.insert("aud".to_string(), Value::String(aud.to_string()));
    }
    layer
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims_with(aud: &[&str]) -> Claims {
        Claims {
            issuer: "admin".into(),
            subject: "user@example.com".into(),
            audience: Audience::new(aud.iter().copied()),
            expiry: Some(NumericDate::from_unix(2_000_000_000)),
            ..Claims::default()
        }
    }

    #[test]
    fn single_audience_serializes_as_string() {
        let set = ClaimSet::from_claims(&claims_with(&["https://ca.example.com/sign"])).unwrap();
        let encoded = serde_json::to_string(&set).unwrap();
        assert!(encoded.contains(r#""aud":"https://ca.example.com/sign""#));
        assert!(!encoded.contains(r#""aud":["#));
    }

    #[test]
    fn multiple_audiences_stay_an_array() {
        let set = ClaimSet::from_claims(&claims_with(&["a", "b"])).unwrap();
        assert_eq!(set.get("aud"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn later_layers_win_on_collision() {
        // The structured layer alone encodes an array; the override must replace it.
        let base = ClaimSet::new().merge(&claims_with(&["one"])).unwrap();
        assert_eq!(base.get("aud"), Some(&json!(["one"])));

        let set = base.merge(&json!({ "aud": "one" })).unwrap();
        assert_eq!(set.get("aud"), Some(&json!("one")));

        let set = set.merge(&json!({ "aud": "payload", "extra": 1 })).unwrap();
        assert_eq!(set.get("aud"), Some(&json!("payload")));
        assert_eq!(set.get("extra"), Some(&json!(1)));
    }

    #[test]
    fn random_ids_have_the_requested_length() {
        let a = random_jti(40);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, random_jti(40));
        assert_eq!(random_jti(7).len(), 7);
    }

    #[test]
    fn merge_rejects_non_objects() {
        assert!(ClaimSet::new().merge(&json!([1, 2])).is_err());
        assert!(ClaimSet::new().merge(&json!(null)).is_ok());
    }

    #[test]
    fn audience_accepts_string_or_array() {
        let c: Claims = serde_json::from_value(json!({ "aud": "x" })).unwrap();
        assert_eq!(c.audience.single(), Some("x"));
        let c: Claims = serde_json::from_value(json!({ "aud": ["x", "y"] })).unwrap();
        assert_eq!(c.audience.len(), 2);
    }

    #[test]
    fn validation_rules() {
        let now = Utc::now();
        let audiences = vec!["https://ca/sign".to_string()];
        let expected = Expected {
            issuer: Some("admin"),
            audiences: &audiences,
            time: now,
        };
        let mut c = claims_with(&["https://ca/sign"]);
        c.expiry = Some((now + Duration::minutes(5)).into());
        c.not_before = Some(now.into());
        assert!(c.validate(&expected, Duration::minutes(1)).is_ok());

        let mut expired = c.clone();
        expired.expiry = Some((now - Duration::minutes(2)).into());
        assert_eq!(
            expired.validate(&expected, Duration::minutes(1)),
            Err(ClaimsViolation::Expired)
        );

        let mut early = c.clone();
        early.not_before = Some((now + Duration::minutes(10)).into());
        assert_eq!(
            early.validate(&expected, Duration::minutes(1)),
            Err(ClaimsViolation::NotValidYet)
        );

        let mut wrong_aud = c.clone();
        wrong_aud.audience = Audience::from("https://ca/revoke");
        assert_eq!(
            wrong_aud.validate(&expected, Duration::minutes(1)),
            Err(ClaimsViolation::InvalidAudience)
        );

        let mut wrong_iss = c;
        wrong_iss.issuer = "mallory".into();
        assert!(matches!(
            wrong_iss.validate(&expected, Duration::minutes(1)),
            Err(ClaimsViolation::InvalidIssuer { .. })
        ));
    }
}
