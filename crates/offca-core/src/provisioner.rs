//! Provisioners: the configured identities allowed to mint bootstrap tokens,
//! and the rules for picking one of them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClaimsPolicy;
use crate::jose::Jwk;
use crate::{OffcaError, Result};

/// A provisioner record, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Provisioner {
    /// Locally held, password-protected signing key
    #[serde(rename = "JWK", alias = "jwk", alias = "Jwk")]
    Jwk(JwkProvisioner),
    /// Token obtained from an OpenID Connect provider
    #[serde(rename = "OIDC", alias = "oidc", alias = "Oidc")]
    Oidc(OidcProvisioner),
    /// Google Cloud instance identity
    #[serde(rename = "GCP", alias = "gcp", alias = "Gcp")]
    Gcp(CloudProvisioner),
    /// AWS instance identity document
    #[serde(rename = "AWS", alias = "aws", alias = "Aws")]
    Aws(CloudProvisioner),
    /// Azure managed identity
    #[serde(rename = "Azure", alias = "azure", alias = "AZURE")]
    Azure(CloudProvisioner),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwkProvisioner {
    pub name: String,
    /// Public verification key; its `kid` identifies the provisioner
    pub key: Jwk,
    /// Compact JWE of the private JWK
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encrypted_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<ClaimsPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcProvisioner {
    pub name: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "clientSecret", default)]
    pub client_secret: String,
    #[serde(rename = "configurationEndpoint")]
    pub configuration_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<ClaimsPolicy>,
}

/// Shared shape of the GCP, AWS and Azure provisioners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudProvisioner {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "disableCustomSANs", default)]
    pub disable_custom_sans: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<ClaimsPolicy>,
}

/// The kind of a [`Provisioner`], without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionerKind {
    Jwk,
    Oidc,
    Gcp,
    Aws,
    Azure,
}

impl fmt::Display for ProvisionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jwk => "JWK",
            Self::Oidc => "OIDC",
            Self::Gcp => "GCP",
            Self::Aws => "AWS",
            Self::Azure => "Azure",
        })
    }
}

impl Provisioner {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Jwk(p) => &p.name,
            Self::Oidc(p) => &p.name,
            Self::Gcp(p) | Self::Aws(p) | Self::Azure(p) => &p.name,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ProvisionerKind {
        match self {
            Self::Jwk(_) => ProvisionerKind::Jwk,
            Self::Oidc(_) => ProvisionerKind::Oidc,
            Self::Gcp(_) => ProvisionerKind::Gcp,
            Self::Aws(_) => ProvisionerKind::Aws,
            Self::Azure(_) => ProvisionerKind::Azure,
        }
    }

    /// Stable identifier, unique within a configuration.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Jwk(p) => format!("{}:{}", p.name, p.key.kid.as_deref().unwrap_or_default()),
            Self::Oidc(p) => p.client_id.clone(),
            Self::Gcp(p) => format!("gcp/{}", p.name),
            Self::Aws(p) => format!("aws/{}", p.name),
            Self::Azure(p) => format!("azure/{}", p.name),
        }
    }

    /// Key id of a JWK provisioner.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        match self {
            Self::Jwk(p) => p.key.kid.as_deref(),
            _ => None,
        }
    }

    /// Per-provisioner certificate duration overrides.
    #[must_use]
    pub const fn claims(&self) -> Option<&ClaimsPolicy> {
        match self {
            Self::Jwk(p) => p.claims.as_ref(),
            Self::Oidc(p) => p.claims.as_ref(),
            Self::Gcp(p) | Self::Aws(p) | Self::Azure(p) => p.claims.as_ref(),
        }
    }

    /// Whether certificates requested with this provisioner may carry only
    /// the SANs the identity provider vouches for.
    #[must_use]
    pub const fn disable_custom_sans(&self) -> bool {
        match self {
            Self::Gcp(p) | Self::Aws(p) | Self::Azure(p) => p.disable_custom_sans,
            Self::Jwk(_) | Self::Oidc(_) => false,
        }
    }

    /// One-line description for interactive selection.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Jwk(p) => format!(
                "{} (JWK) [kid: {}]",
                p.name,
                p.key.kid.as_deref().unwrap_or_default()
            ),
            Self::Oidc(p) => format!("{} (OIDC) [client: {}]", p.name, p.client_id),
            other => format!("{} ({})", other.name(), other.kind()),
        }
    }
}

/// Picks one provisioner when several are eligible.
pub trait ProvisionerChooser: Send + Sync {
    /// Return the index of the chosen entry in `candidates`.
    fn choose(&self, candidates: &[&Provisioner]) -> Result<usize>;
}

impl<F> ProvisionerChooser for F
where
    F: Fn(&[&Provisioner]) -> Result<usize> + Send + Sync,
{
    fn choose(&self, candidates: &[&Provisioner]) -> Result<usize> {
        self(candidates)
    }
}

/// Narrows the candidates before selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionerFilter {
    pub name: Option<String>,
    pub kid: Option<String>,
}

impl ProvisionerFilter {
    #[must_use]
    pub fn matches(&self, provisioner: &Provisioner) -> bool {
        let name_ok = self
            .name
            .as_deref()
            .map_or(true, |name| provisioner.name() == name);
        let kid_ok = self
            .kid
            .as_deref()
            .map_or(true, |kid| provisioner.kid() == Some(kid));
        name_ok && kid_ok
    }

    const fn is_empty(&self) -> bool {
        self.name.is_none() && self.kid.is_none()
    }
}

/// Select exactly one provisioner.
///
/// A single eligible provisioner is returned without consulting `chooser`.
pub fn select<'a>(
    provisioners: &'a [Provisioner],
    filter: &ProvisionerFilter,
    chooser: &dyn ProvisionerChooser,
) -> Result<&'a Provisioner> {
    if provisioners.is_empty() {
        return Err(OffcaError::Selection(
            "cannot create a new token: the CA does not have any provisioner configured"
                .to_string(),
        ));
    }

    let candidates: Vec<&Provisioner> = provisioners.iter().filter(|p| filter.matches(p)).collect();
    match candidates.as_slice() {
        [] => Err(OffcaError::Selection(format!(
            "provisioner not found{}",
            describe_filter(filter)
        ))),
        [only] => {
            debug!(provisioner = %only.name(), kind = %only.kind(), "using only eligible provisioner");
            Ok(*only)
        }
        many => {
            let index = chooser.choose(many)?;
            let chosen = many.get(index).copied().ok_or_else(|| {
                OffcaError::Selection(format!("invalid provisioner selection {index}"))
            })?;
            debug!(provisioner = %chosen.name(), kind = %chosen.kind(), "provisioner selected");
            Ok(chosen)
        }
    }
}

fn describe_filter(filter: &ProvisionerFilter) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let mut parts = Vec::new();
    if let Some(name) = &filter.name {
        parts.push(format!("name '{name}'"));
    }
    if let Some(kid) = &filter.kid {
        parts.push(format!("kid '{kid}'"));
    }
    format!(" with {}", parts.join(" and "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cloud(kind: &str, name: &str) -> Provisioner {
        serde_json::from_value(serde_json::json!({ "type": kind, "name": name })).unwrap()
    }

    fn never(_: &[&Provisioner]) -> Result<usize> {
        panic!("chooser must not be called")
    }

    #[test]
    fn decodes_every_variant() {
        let jwk = Jwk::generate_p256().unwrap().public();
        let list: Vec<Provisioner> = serde_json::from_value(serde_json::json!([
            { "type": "JWK", "name": "admin", "key": jwk, "encryptedKey": "a.b.c.d.e" },
            { "type": "OIDC", "name": "google", "clientID": "id", "clientSecret": "s",
              "configurationEndpoint": "https://accounts.google.com/.well-known/openid-configuration" },
            { "type": "gcp", "name": "g", "disableCustomSANs": true },
            { "type": "AWS", "name": "a" },
            { "type": "azure", "name": "z" },
        ]))
        .unwrap();
        let kinds: Vec<_> = list.iter().map(Provisioner::kind).collect();
        assert_eq!(
            kinds,
            [
                ProvisionerKind::Jwk,
                ProvisionerKind::Oidc,
                ProvisionerKind::Gcp,
                ProvisionerKind::Aws,
                ProvisionerKind::Azure
            ]
        );
        assert!(list[2].disable_custom_sans());
        assert_eq!(list[1].id(), "id");
        assert_eq!(list[0].id(), format!("admin:{}", jwk.kid.unwrap()));
    }

    #[test]
    fn empty_list_is_a_selection_error() {
        let err = select(&[], &ProvisionerFilter::default(), &never).unwrap_err();
        assert!(matches!(err, OffcaError::Selection(_)));
    }

    #[test]
    fn single_provisioner_skips_the_chooser() {
        let list = [cloud("GCP", "only")];
        let chosen = select(&list, &ProvisionerFilter::default(), &never).unwrap();
        assert_eq!(chosen.name(), "only");
    }

    #[test]
    fn chooser_decides_among_many() {
        let calls = AtomicUsize::new(0);
        let chooser = |candidates: &[&Provisioner]| -> Result<usize> {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(candidates.len(), 2);
            Ok(1)
        };
        let list = [cloud("GCP", "a"), cloud("AWS", "b")];
        let chosen = select(&list, &ProvisionerFilter::default(), &chooser).unwrap();
        assert_eq!(chosen.name(), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_range_choice_is_rejected() {
        let list = [cloud("GCP", "a"), cloud("AWS", "b")];
        let err = select(&list, &ProvisionerFilter::default(), &|_: &[&Provisioner]| -> Result<usize> { Ok(7) }).unwrap_err();
        assert!(matches!(err, OffcaError::Selection(_)));
    }

    #[test]
    fn filter_narrows_before_choosing() {
        let list = [cloud("GCP", "a"), cloud("AWS", "b")];
        let filter = ProvisionerFilter {
            name: Some("b".into()),
            kid: None,
        };
        assert_eq!(select(&list, &filter, &never).unwrap().name(), "b");

        let filter = ProvisionerFilter {
            name: Some("missing".into()),
            kid: None,
        };
        let err = select(&list, &filter, &never).unwrap_err();
        assert_eq!(err.to_string(), "provisioner not found with name 'missing'");
    }
}
