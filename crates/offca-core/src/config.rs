//! Authority configuration (`ca.json`).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::provisioner::Provisioner;
use crate::{OffcaError, Result};

/// Shortest certificate validity accepted by default.
pub const DEFAULT_MIN_CERT_DURATION: Duration = Duration::minutes(5);
/// Longest certificate validity accepted by default.
pub const DEFAULT_MAX_CERT_DURATION: Duration = Duration::hours(24);
/// Validity used when the request does not choose one.
pub const DEFAULT_CERT_DURATION: Duration = Duration::hours(24);

/// Local CA configuration: key material, DNS names and provisioners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityConfig {
    #[serde(default)]
    pub dns_names: Vec<String>,

    /// One or many root certificates; the first is the root of trust
    #[serde(default, with = "one_or_many")]
    pub root: Vec<PathBuf>,

    #[serde(default, alias = "crt")]
    pub intermediate_cert: PathBuf,

    #[serde(default, alias = "key")]
    pub intermediate_key: PathBuf,

    /// Password of the intermediate key, if it is encrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(rename = "authority", alias = "authorityConfig")]
    pub authority_config: AuthConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,
}

/// The `authority` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub provisioners: Vec<Provisioner>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<ClaimsPolicy>,
}

/// Certificate duration overrides, global or per provisioner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsPolicy {
    #[serde(
        rename = "minTLSCertDuration",
        default,
        with = "crate::duration::serde_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_tls_cert_duration: Option<Duration>,

    #[serde(
        rename = "maxTLSCertDuration",
        default,
        with = "crate::duration::serde_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_tls_cert_duration: Option<Duration>,

    #[serde(
        rename = "defaultTLSCertDuration",
        default,
        with = "crate::duration::serde_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_tls_cert_duration: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_renewal: Option<bool>,
}

/// Effective certificate duration bounds after layering overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertDurations {
    pub min: Duration,
    pub max: Duration,
    pub default: Duration,
    pub disable_renewal: bool,
}

impl Default for CertDurations {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_CERT_DURATION,
            max: DEFAULT_MAX_CERT_DURATION,
            default: DEFAULT_CERT_DURATION,
            disable_renewal: false,
        }
    }
}

impl CertDurations {
    /// Apply `global` then `provisioner` on top of the defaults.
    pub fn resolve(global: Option<&ClaimsPolicy>, provisioner: Option<&ClaimsPolicy>) -> Result<Self> {
        let mut bounds = Self::default();
        for layer in [global, provisioner].into_iter().flatten() {
            bounds.min = layer.min_tls_cert_duration.unwrap_or(bounds.min);
            bounds.max = layer.max_tls_cert_duration.unwrap_or(bounds.max);
            bounds.default = layer.default_tls_cert_duration.unwrap_or(bounds.default);
            bounds.disable_renewal = layer.disable_renewal.unwrap_or(bounds.disable_renewal);
        }
        bounds.check()?;
        Ok(bounds)
    }

    fn check(&self) -> Result<()> {
        use crate::duration::format_duration as f;

        if self.min <= Duration::zero() {
            return Err(OffcaError::Config(format!(
                "claims: minTLSCertDuration must be greater than 0, found {}",
                f(self.min)
            )));
        }
        if self.min > self.max {
            return Err(OffcaError::Config(format!(
                "claims: minTLSCertDuration {} cannot be greater than maxTLSCertDuration {}",
                f(self.min),
                f(self.max)
            )));
        }
        if self.default < self.min || self.default > self.max {
            return Err(OffcaError::Config(format!(
                "claims: defaultTLSCertDuration {} must be between {} and {}",
                f(self.default),
                f(self.min),
                f(self.max)
            )));
        }
        Ok(())
    }
}

/// TLS settings handed back to clients with a signed certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    #[serde(default)]
    pub cipher_suites: Vec<String>,
    #[serde(default)]
    pub min_version: f64,
    #[serde(default)]
    pub max_version: f64,
    #[serde(default)]
    pub renegotiation: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            cipher_suites: vec![
                "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305".to_string(),
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".to_string(),
            ],
            min_version: 1.2,
            max_version: 1.3,
            renegotiation: false,
        }
    }
}

impl AuthorityConfig {
    /// Read, decode and validate a configuration file.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| OffcaError::Config(format!("error reading {}: {e}", path.display())))?;
        let mut config: Self = serde_json::from_slice(&data)
            .map_err(|e| OffcaError::Config(format!("error parsing {}: {e}", path.display())))?;
        config
            .validate()
            .map_err(|e| OffcaError::Config(format!("error parsing {}: {e}", path.display())))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        debug!(
            path = %path.display(),
            provisioners = config.authority_config.provisioners.len(),
            "loaded authority configuration"
        );
        Ok(config)
    }

    /// Check the structural requirements, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| Err(OffcaError::Config(format!("{what} cannot be empty")));
        if self.authority_config.provisioners.is_empty() {
            return Err(OffcaError::Config("no provisioners found".to_string()));
        }
        if self.dns_names.iter().all(String::is_empty) {
            return missing("dnsNames");
        }
        if self.root.is_empty() {
            return missing("root");
        }
        if self.intermediate_cert.as_os_str().is_empty() {
            return missing("intermediateCert");
        }
        if self.intermediate_key.as_os_str().is_empty() {
            return missing("intermediateKey");
        }
        CertDurations::resolve(self.authority_config.claims.as_ref(), None)?;
        for p in &self.authority_config.provisioners {
            CertDurations::resolve(self.authority_config.claims.as_ref(), p.claims())
                .map_err(|e| OffcaError::Config(format!("provisioner '{}': {e}", p.name())))?;
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        self.root.iter_mut().for_each(join);
        join(&mut self.intermediate_cert);
        join(&mut self.intermediate_key);
    }

    /// The first DNS name, used for audiences and the CA URL.
    #[must_use]
    pub fn primary_dns_name(&self) -> &str {
        self.dns_names
            .iter()
            .find(|n| !n.is_empty())
            .map_or("", String::as_str)
    }

    /// The root of trust.
    #[must_use]
    pub fn root_path(&self) -> Option<&Path> {
        self.root.first().map(PathBuf::as_path)
    }

    #[must_use]
    pub fn provisioners(&self) -> &[Provisioner] {
        &self.authority_config.provisioners
    }

    #[must_use]
    pub fn tls_options(&self) -> TlsOptions {
        self.tls.clone().unwrap_or_default()
    }

    /// Duration bounds for certificates issued through `provisioner`.
    pub fn cert_durations(&self, provisioner: Option<&Provisioner>) -> Result<CertDurations> {
        CertDurations::resolve(
            self.authority_config.claims.as_ref(),
            provisioner.and_then(Provisioner::claims),
        )
    }
}

mod one_or_many {
    use super::{Deserialize, Deserializer, PathBuf, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    pub fn serialize<S: Serializer>(paths: &[PathBuf], serializer: S) -> Result<S::Ok, S::Error> {
        match paths {
            [only] => only.serialize(serializer),
            many => many.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<PathBuf>, D::Error> {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(p) if p.as_os_str().is_empty() => Vec::new(),
            OneOrMany::One(p) => vec![p],
            OneOrMany::Many(v) => v,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, value: &serde_json::Value) -> PathBuf {
        let path = dir.join("ca.json");
        fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
        path
    }

    fn minimal() -> serde_json::Value {
        json!({
            "dnsNames": ["ca.example.com"],
            "root": "certs/root_ca.crt",
            "crt": "certs/intermediate_ca.crt",
            "key": "secrets/intermediate_ca_key",
            "authority": {
                "provisioners": [{ "type": "GCP", "name": "gcp" }]
            }
        })
    }

    #[test]
    fn loads_and_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuthorityConfig::load(write(dir.path(), &minimal())).unwrap();
        assert_eq!(config.root_path(), Some(dir.path().join("certs/root_ca.crt").as_path()));
        assert_eq!(config.intermediate_key, dir.path().join("secrets/intermediate_ca_key"));
        assert_eq!(config.primary_dns_name(), "ca.example.com");
        assert_eq!(config.tls_options(), TlsOptions::default());
    }

    #[test]
    fn zero_provisioners_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = minimal();
        value["authority"]["provisioners"] = json!([]);
        let path = write(dir.path(), &value);
        let err = AuthorityConfig::load(&path).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("error parsing {}: no provisioners found", path.display())
        );
    }

    #[test]
    fn missing_dns_names_and_root_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = minimal();
        value["dnsNames"] = json!([]);
        assert!(AuthorityConfig::load(write(dir.path(), &value)).is_err());

        let mut value = minimal();
        value["root"] = json!([]);
        assert!(AuthorityConfig::load(write(dir.path(), &value)).is_err());
    }

    #[test]
    fn unreadable_and_malformed_files_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = AuthorityConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, OffcaError::Config(_)));

        let path = dir.path().join("bad.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(AuthorityConfig::load(&path), Err(OffcaError::Config(_))));
    }

    #[test]
    fn duration_claims_layer_and_validate() {
        let global = ClaimsPolicy {
            max_tls_cert_duration: Some(Duration::hours(48)),
            ..ClaimsPolicy::default()
        };
        let provisioner = ClaimsPolicy {
            default_tls_cert_duration: Some(Duration::hours(1)),
            ..ClaimsPolicy::default()
        };
        let bounds = CertDurations::resolve(Some(&global), Some(&provisioner)).unwrap();
        assert_eq!(bounds.min, DEFAULT_MIN_CERT_DURATION);
        assert_eq!(bounds.max, Duration::hours(48));
        assert_eq!(bounds.default, Duration::hours(1));

        let broken = ClaimsPolicy {
            min_tls_cert_duration: Some(Duration::hours(2)),
            max_tls_cert_duration: Some(Duration::hours(1)),
            ..ClaimsPolicy::default()
        };
        assert!(CertDurations::resolve(Some(&broken), None).is_err());
    }

    #[test]
    fn claims_policy_uses_duration_strings() {
        let policy: ClaimsPolicy =
            serde_json::from_value(json!({ "minTLSCertDuration": "10m", "disableRenewal": true }))
                .unwrap();
        assert_eq!(policy.min_tls_cert_duration, Some(Duration::minutes(10)));
        assert_eq!(policy.disable_renewal, Some(true));
    }
}
