//! Metadata endpoint configuration.

use offca_core::{OffcaError, Result};
use url::Url;

/// GCP metadata server identity endpoint
pub const GCP_IDENTITY_URL: &str =
    "http://metadata/computeMetadata/v1/instance/service-accounts/default/identity";

/// AWS instance metadata service root
pub const AWS_METADATA_URL: &str = "http://169.254.169.254/latest";

/// Azure managed identity token endpoint
pub const AZURE_IDENTITY_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Resource the Azure token is requested for
pub const AZURE_RESOURCE: &str = "https://management.azure.com/";

/// Where each cloud's instance identity is fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEndpoints {
    /// GCP identity URL
    pub gcp: String,

    /// AWS metadata root (`/api/token` and `/dynamic/...` are appended)
    pub aws: String,

    /// Azure token URL
    pub azure: String,
}

impl Default for IdentityEndpoints {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityEndpoints {
    /// The real metadata endpoints
    #[must_use]
    pub fn new() -> Self {
        Self {
            gcp: GCP_IDENTITY_URL.to_string(),
            aws: AWS_METADATA_URL.to_string(),
            azure: AZURE_IDENTITY_URL.to_string(),
        }
    }

    /// Point every cloud at one base URL, keeping the real paths (for tests)
    #[must_use]
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            gcp: format!("{base}/computeMetadata/v1/instance/service-accounts/default/identity"),
            aws: format!("{base}/latest"),
            azure: format!("{base}/metadata/identity/oauth2/token"),
        }
    }

    /// Set the GCP identity URL
    #[must_use]
    pub fn gcp(mut self, url: impl Into<String>) -> Self {
        self.gcp = url.into();
        self
    }

    /// Set the AWS metadata root
    #[must_use]
    pub fn aws(mut self, url: impl Into<String>) -> Self {
        self.aws = url.into();
        self
    }

    /// Set the Azure token URL
    #[must_use]
    pub fn azure(mut self, url: impl Into<String>) -> Self {
        self.azure = url.into();
        self
    }

    /// Reject endpoints that are not absolute http(s) URLs.
    pub fn validate(&self) -> Result<()> {
        for (cloud, endpoint) in [("gcp", &self.gcp), ("aws", &self.aws), ("azure", &self.azure)] {
            let url = Url::parse(endpoint).map_err(|e| {
                OffcaError::Config(format!("invalid {cloud} metadata URL '{endpoint}': {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(OffcaError::Config(format!(
                    "invalid {cloud} metadata URL '{endpoint}': unsupported scheme '{}'",
                    url.scheme()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_endpoints_keep_paths() {
        let e = IdentityEndpoints::rooted_at("http://127.0.0.1:8080/");
        assert_eq!(e.aws, "http://127.0.0.1:8080/latest");
        assert!(e.gcp.ends_with("/service-accounts/default/identity"));
        assert_eq!(IdentityEndpoints::default().azure, AZURE_IDENTITY_URL);
    }

    #[test]
    fn validation_rejects_bad_endpoints() {
        assert!(IdentityEndpoints::new().validate().is_ok());

        let err = IdentityEndpoints::new().aws("169.254.169.254/latest").validate().unwrap_err();
        assert!(err.to_string().contains("invalid aws metadata URL"));

        let err = IdentityEndpoints::new().gcp("file:///etc/passwd").validate().unwrap_err();
        assert!(err.to_string().contains("unsupported scheme 'file'"));
    }
}
