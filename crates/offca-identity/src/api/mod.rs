//! Per-cloud identity endpoints.

mod aws;
mod azure;
mod gcp;

pub use aws::{AwsApi, InstanceIdentity, AWS_ISSUER};
pub use azure::AzureApi;
pub use gcp::GcpApi;

/// Audience a cloud identity token is minted for: the CA's sign endpoint,
/// fragment-qualified with the provisioner id.
#[must_use]
pub fn signing_audience(ca_url: &str, provisioner_id: &str) -> String {
    format!("{}/1.0/sign#{provisioner_id}", ca_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_names_the_provisioner() {
        assert_eq!(
            signing_audience("https://ca.example.com/", "gcp/prod"),
            "https://ca.example.com/1.0/sign#gcp/prod"
        );
    }
}
