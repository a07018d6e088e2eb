//! Google Cloud instance identity.

use crate::IdentityClient;
use offca_core::Result;
use reqwest::Method;

/// GCP metadata server endpoints
pub struct GcpApi<'a> {
    client: &'a IdentityClient,
}

impl<'a> GcpApi<'a> {
    pub(crate) fn new(client: &'a IdentityClient) -> Self {
        Self { client }
    }

    /// Fetch a signed instance identity token for `audience`
    pub async fn identity_token(&self, audience: &str) -> Result<String> {
        let url = &self.client.endpoints().gcp;
        let request = self
            .client
            .request(Method::GET, url)
            .header("Metadata-Flavor", "Google")
            .query(&[("audience", audience), ("format", "full"), ("licenses", "FALSE")]);
        let token = self.client.send_text(url, request).await?;
        Ok(token.trim().to_string())
    }
}
