//! Azure managed identity.

use crate::config::AZURE_RESOURCE;
use crate::IdentityClient;
use offca_core::Result;
use reqwest::Method;
use serde::Deserialize;

const API_VERSION: &str = "2018-02-01";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Azure instance metadata endpoints
pub struct AzureApi<'a> {
    client: &'a IdentityClient,
}

impl<'a> AzureApi<'a> {
    pub(crate) fn new(client: &'a IdentityClient) -> Self {
        Self { client }
    }

    /// Fetch the managed identity access token
    pub async fn identity_token(&self) -> Result<String> {
        let url = &self.client.endpoints().azure;
        let request = self
            .client
            .request(Method::GET, url)
            .header("Metadata", "true")
            .query(&[("api-version", API_VERSION), ("resource", AZURE_RESOURCE)]);
        let response: TokenResponse = self.client.send_json(url, request).await?;
        Ok(response.access_token)
    }
}

#[cfg(test)]
mod tests {
    use crate::{IdentityClient, IdentityEndpoints};
    use offca_core::IssuanceStep;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> IdentityClient {
        IdentityClient::builder()
            .endpoints(IdentityEndpoints::rooted_at(&server.uri()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn returns_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/identity/oauth2/token"))
            .and(header("Metadata", "true"))
            .and(query_param("resource", "https://management.azure.com/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "azure-token",
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let token = client_for(&server).azure().identity_token().await.unwrap();
        assert_eq!(token, "azure-token");
    }

    #[tokio::test]
    async fn malformed_body_is_an_identity_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .azure()
            .identity_token()
            .await
            .unwrap_err();
        assert_eq!(err.issuance_step(), Some(IssuanceStep::Identity));
    }
}
