//! HTTP client for instance metadata services.

use crate::api::{AwsApi, AzureApi, GcpApi};
use crate::config::IdentityEndpoints;
use offca_core::{IssuanceStep, OffcaError, Result};
use reqwest::{Client as HttpClient, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default request timeout; metadata servers answer locally or not at all
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for cloud instance identity endpoints
#[derive(Clone)]
pub struct IdentityClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: HttpClient,
    endpoints: IdentityEndpoints,
    timeout: Duration,
}

impl IdentityClient {
    /// Create a client with the real endpoints and default timeout
    pub fn new() -> Result<Self> {
        IdentityClientBuilder::new().build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder() -> IdentityClientBuilder {
        IdentityClientBuilder::new()
    }

    /// Google Cloud identity tokens
    #[must_use]
    pub fn gcp(&self) -> GcpApi<'_> {
        GcpApi::new(self)
    }

    /// AWS instance identity documents
    #[must_use]
    pub fn aws(&self) -> AwsApi<'_> {
        AwsApi::new(self)
    }

    /// Azure managed identity tokens
    #[must_use]
    pub fn azure(&self) -> AzureApi<'_> {
        AzureApi::new(self)
    }

    pub(crate) fn endpoints(&self) -> &IdentityEndpoints {
        &self.inner.endpoints
    }

    /// Start a request to an absolute URL
    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!(%method, url = %url, "metadata request");
        self.inner.http.request(method, url)
    }

    /// Send a request and return the body as text
    pub(crate) async fn send_text(&self, url: &str, request: RequestBuilder) -> Result<String> {
        let response = request.send().await.map_err(|e| self.transport_error(url, &e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(url, &e))?;

        if status.is_success() {
            Ok(body)
        } else {
            warn!(url = %url, status = status.as_u16(), "metadata request failed");
            Err(OffcaError::issuance(
                IssuanceStep::Identity,
                format!("{url} returned {status}: {}", body.trim()),
            ))
        }
    }

    /// Send a request and decode a JSON body
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let body = self.send_text(url, request).await?;
        serde_json::from_str(&body).map_err(|e| {
            OffcaError::issuance(IssuanceStep::Identity, format!("error decoding {url}: {e}"))
        })
    }

    fn transport_error(&self, url: &str, error: &reqwest::Error) -> OffcaError {
        let message = if error.is_timeout() {
            format!(
                "request to {url} timed out after {:?}",
                self.inner.timeout
            )
        } else {
            format!("error contacting {url}: {error}")
        };
        OffcaError::issuance(IssuanceStep::Identity, message)
    }
}

/// Builder for configuring an [`IdentityClient`]
pub struct IdentityClientBuilder {
    endpoints: IdentityEndpoints,
    timeout: Duration,
    user_agent: String,
}

impl Default for IdentityClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: IdentityEndpoints::default(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("offca/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the metadata endpoints (useful for testing)
    #[must_use]
    pub fn endpoints(mut self, endpoints: IdentityEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the User-Agent header
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Build the client
    pub fn build(self) -> Result<IdentityClient> {
        self.endpoints.validate()?;
        let http = HttpClient::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| OffcaError::Config(format!("error building HTTP client: {e}")))?;

        Ok(IdentityClient {
            inner: Arc::new(ClientInner {
                http,
                endpoints: self.endpoints,
                timeout: self.timeout,
            }),
        })
    }
}
