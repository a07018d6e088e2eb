//! AWS instance identity documents.
//!
//! The document and its signature are wrapped in an HS256 JWT keyed by the
//! signature, which the CA verifies against AWS's public certificate.

use crate::IdentityClient;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use offca_core::claims::{Audience, ClaimSet, Claims, NumericDate};
use offca_core::ott::DEFAULT_TOKEN_LIFETIME;
use offca_core::{IssuanceStep, OffcaError, Result};
use reqwest::Method;
use serde_json::json;
use tracing::debug;

/// Issuer of AWS identity tokens
pub const AWS_ISSUER: &str = "ec2.amazonaws.com";

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "21600";

/// An instance identity document and its PKCS#7 signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub document: Vec<u8>,
    pub signature: Vec<u8>,
}

/// AWS instance metadata endpoints
pub struct AwsApi<'a> {
    client: &'a IdentityClient,
}

impl<'a> AwsApi<'a> {
    pub(crate) fn new(client: &'a IdentityClient) -> Self {
        Self { client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.client.endpoints().aws.trim_end_matches('/'))
    }

    /// IMDSv2 session token; `None` means fall back to IMDSv1
    async fn session_token(&self) -> Option<String> {
        let url = self.url("/api/token");
        let request = self
            .client
            .request(Method::PUT, &url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS);
        match self.client.send_text(&url, request).await {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                debug!(error = %e, "IMDSv2 unavailable, using IMDSv1");
                None
            }
        }
    }

    async fn read(&self, path: &str, session: Option<&str>) -> Result<Vec<u8>> {
        let url = self.url(path);
        let mut request = self.client.request(Method::GET, &url);
        if let Some(token) = session {
            request = request.header(TOKEN_HEADER, token);
        }
        Ok(self.client.send_text(&url, request).await?.into_bytes())
    }

    /// Fetch the instance identity document and its signature
    pub async fn instance_identity(&self) -> Result<InstanceIdentity> {
        let session = self.session_token().await;
        let document = self
            .read("/dynamic/instance-identity/document", session.as_deref())
            .await?;
        let signature = self
            .read("/dynamic/instance-identity/signature", session.as_deref())
            .await?;
        Ok(InstanceIdentity {
            document,
            signature,
        })
    }

    /// Build the identity token for `subject` addressed to `audience`
    pub async fn identity_token(&self, subject: &str, audience: &str) -> Result<String> {
        let identity = self.instance_identity().await?;
        wrap_identity(&identity, subject, audience)
    }
}

/// Wrap an identity document in an HS256 JWT keyed by its signature.
pub(crate) fn wrap_identity(identity: &InstanceIdentity, subject: &str, audience: &str) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        issuer: AWS_ISSUER.to_string(),
        subject: subject.to_string(),
        audience: Audience::from(audience),
        expiry: Some(NumericDate::new(now + DEFAULT_TOKEN_LIFETIME)),
        not_before: Some(NumericDate::new(now)),
        issued_at: Some(NumericDate::new(now)),
        id: hex::encode(openssl::sha::sha256(&identity.document)),
    };
    let payload = ClaimSet::from_claims(&claims)?.merge(&json!({
        "amazon": {
            "document": STANDARD.encode(&identity.document),
            "signature": STANDARD.encode(&identity.signature),
        }
    }))?;

    let mut header = Header::new(Algorithm::HS256);
    header.typ = Some("JWT".to_string());
    encode(&header, &payload, &EncodingKey::from_secret(&identity.signature)).map_err(|e| {
        OffcaError::issuance(IssuanceStep::Sign, format!("error signing AWS identity token: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdentityEndpoints;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use serde_json::Value;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCUMENT: &str = r#"{"instanceId":"i-0123","accountId":"1234"}"#;

    async fn mount_documents(server: &MockServer, token: Option<&str>) {
        let mut doc = Mock::given(method("GET")).and(path("/latest/dynamic/instance-identity/document"));
        let mut sig = Mock::given(method("GET")).and(path("/latest/dynamic/instance-identity/signature"));
        if let Some(token) = token {
            doc = doc.and(header(TOKEN_HEADER, token));
            sig = sig.and(header(TOKEN_HEADER, token));
        }
        doc.respond_with(ResponseTemplate::new(200).set_body_string(DOCUMENT))
            .mount(server)
            .await;
        sig.respond_with(ResponseTemplate::new(200).set_body_string("c2lnbmF0dXJl"))
            .mount(server)
            .await;
    }

    fn client_for(server: &MockServer) -> IdentityClient {
        IdentityClient::builder()
            .endpoints(IdentityEndpoints::rooted_at(&server.uri()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn uses_imdsv2_session_when_available() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .and(header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS))
            .respond_with(ResponseTemplate::new(200).set_body_string("session"))
            .expect(1)
            .mount(&server)
            .await;
        mount_documents(&server, Some("session")).await;

        let identity = client_for(&server).aws().instance_identity().await.unwrap();
        assert_eq!(identity.document, DOCUMENT.as_bytes());
        assert_eq!(identity.signature, b"c2lnbmF0dXJl");
    }

    #[tokio::test]
    async fn falls_back_to_imdsv1() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_documents(&server, None).await;

        let token = client_for(&server)
            .aws()
            .identity_token("i-0123", "https://ca/1.0/sign#aws/prod")
            .await
            .unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["https://ca/1.0/sign#aws/prod"]);
        validation.set_issuer(&[AWS_ISSUER]);
        let claims = decode::<Value>(&token, &DecodingKey::from_secret(b"c2lnbmF0dXJl"), &validation)
            .unwrap()
            .claims;
        assert_eq!(claims["sub"], "i-0123");
        assert_eq!(claims["aud"], "https://ca/1.0/sign#aws/prod");
        assert_eq!(
            claims["jti"],
            hex::encode(openssl::sha::sha256(DOCUMENT.as_bytes()))
        );
        assert_eq!(claims["amazon"]["document"], STANDARD.encode(DOCUMENT));
    }
}
