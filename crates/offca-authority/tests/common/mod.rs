#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use serde_json::Value;
use tempfile::TempDir;

use offca_authority::init::{init, InitOptions, InitOutput};
use offca_authority::x509::{create_csr, generate_key, San};
use offca_authority::{
    IssuanceContext, MemoryDb, MtlsIdentity, OfflineCa, SignRequest, SignResponse, TokenRequest,
    TokenType,
};
use offca_core::provisioner::Provisioner;
use offca_core::secret::FixedSecret;
use offca_core::Result;
use offca_identity::{IdentityClient, OAuthHelper, OidcRequest};

pub const PASSWORD: &str = "correct horse";
pub const DNS_NAME: &str = "ca.internal";

pub struct Fixture {
    pub dir: TempDir,
    pub output: InitOutput,
    pub ca: OfflineCa,
    /// State behind `ca`, for inspecting what the authority recorded
    pub db: Arc<MemoryDb>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Initialize, then let `edit` change the configuration JSON before loading.
    pub fn with_config(edit: impl FnOnce(&mut Value)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let options = InitOptions::new("Test", vec![DNS_NAME.to_string()], "admin");
        let output = init(dir.path(), &options, PASSWORD.as_bytes()).unwrap();

        let mut config: Value =
            serde_json::from_slice(&std::fs::read(&output.config).unwrap()).unwrap();
        edit(&mut config);
        std::fs::write(&output.config, serde_json::to_vec_pretty(&config).unwrap()).unwrap();

        let db = Arc::new(MemoryDb::new());
        let ca = OfflineCa::load_with(&output.config, db.clone(), &FixedSecret::new(PASSWORD))
            .unwrap();
        Self { dir, output, ca, db }
    }

    pub async fn token(&self, subject: &str, token_type: TokenType, sans: &[&str]) -> String {
        let mut request = TokenRequest::new(subject, token_type);
        request.sans = sans.iter().map(ToString::to_string).collect();
        self.token_for(request).await
    }

    /// Generate a token from the "admin" JWK provisioner.
    pub async fn token_for(&self, mut request: TokenRequest<'_>) -> String {
        request.filter.name = Some("admin".to_string());
        let identity = IdentityClient::new().unwrap();
        let secrets = FixedSecret::new(PASSWORD);
        let context = IssuanceContext {
            chooser: &never_choose,
            secrets: &secrets,
            identity: &identity,
            oauth: &StubOAuth,
        };
        self.ca.generate_token(&request, &context).await.unwrap().token
    }

    /// Obtain a certificate for `subject`, returning its key and the response.
    pub async fn issue(&self, subject: &str) -> (PKey<Private>, SignResponse) {
        let ott = self.token(subject, TokenType::Sign, &[]).await;
        let (key, csr) = csr(subject, &[subject]);
        let response = self
            .ca
            .sign(&SignRequest {
                csr,
                ott,
                not_before: None,
                not_after: None,
            })
            .unwrap();
        (key, response)
    }
}

pub fn csr(subject: &str, sans: &[&str]) -> (PKey<Private>, String) {
    let key = generate_key().unwrap();
    let sans: Vec<San> = sans.iter().map(|s| San::classify(s)).collect();
    let request = create_csr(subject, &sans, &key).unwrap();
    (key, String::from_utf8(request.to_pem().unwrap()).unwrap())
}

pub fn peer(response: &SignResponse, key: PKey<Private>) -> MtlsIdentity {
    let chain = X509::stack_from_pem(response.chain_pem().as_bytes()).unwrap();
    MtlsIdentity::new(chain, key).unwrap()
}

pub fn never_choose(_: &[&Provisioner]) -> Result<usize> {
    panic!("selection should not prompt")
}

pub struct StubOAuth;

#[async_trait]
impl OAuthHelper for StubOAuth {
    async fn oidc_token(&self, request: &OidcRequest<'_>) -> Result<String> {
        Ok(format!("oidc-token-for-{}", request.client_id))
    }
}
