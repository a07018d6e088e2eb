//! The authority as seen from the command line.
//!
//! [`OfflineCa`] wraps an [`Authority`] loaded from a configuration file and
//! adds token generation: one dispatch over the provisioner kinds, with JWK
//! tokens signed locally and every other kind delegated to an identity source.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use openssl::x509::X509;
use tracing::{debug, info};

use offca_core::config::AuthorityConfig;
use offca_core::ott::{self, BootstrapRequest};
use offca_core::provisioner::{self, Provisioner, ProvisionerChooser, ProvisionerFilter};
use offca_core::secret::{NoSecret, SecretResolver};
use offca_core::{OffcaError, Result};
use offca_identity::{signing_audience, IdentityClient, OAuthHelper, OidcRequest};

use crate::api::{RevokeRequest, RevokeResponse, SignRequest, SignResponse};
use crate::authority::{Authority, TokenType};
use crate::db::{AuthorityDb, MemoryDb};
use crate::pool;
use crate::transport::{MtlsIdentity, PeerTransport};

/// A token to generate.
#[derive(Debug, Clone)]
pub struct TokenRequest<'a> {
    pub subject: &'a str,
    pub token_type: TokenType,
    pub filter: ProvisionerFilter,
    /// Defaults to the subject
    pub sans: Vec<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl<'a> TokenRequest<'a> {
    #[must_use]
    pub fn new(subject: &'a str, token_type: TokenType) -> Self {
        Self {
            subject,
            token_type,
            filter: ProvisionerFilter::default(),
            sans: Vec::new(),
            not_before: None,
            not_after: None,
        }
    }
}

/// Collaborators consulted while generating a token.
#[derive(Clone, Copy)]
pub struct IssuanceContext<'a> {
    pub chooser: &'a dyn ProvisionerChooser,
    pub secrets: &'a dyn SecretResolver,
    pub identity: &'a IdentityClient,
    pub oauth: &'a dyn OAuthHelper,
}

/// How the certificate request should be built for a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Only the SANs vouched for by the identity provider may be requested
    pub disable_custom_sans: bool,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub provisioner: Provisioner,
    pub options: RequestOptions,
}

#[derive(Debug)]
pub struct OfflineCa {
    config_path: PathBuf,
    authority: Authority,
}

impl OfflineCa {
    /// Load with fresh in-memory state. An encrypted intermediate key needs
    /// `password` in the configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(path, Arc::new(MemoryDb::new()), &NoSecret)
    }

    pub fn load_with(
        path: impl AsRef<Path>,
        db: Arc<dyn AuthorityDb>,
        secrets: &dyn SecretResolver,
    ) -> Result<Self> {
        let path = path.as_ref();
        let config = AuthorityConfig::load(path)?;
        let authority = Authority::new(config, db, secrets)?;
        debug!(path = %path.display(), "offline authority loaded");
        Ok(Self {
            config_path: path.to_path_buf(),
            authority,
        })
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    #[must_use]
    pub const fn authority(&self) -> &Authority {
        &self.authority
    }

    #[must_use]
    pub fn provisioners(&self) -> &[Provisioner] {
        self.authority.config().provisioners()
    }

    pub fn root(&self) -> Result<&X509> {
        self.authority.root()
    }

    #[must_use]
    pub fn root_fingerprint(&self) -> &str {
        self.authority.root_fingerprint()
    }

    /// `https://<first DNS name>`
    #[must_use]
    pub fn ca_url(&self) -> String {
        format!("https://{}", self.authority.config().primary_dns_name())
    }

    /// The audience JWK tokens for `token_type` are addressed to.
    #[must_use]
    pub fn audience(&self, token_type: TokenType) -> String {
        format!("{}/{token_type}", self.ca_url())
    }

    /// Check that a certificate and key match and chain to the configured
    /// roots through the configured intermediates. Certificates bundled after
    /// the leaf are ignored.
    pub fn verify_client_cert(&self, cert: &Path, key: &Path) -> Result<()> {
        let identity = MtlsIdentity::load(cert, key)?;
        let leaf = identity.peer_leaf()?;
        pool::verify_chain(leaf, self.authority.roots(), self.authority.intermediates())?;
        debug!(cert = %cert.display(), "client certificate verified");
        Ok(())
    }

    /// Generate a token using the selected provisioner.
    pub async fn generate_token(
        &self,
        request: &TokenRequest<'_>,
        context: &IssuanceContext<'_>,
    ) -> Result<IssuedToken> {
        if request.subject.is_empty() {
            return Err(OffcaError::Usage("token subject cannot be empty".to_string()));
        }
        let provisioner = provisioner::select(self.provisioners(), &request.filter, context.chooser)?;

        let token = match provisioner {
            Provisioner::Jwk(jwk) => {
                let audience = self.audience(request.token_type);
                let mut bootstrap = BootstrapRequest::new(request.subject, &audience, self.root_fingerprint());
                bootstrap.sans.clone_from(&request.sans);
                bootstrap.not_before = request.not_before;
                bootstrap.not_after = request.not_after;
                ott::issue_jwk_token(jwk, &bootstrap, context.secrets)?
            }
            Provisioner::Oidc(oidc) => {
                context
                    .oauth
                    .oidc_token(&OidcRequest {
                        provider: &oidc.configuration_endpoint,
                        client_id: &oidc.client_id,
                        client_secret: &oidc.client_secret,
                    })
                    .await?
            }
            Provisioner::Gcp(_) => {
                let audience = signing_audience(&self.ca_url(), &provisioner.id());
                context.identity.gcp().identity_token(&audience).await?
            }
            Provisioner::Aws(_) => {
                let audience = signing_audience(&self.ca_url(), &provisioner.id());
                context
                    .identity
                    .aws()
                    .identity_token(request.subject, &audience)
                    .await?
            }
            Provisioner::Azure(_) => context.identity.azure().identity_token().await?,
        };

        info!(
            provisioner = %provisioner.name(),
            kind = %provisioner.kind(),
            subject = %request.subject,
            token_type = %request.token_type,
            "token generated"
        );
        Ok(IssuedToken {
            token,
            options: RequestOptions {
                disable_custom_sans: provisioner.disable_custom_sans(),
            },
            provisioner: provisioner.clone(),
        })
    }

    pub fn sign(&self, request: &SignRequest) -> Result<SignResponse> {
        self.authority.sign(request)
    }

    pub fn renew(&self, peer: &dyn PeerTransport) -> Result<SignResponse> {
        self.authority.renew(peer)
    }

    pub fn revoke(&self, request: &RevokeRequest, peer: &dyn PeerTransport) -> Result<RevokeResponse> {
        self.authority.revoke(request, peer)
    }
}
