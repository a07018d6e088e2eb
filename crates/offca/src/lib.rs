//! Offline certificate authority and one-time token issuance.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use offca::{IdentityClient, IssuanceContext, OfflineCa, TokenRequest, TokenType};
//! use offca::secret::PasswordFile;
//! use offca::oauth::CommandOAuthHelper;
//!
//! #[tokio::main]
//! async fn main() -> offca::Result<()> {
//!     let ca = OfflineCa::load("ca/config/ca.json")?;
//!
//!     let secrets = PasswordFile::new("provisioner.pass");
//!     let identity = IdentityClient::new()?;
//!     let oauth = CommandOAuthHelper::new("offca");
//!     let context = IssuanceContext {
//!         chooser: &|_: &[&offca::provisioner::Provisioner]| Ok(0),
//!         secrets: &secrets,
//!         identity: &identity,
//!         oauth: &oauth,
//!     };
//!
//!     let issued = ca
//!         .generate_token(&TokenRequest::new("web.internal", TokenType::Sign), &context)
//!         .await?;
//!     println!("{}", issued.token);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `default` - Uses rustls for TLS
//! - `rustls` - Use rustls for identity metadata requests
//! - `native-tls` - Use system native TLS

// Re-export core types
pub use offca_core::*;

// Re-export identity sources
pub use offca_identity::{
    api as identity_api, oauth, signing_audience, IdentityClient, IdentityClientBuilder,
    IdentityEndpoints,
};

// Re-export the authority
pub use offca_authority::{
    api, db, init, pool, transport, x509, Authority, IssuanceContext, IssuedToken, MemoryDb,
    MtlsIdentity, NoPeer, OfflineCa, PeerTransport, RequestOptions, RevokeRequest, RevokeResponse, SignRequest,
    SignResponse, TokenRequest, TokenType,
};

// Re-export runtime for convenience
pub use serde;
pub use serde_json;
pub use tokio;
