//! Delegated identity sources for offca tokens.
//!
//! Cloud provisioners never hold a key: the token comes from the instance
//! metadata service ([`IdentityClient`]) or, for OIDC, from an external OAuth
//! helper ([`OAuthHelper`]). Every call is bounded by a timeout.

mod client;
mod config;
pub mod api;
pub mod oauth;

pub use api::signing_audience;
pub use client::{IdentityClient, IdentityClientBuilder, DEFAULT_TIMEOUT};
pub use config::*;
pub use oauth::{CommandOAuthHelper, OAuthHelper, OidcRequest, DEFAULT_OAUTH_TIMEOUT};
pub use offca_core::{OffcaError, Result};
