//! Core types for the offca offline certificate authority.
//!
//! This crate holds everything that does not need a network or a CA key:
//!
//! - **Claims**: the registered JWT claims and the single-audience encoding rule
//! - **JOSE**: JWK conversion, password-based JWE and compact JWS
//! - **Provisioners**: the configured token issuers and how one is selected
//! - **Configuration**: the `ca.json` document and certificate duration policy
//! - **Tokens**: JWK bootstrap tokens and the `crypto jwt sign` workflow
//! - **Errors**: the [`OffcaError`] taxonomy shared by every crate
//!
//! # Example
//!
//! ```rust,ignore
//! use offca_core::{jwt, secret::NoSecret, Result};
//!
//! fn sign(payload: &[u8]) -> Result<String> {
//!     let source = jwt::KeySource::from_flags(Some("key.json".into()), None, None)?;
//!     let key = jwt::load_signing_key(&source, &NoSecret)?;
//!     let options = jwt::SignOptions {
//!         issuer: Some("joe".into()),
//!         audience: vec!["https://example.com".into()],
//!         subject: Some("subject".into()),
//!         expiry: Some(chrono::Utc::now().timestamp() + 300),
//!         ..Default::default()
//!     };
//!     jwt::sign_payload(&jwt::parse_payload(payload)?, &key, &options)
//! }
//! ```

mod error;
pub mod claims;
pub mod config;
pub mod duration;
pub mod jose;
pub mod jwt;
pub mod ott;
pub mod provisioner;
pub mod secret;

pub use error::{IssuanceStep, OffcaError, Result};
