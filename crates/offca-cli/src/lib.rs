//! # offca-cli
//!
//! Command-line interface for the offline certificate authority.
//!
//! - **`crypto jwt sign`**: sign arbitrary JWTs with strict claim policy
//! - **`ca init`**: bootstrap a root, intermediate and JWK provisioner
//! - **`ca token`**: mint one-time tokens from any configured provisioner
//! - **`ca certificate` / `ca sign`**: obtain certificates offline
//! - **`ca renew` / `ca revoke`**: manage issued certificates

pub mod cli;
pub mod config;
pub mod prompt;

pub use cli::run;
