//! Offline certificate authority.
//!
//! Loads an authority configuration, verifies one-time tokens issued by its
//! JWK provisioners and signs, renews and revokes certificates without a
//! running CA server.

pub mod api;
mod authority;
pub mod db;
pub mod init;
mod offline;
pub mod pool;
pub mod transport;
pub mod x509;

pub use api::{RevokeRequest, RevokeResponse, SignRequest, SignResponse};
pub use authority::{
    classify_sans, Authority, AuthorizedToken, TokenType, INTERMEDIATE_KEY_PROMPT, TOKEN_LEEWAY,
};
pub use db::{AuthorityDb, MemoryDb, RevokedCertificate};
pub use offline::{IssuanceContext, IssuedToken, OfflineCa, RequestOptions, TokenRequest};
pub use transport::{MtlsIdentity, NoPeer, PeerTransport};
pub use offca_core::{OffcaError, Result};
