use std::fmt;

use thiserror::Error;

/// Result type alias for offca operations
pub type Result<T> = std::result::Result<T, OffcaError>;

/// Errors that can occur while issuing tokens or operating the offline authority
#[derive(Error, Debug)]
pub enum OffcaError {
    /// Bad or missing configuration or key material
    #[error("{0}")]
    Config(String),

    /// Malformed command invocation
    #[error("{0}")]
    Usage(String),

    /// No provisioner could be selected
    #[error("{0}")]
    Selection(String),

    /// A key or claim safety policy was violated
    #[error("{0}")]
    Policy(String),

    /// Certificate chain or key pair verification failed
    #[error("{0}")]
    Validation(String),

    /// Token was invalid, expired, reused or did not satisfy provisioner policy
    #[error("unauthorized: {0}")]
    Authorization(String),

    /// Certificate or token construction failed
    #[error("{0}")]
    Signing(String),

    /// The revocation could not be recorded
    #[error("{0}")]
    Revocation(String),

    /// Identity provider, helper or key decryption failed while building a token
    #[error("error {step} token: {message}")]
    Issuance {
        /// The step of token construction that failed
        step: IssuanceStep,
        /// What went wrong
        message: String,
    },

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The stage of token issuance an [`OffcaError::Issuance`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceStep {
    /// Decrypting the provisioner key
    Decrypt,
    /// Building the claim set
    Claims,
    /// Signing the token
    Sign,
    /// Requesting a token from a delegated identity source
    Identity,
}

impl fmt::Display for IssuanceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decrypt => write!(f, "decrypting key for"),
            Self::Claims => write!(f, "building claims for"),
            Self::Sign => write!(f, "signing"),
            Self::Identity => write!(f, "requesting identity"),
        }
    }
}

impl OffcaError {
    /// Shorthand for an [`OffcaError::Issuance`] error.
    pub fn issuance(step: IssuanceStep, message: impl Into<String>) -> Self {
        Self::Issuance {
            step,
            message: message.into(),
        }
    }

    /// Returns the issuance step if this is an issuance error
    #[must_use]
    pub const fn issuance_step(&self) -> Option<IssuanceStep> {
        match self {
            Self::Issuance { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Returns true if the caller must fix the invocation rather than the environment
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuance_error_names_the_step() {
        let err = OffcaError::issuance(IssuanceStep::Decrypt, "wrong password");
        assert_eq!(
            err.to_string(),
            "error decrypting key for token: wrong password"
        );
        assert_eq!(err.issuance_step(), Some(IssuanceStep::Decrypt));
    }

    #[test]
    fn authorization_errors_are_prefixed() {
        let err = OffcaError::Authorization("token already used".into());
        assert_eq!(err.to_string(), "unauthorized: token already used");
        assert!(err.issuance_step().is_none());
    }
}
