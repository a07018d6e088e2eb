//! Where passwords come from.
//!
//! Key decryption never prompts directly; it asks a [`SecretResolver`], which
//! the CLI backs with a terminal prompt and tests back with a fixed value.

use std::path::{Path, PathBuf};

use tracing::debug;
use zeroize::Zeroizing;

use crate::{OffcaError, Result};

/// Supplies passwords on demand.
pub trait SecretResolver: Send + Sync {
    /// Return the password for an existing secret, described by `prompt`.
    fn resolve(&self, prompt: &str) -> Result<Zeroizing<Vec<u8>>>;

    /// Return a password for a secret being created.
    ///
    /// Interactive resolvers ask for confirmation here.
    fn resolve_new(&self, prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        self.resolve(prompt)
    }
}

/// Reads the password from a file, ignoring one trailing line break.
#[derive(Debug, Clone)]
pub struct PasswordFile {
    path: PathBuf,
}

impl PasswordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretResolver for PasswordFile {
    fn resolve(&self, _prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        debug!(path = %self.path.display(), "reading password file");
        let mut bytes = Zeroizing::new(std::fs::read(&self.path).map_err(|e| {
            OffcaError::Config(format!(
                "error reading password file {}: {e}",
                self.path.display()
            ))
        })?);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }
        Ok(bytes)
    }
}

/// A password known up front.
#[derive(Clone)]
pub struct FixedSecret(Zeroizing<Vec<u8>>);

impl FixedSecret {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self(Zeroizing::new(secret.as_ref().to_vec()))
    }
}

impl std::fmt::Debug for FixedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FixedSecret(..)")
    }
}

impl SecretResolver for FixedSecret {
    fn resolve(&self, _prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        Ok(self.0.clone())
    }
}

/// Fails every request; for non-interactive contexts without a password source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecret;

impl SecretResolver for NoSecret {
    fn resolve(&self, prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        Err(OffcaError::Config(format!(
            "a password is required but none is available ({prompt})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn password_file_strips_one_line_break() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hunter2\r\n").unwrap();
        let secret = PasswordFile::new(file.path()).resolve("prompt").unwrap();
        assert_eq!(secret.as_slice(), b"hunter2");
    }

    #[test]
    fn missing_password_file_is_a_config_error() {
        let err = PasswordFile::new("/nonexistent/password")
            .resolve("prompt")
            .unwrap_err();
        assert!(matches!(err, OffcaError::Config(_)));
    }

    #[test]
    fn fixed_secret_hides_its_value() {
        let secret = FixedSecret::new("pw");
        assert_eq!(format!("{secret:?}"), "FixedSecret(..)");
        assert_eq!(secret.resolve_new("x").unwrap().as_slice(), b"pw");
        assert!(NoSecret.resolve("x").is_err());
    }
}
