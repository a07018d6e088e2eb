//! OIDC tokens obtained through an external OAuth helper program.

use async_trait::async_trait;
use offca_core::{IssuanceStep, OffcaError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Default time allowed for the interactive OAuth flow
pub const DEFAULT_OAUTH_TIMEOUT: Duration = Duration::from_secs(120);

/// The OIDC provider and client to obtain a token from
#[derive(Debug, Clone, Copy)]
pub struct OidcRequest<'a> {
    /// OpenID configuration endpoint
    pub provider: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

/// Obtains an OIDC identity token
#[async_trait]
pub trait OAuthHelper: Send + Sync {
    async fn oidc_token(&self, request: &OidcRequest<'_>) -> Result<String>;
}

/// Runs `<program> oauth --oidc --bare ...` and returns its trimmed stdout
#[derive(Debug, Clone)]
pub struct CommandOAuthHelper {
    program: PathBuf,
    timeout: Duration,
}

impl CommandOAuthHelper {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_OAUTH_TIMEOUT,
        }
    }

    /// Set how long the helper may run
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn failure(&self, message: impl std::fmt::Display) -> OffcaError {
        OffcaError::issuance(
            IssuanceStep::Identity,
            format!("oauth helper {}: {message}", self.program.display()),
        )
    }
}

#[async_trait]
impl OAuthHelper for CommandOAuthHelper {
    async fn oidc_token(&self, request: &OidcRequest<'_>) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(["oauth", "--oidc", "--bare"])
            .args(["--provider", request.provider])
            .args(["--client-id", request.client_id])
            .args(["--client-secret", request.client_secret])
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program.display(), provider = %request.provider, "running oauth helper");
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| self.failure(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.failure(e))?;

        if !output.status.success() {
            return Err(self.failure(format!("exited with {}", output.status)));
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(self.failure("returned no token"));
        }
        info!(provider = %request.provider, "obtained OIDC token");
        Ok(token)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("helper");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request() -> OidcRequest<'static> {
        OidcRequest {
            provider: "https://accounts.example.com/.well-known/openid-configuration",
            client_id: "client",
            client_secret: "secret",
        }
    }

    #[tokio::test]
    async fn returns_trimmed_stdout() {
        let dir = tempfile::tempdir().unwrap();
        // $1..$3 are "oauth --oidc --bare", $5 is the provider and $7 the client id
        let helper = CommandOAuthHelper::new(script(&dir, r#"echo "  $1-$7  ""#));
        let token = helper.oidc_token(&request()).await.unwrap();
        assert_eq!(token, "oauth-client");
    }

    #[tokio::test]
    async fn failing_helper_is_an_identity_error() {
        let dir = tempfile::tempdir().unwrap();
        let helper = CommandOAuthHelper::new(script(&dir, "exit 3"));
        let err = helper.oidc_token(&request()).await.unwrap_err();
        assert_eq!(err.issuance_step(), Some(IssuanceStep::Identity));
    }

    #[tokio::test]
    async fn slow_helper_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let helper = CommandOAuthHelper::new(script(&dir, "sleep 5"))
            .timeout(Duration::from_millis(200));
        let err = helper.oidc_token(&request()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
