//! Command implementations.

pub mod certificate;
pub mod init;
pub mod jwt;
pub mod renew;
pub mod revoke;
pub mod sign;
pub mod token;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};

use offca::duration::TimeDuration;
use offca::oauth::CommandOAuthHelper;
use offca::provisioner::ProvisionerFilter;
use offca::secret::{PasswordFile, SecretResolver};
use offca::{IdentityClient, IssuanceContext, IssuedToken, MemoryDb, OfflineCa, TokenRequest, TokenType};

use crate::cli::args::{ProvisionerArgs, ValidityArgs};
use crate::config::Config;
use crate::prompt::{TerminalChooser, TerminalPassword};

/// OAuth helper used when none is configured.
pub const DEFAULT_OAUTH_PROGRAM: &str = "offca-oauth";

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Defaults from the config file
    pub config: Config,

    /// Password source for encrypted keys; prompts when unset
    pub password_file: Option<PathBuf>,

    /// Verbose output
    pub verbose: bool,
}

impl Context {
    /// Where passwords come from.
    pub fn secrets(&self) -> Box<dyn SecretResolver> {
        match &self.password_file {
            Some(path) => Box::new(PasswordFile::new(path)),
            None => Box::new(TerminalPassword),
        }
    }

    /// The authority configuration path from the flag, env or config file.
    pub fn ca_config(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        flag.or_else(|| self.config.ca_config.clone()).ok_or_else(|| {
            anyhow::anyhow!(
                "flag '--ca-config' is required (or set OFFCA_CA_CONFIG or 'ca_config' in {})",
                Config::path().map_or_else(|_| "the config file".to_string(), |p| p.display().to_string())
            )
        })
    }

    /// Load the offline authority with fresh in-memory state.
    pub fn load_ca(&self, flag: Option<PathBuf>) -> Result<OfflineCa> {
        let path = self.ca_config(flag)?;
        let secrets = self.secrets();
        Ok(OfflineCa::load_with(&path, Arc::new(MemoryDb::new()), secrets.as_ref())?)
    }

    pub fn identity(&self) -> Result<IdentityClient> {
        let mut builder = IdentityClient::builder();
        if let Some(secs) = self.config.identity_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(builder.build()?)
    }

    pub fn oauth(&self) -> CommandOAuthHelper {
        let program = self
            .config
            .oauth_program
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OAUTH_PROGRAM));
        CommandOAuthHelper::new(program)
    }

    /// Generate a token with the provisioner picked by `selection`.
    pub async fn issue_token(
        &self,
        ca: &OfflineCa,
        subject: &str,
        token_type: TokenType,
        sans: &[String],
        selection: &ProvisionerArgs,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let mut request = TokenRequest::new(subject, token_type);
        request.sans = sans.to_vec();
        request.filter = ProvisionerFilter {
            name: selection.provisioner.clone(),
            kid: selection.provisioner_kid.clone(),
        };
        request.not_before = resolve_time(selection.token_not_before.as_deref(), now)?;
        request.not_after = resolve_time(selection.token_not_after.as_deref(), now)?;

        let secrets = self.secrets();
        let identity = self.identity()?;
        let oauth = self.oauth();
        let context = IssuanceContext {
            chooser: &TerminalChooser,
            secrets: secrets.as_ref(),
            identity: &identity,
            oauth: &oauth,
        };
        Ok(ca.generate_token(&request, &context).await?)
    }
}

fn resolve_time(value: Option<&str>, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|v| v.parse::<TimeDuration>().map(|t| t.resolve(now)))
        .transpose()
        .map_err(Into::into)
}

impl ValidityArgs {
    /// Parse the requested certificate window.
    pub fn parse(&self) -> Result<(Option<TimeDuration>, Option<TimeDuration>)> {
        let parse = |v: &Option<String>| v.as_deref().map(str::parse::<TimeDuration>).transpose();
        Ok((parse(&self.not_before)?, parse(&self.not_after)?))
    }
}

/// Refuse to replace `path` unless `force` is set.
pub fn check_overwrite(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "file {} already exists, use '--force' to overwrite it",
            path.display()
        );
    }
    Ok(())
}

/// Write `data`, readable only by the owner when `secret`.
pub fn write_output(path: &Path, data: &[u8], secret: bool) -> Result<()> {
    std::fs::write(path, data).with_context(|| format!("error writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if secret {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("error writing {}", path.display()))?;
        }
    }
    #[cfg(not(unix))]
    let _ = secret;
    Ok(())
}
