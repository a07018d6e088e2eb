//! Terminal-backed provisioner selection and password entry.

use std::io::IsTerminal;

use dialoguer::{Password, Select};
use offca_core::provisioner::{Provisioner, ProvisionerChooser};
use offca_core::secret::SecretResolver;
use offca_core::{OffcaError, Result};
use zeroize::Zeroizing;

/// Asks the user to pick a provisioner.
///
/// Without a terminal there is nobody to ask, so the user is pointed at the
/// flag that makes the choice explicit.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalChooser;

impl ProvisionerChooser for TerminalChooser {
    fn choose(&self, candidates: &[&Provisioner]) -> Result<usize> {
        if !std::io::stderr().is_terminal() || !std::io::stdin().is_terminal() {
            return Err(OffcaError::Selection(format!(
                "{} provisioners are configured: use '--provisioner' to select one",
                candidates.len()
            )));
        }
        let items: Vec<String> = candidates.iter().map(|p| p.describe()).collect();
        Select::new()
            .with_prompt("What provisioner key do you want to use?")
            .items(&items)
            .default(0)
            .interact()
            .map_err(|e| OffcaError::Selection(format!("error selecting provisioner: {e}")))
    }
}

/// Prompts for passwords on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPassword;

impl TerminalPassword {
    fn ask(prompt: &str, confirm: bool) -> Result<Zeroizing<Vec<u8>>> {
        if !std::io::stdin().is_terminal() {
            return Err(OffcaError::Config(format!(
                "{prompt}: no terminal available, use '--password-file'"
            )));
        }
        let mut input = Password::new().with_prompt(prompt);
        if confirm {
            input = input.with_confirmation("Confirm password", "passwords do not match");
        }
        let password = input
            .interact()
            .map_err(|e| OffcaError::Config(format!("error reading password: {e}")))?;
        Ok(Zeroizing::new(password.into_bytes()))
    }
}

impl SecretResolver for TerminalPassword {
    fn resolve(&self, prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        Self::ask(prompt, false)
    }

    fn resolve_new(&self, prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        Self::ask(prompt, true)
    }
}
