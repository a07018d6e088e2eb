//! `offca ca init` - bootstrap a new authority.

use anyhow::Result;
use colored::Colorize;

use offca::init::{init, InitOptions};

use super::Context;
use crate::cli::args::InitArgs;

const NEW_PASSWORD_PROMPT: &str = "Please enter the password to encrypt the CA and provisioner keys";

pub async fn execute(ctx: Context, args: InitArgs) -> Result<()> {
    let password = ctx.secrets().resolve_new(NEW_PASSWORD_PROMPT)?;
    let options = InitOptions::new(args.name, args.dns_names, args.provisioner);
    let output = init(&args.dir, &options, &password)?;

    println!("{} {}", "Root certificate:".bold(), output.root_cert.display());
    println!(
        "{} {}",
        "Intermediate certificate:".bold(),
        output.intermediate_cert.display()
    );
    println!("{} {}", "Intermediate key:".bold(), output.intermediate_key.display());
    println!("{} {}", "Configuration:".bold(), output.config.display());
    println!("{} {}", "Root fingerprint:".bold(), output.root_fingerprint.cyan());
    println!("{} {}", "Provisioner:".bold(), output.provisioner_id);
    Ok(())
}
