//! `offca ca sign` - sign an existing certificate request.

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use colored::Colorize;

use offca::x509::inspect_csr;
use offca::{SignRequest, TokenType};

use super::{check_overwrite, write_output, Context};
use crate::cli::args::SignArgs;

pub async fn execute(ctx: Context, ca_config: Option<PathBuf>, args: SignArgs) -> Result<()> {
    check_overwrite(&args.crt_file, args.force)?;
    let (not_before, not_after) = args.validity.parse()?;

    let csr = std::fs::read_to_string(&args.csr_file)
        .with_context(|| format!("error reading {}", args.csr_file.display()))?;
    let info = inspect_csr(&csr)?;
    let Some(subject) = info.common_name.clone() else {
        bail!(
            "certificate request {} has no common name",
            args.csr_file.display()
        );
    };

    let ca = ctx.load_ca(ca_config)?;
    let ott = match args.token {
        Some(token) => token,
        None => {
            let sans: Vec<String> = info.sans.iter().map(ToString::to_string).collect();
            ctx.issue_token(&ca, &subject, TokenType::Sign, &sans, &args.provisioner)
                .await?
                .token
        }
    };

    let response = ca.sign(&SignRequest {
        csr,
        ott,
        not_before,
        not_after,
    })?;
    write_output(&args.crt_file, response.chain_pem().as_bytes(), false)?;

    eprintln!(
        "{} Certificate: {}",
        "✔".green().bold(),
        args.crt_file.display()
    );
    Ok(())
}
