//! `offca ca certificate` - new key pair and certificate in one step.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use colored::Colorize;

use offca::x509::{create_csr, generate_key, San};
use offca::{SignRequest, TokenType};

use super::{check_overwrite, write_output, Context};
use crate::cli::args::CertificateArgs;

pub async fn execute(ctx: Context, ca_config: Option<PathBuf>, args: CertificateArgs) -> Result<()> {
    check_overwrite(&args.crt_file, args.force)?;
    check_overwrite(&args.key_file, args.force)?;
    let (not_before, not_after) = args.validity.parse()?;

    let ca = ctx.load_ca(ca_config)?;
    let sans = if args.san.is_empty() {
        vec![args.subject.clone()]
    } else {
        args.san.clone()
    };

    let ott = match args.token {
        Some(token) => token,
        None => {
            ctx.issue_token(&ca, &args.subject, TokenType::Sign, &sans, &args.provisioner)
                .await?
                .token
        }
    };

    let key = generate_key()?;
    let names: Vec<San> = sans.iter().map(|s| San::classify(s)).collect();
    let csr = create_csr(&args.subject, &names, &key)?;
    let csr = String::from_utf8(csr.to_pem().context("error encoding certificate request")?)
        .context("error encoding certificate request")?;

    let response = ca.sign(&SignRequest {
        csr,
        ott,
        not_before,
        not_after,
    })?;

    let key_pem = key
        .private_key_to_pem_pkcs8()
        .context("error encoding private key")?;
    write_output(&args.crt_file, response.chain_pem().as_bytes(), false)?;
    write_output(&args.key_file, &key_pem, true)?;

    eprintln!(
        "{} Certificate: {}",
        "✔".green().bold(),
        args.crt_file.display()
    );
    eprintln!(
        "{} Private Key: {}",
        "✔".green().bold(),
        args.key_file.display()
    );
    Ok(())
}
