//! `offca ca token` - generate a one-time token.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use offca::TokenType;

use super::{write_output, Context};
use crate::cli::args::TokenArgs;

pub async fn execute(ctx: Context, ca_config: Option<PathBuf>, args: TokenArgs) -> Result<()> {
    let ca = ctx.load_ca(ca_config)?;
    let token_type = if args.revoke {
        TokenType::Revoke
    } else {
        TokenType::Sign
    };

    let issued = ctx
        .issue_token(&ca, &args.subject, token_type, &args.san, &args.provisioner)
        .await?;

    match args.output_file {
        Some(path) => {
            write_output(&path, format!("{}\n", issued.token).as_bytes(), true)?;
            eprintln!(
                "{} token written to {}",
                "✔".green().bold(),
                path.display()
            );
        }
        None => println!("{}", issued.token),
    }
    Ok(())
}
