//! `offca ca renew` - reissue a certificate authorized by itself.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use offca::MtlsIdentity;

use super::{check_overwrite, write_output, Context};
use crate::cli::args::RenewArgs;

pub async fn execute(ctx: Context, ca_config: Option<PathBuf>, args: RenewArgs) -> Result<()> {
    let out = args.out.unwrap_or_else(|| args.crt_file.clone());
    check_overwrite(&out, args.force)?;

    let ca = ctx.load_ca(ca_config)?;
    let identity = MtlsIdentity::load(&args.crt_file, &args.key_file)?;
    let response = ca.renew(&identity)?;
    write_output(&out, response.chain_pem().as_bytes(), false)?;

    eprintln!(
        "{} Your certificate has been saved in {}",
        "✔".green().bold(),
        out.display()
    );
    Ok(())
}
