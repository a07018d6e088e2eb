//! `offca ca revoke` - record a passive revocation.

use std::path::PathBuf;

use anyhow::{bail, Result};
use colored::Colorize;

use offca::x509::serial_string;
use offca::{MtlsIdentity, NoPeer, PeerTransport, RevokeRequest, TokenType};

use super::Context;
use crate::cli::args::RevokeArgs;

pub async fn execute(ctx: Context, ca_config: Option<PathBuf>, args: RevokeArgs) -> Result<()> {
    let ca = ctx.load_ca(ca_config)?;

    let mut request = RevokeRequest {
        serial: args.serial.clone().unwrap_or_default(),
        ott: String::new(),
        reason_code: args.reason_code,
        reason: args.reason.clone(),
        passive: true,
    };

    match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => {
            let identity = MtlsIdentity::load(cert, key)?;
            if request.serial.is_empty() {
                request.serial = serial_string(identity.peer_leaf()?)?;
            }
            ca.revoke(&request, &identity)?;
        }
        _ => {
            if request.serial.is_empty() {
                bail!("a serial number is required unless '--cert' and '--key' are given");
            }
            request.ott = match args.token {
                Some(token) => token,
                None => {
                    ctx.issue_token(&ca, &request.serial, TokenType::Revoke, &[], &args.provisioner)
                        .await?
                        .token
                }
            };
            ca.revoke(&request, &NoPeer)?;
        }
    }

    eprintln!(
        "{} Certificate with serial number {} has been revoked.",
        "✔".green().bold(),
        request.serial
    );
    Ok(())
}
