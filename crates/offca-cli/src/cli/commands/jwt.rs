//! `offca crypto jwt sign` - sign a JSON payload.

use std::io::Read;

use anyhow::{Context as _, Result};
use chrono::Utc;
use tracing::debug;

use offca::jwt::{self, KeySource, SignOptions};
use offca::OffcaError;

use super::Context;
use crate::cli::args::JwtSignArgs;

pub async fn sign(ctx: Context, args: JwtSignArgs) -> Result<()> {
    // Flags first: nothing is read until they are consistent.
    let source = KeySource::from_flags(args.key.clone(), args.jwks.clone(), args.kid.as_deref())?;
    if args.payload.len() > 1 {
        return Err(OffcaError::Usage(format!(
            "too many positional arguments were provided: expected at most 1, got {}",
            args.payload.len()
        ))
        .into());
    }

    let options = SignOptions {
        alg: args.alg,
        kid: args.kid,
        issuer: args.iss,
        audience: args.aud,
        subject: args.sub,
        expiry: args.exp,
        not_before: args.nbf,
        issued_at: args.iat,
        jti: args.jti,
        subtle: args.subtle,
        no_kid: args.no_kid,
    };
    options.check(Utc::now())?;

    let payload = read_payload(args.payload.first().map(String::as_str))?;
    let payload = jwt::parse_payload(&payload)?;

    let secrets = ctx.secrets();
    let key = jwt::load_signing_key(&source, secrets.as_ref())?;
    let token = jwt::sign_payload(&payload, &key, &options)?;
    println!("{token}");
    Ok(())
}

/// Payload bytes from a file, `-`, or a piped stdin; nothing means empty.
fn read_payload(source: Option<&str>) -> Result<Vec<u8>> {
    match source {
        Some("-") => read_stdin(),
        Some(path) => std::fs::read(path).with_context(|| format!("error reading {path}")),
        None if stdin_has_payload() => read_stdin(),
        None => {
            debug!("no payload given, signing an empty object");
            Ok(Vec::new())
        }
    }
}

/// Stdin is a pipe or a non-empty file. An inherited terminal, socket or
/// empty descriptor is never read, so it cannot block.
#[cfg(unix)]
fn stdin_has_payload() -> bool {
    use std::os::unix::fs::FileTypeExt;

    std::fs::metadata("/dev/stdin").is_ok_and(|meta| {
        let kind = meta.file_type();
        kind.is_fifo() || (kind.is_file() && meta.len() > 0)
    })
}

#[cfg(not(unix))]
fn stdin_has_payload() -> bool {
    use std::io::IsTerminal;

    !std::io::stdin().is_terminal()
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut data = Vec::new();
    std::io::stdin()
        .read_to_end(&mut data)
        .context("error reading payload from stdin")?;
    Ok(data)
}
