//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;

use anyhow::Result;
use args::{CaCommands, Cli, Commands, CryptoCommands, JwtCommands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Route logs to stderr so stdout carries only command output.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Run the CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load()?;
    let password_file = cli.password_file.or_else(|| config.password_file.clone());
    let ctx = commands::Context {
        config,
        password_file,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Crypto(crypto) => match crypto.command {
            CryptoCommands::Jwt(jwt) => match jwt.command {
                JwtCommands::Sign(args) => commands::jwt::sign(ctx, args).await,
            },
        },
        Commands::Ca(ca) => {
            let ca_config = ca.ca_config;
            match ca.command {
                CaCommands::Init(args) => commands::init::execute(ctx, args).await,
                CaCommands::Token(args) => commands::token::execute(ctx, ca_config, args).await,
                CaCommands::Certificate(args) => {
                    commands::certificate::execute(ctx, ca_config, args).await
                }
                CaCommands::Sign(args) => commands::sign::execute(ctx, ca_config, args).await,
                CaCommands::Renew(args) => commands::renew::execute(ctx, ca_config, args).await,
                CaCommands::Revoke(args) => commands::revoke::execute(ctx, ca_config, args).await,
            }
        }
    }
}
