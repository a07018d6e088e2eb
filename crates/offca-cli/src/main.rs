//! offca - offline certificate authority and one-time token tool.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match offca_cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("offca: {e:#}");
            ExitCode::FAILURE
        }
    }
}
