//! chirp-totp: verifies two-factor codes against secrets held by the backend.

use anyhow::Result;
use clap::Parser;

use chirp_server::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    chirp_server::run_with_cli(Cli::parse()).await
}
