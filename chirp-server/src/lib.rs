//! Library entrypoint for chirp-server so tests (and other binaries) can
//! build the router without binding a socket.

pub mod cli;
pub mod config;
pub mod ratelimit;
pub mod secrets;
pub mod server;
pub mod totp;

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::{StoreConfig, TotpConfig};
use crate::secrets::{service_log, MemorySecretStore, RestSecretStore, SecretStore};

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Build the secret store named by the config.
pub fn open_store(config: &TotpConfig) -> Result<Arc<dyn SecretStore>> {
    let store: Arc<dyn SecretStore> = match &config.store {
        StoreConfig::Rest(backend) => Arc::new(RestSecretStore::new(backend, service_log())?),
        StoreConfig::File(path) => Arc::new(MemorySecretStore::from_file(path)?),
        StoreConfig::Unconfigured => {
            warn!("missing backend url or service-role key, verification requests will fail");
            Arc::new(RestSecretStore::unconfigured())
        }
    };
    Ok(store)
}

/// Run the verification service using CLI args (parsed by the caller).
pub async fn run_with_cli(cli: cli::Cli) -> Result<()> {
    init_tracing(cli.verbose)?;

    let cfg = TotpConfig::from_cli(&cli)?;
    let store = open_store(&cfg)?;

    server::serve(cfg, store).await
}
