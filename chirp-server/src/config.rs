use std::path::PathBuf;

use anyhow::{bail, Result};
use chirp_core::BackendConfig;

use crate::cli::Cli;
use crate::ratelimit::RateLimitConfig;
use crate::totp::TotpVerifier;

/// Where secrets are read from.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Rest(BackendConfig),
    File(PathBuf),
    /// Backend URL or key missing; every lookup fails with 500.
    Unconfigured,
}

/// Runtime configuration derived from CLI/env.
#[derive(Debug, Clone)]
pub struct TotpConfig {
    pub listen_addr: String,
    pub store: StoreConfig,
    pub rate_limit: RateLimitConfig,
    pub verifier: TotpVerifier,
}

impl TotpConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let store = match (&cli.secrets_file, &cli.backend_url, &cli.service_role_key) {
            (Some(path), _, _) => StoreConfig::File(path.clone()),
            (None, Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                let url = url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    bail!("backend url must be an http(s) URL, got {url:?}");
                }
                StoreConfig::Rest(BackendConfig {
                    url: url.to_string(),
                    api_key: key.trim().to_string(),
                    timeout_secs: cli.backend_timeout_secs,
                })
            }
            _ => StoreConfig::Unconfigured,
        };

        let refills = cli.rate_per_sec.is_finite() && cli.rate_per_sec > 0.0;
        if cli.rate_limit && (cli.rate_burst == 0 || !refills) {
            bail!("rate limit needs a burst of at least 1 and a positive refill rate");
        }

        Ok(Self {
            listen_addr: cli.listen_addr.clone(),
            store,
            rate_limit: RateLimitConfig {
                burst: cli.rate_burst,
                refill_rate: cli.rate_per_sec,
                enabled: cli.rate_limit,
            },
            verifier: TotpVerifier::default(),
        })
    }
}
