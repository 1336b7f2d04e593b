use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// CLI for the two-factor verification service.
#[derive(Debug, Clone, Parser)]
#[command(name = "chirp-totp", about = "TOTP verification endpoint for chirp")]
pub struct Cli {
    /// Listen address for the HTTP endpoint
    #[arg(long, env = "CHIRP_TOTP_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Backend project URL holding the `user_2fa` table
    #[arg(long, env = "CHIRP_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Service-role key used to read secrets (bypasses row-level security)
    #[arg(long, env = "CHIRP_SERVICE_ROLE_KEY", hide_env_values = true)]
    pub service_role_key: Option<String>,

    /// Timeout for backend requests, in seconds
    #[arg(long, env = "CHIRP_BACKEND_TIMEOUT", default_value = "10")]
    pub backend_timeout_secs: u64,

    /// Serve secrets from a local YAML map (`user_id: BASE32SECRET`) instead
    /// of the backend. Meant for local runs.
    #[arg(long, env = "CHIRP_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // Rate limiting options
    // ─────────────────────────────────────────────────────────────────────────

    /// Enable per-user rate limiting of verification attempts.
    #[arg(long, env = "CHIRP_RATE_LIMIT", default_value = "true", action = ArgAction::Set)]
    pub rate_limit: bool,

    /// Attempts a user may make in a burst.
    #[arg(long, env = "CHIRP_RATE_BURST", default_value = "5")]
    pub rate_burst: u32,

    /// Sustained attempts per second once the burst is spent.
    #[arg(long, env = "CHIRP_RATE_PER_SEC", default_value = "0.2")]
    pub rate_per_sec: f64,
}
