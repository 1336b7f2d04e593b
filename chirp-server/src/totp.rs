//! Time-based one-time password checks (RFC 6238).

use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("stored secret is not valid base32: {0}")]
    InvalidSecret(String),
}

/// Verification parameters. Defaults: SHA-1, 6 digits, 30 s step, one
/// step of tolerance either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpVerifier {
    pub digits: usize,
    pub step: u64,
    pub skew: u8,
}

impl Default for TotpVerifier {
    fn default() -> Self {
        Self {
            digits: 6,
            step: 30,
            skew: 1,
        }
    }
}

/// Authenticator apps show secrets grouped, lower-cased or padded.
fn normalize_secret(secret: &str) -> String {
    secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=' && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl TotpVerifier {
    fn totp(&self, secret: &str) -> Result<TOTP, VerifyError> {
        let bytes = Secret::Encoded(normalize_secret(secret))
            .to_bytes()
            .map_err(|e| VerifyError::InvalidSecret(format!("{e:?}")))?;
        if bytes.is_empty() {
            return Err(VerifyError::InvalidSecret("empty secret".into()));
        }
        Ok(TOTP::new_unchecked(
            Algorithm::SHA1,
            self.digits,
            self.skew,
            self.step,
            bytes,
        ))
    }

    /// Whether `token` is valid for `secret` at unix time `now`.
    pub fn verify(&self, secret: &str, token: &str, now: u64) -> Result<bool, VerifyError> {
        let totp = self.totp(secret)?;
        let token = token.trim();
        if token.len() != self.digits || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        Ok(totp.check(token, now))
    }

    /// The code for `secret` at unix time `now`.
    pub fn generate(&self, secret: &str, now: u64) -> Result<String, VerifyError> {
        Ok(self.totp(secret)?.generate(now))
    }
}
