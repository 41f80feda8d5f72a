//! Time-based one-time codes for MFA challenges.

use crate::{credentials::EnvSource, credentials::non_empty_var, error::MfaError, logging::Logger};
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use totp_rs::{Algorithm, Secret, TOTP};

pub const DEFAULT_STEP_SECONDS: u64 = 30;
pub const DIGITS: usize = 6;

/// Slack after a window boundary before a fresh code is used.
const WINDOW_MARGIN_MS: u64 = 100;

/// Codes are accepted one window either side of the current one.
const SKEW: u8 = 1;

#[derive(Debug, Clone, Copy)]
pub struct TotpEngine {
    step: u64,
    logger: Logger,
}

impl Default for TotpEngine {
    fn default() -> Self {
        Self::new(Logger::new("totp"))
    }
}

impl TotpEngine {
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        Self {
            step: DEFAULT_STEP_SECONDS,
            logger,
        }
    }

    #[must_use]
    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step.max(1);
        self
    }

    /// Current code for `secret`.
    ///
    /// # Errors
    /// Returns an error if the secret is not base32 or the clock is before the epoch.
    pub fn generate(&self, secret: &str) -> Result<String, MfaError> {
        self.generate_at(secret, unix_now()?)
    }

    /// # Errors
    /// Returns an error if the secret is not base32.
    pub fn generate_at(&self, secret: &str, unix_seconds: u64) -> Result<String, MfaError> {
        Ok(self.totp(secret)?.generate(unix_seconds))
    }

    #[must_use]
    pub fn verify(&self, code: &str, secret: &str) -> bool {
        let Ok(now) = unix_now() else {
            return false;
        };
        self.totp(secret)
            .map_or(false, |totp| totp.check(code.trim(), now))
    }

    #[must_use]
    pub fn time_until_next_window(&self) -> u64 {
        unix_now().map_or(self.step, |now| seconds_until_next_window_at(now, self.step))
    }

    /// Milliseconds left in the current window.
    #[must_use]
    pub fn millis_until_next_window(&self) -> u64 {
        unix_now_millis().map_or(self.step.saturating_mul(1_000), |now| {
            millis_until_next_window_at(now, self.step)
        })
    }

    /// Sleep into the next window when fewer than `threshold_seconds` remain in
    /// the current one. Returns whether it waited.
    pub async fn wait_for_fresh_window(&self, threshold_seconds: u64) -> bool {
        let remaining_ms = self.millis_until_next_window();
        if remaining_ms >= threshold_seconds.saturating_mul(1_000) {
            return false;
        }

        self.logger.debug(&format!(
            "only {remaining_ms}ms left in TOTP window, waiting for the next one"
        ));
        sleep(Duration::from_millis(remaining_ms + WINDOW_MARGIN_MS)).await;
        true
    }

    /// Read a TOTP secret from the environment variable `variable`.
    ///
    /// # Errors
    /// Returns [`MfaError::SecretMissing`] if the variable is unset or empty.
    pub fn secret_from_env(env: &dyn EnvSource, variable: &str) -> Result<SecretString, MfaError> {
        non_empty_var(env, variable)
            .map(SecretString::from)
            .ok_or_else(|| MfaError::SecretMissing(variable.to_string()))
    }

    /// Generate a code from a secret held in a [`SecretString`].
    ///
    /// # Errors
    /// Returns an error if the secret is not base32 or the clock is unusable.
    pub fn generate_secret(&self, secret: &SecretString) -> Result<String, MfaError> {
        self.generate(secret.expose_secret())
    }

    fn totp(&self, secret: &str) -> Result<TOTP, MfaError> {
        let bytes = Secret::Encoded(normalize_secret(secret))
            .to_bytes()
            .map_err(|e| MfaError::InvalidSecret(format!("{e:?}")))?;

        if bytes.is_empty() {
            return Err(MfaError::InvalidSecret("secret is empty".to_string()));
        }

        // label doesn't matter for generation
        Ok(TOTP::new_unchecked(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            self.step,
            bytes,
            None,
            "authstate".to_string(),
        ))
    }
}

/// Strip whitespace and padding, uppercase for base32 decoding.
#[must_use]
pub fn normalize_secret(secret: &str) -> String {
    secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect::<String>()
        .to_uppercase()
}

#[must_use]
pub fn seconds_until_next_window_at(unix_seconds: u64, step: u64) -> u64 {
    let step = step.max(1);
    step - unix_seconds % step
}

/// Milliseconds from `unix_millis` to the start of the next window.
#[must_use]
pub fn millis_until_next_window_at(unix_millis: u64, step: u64) -> u64 {
    let step_ms = step.max(1).saturating_mul(1_000);
    step_ms - unix_millis % step_ms
}

fn unix_now_millis() -> Result<u64, MfaError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .map_err(|e| MfaError::Clock(e.to_string()))
}

fn unix_now() -> Result<u64, MfaError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| MfaError::Clock(e.to_string()))
}
