//! Login strategies.
//!
//! Every provider wraps its underlying login sequence in the same retry
//! envelope ([`with_retry`]): transient failures (timeouts, network errors)
//! are retried with exponential backoff, anything else surfaces at once.

pub mod custom;
pub mod form;
pub mod oidc;
pub mod token;

pub use self::{
    custom::{CustomAuthFlow, CustomProvider},
    form::FormProvider,
    oidc::OidcProvider,
    token::{TokenProvider, TokenRecord},
};

use crate::{
    config::{AuthConfig, ProviderKind},
    credentials::{Credentials, EnvSource},
    error::{AuthError, ConfigError},
    flow::AuthResult,
    idp::HandlerRegistry,
    logging::Logger,
    page::{BoxFuture, Page},
};
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::sleep;

pub trait AuthProvider: Send + Sync {
    /// Strategy name used in logs.
    fn name(&self) -> &str;

    fn role(&self) -> &str;

    fn login<'a>(
        &'a self,
        page: &'a dyn Page,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<AuthResult, AuthError>>;

    fn is_session_valid<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, bool>;

    fn logout<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, Result<(), AuthError>>;

    fn supports_refresh(&self) -> bool {
        false
    }

    /// Try to extend the current session without a new login.
    fn refresh_session<'a>(&'a self, _page: &'a dyn Page) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry that follows attempt `attempt` (0-based):
    /// `min(initial * multiplier^attempt, max)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error or the
/// policy is exhausted. The closure receives the 0-based attempt number.
///
/// # Errors
/// Non-retryable errors are returned as is (with a remediation filled in).
/// After the last retry a consolidated error "login failed after N attempts"
/// carrying the last phase and message is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    role: &str,
    logger: Logger,
    mut attempt: F,
) -> Result<T, AuthError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AuthError>>,
{
    let attempts = policy.max_attempts();
    let mut current = 0;

    loop {
        let err = match attempt(current).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            logger.error(&format!(
                "role '{role}' failed during {} (not retryable): {}",
                err.phase, err.message
            ));
            return Err(with_default_remediation(err, role));
        }

        if current + 1 >= attempts {
            logger.error(&format!(
                "role '{role}' failed after {attempts} attempts, last phase {}",
                err.phase
            ));
            return Err(consolidate(err, role, attempts));
        }

        let delay = policy.delay_for(current);
        logger.warn(&format!(
            "attempt {}/{attempts} for role '{role}' failed during {}: {}; retrying in {}ms",
            current + 1,
            err.phase,
            err.message,
            delay.as_millis()
        ));
        sleep(delay).await;
        current += 1;
    }
}

fn with_default_remediation(err: AuthError, role: &str) -> AuthError {
    if err.remediation.is_some() {
        return err;
    }
    let remediation = err.phase.remediation_for(role);
    err.with_remediation(remediation)
}

fn consolidate(err: AuthError, role: &str, attempts: u32) -> AuthError {
    let remediation = err
        .remediation
        .clone()
        .unwrap_or_else(|| err.phase.remediation_for(role));
    AuthError {
        message: format!("login failed after {attempts} attempts: {}", err.message),
        role: role.to_string(),
        phase: err.phase,
        idp_response: err.idp_response,
        remediation: Some(remediation),
        cause: err.cause,
    }
}

/// Shared collaborators handed to every provider built from config.
#[derive(Clone)]
pub struct ProviderDeps {
    pub registry: Arc<HandlerRegistry>,
    pub env: Arc<dyn EnvSource>,
    pub logger: Logger,
}

impl ProviderDeps {
    #[must_use]
    pub fn new(env: Arc<dyn EnvSource>, logger: Logger) -> Self {
        Self {
            registry: Arc::new(HandlerRegistry::default()),
            env,
            logger,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }
}

/// Build the provider configured for `role`.
///
/// # Errors
/// Returns an error if the provider section is missing, or for
/// [`ProviderKind::Custom`], which has to be constructed in code.
pub fn build_provider(
    config: &AuthConfig,
    role: &str,
    deps: &ProviderDeps,
) -> Result<Box<dyn AuthProvider>, ConfigError> {
    let retry = config.retry;
    Ok(match config.provider {
        ProviderKind::Oidc => Box::new(OidcProvider::new(
            role,
            config.oidc_for(role)?,
            retry,
            deps,
        )),
        ProviderKind::Form => {
            let form = config
                .form
                .clone()
                .ok_or_else(|| ConfigError::Invalid("form section is missing".to_string()))?;
            Box::new(FormProvider::new(role, form, retry, deps.logger.child("form")))
        }
        ProviderKind::Token => {
            let token = config
                .token
                .clone()
                .ok_or_else(|| ConfigError::Invalid("token section is missing".to_string()))?;
            Box::new(TokenProvider::new(role, token, retry, deps.logger.child("token")))
        }
        ProviderKind::Custom => {
            return Err(ConfigError::Invalid(format!(
                "provider 'custom' for role '{role}' must be registered in code"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthPhase;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            backoff_multiplier: 2.0,
            max_delay_ms: 5,
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(10_000));
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn retry_policy_deserializes_partially() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"maxRetries": 5}"#).unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay_ms, 1_000);
    }

    #[tokio::test]
    async fn timeouts_are_retried_until_exhausted() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(), "admin", Logger::new("test"), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(AuthError::new(
                    "admin",
                    AuthPhase::Navigation,
                    "timeout of 30000ms exceeded while waiting for /auth/realms",
                ))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.message.contains("after 3 attempts"));
        assert_eq!(err.phase, AuthPhase::Navigation);
        assert!(err.remediation.is_some());
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(), "admin", Logger::new("test"), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(
                    AuthError::new("admin", AuthPhase::Callback, "timeout of 10ms exceeded")
                        .with_idp_response("Invalid username or password."),
                )
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            err.idp_response.as_deref(),
            Some("Invalid username or password.")
        );
        assert!(err.remediation.is_some());
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let value = with_retry(&fast(), "admin", Logger::new("test"), |attempt| async move {
            if attempt == 0 {
                Err(AuthError::new(
                    "admin",
                    AuthPhase::Navigation,
                    "net::ERR_CONNECTION_RESET",
                ))
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn custom_provider_cannot_come_from_config() {
        let config = AuthConfig {
            provider: ProviderKind::Custom,
            ..AuthConfig::default()
        };
        let deps = ProviderDeps::new(
            Arc::new(std::collections::HashMap::<String, String>::new()),
            Logger::new("test"),
        );
        assert!(build_provider(&config, "admin", &deps).is_err());
    }
}
