use super::{with_retry, AuthProvider, RetryPolicy};
use crate::{
    credentials::Credentials,
    error::AuthError,
    flow::AuthResult,
    logging::Logger,
    page::{BoxFuture, Page},
};
use tokio::time::Instant;

/// Application specific login sequence plugged into [`CustomProvider`].
pub trait CustomAuthFlow: Send + Sync {
    fn name(&self) -> &str;

    fn perform_login<'a>(
        &'a self,
        page: &'a dyn Page,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<(), AuthError>>;

    fn check_session_validity<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, bool>;

    fn perform_logout<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, Result<(), AuthError>>;
}

/// Adds the retry envelope and logging around a [`CustomAuthFlow`].
pub struct CustomProvider<F> {
    role: String,
    flow: F,
    retry: RetryPolicy,
    logger: Logger,
}

impl<F: CustomAuthFlow> CustomProvider<F> {
    #[must_use]
    pub fn new(role: &str, flow: F, retry: RetryPolicy, logger: Logger) -> Self {
        Self {
            role: role.to_string(),
            flow,
            retry,
            logger,
        }
    }

    async fn attempt(
        &self,
        page: &dyn Page,
        credentials: &Credentials,
    ) -> Result<AuthResult, AuthError> {
        let started = Instant::now();
        self.logger.debug(&format!(
            "running custom flow '{}' for role '{}'",
            self.flow.name(),
            self.role
        ));
        self.flow
            .perform_login(page, credentials)
            .await
            .map_err(|mut err| {
                err.role.clone_from(&self.role);
                err
            })?;
        Ok(AuthResult::done(page, started))
    }
}

impl<F: CustomAuthFlow> AuthProvider for CustomProvider<F> {
    fn name(&self) -> &str {
        self.flow.name()
    }

    fn role(&self) -> &str {
        &self.role
    }

    fn login<'a>(
        &'a self,
        page: &'a dyn Page,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<AuthResult, AuthError>> {
        Box::pin(async move {
            let result = with_retry(&self.retry, &self.role, self.logger, move |_| {
                self.attempt(page, credentials)
            })
            .await?;
            self.logger.info(&format!(
                "custom flow '{}' logged in role '{}' in {}ms",
                self.flow.name(),
                self.role,
                result.duration_ms
            ));
            Ok(result)
        })
    }

    fn is_session_valid<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, bool> {
        self.flow.check_session_validity(page)
    }

    fn logout<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async move {
            self.logger
                .info(&format!("logging out role '{}' via '{}'", self.role, self.flow.name()));
            self.flow.perform_logout(page).await
        })
    }
}
