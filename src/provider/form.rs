use super::{with_retry, AuthProvider, RetryPolicy};
use crate::{
    config::FormConfig,
    credentials::Credentials,
    error::{AuthError, AuthPhase, PageError},
    flow::{detect_auth_error, session_matches, wait_for_success, AuthResult},
    logging::Logger,
    page::{BoxFuture, Page},
};
use tokio::time::Instant;
use url::Url;

/// Paths tried, relative to the login URL's origin, when no logout URL is set.
pub const CONVENTIONAL_LOGOUT_PATHS: [&str; 4] =
    ["/logout", "/signout", "/auth/logout", "/api/auth/logout"];

/// Plain username/password form on the application itself, no IdP.
pub struct FormProvider {
    role: String,
    config: FormConfig,
    retry: RetryPolicy,
    logger: Logger,
}

impl FormProvider {
    #[must_use]
    pub fn new(role: &str, config: FormConfig, retry: RetryPolicy, logger: Logger) -> Self {
        Self {
            role: role.to_string(),
            config,
            retry,
            logger,
        }
    }

    fn page_error(&self, phase: AuthPhase) -> impl Fn(PageError) -> AuthError + '_ {
        move |e| AuthError::from_page(&self.role, phase, &e)
    }

    async fn attempt(
        &self,
        page: &dyn Page,
        credentials: &Credentials,
    ) -> Result<AuthResult, AuthError> {
        let started = Instant::now();
        match self.run(page, credentials).await {
            Ok(()) => Ok(AuthResult::done(page, started)),
            Err(err) => match detect_auth_error(page).await {
                Some(message) if err.idp_response.is_none() => Err(err.with_idp_response(message)),
                _ => Err(err),
            },
        }
    }

    async fn run(&self, page: &dyn Page, credentials: &Credentials) -> Result<(), AuthError> {
        let config = &self.config;

        page.goto(&config.login_url, config.navigation_timeout_ms)
            .await
            .map_err(self.page_error(AuthPhase::Navigation))?;

        page.wait_for_selector(&config.username_selector, config.field_timeout_ms)
            .await
            .map_err(self.page_error(AuthPhase::Credentials))?;
        page.fill(&config.username_selector, &credentials.username)
            .await
            .map_err(self.page_error(AuthPhase::Credentials))?;
        page.fill(&config.password_selector, credentials.password())
            .await
            .map_err(self.page_error(AuthPhase::Credentials))?;
        page.click(&config.submit_selector)
            .await
            .map_err(self.page_error(AuthPhase::Credentials))?;

        wait_for_success(page, &config.success, config.success.timeout_ms())
            .await
            .map_err(self.page_error(AuthPhase::Callback))
    }

    /// Configured logout URL first, then the conventional paths on the login
    /// URL's origin.
    #[must_use]
    pub fn logout_candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = self.config.logout_url.iter().cloned().collect();
        if let Ok(base) = Url::parse(&self.config.login_url) {
            candidates.extend(
                CONVENTIONAL_LOGOUT_PATHS
                    .iter()
                    .filter_map(|path| base.join(path).ok())
                    .map(String::from),
            );
        }
        candidates.dedup();
        candidates
    }

    async fn logout_inner(&self, page: &dyn Page) -> Result<(), AuthError> {
        // Without success criteria a logout URL cannot be confirmed.
        if !self.config.success.has_criteria() {
            if let Some(url) = &self.config.logout_url {
                if let Err(e) = page.goto(url, self.config.navigation_timeout_ms).await {
                    self.logger.debug(&format!("{url}: {e}"));
                }
            }
            self.logger
                .info(&format!("clearing cookies to log out role '{}'", self.role));
            return page
                .clear_cookies()
                .await
                .map_err(self.page_error(AuthPhase::Callback));
        }

        for candidate in self.logout_candidates() {
            match page.goto(&candidate, self.config.navigation_timeout_ms).await {
                Ok(()) if !session_matches(page, &self.config.success, self.config.probe).await => {
                    self.logger
                        .info(&format!("role '{}' logged out via {candidate}", self.role));
                    return Ok(());
                }
                Ok(()) => {
                    self.logger
                        .debug(&format!("{candidate} left the session of '{}' intact", self.role));
                }
                Err(e) => self.logger.debug(&format!("{candidate}: {e}")),
            }
        }

        self.logger.warn(&format!(
            "no logout URL worked for role '{}', clearing cookies",
            self.role
        ));
        page.clear_cookies()
            .await
            .map_err(self.page_error(AuthPhase::Callback))
    }
}

impl AuthProvider for FormProvider {
    fn name(&self) -> &str {
        "form"
    }

    fn role(&self) -> &str {
        &self.role
    }

    fn login<'a>(
        &'a self,
        page: &'a dyn Page,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<AuthResult, AuthError>> {
        Box::pin(with_retry(&self.retry, &self.role, self.logger, move |_| {
            self.attempt(page, credentials)
        }))
    }

    fn is_session_valid<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, bool> {
        Box::pin(session_matches(page, &self.config.success, self.config.probe))
    }

    fn logout<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(self.logout_inner(page))
    }
}
