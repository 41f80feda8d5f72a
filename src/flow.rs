//! OIDC login state machine.
//!
//! A login runs through strictly ordered steps:
//! `navigate -> [wait for IdP redirect] -> fill credentials -> submit ->
//! [mfa] -> [post-login prompts] -> wait for success -> done`.
//! Each step maps to an [`AuthPhase`] used to attribute failures.

use crate::{
    config::{MfaType, OidcConfig, ProbeConfig, SuccessConfig, UrlMatch},
    credentials::{Credentials, EnvSource},
    error::{AuthError, AuthPhase, PageError},
    idp::{HandlerContext, HandlerRegistry, IdpHandler, IdpType, MfaChallenge, SubmitOutcome},
    logging::Logger,
    page::{wait_visible, LoadState, Page},
    totp::TotpEngine,
};
use secrecy::SecretString;
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{timeout_at, Instant};

/// Error banners probed after a failed step, in order.
pub const ERROR_SELECTORS: [&str; 10] = [
    "#input-error",
    ".alert-error",
    "#kc-error-message",
    "#usernameError",
    "#passwordError",
    ".o-form-error-container",
    ".okta-form-infobox-error",
    r#"[role="alert"]"#,
    ".error-message",
    ".alert-danger",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowStep {
    Navigate,
    WaitForIdpRedirect,
    FillCredentials,
    SubmitForm,
    Mfa,
    PostLoginPrompts,
    WaitForSuccess,
    Done,
}

impl FlowStep {
    #[must_use]
    pub fn phase(self) -> AuthPhase {
        match self {
            Self::Navigate | Self::WaitForIdpRedirect => AuthPhase::Navigation,
            Self::FillCredentials | Self::SubmitForm => AuthPhase::Credentials,
            Self::Mfa => AuthPhase::Mfa,
            Self::PostLoginPrompts | Self::WaitForSuccess | Self::Done => AuthPhase::Callback,
        }
    }
}

/// Outcome of one login attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub success: bool,
    pub final_url: String,
    pub duration_ms: u64,
    pub phase: FlowStep,
    pub error: Option<String>,
}

impl AuthResult {
    pub(crate) fn done(page: &dyn Page, started: Instant) -> Self {
        Self {
            success: true,
            final_url: page.url(),
            duration_ms: elapsed_ms(started),
            phase: FlowStep::Done,
            error: None,
        }
    }
}

pub struct OidcFlow {
    config: OidcConfig,
    registry: Arc<HandlerRegistry>,
    env: Arc<dyn EnvSource>,
    totp: TotpEngine,
    logger: Logger,
}

impl OidcFlow {
    #[must_use]
    pub fn new(
        config: OidcConfig,
        registry: Arc<HandlerRegistry>,
        env: Arc<dyn EnvSource>,
        logger: Logger,
    ) -> Self {
        Self {
            config,
            registry,
            env,
            totp: TotpEngine::new(logger.child("totp")),
            logger,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Run one login attempt.
    ///
    /// # Errors
    /// Returns an [`AuthError`] tagged with the phase that failed, carrying the
    /// IdP's error banner text when one is visible.
    pub async fn execute(
        &self,
        page: &dyn Page,
        role: &str,
        credentials: &Credentials,
    ) -> Result<AuthResult, AuthError> {
        let started = Instant::now();
        let mut step = FlowStep::Navigate;

        self.logger.info(&format!(
            "starting OIDC login for role '{role}' as {}",
            credentials.username
        ));

        match self.run(page, role, credentials, started, &mut step).await {
            Ok(()) => {
                let result = AuthResult::done(page, started);
                self.logger.info(&format!(
                    "login for role '{role}' completed in {}ms at {}",
                    result.duration_ms, result.final_url
                ));
                Ok(result)
            }
            Err(mut err) => {
                if err.idp_response.is_none() {
                    if let Some(message) = detect_auth_error(page).await {
                        err = err.with_idp_response(message);
                    }
                }
                self.logger.error(&format!(
                    "login for role '{role}' failed at step {step:?} after {}ms: {}",
                    elapsed_ms(started),
                    err.message
                ));
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        page: &dyn Page,
        role: &str,
        credentials: &Credentials,
        started: Instant,
        step: &mut FlowStep,
    ) -> Result<(), AuthError> {
        let config = &self.config;
        let timeouts = config.timeouts;
        let deadline = started + Duration::from_millis(timeouts.login_flow_ms);
        let bounded = |step: FlowStep| Bounded {
            deadline,
            role,
            step,
            login_flow_ms: timeouts.login_flow_ms,
        };

        *step = FlowStep::Navigate;
        bounded(*step)
            .run(async {
                page.goto(&config.login_url, timeouts.idp_redirect_ms)
                    .await
                    .map_err(|e| AuthError::from_page(role, AuthPhase::Navigation, &e))
            })
            .await?;

        if !config.skip_idp_redirect {
            *step = FlowStep::WaitForIdpRedirect;
            bounded(*step)
                .run(async {
                    let redirect = match &config.idp_login_url {
                        Some(idp_url) => {
                            let pattern = UrlMatch::Contains(idp_url.clone());
                            page.wait_for_url(&pattern, timeouts.idp_redirect_ms).await
                        }
                        None => {
                            page.wait_for_load_state(
                                LoadState::DomContentLoaded,
                                timeouts.idp_redirect_ms,
                            )
                            .await
                        }
                    };
                    redirect.map_err(|e| AuthError::from_page(role, AuthPhase::Navigation, &e))
                })
                .await?;
        }

        let handler = self.handler_for(page);
        let selectors = match &config.idp_selectors {
            Some(overrides) => overrides.apply(handler.default_selectors()),
            None => handler.default_selectors(),
        };
        self.logger.debug(&format!(
            "using {} handler for role '{role}'",
            handler.idp_type().as_str()
        ));

        let ctx = HandlerContext {
            page,
            role,
            field_timeout_ms: config.field_timeout_ms,
            settle_ms: config.settle_ms,
            probe: config.probe,
            totp: self.totp,
            logger: self.logger.child("idp"),
        };

        *step = FlowStep::FillCredentials;
        bounded(*step)
            .run(handler.fill_credentials(&ctx, credentials, &selectors))
            .await?;

        *step = FlowStep::SubmitForm;
        bounded(*step)
            .run(async {
                if handler.submit_form(&ctx, &selectors).await? == SubmitOutcome::PasswordRequired {
                    page.fill(&selectors.password, credentials.password())
                        .await
                        .map_err(|e| AuthError::from_page(role, AuthPhase::Credentials, &e))?;
                    handler.submit_form(&ctx, &selectors).await?;
                }
                Ok::<(), AuthError>(())
            })
            .await?;

        if config.mfa.kind != MfaType::None {
            *step = FlowStep::Mfa;
            let secret = self.totp_secret(role)?;
            let challenge = MfaChallenge {
                config: &config.mfa,
                secret: secret.as_ref(),
            };
            bounded(*step)
                .run(handler.handle_mfa(&ctx, &challenge))
                .await?;
        }

        if handler.has_post_login_prompts() {
            *step = FlowStep::PostLoginPrompts;
            bounded(*step)
                .run(handler.handle_post_login_prompts(&ctx, &selectors))
                .await?;
        }

        *step = FlowStep::WaitForSuccess;
        let success_timeout = config.success.timeout.unwrap_or(timeouts.callback_ms);
        bounded(*step)
            .run(async {
                wait_for_success(page, &config.success, success_timeout)
                    .await
                    .map_err(|e| AuthError::from_page(role, AuthPhase::Callback, &e))
            })
            .await?;

        *step = FlowStep::Done;
        Ok(())
    }

    fn handler_for(&self, page: &dyn Page) -> Arc<dyn IdpHandler> {
        match self.config.idp_type {
            IdpType::Auto => self.registry.for_url(&page.url()),
            idp_type => self.registry.get(idp_type),
        }
    }

    fn totp_secret(&self, role: &str) -> Result<Option<SecretString>, AuthError> {
        if self.config.mfa.kind != MfaType::Totp {
            return Ok(None);
        }
        let variable = self.config.mfa.totp_secret_env.as_deref().ok_or_else(|| {
            AuthError::new(role, AuthPhase::Mfa, "mfa.totpSecretEnv is not configured")
                .with_remediation(format!(
                    "Set mfa.totpSecretEnv in the oidc overrides of role '{role}'"
                ))
        })?;
        TotpEngine::secret_from_env(self.env.as_ref(), variable)
            .map(Some)
            .map_err(|e| AuthError::from_mfa(role, &e))
    }

    /// Whether the page already shows an authenticated session.
    pub async fn is_session_valid(&self, page: &dyn Page) -> bool {
        session_matches(page, &self.config.success, self.config.probe).await
    }
}

/// Overall login deadline applied to one step.
struct Bounded<'a> {
    deadline: Instant,
    role: &'a str,
    step: FlowStep,
    login_flow_ms: u64,
}

impl Bounded<'_> {
    async fn run<T, F>(self, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        match timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::from_page(
                self.role,
                self.step.phase(),
                &PageError::timeout("the login flow", self.login_flow_ms),
            )),
        }
    }
}

/// Wait for the post-login page. With both a URL and a selector configured
/// whichever shows up first wins; with neither, wait for network idle.
///
/// # Errors
/// Returns the page error of the last wait that failed.
pub async fn wait_for_success(
    page: &dyn Page,
    success: &SuccessConfig,
    timeout_ms: u64,
) -> Result<(), PageError> {
    match (&success.url, &success.selector) {
        (Some(url), Some(selector)) => {
            let mut url_wait = page.wait_for_url(url, timeout_ms);
            let mut selector_wait = page.wait_for_selector(selector, timeout_ms);
            let mut url_pending = true;
            let mut selector_pending = true;
            // Both waits share one budget; a failed one leaves the other running.
            loop {
                let result = tokio::select! {
                    result = &mut url_wait, if url_pending => {
                        url_pending = false;
                        result
                    }
                    result = &mut selector_wait, if selector_pending => {
                        selector_pending = false;
                        result
                    }
                };
                match result {
                    Ok(()) => return Ok(()),
                    Err(e) if !url_pending && !selector_pending => return Err(e),
                    Err(_) => {}
                }
            }
        }
        (Some(url), None) => page.wait_for_url(url, timeout_ms).await,
        (None, Some(selector)) => page.wait_for_selector(selector, timeout_ms).await,
        (None, None) => {
            page.wait_for_load_state(LoadState::NetworkIdle, timeout_ms)
                .await
        }
    }
}

/// URL check plus a short selector probe. Without any success criteria the
/// session cannot be confirmed and counts as invalid.
pub async fn session_matches(page: &dyn Page, success: &SuccessConfig, probe: ProbeConfig) -> bool {
    if !success.has_criteria() {
        return false;
    }
    if let Some(url) = &success.url {
        if !url.matches(&page.url()) {
            return false;
        }
    }
    match &success.selector {
        Some(selector) => wait_visible(page, selector, probe).await,
        None => true,
    }
}

/// Text of the first visible IdP error banner, if any.
pub async fn detect_auth_error(page: &dyn Page) -> Option<String> {
    for selector in ERROR_SELECTORS {
        if !matches!(page.is_visible(selector).await, Ok(true)) {
            continue;
        }
        if let Ok(Some(text)) = page.text_content(selector).await {
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
