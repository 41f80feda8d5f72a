//! Identity-Provider handlers.
//!
//! Every supported IdP family implements [`IdpHandler`]. Handlers are looked
//! up by [`IdpType`] in a [`HandlerRegistry`] whose default arm is the
//! generic handler; callers may register their own handlers to cover other
//! providers or extra post-login prompts.

pub mod azure_ad;
pub mod generic;
pub mod keycloak;
pub mod okta;

pub use self::{
    azure_ad::AzureAdHandler, generic::GenericHandler, keycloak::KeycloakHandler,
    okta::OktaHandler,
};

use crate::{
    config::{MfaConfig, MfaType, ProbeConfig},
    credentials::Credentials,
    error::{AuthError, AuthPhase},
    logging::Logger,
    page::{settle, wait_visible, BoxFuture, Page},
    totp::TotpEngine,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};
use url::Url;

/// Codes are only submitted with at least this many seconds left in the window.
const TOTP_FRESHNESS_SECONDS: u64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdpType {
    Keycloak,
    AzureAd,
    Okta,
    Generic,
    /// Detect from the URL reached after the IdP redirect.
    #[default]
    Auto,
}

impl IdpType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keycloak => "keycloak",
            Self::AzureAd => "azure-ad",
            Self::Okta => "okta",
            Self::Generic => "generic",
            Self::Auto => "auto",
        }
    }
}

/// Guess the IdP family from a URL.
#[must_use]
pub fn detect_idp_type(current_url: &str) -> IdpType {
    let (host, path) = match Url::parse(current_url) {
        Ok(url) => (
            url.host_str().unwrap_or_default().to_lowercase(),
            url.path().to_lowercase(),
        ),
        Err(_) => (current_url.to_lowercase(), current_url.to_lowercase()),
    };

    if host.contains("okta.com") || host.contains("oktapreview.com") {
        IdpType::Okta
    } else if host.contains("login.microsoftonline.com")
        || host.contains("login.microsoft.com")
        || host.contains("login.live.com")
    {
        IdpType::AzureAd
    } else if path.contains("/auth/realms/")
        || path.contains("/realms/")
        || host.contains("keycloak")
    {
        IdpType::Keycloak
    } else {
        IdpType::Generic
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpSelectors {
    pub username: String,
    pub password: String,
    pub submit: String,
    /// Button that advances from the username page in two-step flows.
    pub next: Option<String>,
}

impl IdpSelectors {
    #[must_use]
    pub fn next_or_submit(&self) -> &str {
        self.next.as_deref().unwrap_or(&self.submit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorOverrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub submit: Option<String>,
    pub next: Option<String>,
}

impl SelectorOverrides {
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            username: other.username.clone().or_else(|| self.username.clone()),
            password: other.password.clone().or_else(|| self.password.clone()),
            submit: other.submit.clone().or_else(|| self.submit.clone()),
            next: other.next.clone().or_else(|| self.next.clone()),
        }
    }

    #[must_use]
    pub fn apply(&self, base: IdpSelectors) -> IdpSelectors {
        IdpSelectors {
            username: self.username.clone().unwrap_or(base.username),
            password: self.password.clone().unwrap_or(base.password),
            submit: self.submit.clone().unwrap_or(base.submit),
            next: self.next.clone().or(base.next),
        }
    }
}

/// Outcome of a form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// An empty password field is showing: the flow continues on a second page.
    PasswordRequired,
}

/// Everything a handler needs besides credentials and selectors.
pub struct HandlerContext<'a> {
    pub page: &'a dyn Page,
    pub role: &'a str,
    pub field_timeout_ms: u64,
    pub settle_ms: u64,
    pub probe: ProbeConfig,
    pub totp: TotpEngine,
    pub logger: Logger,
}

impl HandlerContext<'_> {
    pub(crate) fn error(&self, phase: AuthPhase, message: impl Into<String>) -> AuthError {
        AuthError::new(self.role, phase, message)
    }

    pub(crate) fn page_error(&self, phase: AuthPhase, err: &crate::error::PageError) -> AuthError {
        AuthError::from_page(self.role, phase, err)
    }
}

/// MFA configuration plus the already resolved TOTP secret.
pub struct MfaChallenge<'a> {
    pub config: &'a MfaConfig,
    pub secret: Option<&'a SecretString>,
}

pub trait IdpHandler: Send + Sync {
    fn idp_type(&self) -> IdpType;

    fn default_selectors(&self) -> IdpSelectors;

    fn fill_credentials<'a>(
        &'a self,
        ctx: &'a HandlerContext<'a>,
        credentials: &'a Credentials,
        selectors: &'a IdpSelectors,
    ) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(fill_credentials(ctx, credentials, selectors))
    }

    fn submit_form<'a>(
        &'a self,
        ctx: &'a HandlerContext<'a>,
        selectors: &'a IdpSelectors,
    ) -> BoxFuture<'a, Result<SubmitOutcome, AuthError>> {
        Box::pin(submit_form(ctx, selectors))
    }

    fn handle_mfa<'a>(
        &'a self,
        ctx: &'a HandlerContext<'a>,
        challenge: &'a MfaChallenge<'a>,
    ) -> BoxFuture<'a, Result<(), AuthError>>;

    /// Whether [`IdpHandler::handle_post_login_prompts`] does anything.
    fn has_post_login_prompts(&self) -> bool {
        false
    }

    fn handle_post_login_prompts<'a>(
        &'a self,
        _ctx: &'a HandlerContext<'a>,
        _selectors: &'a IdpSelectors,
    ) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Lookup table from [`IdpType`] to handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<IdpType, Arc<dyn IdpHandler>>,
    fallback: Arc<dyn IdpHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
            fallback: Arc::new(GenericHandler),
        };
        registry.register(Arc::new(KeycloakHandler));
        registry.register(Arc::new(AzureAdHandler));
        registry.register(Arc::new(OktaHandler));
        registry.register(Arc::new(GenericHandler));
        registry
    }
}

impl HandlerRegistry {
    /// Add or replace the handler for its [`IdpType`].
    pub fn register(&mut self, handler: Arc<dyn IdpHandler>) {
        self.handlers.insert(handler.idp_type(), handler);
    }

    #[must_use]
    pub fn get(&self, idp_type: IdpType) -> Arc<dyn IdpHandler> {
        self.handlers
            .get(&idp_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    #[must_use]
    pub fn for_url(&self, current_url: &str) -> Arc<dyn IdpHandler> {
        self.get(detect_idp_type(current_url))
    }
}

/// Shared credential entry: single page when the password field is already
/// showing, two-step otherwise.
pub async fn fill_credentials(
    ctx: &HandlerContext<'_>,
    credentials: &Credentials,
    selectors: &IdpSelectors,
) -> Result<(), AuthError> {
    let page = ctx.page;

    page.wait_for_selector(&selectors.username, ctx.field_timeout_ms)
        .await
        .map_err(|e| ctx.page_error(AuthPhase::Credentials, &e))?;
    page.fill(&selectors.username, &credentials.username)
        .await
        .map_err(|e| ctx.page_error(AuthPhase::Credentials, &e))?;

    if wait_visible(page, &selectors.password, ctx.probe).await {
        ctx.logger.debug("password field visible, single-page login");
    } else {
        ctx.logger.debug("password field hidden, submitting username first");
        page.click(selectors.next_or_submit())
            .await
            .map_err(|e| ctx.page_error(AuthPhase::Credentials, &e))?;
        page.wait_for_selector(&selectors.password, ctx.field_timeout_ms)
            .await
            .map_err(|e| ctx.page_error(AuthPhase::Credentials, &e))?;
    }

    page.fill(&selectors.password, credentials.password())
        .await
        .map_err(|e| ctx.page_error(AuthPhase::Credentials, &e))
}

/// Shared submission: click, settle, then look for an empty password field.
pub async fn submit_form(
    ctx: &HandlerContext<'_>,
    selectors: &IdpSelectors,
) -> Result<SubmitOutcome, AuthError> {
    let page = ctx.page;

    page.click(&selectors.submit)
        .await
        .map_err(|e| ctx.page_error(AuthPhase::Credentials, &e))?;
    settle(ctx.settle_ms).await;

    if matches!(page.is_visible(&selectors.password).await, Ok(true))
        && page
            .input_value(&selectors.password)
            .await
            .map_or(false, |value| value.is_empty())
    {
        ctx.logger
            .debug("empty password field after submit, continuing two-step flow");
        return Ok(SubmitOutcome::PasswordRequired);
    }

    Ok(SubmitOutcome::Submitted)
}

/// Fill and submit a TOTP code.
pub async fn submit_totp(
    ctx: &HandlerContext<'_>,
    challenge: &MfaChallenge<'_>,
    default_input: &str,
    default_submit: &str,
) -> Result<(), AuthError> {
    let page = ctx.page;
    let secret = challenge.secret.ok_or_else(|| {
        ctx.error(AuthPhase::Mfa, "TOTP MFA is configured but no secret was resolved")
            .with_remediation(format!(
                "Set mfa.totpSecretEnv for role '{}' and export that variable",
                ctx.role
            ))
    })?;
    let input = challenge
        .config
        .totp_input_selector
        .as_deref()
        .unwrap_or(default_input);
    let submit = challenge
        .config
        .totp_submit_selector
        .as_deref()
        .unwrap_or(default_submit);

    page.wait_for_selector(input, ctx.field_timeout_ms)
        .await
        .map_err(|e| ctx.page_error(AuthPhase::Mfa, &e))?;

    if ctx.totp.wait_for_fresh_window(TOTP_FRESHNESS_SECONDS).await {
        ctx.logger.debug("waited for a fresh TOTP window");
    }
    let code = ctx
        .totp
        .generate_secret(secret)
        .map_err(|e| AuthError::from_mfa(ctx.role, &e))?;

    page.fill(input, &code)
        .await
        .map_err(|e| ctx.page_error(AuthPhase::Mfa, &e))?;
    page.click(submit)
        .await
        .map_err(|e| ctx.page_error(AuthPhase::Mfa, &e))?;
    settle(ctx.settle_ms).await;

    ctx.logger
        .info(&format!("submitted TOTP code for role '{}'", ctx.role));
    Ok(())
}

/// Poll until the page leaves `idp_host`, the host the challenge was shown
/// on, i.e. the push was approved.
pub async fn await_push_approval(
    ctx: &HandlerContext<'_>,
    challenge: &MfaChallenge<'_>,
    idp_host: Option<String>,
) -> Result<(), AuthError> {
    let timeout_ms = challenge.config.push_timeout_ms();
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let interval = Duration::from_millis(ctx.probe.poll_interval_ms.max(1));

    ctx.logger.info(&format!(
        "waiting up to {timeout_ms}ms for push approval for role '{}'",
        ctx.role
    ));

    loop {
        if page_host(ctx.page) != idp_host {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ctx
                .error(
                    AuthPhase::Mfa,
                    format!("timeout of {timeout_ms}ms exceeded waiting for push approval"),
                )
                .with_remediation("Approve the push notification on the enrolled device, or configure TOTP for automated runs"));
        }
        sleep(interval).await;
    }
}

/// Lowercased host of the page's current URL.
#[must_use]
pub fn page_host(page: &dyn Page) -> Option<String> {
    Url::parse(&page.url())
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
}

/// Fail for MFA types a handler cannot complete.
pub fn unsupported_mfa(ctx: &HandlerContext<'_>, idp: IdpType, kind: MfaType) -> AuthError {
    let kind_name = match kind {
        MfaType::Totp => "totp",
        MfaType::Push => "push",
        MfaType::Sms => "sms",
        MfaType::None => "none",
    };
    ctx.error(
        AuthPhase::Mfa,
        format!("MFA type '{kind_name}' is not supported for {}", idp.as_str()),
    )
    .with_remediation(format!(
        "Configure TOTP instead of {} for role '{}' (mfa.type = \"totp\")",
        kind_name.to_uppercase(),
        ctx.role
    ))
}
