use super::{
    submit_totp, unsupported_mfa, HandlerContext, IdpHandler, IdpSelectors, IdpType, MfaChallenge,
};
use crate::{
    config::MfaType,
    error::{AuthError, AuthPhase},
    page::{first_visible, settle, BoxFuture},
};

pub const USERNAME: &str = "#username";
pub const PASSWORD: &str = "#password";
pub const SUBMIT: &str = "#kc-login";
pub const OTP_INPUT: &str = "#otp";
pub const PAGE_TITLE: &str = "#kc-page-title";

/// Forms Keycloak shows for required actions.
pub const REQUIRED_ACTION_FORMS: [&str; 5] = [
    "#kc-passwd-update-form",
    "#kc-update-profile-form",
    "#kc-update-email-form",
    "#kc-totp-settings-form",
    "#kc-terms-text",
];

const REQUIRED_ACTION_PATH: &str = "required-action";

#[derive(Debug, Clone, Copy, Default)]
pub struct KeycloakHandler;

impl IdpHandler for KeycloakHandler {
    fn idp_type(&self) -> IdpType {
        IdpType::Keycloak
    }

    fn default_selectors(&self) -> IdpSelectors {
        IdpSelectors {
            username: USERNAME.to_string(),
            password: PASSWORD.to_string(),
            submit: SUBMIT.to_string(),
            next: None,
        }
    }

    fn handle_mfa<'a>(
        &'a self,
        ctx: &'a HandlerContext<'a>,
        challenge: &'a MfaChallenge<'a>,
    ) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async move {
            match challenge.config.kind {
                MfaType::None => Ok(()),
                MfaType::Totp => submit_totp(ctx, challenge, OTP_INPUT, SUBMIT).await,
                kind => Err(unsupported_mfa(ctx, IdpType::Keycloak, kind)),
            }
        })
    }

    fn has_post_login_prompts(&self) -> bool {
        true
    }

    /// Required actions (update password, verify profile, configure OTP, ...)
    /// cannot be completed headlessly, so they fail the login.
    fn handle_post_login_prompts<'a>(
        &'a self,
        ctx: &'a HandlerContext<'a>,
        _selectors: &'a IdpSelectors,
    ) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async move {
            settle(ctx.settle_ms).await;

            let on_action_url = ctx.page.url().contains(REQUIRED_ACTION_PATH);
            let form = first_visible(ctx.page, &REQUIRED_ACTION_FORMS).await;
            if !on_action_url && form.is_none() {
                return Ok(());
            }

            let title = ctx
                .page
                .text_content(PAGE_TITLE)
                .await
                .ok()
                .flatten()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .or_else(|| form.map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());

            ctx.logger.error(&format!(
                "Keycloak required action '{title}' pending for role '{}'",
                ctx.role
            ));

            Err(ctx
                .error(
                    AuthPhase::Callback,
                    format!("Keycloak requires action '{title}' which cannot be completed headlessly"),
                )
                .with_remediation(format!(
                    "Log in once interactively as the user of role '{}' and complete '{title}', or remove the required action in the Keycloak admin console",
                    ctx.role
                )))
        })
    }
}
