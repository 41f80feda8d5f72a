use super::{
    await_push_approval, page_host, submit_totp, unsupported_mfa, HandlerContext, IdpHandler, IdpSelectors,
    IdpType, MfaChallenge,
};
use crate::{
    config::MfaType,
    error::{AuthError, AuthPhase},
    page::{first_visible, BoxFuture},
};

pub const USERNAME: &str = r#"input[name="identifier"], #okta-signin-username"#;
pub const PASSWORD: &str = r#"input[name="credentials.passcode"], #okta-signin-password"#;
pub const SUBMIT: &str = r#"input[type="submit"], #okta-signin-submit"#;
pub const OTP_INPUT: &str = r#"input[name="credentials.passcode"], input[name="answer"]"#;
pub const OTP_SUBMIT: &str = r#"input[type="submit"]"#;

/// Buttons that trigger an Okta Verify push.
pub const SEND_PUSH: [&str; 2] = [
    r#"a[data-se="okta_verify-push"]"#,
    r#"input[value="Send Push"]"#,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct OktaHandler;

impl IdpHandler for OktaHandler {
    fn idp_type(&self) -> IdpType {
        IdpType::Okta
    }

    fn default_selectors(&self) -> IdpSelectors {
        IdpSelectors {
            username: USERNAME.to_string(),
            password: PASSWORD.to_string(),
            submit: SUBMIT.to_string(),
            next: Some(SUBMIT.to_string()),
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
                MfaType::Totp => submit_totp(ctx, challenge, OTP_INPUT, OTP_SUBMIT).await,
                MfaType::Push => {
                    let idp_host = page_host(ctx.page);
                    if let Some(button) = first_visible(ctx.page, &SEND_PUSH).await {
                        ctx.page
                            .click(button)
                            .await
                            .map_err(|e| ctx.page_error(AuthPhase::Mfa, &e))?;
                    }
                    await_push_approval(ctx, challenge, idp_host).await
                }
                MfaType::Sms => Err(unsupported_mfa(ctx, IdpType::Okta, MfaType::Sms)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MfaConfig,
        idp::test_support::ctx,
        page::mock::{MockPage, Reaction},
    };

    #[tokio::test]
    async fn push_clicks_send_and_waits_for_redirect() {
        let page = MockPage::new("https://dev-1.okta.com/signin/verify/okta/push")
            .with_visible(SEND_PUSH[0])
            .on_click(
                SEND_PUSH[0],
                Reaction::navigate("https://app.example.com/callback?code=abc"),
            );
        let config = MfaConfig {
            kind: MfaType::Push,
            push_timeout_ms: Some(50),
            ..MfaConfig::default()
        };
        let challenge = MfaChallenge {
            config: &config,
            secret: None,
        };
        let context = ctx(&page);

        OktaHandler.handle_mfa(&context, &challenge).await.unwrap();
        assert_eq!(page.count("click:"), 1);
    }

    #[tokio::test]
    async fn totp_uses_configured_selectors() {
        let page = MockPage::new("https://dev-1.okta.com/signin/verify")
            .with_visible("#code")
            .with_visible("#verify");
        let config = MfaConfig {
            totp_input_selector: Some("#code".to_string()),
            totp_submit_selector: Some("#verify".to_string()),
            ..MfaConfig::totp("OKTA_TOTP")
        };
        let secret = secrecy::SecretString::from("JBSWY3DPEHPK3PXP".to_string());
        let challenge = MfaChallenge {
            config: &config,
            secret: Some(&secret),
        };
        let context = ctx(&page);

        OktaHandler.handle_mfa(&context, &challenge).await.unwrap();
        assert!(page.value("#code").is_some());
        assert_eq!(page.count("click:#verify"), 1);
    }

    #[test]
    fn has_no_post_login_prompts() {
        assert!(!OktaHandler.has_post_login_prompts());
    }
}
