use super::{
    await_push_approval, page_host, submit_totp, unsupported_mfa, HandlerContext, IdpHandler, IdpSelectors,
    IdpType, MfaChallenge,
};
use crate::{
    config::MfaType,
    error::{AuthError, AuthPhase},
    page::{first_visible, settle, wait_visible, BoxFuture},
};

pub const USERNAME: &str = r#"input[name="loginfmt"]"#;
pub const PASSWORD: &str = r#"input[name="passwd"]"#;
pub const SUBMIT: &str = "#idSIButton9";
pub const OTP_INPUT: &str = r#"input[name="otc"]"#;
pub const OTP_SUBMIT: &str = "#idSubmit_SAOTCC_Continue";

/// Markers of the "Stay signed in?" (KMSI) interstitial.
pub const STAY_SIGNED_IN_MARKERS: [&str; 3] = [
    "#KmsiCheckboxField",
    "#KmsiDescription",
    r#"input[name="DontShowAgain"]"#,
];
/// "No" on the KMSI prompt.
pub const STAY_SIGNED_IN_DECLINE: &str = "#idBtn_Back";

#[derive(Debug, Clone, Copy, Default)]
pub struct AzureAdHandler;

impl IdpHandler for AzureAdHandler {
    fn idp_type(&self) -> IdpType {
        IdpType::AzureAd
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
                MfaType::Push => await_push_approval(ctx, challenge, page_host(ctx.page)).await,
                MfaType::Sms => Err(unsupported_mfa(ctx, IdpType::AzureAd, MfaType::Sms)),
            }
        })
    }

    fn has_post_login_prompts(&self) -> bool {
        true
    }

    /// Dismiss the "Stay signed in?" prompt when it shows up.
    fn handle_post_login_prompts<'a>(
        &'a self,
        ctx: &'a HandlerContext<'a>,
        _selectors: &'a IdpSelectors,
    ) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async move {
            if !wait_visible(ctx.page, STAY_SIGNED_IN_MARKERS[0], ctx.probe).await
                && first_visible(ctx.page, &STAY_SIGNED_IN_MARKERS).await.is_none()
            {
                return Ok(());
            }

            ctx.logger.debug("dismissing Azure AD 'Stay signed in?' prompt");
            ctx.page
                .click(STAY_SIGNED_IN_DECLINE)
                .await
                .map_err(|e| ctx.page_error(AuthPhase::Callback, &e))?;
            settle(ctx.settle_ms).await;
            Ok(())
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
        page::Page,
    };

    #[test]
    fn defaults_are_two_step() {
        let selectors = AzureAdHandler.default_selectors();
        assert_eq!(selectors.next.as_deref(), Some(SUBMIT));
        assert_eq!(selectors.username, r#"input[name="loginfmt"]"#);
    }

    #[tokio::test]
    async fn dismisses_stay_signed_in() {
        let page = MockPage::new("https://login.microsoftonline.com/kmsi")
            .with_visible("#KmsiDescription")
            .with_visible(STAY_SIGNED_IN_DECLINE)
            .on_click(
                STAY_SIGNED_IN_DECLINE,
                Reaction::navigate("https://app.example.com/home").hide("#KmsiDescription"),
            );

        let context = ctx(&page);
        let selectors = AzureAdHandler.default_selectors();
        AzureAdHandler
            .handle_post_login_prompts(&context, &selectors)
            .await
            .unwrap();

        assert_eq!(page.count("click:#idBtn_Back"), 1);
        assert_eq!(page.url(), "https://app.example.com/home");
    }

    #[tokio::test]
    async fn no_prompt_is_a_noop() {
        let page = MockPage::new("https://app.example.com/home");
        let context = ctx(&page);
        let selectors = AzureAdHandler.default_selectors();
        AzureAdHandler
            .handle_post_login_prompts(&context, &selectors)
            .await
            .unwrap();
        assert!(page.actions().is_empty());
    }

    #[tokio::test]
    async fn push_completes_once_redirected() {
        let page = MockPage::new("https://login.microsoftonline.com/common/SAS/ProcessAuth");
        let config = MfaConfig {
            kind: MfaType::Push,
            push_timeout_ms: Some(1_000),
            ..MfaConfig::default()
        };
        let challenge = MfaChallenge {
            config: &config,
            secret: None,
        };
        let context = ctx(&page);
        let (approval, ()) = tokio::join!(AzureAdHandler.handle_mfa(&context, &challenge), async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            page.goto("https://app.example.com/callback", 10).await.unwrap();
        });
        approval.unwrap();
    }

    #[tokio::test]
    async fn sms_is_rejected() {
        let page = MockPage::new("https://login.microsoftonline.com/");
        let config = MfaConfig {
            kind: MfaType::Sms,
            ..MfaConfig::default()
        };
        let challenge = MfaChallenge {
            config: &config,
            secret: None,
        };
        let context = ctx(&page);
        let err = AzureAdHandler
            .handle_mfa(&context, &challenge)
            .await
            .unwrap_err();
        assert!(err.message.contains("sms"));
    }
}
