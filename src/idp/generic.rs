use super::{
    submit_totp, unsupported_mfa, HandlerContext, IdpHandler, IdpSelectors, IdpType, MfaChallenge,
};
use crate::{config::MfaType, error::AuthError, page::BoxFuture};

// Comma-joined lists covering the common field naming conventions.
pub const USERNAME: &str = r#"input[name="username"], input[name="email"], input[type="email"], input[name="login"], input[id="username"], input[id="email"]"#;
pub const PASSWORD: &str =
    r#"input[name="password"], input[type="password"], input[id="password"]"#;
pub const SUBMIT: &str =
    r#"button[type="submit"], input[type="submit"], button[name="login"], button[id="login"]"#;
pub const OTP_INPUT: &str = r#"input[name="otp"], input[name="totp"], input[name="code"], input[autocomplete="one-time-code"]"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericHandler;

impl IdpHandler for GenericHandler {
    fn idp_type(&self) -> IdpType {
        IdpType::Generic
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
                kind => Err(unsupported_mfa(ctx, IdpType::Generic, kind)),
            }
        })
    }
}
