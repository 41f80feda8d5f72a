use super::{with_retry, AuthProvider, ProviderDeps, RetryPolicy};
use crate::{
    config::OidcConfig,
    credentials::Credentials,
    error::{AuthError, AuthPhase},
    flow::{AuthResult, OidcFlow},
    logging::Logger,
    page::{BoxFuture, LoadState, Page},
};

/// Login through an Identity Provider driven by [`OidcFlow`].
pub struct OidcProvider {
    role: String,
    flow: OidcFlow,
    retry: RetryPolicy,
    logger: Logger,
}

impl OidcProvider {
    #[must_use]
    pub fn new(role: &str, config: OidcConfig, retry: RetryPolicy, deps: &ProviderDeps) -> Self {
        let logger = deps.logger.child("oidc");
        Self {
            role: role.to_string(),
            flow: OidcFlow::new(
                config,
                deps.registry.clone(),
                deps.env.clone(),
                logger.child("flow"),
            ),
            retry,
            logger,
        }
    }

    fn config(&self) -> &OidcConfig {
        self.flow.config()
    }

    async fn logout_inner(&self, page: &dyn Page) -> Result<(), AuthError> {
        let config = self.config();
        if let Some(logout) = &config.logout {
            self.logger
                .info(&format!("logging out role '{}' via {}", self.role, logout.url));
            page.goto(&logout.url, config.timeouts.idp_redirect_ms)
                .await
                .map_err(|e| AuthError::from_page(&self.role, AuthPhase::Navigation, &e))?;

            // The end-session redirect chain has to finish before cookies go.
            if logout.idp_logout {
                if let Err(e) = page
                    .wait_for_load_state(LoadState::NetworkIdle, config.timeouts.callback_ms)
                    .await
                {
                    self.logger
                        .warn(&format!("IdP logout did not settle for role '{}': {e}", self.role));
                }
            }
        }

        page.clear_cookies()
            .await
            .map_err(|e| AuthError::from_page(&self.role, AuthPhase::Callback, &e))
    }

    async fn refresh_inner(&self, page: &dyn Page) -> bool {
        let config = self.config();
        if let Err(e) = page.reload(config.timeouts.callback_ms).await {
            self.logger
                .warn(&format!("session refresh for role '{}' failed: {e}", self.role));
            return false;
        }

        let url = page.url();
        let back_on_login = url.contains(&config.login_url)
            || config
                .idp_login_url
                .as_deref()
                .is_some_and(|idp| url.contains(idp));
        if back_on_login {
            self.logger.info(&format!(
                "session of role '{}' expired, reload landed on {url}",
                self.role
            ));
            return false;
        }

        self.flow.is_session_valid(page).await
    }
}

impl AuthProvider for OidcProvider {
    fn name(&self) -> &str {
        "oidc"
    }

    fn role(&self) -> &str {
        &self.role
    }

    fn login<'a>(
        &'a self,
        page: &'a dyn Page,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<AuthResult, AuthError>> {
        Box::pin(with_retry(
            &self.retry,
            &self.role,
            self.logger,
            move |attempt| {
                self.logger.debug(&format!(
                    "OIDC login attempt {} for role '{}'",
                    attempt + 1,
                    self.role
                ));
                self.flow.execute(page, &self.role, credentials)
            },
        ))
    }

    fn is_session_valid<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, bool> {
        Box::pin(self.flow.is_session_valid(page))
    }

    fn logout<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(self.logout_inner(page))
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn refresh_session<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, bool> {
        Box::pin(self.refresh_inner(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{LogoutConfig, ProbeConfig, UrlMatch},
        idp::keycloak,
        page::mock::{MockPage, Reaction},
    };
    use std::{collections::HashMap, sync::Arc};

    const LOGIN: &str = "https://app.example.com/login";
    const KC: &str = "https://sso.example.com/auth/realms/test/protocol/openid-connect/auth";

    fn provider(configure: impl FnOnce(&mut OidcConfig)) -> OidcProvider {
        let mut config = OidcConfig::new(LOGIN);
        config.idp_login_url = Some("/auth/realms/test".to_string());
        config.success.url = Some(UrlMatch::Contains("/dashboard".to_string()));
        config.settle_ms = 0;
        config.field_timeout_ms = 10;
        config.probe = ProbeConfig {
            timeout_ms: 5,
            poll_interval_ms: 1,
        };
        configure(&mut config);

        let retry = RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            backoff_multiplier: 2.0,
            max_delay_ms: 2,
        };
        let deps = ProviderDeps::new(Arc::new(HashMap::<String, String>::new()), Logger::new("test"));
        OidcProvider::new("admin", config, retry, &deps)
    }

    #[tokio::test]
    async fn redirect_timeouts_are_retried() {
        let page = MockPage::new("about:blank");
        let err = provider(|_| {})
            .login(&page, &Credentials::new("alice", "pw"))
            .await
            .unwrap_err();

        assert_eq!(page.count("goto:"), 3);
        assert!(err.message.contains("after 3 attempts"));
        assert_eq!(err.phase, AuthPhase::Navigation);
    }

    #[tokio::test]
    async fn login_succeeds_through_keycloak() {
        let page = MockPage::new("about:blank")
            .on_goto(
                LOGIN,
                Reaction::navigate(KC)
                    .show(keycloak::USERNAME)
                    .show(keycloak::PASSWORD)
                    .show(keycloak::SUBMIT),
            )
            .on_click(
                keycloak::SUBMIT,
                Reaction::navigate("https://app.example.com/dashboard"),
            );

        let result = provider(|_| {})
            .login(&page, &Credentials::new("alice", "pw"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(page.count("goto:"), 1);
    }

    #[tokio::test]
    async fn logout_visits_url_and_clears_cookies() {
        let page = MockPage::new("https://app.example.com/dashboard");
        provider(|c| {
            c.logout = Some(LogoutConfig {
                url: "https://app.example.com/logout".to_string(),
                idp_logout: true,
            });
        })
        .logout(&page)
        .await
        .unwrap();

        assert_eq!(
            page.actions(),
            vec!["goto:https://app.example.com/logout", "load:NetworkIdle"]
        );
        assert!(page.cookies_cleared());
    }

    #[tokio::test]
    async fn refresh_fails_when_redirected_to_login() {
        let provider = provider(|_| {});
        assert!(provider.supports_refresh());

        let expired = MockPage::new("https://app.example.com/dashboard")
            .on_reload(Reaction::navigate(KC));
        assert!(!provider.refresh_session(&expired).await);

        let alive = MockPage::new("https://app.example.com/dashboard");
        assert!(provider.refresh_session(&alive).await);
        assert_eq!(alive.count("reload"), 1);
    }
}
