use super::{with_retry, AuthProvider, RetryPolicy};
use crate::{
    config::TokenConfig,
    credentials::Credentials,
    error::{AuthError, AuthPhase},
    flow::AuthResult,
    logging::Logger,
    page::{BoxFuture, Page},
    APP_USER_AGENT,
};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, time::Duration};
use tokio::time::Instant;

/// Client-side record kept in the page's `localStorage`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub token: String,
    pub header_name: String,
    pub header_prefix: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TokenRecord {
    /// Value for the `header_name` header, e.g. `Bearer eyJ...`.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        if self.header_prefix.is_empty() {
            self.token.clone()
        } else {
            format!("{} {}", self.header_prefix, self.token)
        }
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token", &"****")
            .field("header_name", &self.header_name)
            .field("header_prefix", &self.header_prefix)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Exchanges credentials for a bearer token at an HTTP endpoint.
pub struct TokenProvider {
    role: String,
    config: TokenConfig,
    retry: RetryPolicy,
    logger: Logger,
}

impl TokenProvider {
    #[must_use]
    pub fn new(role: &str, config: TokenConfig, retry: RetryPolicy, logger: Logger) -> Self {
        Self {
            role: role.to_string(),
            config,
            retry,
            logger,
        }
    }

    fn error(&self, phase: AuthPhase, message: impl Into<String>) -> AuthError {
        AuthError::new(&self.role, phase, message)
    }

    fn transport_error(&self, err: &reqwest::Error) -> AuthError {
        let endpoint = &self.config.endpoint;
        let message = if err.is_timeout() {
            format!(
                "timeout of {}ms exceeded waiting for token endpoint {endpoint}",
                self.config.timeout_ms
            )
        } else if err.is_connect() {
            format!("network error reaching token endpoint {endpoint}: {err}")
        } else {
            format!("token request to {endpoint} failed: {err}")
        };
        self.error(AuthPhase::Navigation, message)
    }

    /// POST the credentials and pull the token out of the JSON response.
    ///
    /// # Errors
    /// Transport failures are navigation errors, 401/403 are credential
    /// errors, a response without a token is a callback error.
    pub async fn request_token(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let config = &self.config;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| self.error(AuthPhase::Navigation, format!("HTTP client: {e}")))?;

        let mut body = config.extra_fields.clone();
        body.insert(
            config.username_field.clone(),
            Value::String(credentials.username.clone()),
        );
        body.insert(
            config.password_field.clone(),
            Value::String(credentials.password().to_string()),
        );

        let response = client
            .post(&config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(self
                .error(
                    AuthPhase::Credentials,
                    format!("token endpoint rejected the credentials: {status}"),
                )
                .with_remediation(format!(
                    "Verify the username/password environment variables for role '{}'",
                    self.role
                )));
        }
        if !status.is_success() {
            return Err(self.error(
                AuthPhase::Navigation,
                format!("token endpoint {} returned {status}", config.endpoint),
            ));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| self.error(AuthPhase::Callback, format!("invalid token response: {e}")))?;

        lookup(&json, &config.token_field)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                self.error(
                    AuthPhase::Callback,
                    format!("no token at '{}' in the token response", config.token_field),
                )
            })
    }

    fn record(&self, token: String) -> TokenRecord {
        TokenRecord {
            token,
            header_name: self.config.header_name.clone(),
            header_prefix: self.config.header_prefix.clone(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn storage_key(&self) -> String {
        Value::String(self.config.storage_key.clone()).to_string()
    }

    /// Record currently stored on the page, if any.
    pub async fn stored_record(&self, page: &dyn Page) -> Option<TokenRecord> {
        let script = format!("window.localStorage.getItem({})", self.storage_key());
        match page.evaluate(&script).await {
            Ok(Value::String(raw)) if !raw.is_empty() => serde_json::from_str(&raw).ok(),
            _ => None,
        }
    }

    async fn attempt(
        &self,
        page: &dyn Page,
        credentials: &Credentials,
    ) -> Result<AuthResult, AuthError> {
        let started = Instant::now();
        let token = self.request_token(credentials).await?;
        let record = self.record(token);

        let serialized = serde_json::to_string(&record)
            .map_err(|e| self.error(AuthPhase::Callback, format!("token record: {e}")))?;
        let script = format!(
            "window.localStorage.setItem({}, {})",
            self.storage_key(),
            Value::String(serialized)
        );
        page.evaluate(&script)
            .await
            .map_err(|e| AuthError::from_page(&self.role, AuthPhase::Callback, &e))?;

        self.logger.info(&format!(
            "stored {} token for role '{}' under {}",
            self.config.header_name, self.role, self.config.storage_key
        ));
        Ok(AuthResult::done(page, started))
    }
}

/// Follow a dotted path (`data.accessToken`) into a JSON document.
#[must_use]
pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

impl AuthProvider for TokenProvider {
    fn name(&self) -> &str {
        "token"
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

    /// A stored record counts as a session; the token itself is not checked
    /// against the server.
    fn is_session_valid<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.stored_record(page).await.is_some() })
    }

    fn logout<'a>(&'a self, page: &'a dyn Page) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async move {
            let script = format!("window.localStorage.removeItem({})", self.storage_key());
            page.evaluate(&script)
                .await
                .map(|_| ())
                .map_err(|e| AuthError::from_page(&self.role, AuthPhase::Callback, &e))
        })
    }
}
