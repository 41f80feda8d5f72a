//! Error families surfaced by the engine.
//!
//! Login-path failures are [`AuthError`]s tagged with the [`AuthPhase`] they
//! happened in. Persistence failures are [`StorageStateError`]s tagged with a
//! [`StorageStateCause`]. The remaining types are component-level errors that
//! convert into one of those two families.

use serde::Serialize;
use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Message fragments that classify a failure as transient.
const RETRYABLE_MARKERS: [&str; 5] = ["timeout", "network", "net::", "econnrefused", "enotfound"];

/// Stage of a login used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthPhase {
    Navigation,
    Credentials,
    Mfa,
    Callback,
}

impl AuthPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Credentials => "credentials",
            Self::Mfa => "mfa",
            Self::Callback => "callback",
        }
    }

    /// Operator hint attached to a consolidated failure for `role`.
    #[must_use]
    pub fn remediation_for(self, role: &str) -> String {
        match self {
            Self::Navigation => format!(
                "Check that the login URL configured for role '{role}' is reachable and that the IdP redirect URL is correct"
            ),
            Self::Credentials => format!(
                "Verify the username/password environment variables for role '{role}' and the IdP field selectors"
            ),
            Self::Mfa => format!(
                "Verify the TOTP secret configured for role '{role}' and that the MFA type matches the IdP"
            ),
            Self::Callback => format!(
                "Check the success URL/selector for role '{role}' and complete any pending IdP prompts for this user manually"
            ),
        }
    }
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure anywhere in the login path.
#[derive(Debug, Clone, Error)]
#[error("authentication failed for role '{role}' during {phase}: {message}")]
pub struct AuthError {
    pub message: String,
    pub role: String,
    pub phase: AuthPhase,
    pub idp_response: Option<String>,
    pub remediation: Option<String>,
    /// Underlying failure when `message` was replaced by an IdP message.
    pub cause: Option<String>,
}

impl AuthError {
    pub fn new(role: impl Into<String>, phase: AuthPhase, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            role: role.into(),
            phase,
            idp_response: None,
            remediation: None,
            cause: None,
        }
    }

    /// Attach a message scraped from the IdP page. The original message is
    /// kept as the cause.
    #[must_use]
    pub fn with_idp_response(mut self, idp_response: impl Into<String>) -> Self {
        let idp_response = idp_response.into();
        let previous = std::mem::replace(
            &mut self.message,
            format!("identity provider reported: {idp_response}"),
        );
        self.cause = Some(previous);
        self.idp_response = Some(idp_response);
        self
    }

    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        is_retryable(&self.message)
    }

    pub(crate) fn from_page(role: &str, phase: AuthPhase, err: &PageError) -> Self {
        Self::new(role, phase, err.to_string())
    }

    pub(crate) fn from_mfa(role: &str, err: &MfaError) -> Self {
        let remediation = match err {
            MfaError::SecretMissing(var) => {
                format!("export {var}=<base32 TOTP secret for role '{role}'>")
            }
            MfaError::InvalidSecret(_) => {
                format!("The TOTP secret for role '{role}' must be base32 encoded")
            }
            MfaError::Clock(_) => "Check the system clock".to_string(),
        };
        Self::new(role, AuthPhase::Mfa, err.to_string()).with_remediation(remediation)
    }
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        let (role, remediation) = match &err {
            CredentialError::UnknownRole { role, available } => (
                role.clone(),
                format!(
                    "Add role '{role}' to the roles section of the auth config (configured: {})",
                    available.join(", ")
                ),
            ),
            CredentialError::Missing { role, variables } => (
                role.clone(),
                variables
                    .iter()
                    .map(|var| format!("export {var}=..."))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        };
        Self::new(role, AuthPhase::Credentials, err.to_string()).with_remediation(remediation)
    }
}

/// Classify a failure message as timeout- or network-related.
#[must_use]
pub fn is_retryable(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Failure reported by the injected page capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("timeout of {timeout_ms}ms exceeded while waiting for {target}")]
    Timeout { target: String, timeout_ms: u64 },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("selector not found: {0}")]
    Selector(String),
    #[error("{0}")]
    Other(String),
}

impl PageError {
    pub fn timeout(target: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            target: target.into(),
            timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStateCause {
    Missing,
    Corrupted,
    Invalid,
}

impl fmt::Display for StorageStateCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "missing",
            Self::Corrupted => "corrupted",
            Self::Invalid => "invalid",
        })
    }
}

/// Failure anywhere in the persistence path.
#[derive(Debug, Error)]
#[error("storage state for role '{role}' is {cause} ({}): {message}", path.display())]
pub struct StorageStateError {
    pub role: String,
    pub path: PathBuf,
    pub cause: StorageStateCause,
    pub message: String,
}

impl StorageStateError {
    pub fn new(
        role: impl Into<String>,
        path: impl Into<PathBuf>,
        cause: StorageStateCause,
        message: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            path: path.into(),
            cause,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("role '{role}' is not defined in the auth configuration")]
    UnknownRole { role: String, available: Vec<String> },
    #[error("missing credentials for role '{role}': {} not set", variables.join(", "))]
    Missing { role: String, variables: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MfaError {
    #[error("TOTP secret environment variable {0} is not set")]
    SecretMissing(String),
    #[error("invalid TOTP secret: {0}")]
    InvalidSecret(String),
    #[error("system clock error: {0}")]
    Clock(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_markers_are_case_insensitive() {
        assert!(is_retryable("Timeout 30000ms exceeded"));
        assert!(is_retryable("net::ERR_CONNECTION_REFUSED"));
        assert!(is_retryable("connect ECONNREFUSED 127.0.0.1:443"));
        assert!(is_retryable("getaddrinfo ENOTFOUND idp.local"));
        assert!(is_retryable("Network unreachable"));
        assert!(!is_retryable("Invalid username or password"));
        assert!(!is_retryable("selector not found: #username"));
    }

    #[test]
    fn idp_response_replaces_message_and_keeps_cause() {
        let err = AuthError::new(
            "admin",
            AuthPhase::Callback,
            PageError::timeout("url /dashboard", 30_000).to_string(),
        )
        .with_idp_response("Invalid username or password.");

        assert_eq!(err.idp_response.as_deref(), Some("Invalid username or password."));
        assert!(err.message.contains("Invalid username or password."));
        assert!(err.cause.as_deref().is_some_and(|c| c.contains("timeout")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn credential_error_converts_with_remediation() {
        let err: AuthError = CredentialError::Missing {
            role: "admin".to_string(),
            variables: vec!["ADMIN_PASSWORD".to_string()],
        }
        .into();

        assert_eq!(err.role, "admin");
        assert_eq!(err.phase, AuthPhase::Credentials);
        assert_eq!(err.remediation.as_deref(), Some("export ADMIN_PASSWORD=..."));
        assert!(err.to_string().contains("ADMIN_PASSWORD"));
    }

    #[test]
    fn storage_error_display_names_cause() {
        let err = StorageStateError::new(
            "admin",
            ".auth-states/admin.json",
            StorageStateCause::Corrupted,
            "missing cookies array",
        );
        assert!(err.to_string().contains("corrupted"));
        assert!(err.to_string().contains("admin.json"));
    }
}
