//! Declarative authentication configuration.
//!
//! An [`AuthConfig`] is loaded once per process from a JSON document and is
//! read-only afterwards. Keys are camelCase, for example:
//!
//! ```json
//! {
//!   "provider": "oidc",
//!   "roles": {
//!     "admin": { "credentialsEnv": { "username": "ADMIN_USER", "password": "ADMIN_PASS" } }
//!   },
//!   "oidc": {
//!     "idpType": "keycloak",
//!     "loginUrl": "https://app.example.com/login",
//!     "success": { "url": "/dashboard" }
//!   },
//!   "storageState": { "directory": ".auth-states", "maxAgeMinutes": 60 }
//! }
//! ```

use crate::{
    error::{ConfigError, CredentialError},
    idp::{IdpType, SelectorOverrides},
    provider::RetryPolicy,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

pub const DEFAULT_STORAGE_DIRECTORY: &str = ".auth-states";
pub const DEFAULT_FILE_PATTERN: &str = "{role}.json";
pub const DEFAULT_MAX_AGE_MINUTES: u64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Oidc,
    Form,
    Token,
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleConfig>,
    pub oidc: Option<OidcConfig>,
    pub form: Option<FormConfig>,
    pub token: Option<TokenConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub storage_state: StorageStateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AuthConfig {
    /// Read and validate a JSON config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// # Errors
    /// Returns an error if `raw` is not valid JSON or fails validation.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error describing the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.provider {
            ProviderKind::Oidc if self.oidc.is_none() => {
                return Err(ConfigError::Invalid(
                    "provider is 'oidc' but the oidc section is missing".to_string(),
                ));
            }
            ProviderKind::Form if self.form.is_none() => {
                return Err(ConfigError::Invalid(
                    "provider is 'form' but the form section is missing".to_string(),
                ));
            }
            ProviderKind::Token if self.token.is_none() => {
                return Err(ConfigError::Invalid(
                    "provider is 'token' but the token section is missing".to_string(),
                ));
            }
            _ => {}
        }

        if !self.storage_state.file_pattern.contains("{role}") {
            return Err(ConfigError::Invalid(format!(
                "storageState.filePattern '{}' must contain {{role}}",
                self.storage_state.file_pattern
            )));
        }

        if let Some(oidc) = &self.oidc {
            oidc.success.validate()?;
        }
        for (name, role) in &self.roles {
            if let Some(success) = role.oidc_overrides.as_ref().and_then(|o| o.success.as_ref()) {
                success
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("role '{name}': {e}")))?;
            }
        }
        if let Some(form) = &self.form {
            form.success.validate()?;
        }

        Ok(())
    }

    #[must_use]
    pub fn role_names(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    /// # Errors
    /// Returns [`CredentialError::UnknownRole`] if the role is not configured.
    pub fn role(&self, role: &str) -> Result<&RoleConfig, CredentialError> {
        self.roles
            .get(role)
            .ok_or_else(|| CredentialError::UnknownRole {
                role: role.to_string(),
                available: self.role_names(),
            })
    }

    /// Effective OIDC config for `role`: the shared section with the role's
    /// overrides applied.
    ///
    /// # Errors
    /// Returns an error if there is no oidc section.
    pub fn oidc_for(&self, role: &str) -> Result<OidcConfig, ConfigError> {
        let base = self
            .oidc
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("oidc section is missing".to_string()))?;

        Ok(match self.roles.get(role).and_then(|r| r.oidc_overrides.as_ref()) {
            Some(overrides) => base.merged(overrides),
            None => base.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    pub credentials_env: CredentialsEnv,
    pub oidc_overrides: Option<OidcOverrides>,
}

/// Names of the environment variables holding a role's credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsEnv {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    #[serde(default)]
    pub idp_type: IdpType,
    pub login_url: String,
    pub idp_login_url: Option<String>,
    #[serde(default)]
    pub skip_idp_redirect: bool,
    pub idp_selectors: Option<SelectorOverrides>,
    #[serde(default)]
    pub mfa: MfaConfig,
    #[serde(default)]
    pub success: SuccessConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    pub logout: Option<LogoutConfig>,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default = "default_field_timeout_ms")]
    pub field_timeout_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl OidcConfig {
    #[must_use]
    pub fn new(login_url: impl Into<String>) -> Self {
        Self {
            idp_type: IdpType::default(),
            login_url: login_url.into(),
            idp_login_url: None,
            skip_idp_redirect: false,
            idp_selectors: None,
            mfa: MfaConfig::default(),
            success: SuccessConfig::default(),
            timeouts: Timeouts::default(),
            logout: None,
            probe: ProbeConfig::default(),
            field_timeout_ms: default_field_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }

    #[must_use]
    pub fn merged(&self, overrides: &OidcOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(idp_type) = overrides.idp_type {
            merged.idp_type = idp_type;
        }
        if let Some(login_url) = &overrides.login_url {
            merged.login_url.clone_from(login_url);
        }
        if overrides.idp_login_url.is_some() {
            merged.idp_login_url.clone_from(&overrides.idp_login_url);
        }
        if let Some(skip) = overrides.skip_idp_redirect {
            merged.skip_idp_redirect = skip;
        }
        if let Some(selectors) = &overrides.idp_selectors {
            merged.idp_selectors = Some(match &self.idp_selectors {
                Some(base) => base.merged(selectors),
                None => selectors.clone(),
            });
        }
        if let Some(mfa) = &overrides.mfa {
            merged.mfa = mfa.clone();
        }
        if let Some(success) = &overrides.success {
            merged.success = success.clone();
        }
        if let Some(timeouts) = overrides.timeouts {
            merged.timeouts = timeouts;
        }
        if overrides.logout.is_some() {
            merged.logout.clone_from(&overrides.logout);
        }
        merged
    }
}

/// Per-role partial OIDC config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcOverrides {
    pub idp_type: Option<IdpType>,
    pub login_url: Option<String>,
    pub idp_login_url: Option<String>,
    pub skip_idp_redirect: Option<bool>,
    pub idp_selectors: Option<SelectorOverrides>,
    pub mfa: Option<MfaConfig>,
    pub success: Option<SuccessConfig>,
    pub timeouts: Option<Timeouts>,
    pub logout: Option<LogoutConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaType {
    Totp,
    Push,
    Sms,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaConfig {
    #[serde(rename = "type", default)]
    pub kind: MfaType,
    pub totp_secret_env: Option<String>,
    pub totp_input_selector: Option<String>,
    pub totp_submit_selector: Option<String>,
    pub push_timeout_ms: Option<u64>,
}

impl MfaConfig {
    pub const DEFAULT_PUSH_TIMEOUT_MS: u64 = 60_000;

    #[must_use]
    pub fn totp(secret_env: impl Into<String>) -> Self {
        Self {
            kind: MfaType::Totp,
            totp_secret_env: Some(secret_env.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn push_timeout_ms(&self) -> u64 {
        self.push_timeout_ms.unwrap_or(Self::DEFAULT_PUSH_TIMEOUT_MS)
    }
}

/// How the post-login URL is recognised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlMatch {
    Contains(String),
    Regex { regex: String },
}

impl UrlMatch {
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Contains(fragment) => url.contains(fragment.as_str()),
            Self::Regex { regex } => Regex::new(regex).map_or(false, |re| re.is_match(url)),
        }
    }
}

impl std::fmt::Display for UrlMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contains(fragment) => write!(f, "url containing '{fragment}'"),
            Self::Regex { regex } => write!(f, "url matching /{regex}/"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuccessConfig {
    pub url: Option<UrlMatch>,
    pub selector: Option<String>,
    pub timeout: Option<u64>,
}

impl SuccessConfig {
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.unwrap_or(Self::DEFAULT_TIMEOUT_MS)
    }

    /// Whether a URL or selector is set to recognize an authenticated page.
    #[must_use]
    pub fn has_criteria(&self) -> bool {
        self.url.is_some() || self.selector.is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(UrlMatch::Regex { regex }) = &self.url {
            Regex::new(regex)
                .map_err(|e| ConfigError::Invalid(format!("success.url regex: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    #[serde(default = "default_login_flow_ms")]
    pub login_flow_ms: u64,
    #[serde(default = "default_idp_redirect_ms")]
    pub idp_redirect_ms: u64,
    #[serde(default = "default_callback_ms")]
    pub callback_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login_flow_ms: default_login_flow_ms(),
            idp_redirect_ms: default_idp_redirect_ms(),
            callback_ms: default_callback_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutConfig {
    pub url: String,
    #[serde(default)]
    pub idp_logout: bool,
}

/// Bounded visibility polling: how long to probe and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormConfig {
    pub login_url: String,
    #[serde(default = "default_form_username_selector")]
    pub username_selector: String,
    #[serde(default = "default_form_password_selector")]
    pub password_selector: String,
    #[serde(default = "default_form_submit_selector")]
    pub submit_selector: String,
    #[serde(default)]
    pub success: SuccessConfig,
    pub logout_url: Option<String>,
    #[serde(default = "default_field_timeout_ms")]
    pub field_timeout_ms: u64,
    #[serde(default = "default_login_flow_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl FormConfig {
    #[must_use]
    pub fn new(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            username_selector: default_form_username_selector(),
            password_selector: default_form_password_selector(),
            submit_selector: default_form_submit_selector(),
            success: SuccessConfig::default(),
            logout_url: None,
            field_timeout_ms: default_field_timeout_ms(),
            navigation_timeout_ms: default_login_flow_ms(),
            probe: ProbeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    pub endpoint: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    /// Dotted path of the token in the response body, e.g. `data.accessToken`.
    #[serde(default = "default_token_field")]
    pub token_field: String,
    #[serde(default)]
    pub extra_fields: Map<String, Value>,
    #[serde(default = "default_header_name")]
    pub header_name: String,
    #[serde(default = "default_header_prefix")]
    pub header_prefix: String,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default = "default_callback_ms")]
    pub timeout_ms: u64,
}

impl TokenConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            username_field: default_username_field(),
            password_field: default_password_field(),
            token_field: default_token_field(),
            extra_fields: Map::new(),
            header_name: default_header_name(),
            header_prefix: default_header_prefix(),
            storage_key: default_storage_key(),
            timeout_ms: default_callback_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStateConfig {
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_max_age_minutes")]
    pub max_age_minutes: u64,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
}

impl Default for StorageStateConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
            max_age_minutes: default_max_age_minutes(),
            file_pattern: default_file_pattern(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub mask_passwords: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            mask_passwords: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_login_flow_ms() -> u64 {
    60_000
}

fn default_idp_redirect_ms() -> u64 {
    30_000
}

fn default_callback_ms() -> u64 {
    30_000
}

fn default_field_timeout_ms() -> u64 {
    10_000
}

fn default_settle_ms() -> u64 {
    500
}

fn default_form_username_selector() -> String {
    r#"input[name="username"], input[name="email"], input[type="email"]"#.to_string()
}

fn default_form_password_selector() -> String {
    r#"input[name="password"], input[type="password"]"#.to_string()
}

fn default_form_submit_selector() -> String {
    r#"button[type="submit"], input[type="submit"]"#.to_string()
}

fn default_username_field() -> String {
    "username".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

fn default_token_field() -> String {
    "access_token".to_string()
}

fn default_header_name() -> String {
    "Authorization".to_string()
}

fn default_header_prefix() -> String {
    "Bearer".to_string()
}

fn default_storage_key() -> String {
    "authstate.token".to_string()
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_DIRECTORY)
}

fn default_max_age_minutes() -> u64 {
    DEFAULT_MAX_AGE_MINUTES
}

fn default_file_pattern() -> String {
    DEFAULT_FILE_PATTERN.to_string()
}
