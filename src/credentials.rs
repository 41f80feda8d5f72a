//! Role credential resolution from environment variables.

use crate::{config::AuthConfig, error::CredentialError, logging::Logger};
use secrecy::{ExposeSecret, SecretString};
use std::{collections::BTreeMap, collections::HashMap, fmt::Write, sync::Arc};

/// Username/password pair for one role. The password never shows up in
/// `Debug` output.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Source of environment variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Look up `name`, treating empty or blank values as unset.
pub fn non_empty_var(env: &dyn EnvSource, name: &str) -> Option<String> {
    env.var(name).filter(|value| !value.trim().is_empty())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingKind {
    UnknownRole,
    Username,
    Password,
}

/// One pre-flight finding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingCredential {
    pub role: String,
    pub kind: MissingKind,
    /// Environment variable to set; `None` for unknown roles.
    pub variable: Option<String>,
}

pub struct CredentialResolver {
    config: Arc<AuthConfig>,
    env: Arc<dyn EnvSource>,
    logger: Logger,
}

impl CredentialResolver {
    #[must_use]
    pub fn new(config: Arc<AuthConfig>, env: Arc<dyn EnvSource>, logger: Logger) -> Self {
        Self {
            config,
            env,
            logger,
        }
    }

    /// Resolve the credentials of `role`.
    ///
    /// # Errors
    /// Returns [`CredentialError::UnknownRole`] if the role is not configured and
    /// [`CredentialError::Missing`] naming every unset variable otherwise.
    pub fn resolve(&self, role: &str) -> Result<Credentials, CredentialError> {
        let role_config = self.config.role(role)?;
        let names = &role_config.credentials_env;

        let username = non_empty_var(self.env.as_ref(), &names.username);
        let password = non_empty_var(self.env.as_ref(), &names.password);

        match (username, password) {
            (Some(username), Some(password)) => {
                self.logger.info(&format!(
                    "resolved credentials for role '{role}': username={username} password={}",
                    self.logger.mask(&password)
                ));
                Ok(Credentials::new(username, password))
            }
            (username, password) => {
                let mut variables = Vec::new();
                if username.is_none() {
                    variables.push(names.username.clone());
                }
                if password.is_none() {
                    variables.push(names.password.clone());
                }
                Err(CredentialError::Missing {
                    role: role.to_string(),
                    variables,
                })
            }
        }
    }

    /// Check every role in `roles` without failing fast.
    #[must_use]
    pub fn validate(&self, roles: &[String]) -> Vec<MissingCredential> {
        let mut issues = Vec::new();

        for role in roles {
            let Ok(role_config) = self.config.role(role) else {
                issues.push(MissingCredential {
                    role: role.clone(),
                    kind: MissingKind::UnknownRole,
                    variable: None,
                });
                continue;
            };

            let names = &role_config.credentials_env;
            for (kind, variable) in [
                (MissingKind::Username, &names.username),
                (MissingKind::Password, &names.password),
            ] {
                if non_empty_var(self.env.as_ref(), variable).is_none() {
                    issues.push(MissingCredential {
                        role: role.clone(),
                        kind,
                        variable: Some(variable.clone()),
                    });
                }
            }
        }

        if !issues.is_empty() {
            self.logger
                .warn(&format!("{} credential issue(s) found", issues.len()));
        }

        issues
    }
}

/// Group issues by role and render copy-paste-able remediation text.
#[must_use]
pub fn format_missing(issues: &[MissingCredential]) -> String {
    if issues.is_empty() {
        return "All role credentials are set.".to_string();
    }

    let mut by_role: BTreeMap<&str, Vec<&MissingCredential>> = BTreeMap::new();
    for issue in issues {
        by_role.entry(issue.role.as_str()).or_default().push(issue);
    }

    let mut out = format!("Missing credentials for {} role(s):\n", by_role.len());
    for (role, role_issues) in by_role {
        let _ = write!(out, "\n  {role}:\n");
        for issue in role_issues {
            match (&issue.kind, &issue.variable) {
                (MissingKind::UnknownRole, _) | (_, None) => {
                    out.push_str("    role is not defined in the auth configuration\n");
                }
                (MissingKind::Username, Some(var)) => {
                    let _ = writeln!(out, "    export {var}=\"<username>\"");
                }
                (MissingKind::Password, Some(var)) => {
                    let _ = writeln!(out, "    export {var}=\"<password>\"");
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Arc<AuthConfig> {
        Arc::new(
            AuthConfig::from_json(
                r#"{
                    "oidc": { "loginUrl": "https://app.example.com/login" },
                    "roles": {
                        "admin": { "credentialsEnv": { "username": "T_ADMIN_USER", "password": "T_ADMIN_PASS" } },
                        "viewer": { "credentialsEnv": { "username": "T_VIEWER_USER", "password": "T_VIEWER_PASS" } }
                    }
                }"#,
            )
            .unwrap(),
        )
    }

    fn env(vars: &[(&str, &str)]) -> Arc<dyn EnvSource> {
        Arc::new(
            vars.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn resolves_complete_credentials() {
        let resolver = CredentialResolver::new(
            config(),
            env(&[("T_ADMIN_USER", "alice"), ("T_ADMIN_PASS", "s3cret")]),
            Logger::default(),
        );
        let creds = resolver.resolve("admin").unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password(), "s3cret");
        assert!(!format!("{creds:?}").contains("s3cret"));
    }

    #[test]
    fn missing_password_names_variable() {
        let resolver = CredentialResolver::new(
            config(),
            env(&[("T_ADMIN_USER", "alice"), ("T_ADMIN_PASS", "  ")]),
            Logger::default(),
        );
        let err = resolver.resolve("admin").unwrap_err();
        assert_eq!(
            err,
            CredentialError::Missing {
                role: "admin".to_string(),
                variables: vec!["T_ADMIN_PASS".to_string()],
            }
        );
    }

    #[test]
    fn unknown_role_fails() {
        let resolver = CredentialResolver::new(config(), env(&[]), Logger::default());
        assert!(matches!(
            resolver.resolve("ghost"),
            Err(CredentialError::UnknownRole { .. })
        ));
    }

    #[test]
    fn resolves_from_process_env() {
        temp_env::with_vars(
            [
                ("T_VIEWER_USER", Some("bob")),
                ("T_VIEWER_PASS", Some("pw")),
            ],
            || {
                let resolver =
                    CredentialResolver::new(config(), Arc::new(ProcessEnv), Logger::default());
                let creds = resolver.resolve("viewer").unwrap();
                assert_eq!(creds.username, "bob");
            },
        );
    }

    #[test]
    fn validate_collects_all_issues() {
        let resolver = CredentialResolver::new(
            config(),
            env(&[("T_ADMIN_USER", "alice")]),
            Logger::default(),
        );
        let issues = resolver.validate(&[
            "admin".to_string(),
            "viewer".to_string(),
            "ghost".to_string(),
        ]);

        assert_eq!(issues.len(), 4);
        assert_eq!(issues[0].variable.as_deref(), Some("T_ADMIN_PASS"));
        assert_eq!(issues[3].kind, MissingKind::UnknownRole);

        let text = format_missing(&issues);
        assert!(text.starts_with("Missing credentials for 3 role(s):"));
        assert!(text.contains("export T_ADMIN_PASS=\"<password>\""));
        assert!(text.contains("export T_VIEWER_USER=\"<username>\""));
        assert!(text.contains("ghost:\n    role is not defined"));
    }

    #[test]
    fn format_missing_empty() {
        assert_eq!(format_missing(&[]), "All role credentials are set.");
    }
}
