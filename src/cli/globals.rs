use crate::{
    config::AuthConfig,
    credentials::{CredentialResolver, ProcessEnv},
    logging::Logger,
    storage::StorageStateStore,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc};

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub config: PathBuf,
    /// Value for the `{env}` placeholder of the storage file pattern.
    pub env: Option<String>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(config: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
            env: None,
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env;
        self
    }

    /// # Errors
    /// Returns an error if the config file cannot be read or is invalid.
    pub fn load_config(&self) -> Result<AuthConfig> {
        AuthConfig::from_file(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))
    }

    #[must_use]
    pub fn store(&self, config: &AuthConfig) -> StorageStateStore {
        StorageStateStore::new(config.storage_state.clone(), logger(config).child("storage"))
            .with_env(self.env.clone())
    }

    #[must_use]
    pub fn resolver(&self, config: AuthConfig) -> CredentialResolver {
        let logger = logger(&config).child("credentials");
        CredentialResolver::new(Arc::new(config), Arc::new(ProcessEnv), logger)
    }
}

fn logger(config: &AuthConfig) -> Logger {
    Logger::default().with_masking(config.logging.mask_passwords)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new("auth.config.json").with_env(Some("staging".to_string()));
        assert_eq!(args.config, PathBuf::from("auth.config.json"));
        assert_eq!(args.env.as_deref(), Some("staging"));
    }

    #[test]
    fn test_store_uses_env_placeholder() {
        let config = AuthConfig::from_json(
            r#"{"provider": "custom", "storageState": {"directory": "/tmp/states", "filePattern": "{role}-{env}.json"}}"#,
        )
        .unwrap();
        let store = GlobalArgs::new("auth.config.json")
            .with_env(Some("qa".to_string()))
            .store(&config);
        assert_eq!(store.path_for("admin"), PathBuf::from("/tmp/states/admin-qa.json"));
    }

    #[test]
    fn test_missing_config_file() {
        let err = GlobalArgs::new("/nonexistent/auth.config.json")
            .load_config()
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/auth.config.json"));
    }
}
