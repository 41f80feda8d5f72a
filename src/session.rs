//! Reuse-or-login glue over the store, the resolver and the providers.

use crate::{
    config::AuthConfig,
    credentials::{CredentialResolver, EnvSource},
    error::{AuthError, ConfigError, StorageStateError},
    idp::HandlerRegistry,
    logging::Logger,
    page::Page,
    provider::{build_provider, AuthProvider, ProviderDeps},
    storage::StorageStateStore,
};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Storage(#[from] StorageStateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Hands out a valid storage-state path per role, logging in only when the
/// stored one is missing or expired. At most one login per role is in
/// flight at a time.
pub struct SessionManager {
    config: Arc<AuthConfig>,
    deps: ProviderDeps,
    store: StorageStateStore,
    resolver: CredentialResolver,
    providers: HashMap<String, Arc<dyn AuthProvider>>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    logger: Logger,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: AuthConfig, env: Arc<dyn EnvSource>, logger: Logger) -> Self {
        let logger = logger.with_masking(config.logging.mask_passwords);
        let config = Arc::new(config);
        Self {
            deps: ProviderDeps::new(env.clone(), logger.child("provider")),
            store: StorageStateStore::new(config.storage_state.clone(), logger.child("storage")),
            resolver: CredentialResolver::new(config.clone(), env, logger.child("credentials")),
            config,
            providers: HashMap::new(),
            locks: StdMutex::new(HashMap::new()),
            logger,
        }
    }

    /// Value for the `{env}` placeholder of the file pattern.
    #[must_use]
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.store = self.store.with_env(env);
        self
    }

    /// Use `registry` for OIDC providers, e.g. with extra IdP handlers.
    #[must_use]
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.deps = self.deps.with_registry(registry);
        self
    }

    /// Use `provider` for its role instead of the configured one. Required
    /// for custom providers.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.providers.insert(provider.role().to_string(), provider);
        self
    }

    #[must_use]
    pub fn store(&self) -> &StorageStateStore {
        &self.store
    }

    #[must_use]
    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Provider for `role`: a registered one, otherwise built from config.
    ///
    /// # Errors
    /// Returns an error if the configured provider cannot be built.
    pub fn provider(&self, role: &str) -> Result<Arc<dyn AuthProvider>, ConfigError> {
        match self.providers.get(role) {
            Some(provider) => Ok(Arc::clone(provider)),
            None => build_provider(&self.config, role, &self.deps).map(Arc::from),
        }
    }

    fn role_lock(&self, role: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(role.to_string()).or_default())
    }

    /// Path of a valid storage state for `role`, logging in through `page`
    /// first when needed.
    ///
    /// # Errors
    /// Credential, login and persistence failures.
    pub async fn ensure_session(
        &self,
        role: &str,
        page: &dyn Page,
    ) -> Result<PathBuf, SessionError> {
        let lock = self.role_lock(role);
        let _guard = lock.lock().await;

        if let Some(path) = self.store.load(role).await {
            self.logger.info(&format!(
                "role '{role}' reuses {}",
                path.display()
            ));
            return Ok(path);
        }

        let credentials = self.resolver.resolve(role).map_err(AuthError::from)?;
        let provider = self.provider(role)?;

        if provider.is_session_valid(page).await {
            self.logger.info(&format!(
                "page is already authenticated for role '{role}', saving"
            ));
            return Ok(self.store.save(page, role).await?);
        }

        let result = provider.login(page, &credentials).await?;
        self.logger.info(&format!(
            "role '{role}' logged in via {} in {}ms",
            provider.name(),
            result.duration_ms
        ));

        Ok(self.store.save(page, role).await?)
    }

    /// Log `role` out through its provider and drop its stored state.
    ///
    /// # Errors
    /// Provider or storage failures.
    pub async fn end_session(&self, role: &str, page: &dyn Page) -> Result<(), SessionError> {
        let lock = self.role_lock(role);
        let _guard = lock.lock().await;

        self.provider(role)?.logout(page).await?;
        self.store.clear(Some(role)).await?;
        Ok(())
    }
}
