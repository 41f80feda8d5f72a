//! Per-role session artifacts on disk.
//!
//! Each role maps to one JSON file under the configured directory, named by
//! the file pattern (`{role}` and optional `{env}` placeholders, `.json`
//! suffix enforced). Validity is always recomputed from the file's mtime and
//! the configured max age; nothing else is stored about a session.

use crate::{
    config::StorageStateConfig,
    error::{StorageStateCause, StorageStateError},
    logging::Logger,
    page::Page,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::fs;

/// Age beyond which [`StorageStateStore::cleanup_expired`] deletes files,
/// independent of the per-role max age.
pub const CLEANUP_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_ENV: &str = "default";
const JSON_SUFFIX: &str = ".json";

/// Serialized browser session: cookies plus origin-scoped storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub cookies: Vec<Value>,
    pub origins: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStateMetadata {
    pub role: String,
    /// File mtime.
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted_count: usize,
    pub deleted_files: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Filesystem store for [`StoredSession`]s. Operations on the same role file
/// are not synchronized here; callers serialize logins per role.
#[derive(Debug, Clone)]
pub struct StorageStateStore {
    config: StorageStateConfig,
    env: Option<String>,
    logger: Logger,
}

impl StorageStateStore {
    #[must_use]
    pub fn new(config: StorageStateConfig, logger: Logger) -> Self {
        Self {
            config,
            env: None,
            logger,
        }
    }

    /// Value for the `{env}` placeholder.
    #[must_use]
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env.filter(|e| !e.is_empty());
        self
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.config.max_age_minutes.saturating_mul(60))
    }

    #[must_use]
    pub fn path_for(&self, role: &str) -> PathBuf {
        let mut name = self
            .config
            .file_pattern
            .replace("{role}", role)
            .replace("{env}", self.env.as_deref().unwrap_or(DEFAULT_ENV));
        if !name.ends_with(JSON_SUFFIX) {
            name.push_str(JSON_SUFFIX);
        }
        self.config.directory.join(name)
    }

    fn error(
        role: &str,
        path: &Path,
        cause: StorageStateCause,
        message: impl Into<String>,
    ) -> StorageStateError {
        StorageStateError::new(role, path, cause, message)
    }

    /// Persist the page's current session for `role`.
    ///
    /// # Errors
    /// Any failure, including the page failing to export its state, is
    /// reported with cause `invalid`.
    pub async fn save(&self, page: &dyn Page, role: &str) -> Result<PathBuf, StorageStateError> {
        let session = page.storage_state().await.map_err(|e| {
            Self::error(
                role,
                &self.path_for(role),
                StorageStateCause::Invalid,
                format!("failed to export storage state: {e}"),
            )
        })?;
        self.write(role, &session).await
    }

    /// Write `session` for `role` atomically (temp file + rename).
    ///
    /// # Errors
    /// Any I/O or serialization failure is reported with cause `invalid`.
    pub async fn write(
        &self,
        role: &str,
        session: &StoredSession,
    ) -> Result<PathBuf, StorageStateError> {
        let path = self.path_for(role);
        let invalid = |message: String| Self::error(role, &path, StorageStateCause::Invalid, message);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| invalid(format!("failed to create {}: {e}", parent.display())))?;
        }

        let body = serde_json::to_vec_pretty(session)
            .map_err(|e| invalid(format!("failed to serialize session: {e}")))?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body)
            .await
            .map_err(|e| invalid(format!("failed to write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| invalid(format!("failed to move {} into place: {e}", tmp.display())))?;

        self.logger.info(&format!(
            "saved storage state for role '{role}' to {}",
            path.display()
        ));
        Ok(path)
    }

    /// Whether the artifact for `role` exists, parses and is not older than
    /// the max age. Never fails.
    pub async fn is_valid(&self, role: &str) -> bool {
        self.is_valid_at(role, SystemTime::now()).await
    }

    pub async fn is_valid_at(&self, role: &str, now: SystemTime) -> bool {
        self.is_path_valid_at(&self.path_for(role), now).await
    }

    async fn is_path_valid_at(&self, path: &Path, now: SystemTime) -> bool {
        let Ok(modified) = fs::metadata(path).await.and_then(|m| m.modified()) else {
            return false;
        };
        // An mtime in the future counts as age zero.
        let age = now.duration_since(modified).unwrap_or_default();
        if age > self.max_age() {
            self.logger.debug(&format!(
                "{} expired ({}s old)",
                path.display(),
                age.as_secs()
            ));
            return false;
        }
        read_session(path).await.is_ok()
    }

    /// Path of a still valid artifact for `role`; `None` means a fresh login
    /// is needed.
    pub async fn load(&self, role: &str) -> Option<PathBuf> {
        if self.is_valid(role).await {
            let path = self.path_for(role);
            self.logger.debug(&format!(
                "reusing storage state for role '{role}' from {}",
                path.display()
            ));
            Some(path)
        } else {
            None
        }
    }

    /// # Errors
    /// `missing` if there is no file, `corrupted` if it is not a session
    /// document, `invalid` for other I/O failures.
    pub async fn read(&self, role: &str) -> Result<StoredSession, StorageStateError> {
        let path = self.path_for(role);
        read_session(&path)
            .await
            .map_err(|(cause, message)| Self::error(role, &path, cause, message))
    }

    /// Delete the artifact of `role`, or every `.json` artifact when `role`
    /// is `None`. Returns the number of deleted files; absent files are not
    /// an error.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read or a role file cannot
    /// be removed.
    pub async fn clear(&self, role: Option<&str>) -> Result<usize, StorageStateError> {
        if let Some(role) = role {
            let path = self.path_for(role);
            return match fs::remove_file(&path).await {
                Ok(()) => {
                    self.logger
                        .info(&format!("cleared storage state for role '{role}'"));
                    Ok(1)
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
                Err(e) => Err(Self::error(
                    role,
                    &path,
                    StorageStateCause::Invalid,
                    e.to_string(),
                )),
            };
        }

        let files = match self.json_files().await {
            Ok(files) => files,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(Self::error(
                    "*",
                    self.directory(),
                    StorageStateCause::Invalid,
                    e.to_string(),
                ))
            }
        };

        let mut deleted = 0;
        for path in files {
            match fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => self
                    .logger
                    .warn(&format!("failed to remove {}: {e}", path.display())),
            }
        }
        self.logger
            .info(&format!("cleared {deleted} storage state file(s)"));
        Ok(deleted)
    }

    /// Delete artifacts older than [`CLEANUP_MAX_AGE`].
    pub async fn cleanup_expired(&self) -> CleanupReport {
        self.cleanup_older_than(CLEANUP_MAX_AGE).await
    }

    pub async fn cleanup_older_than(&self, max_age: Duration) -> CleanupReport {
        self.cleanup_older_than_at(max_age, SystemTime::now()).await
    }

    /// Sweep the directory relative to `now`. Per-file failures are collected
    /// in the report; a missing directory yields an empty report.
    pub async fn cleanup_older_than_at(&self, max_age: Duration, now: SystemTime) -> CleanupReport {
        let mut report = CleanupReport::default();

        let files = match self.json_files().await {
            Ok(files) => files,
            Err(e) if e.kind() == ErrorKind::NotFound => return report,
            Err(e) => {
                report
                    .errors
                    .push(format!("{}: {e}", self.directory().display()));
                return report;
            }
        };

        for path in files {
            let modified = match fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    report.errors.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };
            if now.duration_since(modified).unwrap_or_default() <= max_age {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    report.deleted_count += 1;
                    report.deleted_files.push(path);
                }
                Err(e) => report.errors.push(format!("{}: {e}", path.display())),
            }
        }

        if report.deleted_count > 0 || !report.errors.is_empty() {
            self.logger.info(&format!(
                "cleanup removed {} file(s), {} error(s)",
                report.deleted_count,
                report.errors.len()
            ));
        }
        report
    }

    /// Every artifact whose name matches the file pattern, sorted by role.
    pub async fn list(&self) -> Vec<StorageStateMetadata> {
        let now = SystemTime::now();
        let Ok(files) = self.json_files().await else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for path in files {
            let Some(role) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| get_role_from_path(name, &self.config.file_pattern))
            else {
                continue;
            };
            let Ok(modified) = fs::metadata(&path).await.and_then(|m| m.modified()) else {
                continue;
            };
            entries.push(StorageStateMetadata {
                role,
                created_at: DateTime::<Utc>::from(modified),
                is_valid: self.is_path_valid_at(&path, now).await,
                path,
            });
        }
        entries.sort_by(|a, b| a.role.cmp(&b.role));
        entries
    }

    async fn json_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut dir = fs::read_dir(self.directory()).await?;
        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

async fn read_session(path: &Path) -> Result<StoredSession, (StorageStateCause, String)> {
    let raw = fs::read(path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            (StorageStateCause::Missing, "file does not exist".to_string())
        } else {
            (StorageStateCause::Invalid, e.to_string())
        }
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        (
            StorageStateCause::Corrupted,
            format!("expected {{cookies: [], origins: []}}: {e}"),
        )
    })
}

/// Role encoded in `file_name` according to `pattern`, e.g. `admin` for
/// `admin-staging.json` with `{role}-{env}.json`.
#[must_use]
pub fn get_role_from_path(file_name: &str, pattern: &str) -> Option<String> {
    let file_name = Path::new(file_name).file_name()?.to_str()?;
    let mut pattern = pattern.to_string();
    if !pattern.ends_with(JSON_SUFFIX) {
        pattern.push_str(JSON_SUFFIX);
    }

    let escaped = regex::escape(&pattern)
        .replacen(r"\{role\}", "(?P<role>.+?)", 1)
        .replace(r"\{role\}", ".+?")
        .replacen(r"\{env\}", "(?P<env>.+?)", 1)
        .replace(r"\{env\}", ".+?");

    Regex::new(&format!("^{escaped}$")).ok().and_then(|re| {
        re.captures(file_name)
            .and_then(|caps| caps.name("role"))
            .map(|role| role.as_str().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::mock::MockPage;
    use serde_json::json;
    use std::fs::File;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn store(dir: &TempDir, pattern: &str) -> StorageStateStore {
        StorageStateStore::new(
            StorageStateConfig {
                directory: dir.path().join(".auth-states"),
                max_age_minutes: 60,
                file_pattern: pattern.to_string(),
            },
            Logger::new("test"),
        )
    }

    fn epoch(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn write_aged(path: &Path, body: &str, mtime: SystemTime) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn path_substitutes_placeholders() {
        let dir = TempDir::new().unwrap();
        let plain = store(&dir, "{role}.json");
        assert!(plain.path_for("admin").ends_with(".auth-states/admin.json"));

        let with_env = store(&dir, "{role}-{env}").with_env(Some("staging".to_string()));
        assert!(with_env
            .path_for("admin")
            .ends_with(".auth-states/admin-staging.json"));

        let defaulted = store(&dir, "{role}-{env}.json");
        assert!(defaulted
            .path_for("admin")
            .ends_with(".auth-states/admin-default.json"));
    }

    #[test]
    fn role_from_path_inverts_pattern() {
        assert_eq!(
            get_role_from_path("admin-staging.json", "{role}-{env}.json").as_deref(),
            Some("admin")
        );
        assert_eq!(
            get_role_from_path("/tmp/x/viewer.json", "{role}.json").as_deref(),
            Some("viewer")
        );
        assert_eq!(
            get_role_from_path("auth-editor.json", "auth-{role}").as_deref(),
            Some("editor")
        );
        assert_eq!(get_role_from_path("notes.txt", "{role}.json"), None);
    }

    #[tokio::test]
    async fn save_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "{role}.json");
        let session = StoredSession {
            cookies: vec![json!({"name": "sid", "value": "1", "domain": "app.example.com"})],
            origins: vec![],
        };
        let page = MockPage::new("https://app.example.com/").with_session(session.clone());

        let path = store.save(&page, "admin").await.unwrap();
        assert_eq!(path, store.path_for("admin"));
        assert_eq!(store.read("admin").await.unwrap(), session);
        assert!(store.is_valid("admin").await);
        assert_eq!(store.load("admin").await, Some(path));

        let empty = StoredSession::default();
        store.write("viewer", &empty).await.unwrap();
        assert_eq!(store.read("viewer").await.unwrap(), empty);
    }

    #[tokio::test]
    async fn read_reports_cause() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "{role}.json");

        let missing = store.read("admin").await.unwrap_err();
        assert_eq!(missing.cause, StorageStateCause::Missing);

        write_aged(&store.path_for("admin"), r#"{"cookies": []}"#, SystemTime::now());
        let corrupted = store.read("admin").await.unwrap_err();
        assert_eq!(corrupted.cause, StorageStateCause::Corrupted);
        assert!(!store.is_valid("admin").await);

        write_aged(&store.path_for("admin"), "not json", SystemTime::now());
        assert_eq!(
            store.read("admin").await.unwrap_err().cause,
            StorageStateCause::Corrupted
        );
        assert_eq!(store.load("admin").await, None);
    }

    #[tokio::test]
    async fn validity_boundary_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "{role}.json");
        let written = epoch(1_700_000_000);
        write_aged(
            &store.path_for("admin"),
            r#"{"cookies": [], "origins": []}"#,
            written,
        );

        assert!(store.is_valid_at("admin", written + HOUR).await);
        assert!(
            !store
                .is_valid_at("admin", written + HOUR + Duration::from_millis(1))
                .await
        );
        assert!(!store.is_valid_at("viewer", written).await);
    }

    #[tokio::test]
    async fn cleanup_deletes_only_files_past_threshold() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "{role}.json");
        let now = epoch(1_700_000_000);
        let body = r#"{"cookies": [], "origins": []}"#;
        write_aged(&store.path_for("fresh"), body, now - HOUR);
        write_aged(&store.path_for("older"), body, now - 23 * HOUR);
        write_aged(&store.path_for("stale"), body, now - 25 * HOUR);

        let report = store.cleanup_older_than_at(CLEANUP_MAX_AGE, now).await;

        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.deleted_files, vec![store.path_for("stale")]);
        assert!(report.errors.is_empty());
        assert!(store.path_for("fresh").exists());
        assert!(store.path_for("older").exists());
    }

    #[tokio::test]
    async fn cleanup_of_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let report = store(&dir, "{role}.json").cleanup_expired().await;
        assert_eq!(report, CleanupReport::default());
    }

    #[tokio::test]
    async fn clear_by_role_and_all() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "{role}.json");
        let session = StoredSession::default();
        store.write("admin", &session).await.unwrap();
        store.write("viewer", &session).await.unwrap();
        std::fs::write(store.directory().join("README.txt"), "keep").unwrap();

        assert_eq!(store.clear(Some("admin")).await.unwrap(), 1);
        assert_eq!(store.clear(Some("admin")).await.unwrap(), 0);
        assert_eq!(store.clear(None).await.unwrap(), 1);
        assert!(store.directory().join("README.txt").exists());
    }

    #[tokio::test]
    async fn list_reports_roles_and_validity() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "{role}-{env}.json").with_env(Some("staging".to_string()));
        store
            .write("admin", &StoredSession::default())
            .await
            .unwrap();
        write_aged(
            &store.path_for("viewer"),
            r#"{"cookies": [], "origins": []}"#,
            SystemTime::now() - 2 * HOUR,
        );

        let entries = store.list().await;
        let summary: Vec<(&str, bool)> = entries
            .iter()
            .map(|e| (e.role.as_str(), e.is_valid))
            .collect();
        assert_eq!(summary, vec![("admin", true), ("viewer", false)]);
    }
}
