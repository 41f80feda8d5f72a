use crate::{cli::globals::GlobalArgs, credentials::format_missing};
use anyhow::{anyhow, Result};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    /// Empty means every configured role.
    pub roles: Vec<String>,
}

/// Credential pre-flight: report every unset variable at once.
/// # Errors
/// Returns an error if the config cannot be loaded or any credential is missing.
pub fn execute(args: &Args) -> Result<()> {
    let config = args.globals.load_config()?;
    let roles = if args.roles.is_empty() {
        config.role_names()
    } else {
        args.roles.clone()
    };

    let issues = args.globals.resolver(config).validate(&roles);
    println!("{}", format_missing(&issues));

    if issues.is_empty() {
        info!("credentials present for {} role(s)", roles.len());
        Ok(())
    } else {
        Err(anyhow!("{} credential issue(s) found", issues.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("auth.config.json");
        std::fs::write(
            &path,
            r#"{
                "provider": "custom",
                "roles": {
                    "admin": {"credentialsEnv": {"username": "CHECK_ADMIN_USER", "password": "CHECK_ADMIN_PASS"}}
                }
            }"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_check_passes_with_credentials() {
        let dir = TempDir::new().unwrap();
        let args = Args {
            globals: GlobalArgs::new(config_file(&dir)),
            roles: Vec::new(),
        };
        temp_env::with_vars(
            [
                ("CHECK_ADMIN_USER", Some("alice")),
                ("CHECK_ADMIN_PASS", Some("pw")),
            ],
            || assert!(execute(&args).is_ok()),
        );
    }

    #[test]
    fn test_check_fails_on_missing_and_unknown() {
        let dir = TempDir::new().unwrap();
        let args = Args {
            globals: GlobalArgs::new(config_file(&dir)),
            roles: vec!["admin".to_string(), "ghost".to_string()],
        };
        temp_env::with_vars(
            [
                ("CHECK_ADMIN_USER", Some("alice")),
                ("CHECK_ADMIN_PASS", None),
            ],
            || {
                let err = execute(&args).unwrap_err();
                assert_eq!(err.to_string(), "2 credential issue(s) found");
            },
        );
    }
}
