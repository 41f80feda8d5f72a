use crate::{cli::globals::GlobalArgs, credentials::ProcessEnv, totp::TotpEngine};
use anyhow::{Context, Result};

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub role: String,
}

/// Print the current code for the role's TOTP secret.
/// # Errors
/// Returns an error if the role has no TOTP secret configured or the secret
/// is unset or invalid.
pub fn execute(args: &Args) -> Result<()> {
    let config = args.globals.load_config()?;
    config.role(&args.role)?;
    let oidc = config.oidc_for(&args.role)?;
    let variable = oidc
        .mfa
        .totp_secret_env
        .as_deref()
        .with_context(|| format!("role '{}' has no mfa.totpSecretEnv", args.role))?;

    let engine = TotpEngine::default();
    let secret = TotpEngine::secret_from_env(&ProcessEnv, variable)?;
    let code = engine.generate_secret(&secret)?;

    println!("{code} (valid for {}s)", engine.time_until_next_window());
    Ok(())
}
