use crate::cli::{
    actions::{check, cleanup, clear, list, status, totp, Action},
    globals::GlobalArgs,
};
use anyhow::{anyhow, Context, Result};

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let config = matches
        .get_one::<String>("config")
        .cloned()
        .context("missing required argument: --config")?;
    let globals = GlobalArgs::new(config).with_env(matches.get_one::<String>("env").cloned());

    let role = |sub: &clap::ArgMatches| -> Result<String> {
        sub.get_one::<String>("role")
            .cloned()
            .context("missing required argument: ROLE")
    };

    match matches.subcommand() {
        Some(("check", sub)) => Ok(Action::Check(check::Args {
            globals,
            roles: sub
                .get_many::<String>("role")
                .map(|roles| roles.cloned().collect())
                .unwrap_or_default(),
        })),
        Some(("list", _)) => Ok(Action::List(list::Args { globals })),
        Some(("status", sub)) => Ok(Action::Status(status::Args {
            globals,
            role: role(sub)?,
        })),
        Some(("clear", sub)) => Ok(Action::Clear(clear::Args {
            globals,
            role: sub.get_one::<String>("role").cloned(),
        })),
        Some(("cleanup", sub)) => Ok(Action::Cleanup(cleanup::Args {
            globals,
            max_age_hours: sub.get_one::<u64>("max-age-hours").copied(),
        })),
        Some(("totp", sub)) => Ok(Action::Totp(totp::Args {
            globals,
            role: role(sub)?,
        })),
        Some((name, _)) => Err(anyhow!("unknown subcommand: {name}")),
        None => Err(anyhow!("missing subcommand")),
    }
}
