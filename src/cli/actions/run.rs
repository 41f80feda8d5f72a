use crate::cli::actions::{check, cleanup, clear, list, status, totp, Action};
use anyhow::Result;

/// Execute the provided action.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Check(args) => check::execute(&args),
        Action::List(args) => list::execute(args).await,
        Action::Status(args) => status::execute(args).await,
        Action::Clear(args) => clear::execute(args).await,
        Action::Cleanup(args) => cleanup::execute(args).await,
        Action::Totp(args) => totp::execute(&args),
    }
}
