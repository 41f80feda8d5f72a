pub mod check;
pub mod cleanup;
pub mod clear;
pub mod list;
pub mod status;
pub mod totp;

// Single `match` over every action lives in `run`.
mod run;

#[derive(Debug)]
pub enum Action {
    Check(check::Args),
    List(list::Args),
    Status(status::Args),
    Clear(clear::Args),
    Cleanup(cleanup::Args),
    Totp(totp::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
