use crate::cli::globals::GlobalArgs;
use anyhow::Result;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    /// `None` clears every stored session.
    pub role: Option<String>,
}

/// # Errors
/// Returns an error if the config cannot be loaded or a file cannot be removed.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.globals.load_config()?;
    let store = args.globals.store(&config);
    let deleted = store.clear(args.role.as_deref()).await?;

    info!("cleared {deleted} stored session(s)");
    match args.role {
        Some(role) => println!("Cleared {deleted} stored session(s) for role '{role}'"),
        None => println!("Cleared {deleted} stored session(s)"),
    }
    Ok(())
}
