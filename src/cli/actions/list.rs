use crate::cli::globals::GlobalArgs;
use anyhow::Result;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
}

/// # Errors
/// Returns an error if the config cannot be loaded.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.globals.load_config()?;
    let store = args.globals.store(&config);
    let entries = store.list().await;

    debug!(
        "{} storage state file(s) in {}",
        entries.len(),
        store.directory().display()
    );
    if entries.is_empty() {
        println!("No stored sessions in {}", store.directory().display());
        return Ok(());
    }

    for entry in entries {
        println!(
            "{:<20} {:<8} {}  {}",
            entry.role,
            if entry.is_valid { "valid" } else { "expired" },
            entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.path.display()
        );
    }
    Ok(())
}
