use crate::{cli::globals::GlobalArgs, storage::CLEANUP_MAX_AGE};
use anyhow::Result;
use std::time::Duration;
use tracing::warn;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub max_age_hours: Option<u64>,
}

/// # Errors
/// Returns an error if the config cannot be loaded.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.globals.load_config()?;
    let store = args.globals.store(&config);
    let max_age = args.max_age_hours.map_or(CLEANUP_MAX_AGE, |hours| {
        Duration::from_secs(hours.saturating_mul(3_600))
    });

    let report = store.cleanup_older_than(max_age).await;
    for file in &report.deleted_files {
        println!("deleted {}", file.display());
    }
    for error in &report.errors {
        warn!("cleanup: {error}");
        eprintln!("error: {error}");
    }
    println!(
        "Removed {} stored session(s) older than {}h",
        report.deleted_count,
        max_age.as_secs() / 3_600
    );
    Ok(())
}
