use crate::{cli::globals::GlobalArgs, error::StorageStateCause};
use anyhow::Result;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub role: String,
}

/// # Errors
/// Returns an error if the config cannot be loaded, the role is unknown or
/// the stored file cannot be read for reasons other than being absent.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.globals.load_config()?;
    config.role(&args.role)?;
    let store = args.globals.store(&config);
    let path = store.path_for(&args.role);

    match store.read(&args.role).await {
        Ok(session) => {
            let valid = store.is_valid(&args.role).await;
            println!("role:     {}", args.role);
            println!("path:     {}", path.display());
            println!("valid:    {valid}");
            println!("cookies:  {}", session.cookies.len());
            println!("origins:  {}", session.origins.len());
            Ok(())
        }
        Err(e) if e.cause == StorageStateCause::Missing => {
            println!("No stored session for role '{}' ({})", args.role, path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
