use alfred_runtime::Config;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// Writes a default `config.toml` (§6.6) to `path`, seeded with `users`.
/// Refuses to clobber an existing file unless `force` is set.
pub fn handle(path: &PathBuf, users: Vec<String>, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }

    let mut config = Config::default();
    config.users = users;
    config.save_to(path)?;

    println!("wrote {}", path.display());
    if config.users.is_empty() {
        println!("no users configured yet; edit `users = [...]` before running `alfred serve`");
    }
    Ok(())
}
