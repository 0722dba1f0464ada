use alfred_runtime::Config;
use anyhow::Result;
use std::path::PathBuf;

/// Prints the effective configuration (on-disk, or the library defaults if
/// no file exists yet) as TOML.
pub fn handle(path: Option<&PathBuf>) -> Result<()> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
