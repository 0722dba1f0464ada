use crate::args::{Cli, Commands};
use crate::handlers;
use alfred_runtime::Config;
use anyhow::Result;

pub fn run(cli: Cli) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };

    match cli.command {
        Commands::Init { force, users } => handlers::init::handle(&config_path, users, force),
        Commands::Config => handlers::config_show::handle(cli.config.as_ref()),
        Commands::Serve { addr } => {
            let config = Config::load_from(&config_path)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(handlers::serve::handle(config, &addr))
        }
    }
}
