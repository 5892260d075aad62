mod status;
mod sync;

use std::path::Path;

use equisync_core::{Market, MarketOutcome, MarketStatus, SyncConfig};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// What a command produced, ready for rendering.
pub enum CommandOutput {
    Sync(Vec<MarketOutcome>),
    Status(Vec<MarketStatus>),
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let mut config = SyncConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        let explicit_cache =
            std::env::var_os("EQUISYNC_CACHE_DIR").is_some_and(|value| !value.is_empty());
        apply_data_dir(&mut config, dir, explicit_cache);
    }

    match &cli.command {
        Command::Sync(args) => sync::run(config, args).await.map(CommandOutput::Sync),
        Command::Status(args) => status::run(&config, args).map(CommandOutput::Status),
    }
}

/// Point the run at `dir`. The artifact cache follows it unless a cache
/// directory was set explicitly or CI mode disabled the cache.
fn apply_data_dir(config: &mut SyncConfig, dir: &Path, explicit_cache: bool) {
    config.data_dir = dir.to_path_buf();
    if !config.ci_mode && !explicit_cache {
        config.cache_dir = Some(dir.join("cache"));
    }
}

/// The selected market, or every market in run order.
fn selected_markets(raw: Option<&str>) -> Result<Vec<Market>, CliError> {
    match raw {
        Some(value) => Ok(vec![Market::parse(value)?]),
        None => Ok(Market::ALL.to_vec()),
    }
}
