use equisync_core::{market_status, MarketStatus, SyncConfig};

use super::selected_markets;
use crate::cli::StatusArgs;
use crate::error::CliError;

pub fn run(config: &SyncConfig, args: &StatusArgs) -> Result<Vec<MarketStatus>, CliError> {
    selected_markets(args.market.as_deref())?
        .into_iter()
        .map(|market| market_status(config, market).map_err(CliError::from))
        .collect()
}
