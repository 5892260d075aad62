use equisync_core::{sync_markets, MarketOutcome, SyncConfig, SyncContext};

use super::selected_markets;
use crate::cli::SyncArgs;
use crate::error::CliError;

pub async fn run(mut config: SyncConfig, args: &SyncArgs) -> Result<Vec<MarketOutcome>, CliError> {
    let markets = selected_markets(args.market.as_deref())?;

    config.mode = args.mode.into();
    if args.no_cache {
        config.cache_dir = None;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency_override = Some(usize::from(concurrency));
    }

    tracing::info!(
        markets = ?markets,
        data_dir = %config.data_dir.display(),
        ci_mode = config.ci_mode,
        cache = config.cache_dir.is_some(),
        "sync started"
    );

    let context = SyncContext::from_config(config);
    Ok(sync_markets(&context, &markets).await)
}
