//! Per-market orchestration.
//!
//! One market run goes: restore from backup, open the store, pick the fetch
//! window, resolve the universe, dispatch, audit, optimize, summarize, back
//! up, report. Only failing to open the store (or the artifact directory)
//! aborts a market; every other step degrades and logs. Markets run one after
//! another and a failed market never stops the next.

use std::path::PathBuf;
use std::sync::Arc;

use equisync_warehouse::{
    database_file_name, AuditRecord, InstrumentRecord, SymbolArtifactStore, TableSummary,
    Warehouse, WarehouseConfig, WarehouseError,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::adapters::YahooAdapter;
use crate::audit::AuditRecorder;
use crate::backup::{restore_if_missing, with_retry, BackupStore, DirectoryBackup};
use crate::cache_gate::FreshnessSource;
use crate::config::SyncConfig;
use crate::dispatcher::Dispatcher;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::markets::{strategy_for, MarketStrategy};
use crate::provider::PriceProvider;
use crate::report::{EmailReporter, LogReporter, MarketReport, Reporter, TelegramReporter};
use crate::resolver::{resolve, Universe};
use crate::sink::WarehouseSink;
use crate::stats::RunStatistics;
use crate::worker::FetchWorker;
use crate::{CoreError, FetchWindow, Market};

/// Shared collaborators for a sequence of market runs.
pub struct SyncContext {
    pub config: SyncConfig,
    pub http: Arc<dyn HttpClient>,
    pub provider: Arc<dyn PriceProvider>,
    pub backup: Option<Arc<dyn BackupStore>>,
    pub reporters: Vec<Arc<dyn Reporter>>,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        http: Arc<dyn HttpClient>,
        provider: Arc<dyn PriceProvider>,
    ) -> Self {
        Self {
            config,
            http,
            provider,
            backup: None,
            reporters: Vec::new(),
        }
    }

    /// Production wiring: reqwest transport and Yahoo provider. Directory
    /// backup, Telegram and email are added when configured; the log reporter
    /// always runs.
    pub fn from_config(config: SyncConfig) -> Self {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        let provider: Arc<dyn PriceProvider> = Arc::new(YahooAdapter::new(Arc::clone(&http)));
        let backup = config
            .backup_dir
            .clone()
            .map(|dir| Arc::new(DirectoryBackup::new(dir)) as Arc<dyn BackupStore>);

        let mut reporters: Vec<Arc<dyn Reporter>> = vec![Arc::new(LogReporter)];
        if let Some(telegram) = &config.telegram {
            reporters.push(Arc::new(TelegramReporter::new(
                Arc::clone(&http),
                telegram.bot_token.clone(),
                telegram.chat_id.clone(),
            )));
        }
        if let Some(email) = &config.email {
            reporters.push(Arc::new(EmailReporter::new(
                Arc::clone(&http),
                email.api_key.clone(),
                email.from.clone(),
                email.to.clone(),
            )));
        }

        Self {
            config,
            http,
            provider,
            backup,
            reporters,
        }
    }

    pub fn with_backup(mut self, backup: Arc<dyn BackupStore>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }
}

/// Result of one market within a multi-market run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MarketOutcome {
    Completed(MarketReport),
    Failed { market: Market, error: String },
}

impl MarketOutcome {
    pub const fn market(&self) -> Market {
        match self {
            Self::Completed(report) => report.market,
            Self::Failed { market, .. } => *market,
        }
    }
}

/// Run every market in `markets` with its production strategy.
pub async fn sync_markets(ctx: &SyncContext, markets: &[Market]) -> Vec<MarketOutcome> {
    let strategies: Vec<Arc<dyn MarketStrategy>> =
        markets.iter().copied().map(strategy_for).collect();
    sync_strategies(ctx, &strategies).await
}

/// Run each strategy in turn, isolating failures per market.
pub async fn sync_strategies(
    ctx: &SyncContext,
    strategies: &[Arc<dyn MarketStrategy>],
) -> Vec<MarketOutcome> {
    let mut outcomes = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let market = strategy.market();
        match sync_market(ctx, strategy.as_ref()).await {
            Ok(report) => outcomes.push(MarketOutcome::Completed(report)),
            Err(error) => {
                tracing::error!(market = %market, %error, "market run aborted");
                outcomes.push(MarketOutcome::Failed {
                    market,
                    error: error.to_string(),
                });
            }
        }
    }
    outcomes
}

/// Synchronize one market end to end.
pub async fn sync_market(
    ctx: &SyncContext,
    strategy: &dyn MarketStrategy,
) -> Result<MarketReport, CoreError> {
    let market = strategy.market();
    let profile = strategy.profile();
    let config = &ctx.config;
    let db_name = database_file_name(market.code());
    let db_path = config.data_dir.join(&db_name);

    if let Some(backup) = &ctx.backup {
        if let Err(error) = restore_if_missing(
            backup.as_ref(),
            &db_name,
            &db_path,
            config.backup_attempts,
            config.backup_retry_delay,
        )
        .await
        {
            tracing::warn!(market = %market, %error, "backup restore skipped");
        }
    }

    let warehouse = Arc::new(Warehouse::open(WarehouseConfig::for_market(
        &config.data_dir,
        market.code(),
    ))?);
    let artifacts = match &config.cache_dir {
        Some(dir) => Some(SymbolArtifactStore::open(dir.join(market.code()))?),
        None => None,
    };

    let has_prices = warehouse.has_prices()?;
    let window = strategy.fetch_window_for(config.mode.wants_full_history(has_prices));
    tracing::info!(market = %market, window = %window, has_prices, "market run started");

    let universe = resolve(strategy, ctx.http.as_ref()).await;
    upsert_instruments(&warehouse, &universe);

    let stats = {
        let worker = FetchWorker::new(
            Arc::clone(&ctx.provider),
            config.retry,
            config.delay_ms(&profile),
            profile.timeout_ms,
        );
        let sink = WarehouseSink::new(Arc::clone(&warehouse), artifacts.clone());
        let mut dispatcher = Dispatcher::new(
            market,
            Arc::new(worker),
            Arc::new(sink),
            config.dispatch_plan(&profile),
        );
        if let Some(store) = artifacts {
            let source: Arc<dyn FreshnessSource> = Arc::new(store);
            dispatcher = dispatcher.with_cache(config.cache_gate(), source);
        }
        dispatcher.run(&universe.symbols, window).await
    };

    let recorder = AuditRecorder::new(Arc::clone(&warehouse));
    if let Err(error) = recorder.record(market, &stats, OffsetDateTime::now_utc()) {
        tracing::error!(market = %market, %error, "audit append failed");
    }
    if let Err(error) = warehouse.optimize() {
        tracing::warn!(market = %market, %error, "optimize skipped");
    }

    let (summary, names_synced) = report_totals(
        market,
        warehouse.read_summary(),
        warehouse.instrument_count(),
    );
    drop(recorder);
    warehouse.release();
    drop(warehouse);

    if let Some(backup) = &ctx.backup {
        upload_backup(ctx, backup.as_ref(), market, &db_name, db_path).await;
    }

    let report = build_report(
        profile.expected_min,
        &universe,
        &stats,
        &summary,
        names_synced,
        window,
    );
    for reporter in &ctx.reporters {
        if let Err(error) = reporter.deliver(&report).await {
            tracing::warn!(
                market = %market,
                reporter = reporter.name(),
                %error,
                "report delivery failed"
            );
        }
    }
    Ok(report)
}

fn upsert_instruments(warehouse: &Warehouse, universe: &Universe) {
    if universe.instruments.is_empty() {
        return;
    }
    let records: Vec<InstrumentRecord> = universe
        .instruments
        .iter()
        .map(|instrument| InstrumentRecord {
            symbol: instrument.symbol.to_string(),
            name: instrument.name.clone(),
            sector: instrument.sector.clone(),
            market: instrument.segment.clone(),
        })
        .collect();

    match warehouse.upsert_instruments(&records) {
        Ok(written) => tracing::debug!(market = %universe.market, written, "instruments upserted"),
        Err(error) => tracing::warn!(market = %universe.market, %error, "instrument upsert failed"),
    }
}

async fn upload_backup(
    ctx: &SyncContext,
    backup: &dyn BackupStore,
    market: Market,
    db_name: &str,
    db_path: PathBuf,
) {
    let bytes = match tokio::fs::read(&db_path).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(market = %market, %error, "database unreadable, backup skipped");
            return;
        }
    };
    let uploaded = with_retry(
        db_name,
        ctx.config.backup_attempts,
        ctx.config.backup_retry_delay,
        || backup.upload(db_name, &bytes),
    )
    .await;
    match uploaded {
        Ok(()) => tracing::info!(market = %market, bytes = bytes.len(), "database backed up"),
        Err(error) => tracing::error!(market = %market, %error, "backup upload failed"),
    }
}

/// Store totals for the report. Prices are already written at this point,
/// so a failed read degrades to zeros instead of failing the market.
fn report_totals(
    market: Market,
    summary: Result<TableSummary, WarehouseError>,
    names: Result<u64, WarehouseError>,
) -> (TableSummary, u64) {
    let summary = summary.unwrap_or_else(|error| {
        tracing::warn!(market = %market, %error, "store summary unreadable");
        TableSummary::default()
    });
    let names = names.unwrap_or_else(|error| {
        tracing::warn!(market = %market, %error, "instrument count unreadable");
        0
    });
    (summary, names)
}

fn build_report(
    expected_min: usize,
    universe: &Universe,
    stats: &RunStatistics,
    summary: &TableSummary,
    names_synced: u64,
    window: FetchWindow,
) -> MarketReport {
    let success_count = stats.success + stats.cache_hit;
    MarketReport {
        market: stats.market,
        expected_min,
        success_count,
        total: stats.total,
        coverage_pct: stats.success_rate(),
        latest_date: summary.max_date.clone(),
        total_rows: summary.row_count,
        names_synced,
        status: MarketReport::status_for(success_count, expected_min),
        used_fallback: universe.used_fallback,
        window,
        failed_symbols: stats.failed_symbols.clone(),
    }
}

/// Stored state of one market, without running anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketStatus {
    pub market: Market,
    pub db_path: PathBuf,
    pub exists: bool,
    pub summary: Option<TableSummary>,
    pub names: u64,
    pub last_audit: Option<AuditRecord>,
}

pub fn market_status(config: &SyncConfig, market: Market) -> Result<MarketStatus, CoreError> {
    let warehouse_config = WarehouseConfig::for_market(&config.data_dir, market.code());
    let db_path = warehouse_config.db_path.clone();
    if !db_path.exists() {
        return Ok(MarketStatus {
            market,
            db_path,
            exists: false,
            summary: None,
            names: 0,
            last_audit: None,
        });
    }

    let warehouse = Warehouse::open(warehouse_config)?;
    Ok(MarketStatus {
        market,
        db_path,
        exists: true,
        summary: Some(warehouse.read_summary()?),
        names: warehouse.instrument_count()?,
        last_audit: warehouse.audit_history(1)?.into_iter().next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Symbol;

    fn fallback_universe() -> Universe {
        Universe {
            market: Market::Hk,
            symbols: vec![Symbol::parse("0700.HK").expect("valid symbol")],
            instruments: Vec::new(),
            raw_count: 0,
            used_fallback: true,
        }
    }

    #[test]
    fn unreadable_totals_still_produce_a_report() {
        let mut stats = RunStatistics::new(Market::Hk, 4);
        stats.success = 3;
        stats.error = 1;

        let (summary, names) = report_totals(
            Market::Hk,
            Err(WarehouseError::InvalidData(String::from("summary query failed"))),
            Err(WarehouseError::InvalidData(String::from("count query failed"))),
        );
        let report = build_report(
            2,
            &fallback_universe(),
            &stats,
            &summary,
            names,
            FetchWindow::INCREMENTAL,
        );

        assert_eq!(report.success_count, 3);
        assert_eq!(report.total_rows, 0);
        assert_eq!(report.names_synced, 0);
        assert_eq!(report.latest_date, None);
        assert_eq!(report.status, crate::ReportStatus::Healthy);
    }

    #[test]
    fn readable_totals_pass_through() {
        let stored = TableSummary {
            distinct_symbol_count: 2,
            max_date: Some(String::from("2024-01-12")),
            row_count: 40,
        };

        let (summary, names) = report_totals(Market::Hk, Ok(stored.clone()), Ok(7));

        assert_eq!(summary, stored);
        assert_eq!(names, 7);
    }
}
