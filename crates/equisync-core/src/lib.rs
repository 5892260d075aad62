//! Core pipeline for equisync.
//!
//! This crate contains:
//! - Domain values (markets, symbols, validated price rows)
//! - The HTTP transport contract and the Yahoo chart adapter
//! - Per-market listing strategies and the universe resolver
//! - Cache gate, fetch worker, and the bounded concurrent dispatcher
//! - Audit recording, configuration, and per-market orchestration
//! - Backup and report collaborators

pub mod adapters;
pub mod audit;
pub mod backup;
pub mod cache_gate;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod markets;
pub mod pipeline;
pub mod provider;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod sink;
pub mod stats;
pub mod worker;

pub use adapters::YahooAdapter;
pub use audit::{audit_record, AuditRecorder, REPORT_OFFSET};
pub use backup::{BackupError, BackupStore, DirectoryBackup};
pub use cache_gate::{CacheEntry, CacheGate, FreshnessSource};
pub use config::{EmailConfig, RunMode, SyncConfig, TelegramConfig};
pub use dispatcher::{DispatchPlan, Dispatcher};
pub use domain::{FetchWindow, Market, PriceRow, Symbol};
pub use error::{CoreError, ValidationError};
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use markets::{strategy_for, ListedInstrument, MarketProfile, MarketStrategy};
pub use pipeline::{
    market_status, sync_market, sync_markets, sync_strategies, MarketOutcome, MarketStatus,
    SyncContext,
};
pub use provider::{HistoryRequest, PriceProvider, SourceError, SourceErrorKind};
pub use report::{
    EmailReporter, LogReporter, MarketReport, ReportStatus, Reporter, TelegramReporter,
};
pub use resolver::{resolve, Universe};
pub use retry::{Backoff, RetryPolicy};
pub use sink::{PriceSink, WarehouseSink};
pub use stats::{FailedSymbol, RunStatistics};
pub use worker::{FailureKind, FetchFailure, FetchOutcome, FetchWorker};
