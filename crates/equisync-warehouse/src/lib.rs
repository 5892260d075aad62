//! # Equisync Warehouse
//!
//! One `DuckDB` file per market holding daily prices, the instrument
//! registry, and the append-only sync audit log.
//!
//! ## Tables
//!
//! | Table | Key | Description |
//! |-------|-----|-------------|
//! | `stock_prices` | `(date, symbol)` | Daily OHLCV rows, upserted |
//! | `stock_info` | `symbol` | Instrument names and sectors |
//! | `sync_audit` | none | One row per completed run, never updated |
//!
//! Every write goes through parameterized statements inside a transaction, so
//! replaying the same rows leaves the table unchanged.
//!
//! ```rust,no_run
//! use equisync_warehouse::{PriceRecord, Warehouse, WarehouseConfig};
//!
//! let warehouse = Warehouse::open(WarehouseConfig::for_market("/tmp/equisync", "tw"))?;
//! warehouse.upsert_prices(&[PriceRecord {
//!     date: String::from("2024-01-10"),
//!     symbol: String::from("2330.TW"),
//!     open: 580.0,
//!     high: 590.0,
//!     low: 575.0,
//!     close: 588.0,
//!     volume: 25_000_000,
//! }])?;
//! # Ok::<(), equisync_warehouse::WarehouseError>(())
//! ```
//!
//! The [`artifacts`] module keeps the alternative per-symbol CSV layout with
//! the same upsert contract.

pub mod artifacts;
pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, ToSql};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use artifacts::{ArtifactMeta, SymbolArtifactStore};
pub use duckdb::{AccessMode, DuckDbConnectionManager, PooledConnection};

/// Errors raised by the market store and the artifact layout.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// A row failed the store's own integrity checks and nothing was written.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Location and pooling settings for one market store.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for all equisync data.
    pub data_dir: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum idle connections kept per access mode.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    /// Store for `market` (a lower-case market code) under `data_dir`.
    pub fn for_market(data_dir: impl Into<PathBuf>, market: &str) -> Self {
        let data_dir = data_dir.into();
        let db_path = data_dir.join(database_file_name(market));
        Self {
            data_dir,
            db_path,
            max_pool_size: 2,
        }
    }
}

/// File name of the store for `market`, also used as the backup object name.
pub fn database_file_name(market: &str) -> String {
    format!("{}_stock_warehouse.duckdb", market.to_ascii_lowercase())
}

/// One stored trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Calendar date as `YYYY-MM-DD`.
    pub date: String,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceRecord {
    /// `low <= open, close <= high` with every price strictly positive.
    pub fn has_valid_ohlc(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|value| value.is_finite() && *value > 0.0)
            && self.low <= self.high
            && (self.low..=self.high).contains(&self.open)
            && (self.low..=self.high).contains(&self.close)
    }
}

/// Registry entry for a resolved instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentRecord {
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub market: String,
}

/// Audit projection of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub run_id: String,
    /// RFC 3339 timestamp in the reporting offset.
    pub recorded_at: String,
    pub market: String,
    pub total: u64,
    pub success: u64,
    pub fail: u64,
    pub cache_hit: u64,
    pub empty: u64,
    /// Percentage in `0.0..=100.0`.
    pub success_rate: f64,
    pub duration_ms: u64,
}

/// Aggregate view of `stock_prices`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub distinct_symbol_count: u64,
    pub max_date: Option<String>,
    pub row_count: u64,
}

/// Handle to one market's store.
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open (creating if needed) the store described by `config` and bring its
    /// schema up to date.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn data_dir(&self) -> &Path {
        self.config.data_dir.as_path()
    }

    /// Release pooled connections so the database file can be copied.
    pub fn release(&self) {
        self.manager.close_idle();
    }

    /// Insert or overwrite rows keyed by `(date, symbol)`.
    ///
    /// The batch is all-or-nothing: one invalid row rejects the whole call.
    pub fn upsert_prices(&self, rows: &[PriceRecord]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        if let Some(bad) = rows.iter().find(|row| !row.has_valid_ohlc()) {
            return Err(WarehouseError::InvalidData(format!(
                "{} on {} violates OHLC bounds",
                bad.symbol, bad.date
            )));
        }

        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let mut statement = connection.prepare(
                "INSERT OR REPLACE INTO stock_prices \
                 (date, symbol, open, high, low, close, volume, updated_at) \
                 VALUES (CAST(? AS DATE), ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
            )?;
            for row in rows {
                let volume = i64::try_from(row.volume).map_err(|_| {
                    WarehouseError::InvalidData(format!("volume overflow for {}", row.symbol))
                })?;
                let params: [&dyn ToSql; 7] = [
                    &row.date,
                    &row.symbol,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &volume,
                ];
                statement.execute(params.as_slice())?;
            }
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Refresh instrument names and sectors.
    pub fn upsert_instruments(&self, rows: &[InstrumentRecord]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let mut statement = connection.prepare(
                "INSERT OR REPLACE INTO stock_info (symbol, name, sector, market, updated_at) \
                 VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)",
            )?;
            for row in rows {
                let params: [&dyn ToSql; 4] = [&row.symbol, &row.name, &row.sector, &row.market];
                statement.execute(params.as_slice())?;
            }
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Append one audit row. Existing rows are never touched.
    pub fn append_audit(&self, record: &AuditRecord) -> Result<(), WarehouseError> {
        let counts = [
            record.total,
            record.success,
            record.fail,
            record.cache_hit,
            record.empty,
            record.duration_ms,
        ]
        .map(|value| i64::try_from(value).unwrap_or(i64::MAX));

        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 10] = [
            &record.run_id,
            &record.recorded_at,
            &record.market,
            &counts[0],
            &counts[1],
            &counts[2],
            &counts[3],
            &counts[4],
            &record.success_rate,
            &counts[5],
        ];
        connection.execute(
            "INSERT INTO sync_audit \
             (run_id, recorded_at, market, total, success, fail, cache_hit, empty, success_rate, duration_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Most recent audit rows, newest first.
    pub fn audit_history(&self, limit: usize) -> Result<Vec<AuditRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut statement = connection.prepare(
            "SELECT run_id, recorded_at, market, total, success, fail, cache_hit, empty, \
             success_rate, duration_ms FROM sync_audit ORDER BY recorded_at DESC LIMIT ?",
        )?;
        let rows = statement.query_map([limit], |row| {
            Ok(AuditRecord {
                run_id: row.get(0)?,
                recorded_at: row.get(1)?,
                market: row.get(2)?,
                total: non_negative(row.get(3)?),
                success: non_negative(row.get(4)?),
                fail: non_negative(row.get(5)?),
                cache_hit: non_negative(row.get(6)?),
                empty: non_negative(row.get(7)?),
                success_rate: row.get(8)?,
                duration_ms: non_negative(row.get(9)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(WarehouseError::from)
    }

    pub fn read_summary(&self) -> Result<TableSummary, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let summary = connection.query_row(
            "SELECT COUNT(DISTINCT symbol), CAST(MAX(date) AS VARCHAR), COUNT(*) FROM stock_prices",
            [],
            |row| {
                Ok(TableSummary {
                    distinct_symbol_count: non_negative(row.get(0)?),
                    max_date: row.get(1)?,
                    row_count: non_negative(row.get(2)?),
                })
            },
        )?;
        Ok(summary)
    }

    /// Whether any price row exists; an empty store means a first run.
    pub fn has_prices(&self) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let exists: bool =
            connection.query_row("SELECT EXISTS (SELECT 1 FROM stock_prices)", [], |row| {
                row.get(0)
            })?;
        Ok(exists)
    }

    pub fn instrument_count(&self) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM stock_info", [], |row| row.get(0))?;
        Ok(non_negative(count))
    }

    /// Stored rows for one symbol in date order.
    pub fn prices_for(&self, symbol: &str) -> Result<Vec<PriceRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        read_prices(&connection, symbol)
    }

    /// Post-run housekeeping. Compaction failures do not affect stored data.
    pub fn optimize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("VACUUM; CHECKPOINT;")?;
        Ok(())
    }
}

fn read_prices(connection: &Connection, symbol: &str) -> Result<Vec<PriceRecord>, WarehouseError> {
    let mut statement = connection.prepare(
        "SELECT CAST(date AS VARCHAR), symbol, open, high, low, close, volume \
         FROM stock_prices WHERE symbol = ? ORDER BY date",
    )?;
    let rows = statement.query_map([symbol], |row| {
        Ok(PriceRecord {
            date: row.get(0)?,
            symbol: row.get(1)?,
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            close: row.get(5)?,
            volume: non_negative(row.get(6)?),
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(WarehouseError::from)
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// `EQUISYNC_HOME`, else `~/.equisync`.
pub fn resolve_equisync_home() -> PathBuf {
    if let Some(path) = env::var_os("EQUISYNC_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".equisync");
    }

    PathBuf::from(".equisync")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(date: &str, close: f64) -> PriceRecord {
        PriceRecord {
            date: date.to_string(),
            symbol: String::from("2330.TW"),
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close,
            volume: 1_000,
        }
    }

    fn open_store(dir: &Path) -> Warehouse {
        Warehouse::open(WarehouseConfig::for_market(dir, "tw")).expect("warehouse open")
    }

    #[test]
    fn market_store_file_is_named_after_market() {
        let config = WarehouseConfig::for_market("/data", "KR");
        assert_eq!(config.db_path, PathBuf::from("/data/kr_stock_warehouse.duckdb"));
    }

    #[test]
    fn upsert_overwrites_existing_date_symbol_pair() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_store(temp.path());

        warehouse
            .upsert_prices(&[row("2024-01-02", 100.0)])
            .expect("first upsert");
        warehouse
            .upsert_prices(&[row("2024-01-02", 105.0)])
            .expect("second upsert");

        let stored = warehouse.prices_for("2330.TW").expect("read");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].close, 105.0);
        assert_eq!(stored[0].date, "2024-01-02");
    }

    #[test]
    fn invalid_row_rejects_whole_batch() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_store(temp.path());

        let mut broken = row("2024-01-03", 100.0);
        broken.low = 120.0;
        let error = warehouse
            .upsert_prices(&[row("2024-01-02", 100.0), broken])
            .expect_err("must reject");

        assert!(matches!(error, WarehouseError::InvalidData(_)));
        assert!(!warehouse.has_prices().expect("exists query"));
    }

    #[test]
    fn summary_of_empty_store_has_no_max_date() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_store(temp.path());

        let summary = warehouse.read_summary().expect("summary");
        assert_eq!(summary.row_count, 0);
        assert_eq!(summary.distinct_symbol_count, 0);
        assert_eq!(summary.max_date, None);
    }

    #[test]
    fn instruments_are_replaced_by_symbol() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_store(temp.path());
        let mut record = InstrumentRecord {
            symbol: String::from("2330.TW"),
            name: String::from("TSMC"),
            sector: None,
            market: String::from("tw"),
        };

        warehouse.upsert_instruments(&[record.clone()]).expect("first");
        record.sector = Some(String::from("Semiconductors"));
        warehouse.upsert_instruments(&[record]).expect("second");

        assert_eq!(warehouse.instrument_count().expect("count"), 1);
    }

    #[test]
    fn optimize_keeps_rows() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_store(temp.path());
        warehouse
            .upsert_prices(&[row("2024-01-02", 100.0), row("2024-01-03", 101.0)])
            .expect("upsert");

        warehouse.optimize().expect("optimize");

        assert_eq!(warehouse.read_summary().expect("summary").row_count, 2);
    }
}
