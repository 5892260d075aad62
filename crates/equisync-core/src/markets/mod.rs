//! Per-market listing sources and symbol rules.
//!
//! Each market differs only in where its listing comes from, how raw exchange
//! codes become provider tickers, and a handful of tuning constants. Those
//! differences live behind [`MarketStrategy`]; the dispatcher and worker are
//! shared.
//!
//! | Market | Listing source | Ticker rule |
//! |--------|----------------|-------------|
//! | TW | TWSE ISIN pages | `{code}.TW` / `{code}.TWO` by board |
//! | US | Nasdaq screener | bare ticker |
//! | CN | Eastmoney A-share list | `6xxxxx.SS`, otherwise `.SZ` |
//! | HK | HKEX securities list | `{code:04}.HK` |
//! | JP | JPX listed issues | `{code}.T` |
//! | KR | KIND corporate list | `.KS` for KOSPI, `.KQ` for KOSDAQ |

mod cn;
mod hk;
mod jp;
mod kr;
mod tw;
mod us;

use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use calamine::{open_workbook_auto_from_rs, Reader};
use scraper::{Html, Selector};

use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::provider::SourceError;
use crate::{FetchWindow, Market, Symbol};

pub use cn::CnStrategy;
pub use hk::HkStrategy;
pub use jp::JpStrategy;
pub use kr::KrStrategy;
pub use tw::TwStrategy;
pub use us::UsStrategy;

/// Raw row from a listing source, before ticker normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedInstrument {
    /// Exchange code as published (`2330`, `00700`, `AAPL`).
    pub code: String,
    pub name: String,
    /// Board or segment the row came from (`listed`, `KOSDAQ`, `SSE`).
    pub segment: String,
    pub sector: Option<String>,
}

impl ListedInstrument {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        segment: impl Into<String>,
        sector: Option<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            segment: segment.into(),
            sector: sector.filter(|value| !value.trim().is_empty()),
        }
    }
}

/// Tuning constants for one market.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketProfile {
    /// Below this many resolved symbols the listing is treated as broken.
    pub expected_min: usize,
    /// Liquid symbols used when the listing is unusable.
    pub fallback: &'static [&'static str],
    pub concurrency: usize,
    pub ci_concurrency: usize,
    /// Symbols per batch, with `batch_cooldown` between batches.
    pub batch_size: Option<usize>,
    pub batch_cooldown: Duration,
    /// Pre-request delay range in milliseconds.
    pub delay_ms: (u64, u64),
    pub ci_delay_ms: (u64, u64),
    pub timeout_ms: u64,
    pub full_window: FetchWindow,
}

type ListingFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<ListedInstrument>, SourceError>> + Send + 'a>>;

/// The capability set that distinguishes one market from another.
pub trait MarketStrategy: Send + Sync {
    fn market(&self) -> Market;

    fn profile(&self) -> MarketProfile;

    /// Download the authoritative listing.
    fn fetch_listing<'a>(&'a self, http: &'a dyn HttpClient) -> ListingFuture<'a>;

    /// Provider ticker for a listing row, or `None` when the row is not a
    /// common stock this market syncs.
    fn normalize_symbol(&self, instrument: &ListedInstrument) -> Option<Symbol>;

    fn fetch_window_for(&self, is_first_run: bool) -> FetchWindow {
        if is_first_run {
            self.profile().full_window
        } else {
            FetchWindow::INCREMENTAL
        }
    }
}

/// Strategy for `market` with production listing sources.
pub fn strategy_for(market: Market) -> Arc<dyn MarketStrategy> {
    match market {
        Market::Tw => Arc::new(TwStrategy::default()),
        Market::Us => Arc::new(UsStrategy),
        Market::Cn => Arc::new(CnStrategy),
        Market::Hk => Arc::new(HkStrategy),
        Market::Jp => Arc::new(JpStrategy),
        Market::Kr => Arc::new(KrStrategy),
    }
}

const EXCLUDED_NAME_TOKENS: &[&str] = &[
    "WARRANT",
    "WARRANTS",
    "RIGHT",
    "RIGHTS",
    "UNIT",
    "UNITS",
    "PREFERRED",
    "DEPOSITARY",
    "ADR",
    "ADS",
    "FOREIGN",
    "DEBENTURE",
    "DEBENTURES",
    "ETF",
    "ETN",
];

/// Whether an instrument name marks a non-common-stock class.
///
/// Matching is by whole word so `UNITED` or `RIGHTMOVE` survive.
pub fn is_excluded_name(name: &str) -> bool {
    name.to_ascii_uppercase()
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .any(|token| EXCLUDED_NAME_TOKENS.contains(&token))
}

pub(crate) async fn fetch_checked(
    http: &dyn HttpClient,
    request: HttpRequest,
    source: &str,
) -> Result<HttpResponse, SourceError> {
    let response = http.execute(request).await.map_err(|e| {
        SourceError::unavailable(format!("{source} transport error: {}", e.message()))
    })?;

    match response.status {
        429 => Err(SourceError::rate_limited(format!("{source} rate limited"))),
        status if !response.is_success() => Err(SourceError::unavailable(format!(
            "{source} returned status {status}"
        ))),
        _ => Ok(response),
    }
}

/// Every `<table>` in `html` as rows of trimmed cell text.
pub(crate) fn html_tables(html: &str) -> Vec<Vec<Vec<String>>> {
    let document = Html::parse_document(html);
    let (Ok(table_selector), Ok(row_selector), Ok(cell_selector)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("td, th"),
    ) else {
        return Vec::new();
    };

    document
        .select(&table_selector)
        .map(|table| {
            table
                .select(&row_selector)
                .map(|row| {
                    row.select(&cell_selector)
                        .map(|cell| clean_cell(&cell.text().collect::<String>()))
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells.is_empty())
                .collect()
        })
        .collect()
}

/// First worksheet of an xls/xlsx workbook as rows of cell text.
pub(crate) fn sheet_rows(bytes: Vec<u8>, source: &str) -> Result<Vec<Vec<String>>, SourceError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| SourceError::internal(format!("{source} workbook unreadable: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SourceError::internal(format!("{source} workbook has no sheets")))?
        .map_err(|e| SourceError::internal(format!("{source} sheet unreadable: {e}")))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| clean_cell(&cell.to_string())).collect())
        .collect())
}

/// Locate the header row within the first `scan` rows: the first row where
/// every needle is contained in some cell. Returns the row index and the
/// column index of each needle.
pub(crate) fn find_header(
    rows: &[Vec<String>],
    needles: &[&str],
    scan: usize,
) -> Option<(usize, Vec<usize>)> {
    rows.iter().take(scan).enumerate().find_map(|(index, row)| {
        needles
            .iter()
            .map(|needle| row.iter().position(|cell| cell.contains(needle)))
            .collect::<Option<Vec<_>>>()
            .map(|columns| (index, columns))
    })
}

pub(crate) fn column_of(rows: &[Vec<String>], header_row: usize, needle: &str) -> Option<usize> {
    rows.get(header_row)?
        .iter()
        .position(|cell| cell.contains(needle))
}

pub(crate) fn cell(row: &[String], column: usize) -> &str {
    row.get(column).map_or("", String::as_str)
}

fn clean_cell(raw: &str) -> String {
    raw.replace('\u{a0}', " ").trim().to_string()
}

pub(crate) async fn pause_between(range_ms: (u64, u64)) {
    let (low, high) = range_ms;
    if high == 0 {
        return;
    }
    let delay = fastrand::u64(low..=high.max(low));
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
