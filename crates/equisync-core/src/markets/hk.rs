use std::time::Duration;

use super::{
    cell, column_of, fetch_checked, find_header, sheet_rows, ListedInstrument, ListingFuture,
    MarketProfile, MarketStrategy,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::SourceError;
use crate::{FetchWindow, Market, Symbol};

const SECURITIES_LIST_URL: &str = "https://www.hkex.com.hk/-/media/HKEX-Market/Services/Trading/\
Securities/Securities-Lists/Securities-Using-Standard-Transfer-Form-(including-GEM)-By-Stock-Code-Order/secstkorder.xls";

/// Hong Kong: HKEX list of securities (Main Board and GEM).
#[derive(Debug, Clone, Copy, Default)]
pub struct HkStrategy;

fn parse_securities(rows: &[Vec<String>]) -> Result<Vec<ListedInstrument>, SourceError> {
    let (header, columns) = find_header(rows, &["Stock Code", "Short Name"], 20)
        .ok_or_else(|| SourceError::internal("hkex list has no Stock Code header"))?;
    let (code_col, name_col) = (columns[0], columns[1]);
    let category_col = column_of(rows, header, "Category");
    let sector_col = column_of(rows, header, "Sub-Category");

    Ok(rows[header + 1..]
        .iter()
        .filter(|row| category_col.map_or(true, |col| cell(row, col) == "Equity"))
        .filter(|row| !cell(row, code_col).is_empty())
        .map(|row| {
            ListedInstrument::new(
                cell(row, code_col),
                cell(row, name_col),
                "hkex",
                sector_col.map(|col| cell(row, col).to_string()),
            )
        })
        .collect())
}

impl MarketStrategy for HkStrategy {
    fn market(&self) -> Market {
        Market::Hk
    }

    fn profile(&self) -> MarketProfile {
        MarketProfile {
            expected_min: 2_000,
            fallback: &["0700.HK", "0005.HK"],
            concurrency: 5,
            ci_concurrency: 3,
            batch_size: None,
            batch_cooldown: Duration::ZERO,
            delay_ms: (200, 500),
            ci_delay_ms: (500, 800),
            timeout_ms: 20_000,
            full_window: FetchWindow::Period("max"),
        }
    }

    fn fetch_listing<'a>(&'a self, http: &'a dyn HttpClient) -> ListingFuture<'a> {
        Box::pin(async move {
            let request = HttpRequest::get(SECURITIES_LIST_URL)
                .with_browser_agent()
                .with_timeout_ms(30_000);
            let response = fetch_checked(http, request, "hkex").await?;
            let rows = sheet_rows(response.body, "hkex")?;
            parse_securities(&rows)
        })
    }

    fn normalize_symbol(&self, instrument: &ListedInstrument) -> Option<Symbol> {
        // Spreadsheet cells may carry the code as a float such as `700.0`.
        let raw = instrument.code.trim();
        let digits = raw.strip_suffix(".0").unwrap_or(raw);
        let code: u32 = digits.parse().ok()?;
        if !(1..=99_999).contains(&code) {
            return None;
        }
        Symbol::parse(&format!("{code:04}.HK")).ok()
    }
}
