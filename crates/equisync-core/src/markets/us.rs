use std::time::Duration;

use serde::Deserialize;
use time::macros::date;

use super::{fetch_checked, ListedInstrument, ListingFuture, MarketProfile, MarketStrategy};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::SourceError;
use crate::{FetchWindow, Market, Symbol};

const SCREENER_URL: &str =
    "https://api.nasdaq.com/api/screener/stocks?tableonly=true&limit=15000&download=true";
const SCREENER_REFERER: &str = "https://www.nasdaq.com/market-activity/stocks/screener";

/// United States: Nasdaq screener download (NYSE, NASDAQ, AMEX).
#[derive(Debug, Clone, Copy, Default)]
pub struct UsStrategy;

#[derive(Debug, Deserialize)]
struct ScreenerEnvelope {
    data: Option<ScreenerData>,
}

#[derive(Debug, Deserialize)]
struct ScreenerData {
    #[serde(default)]
    rows: Vec<ScreenerRow>,
}

#[derive(Debug, Deserialize)]
struct ScreenerRow {
    symbol: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    sector: Option<String>,
    /// Listing venue such as `NASDAQ` or `NYSE`; stored as the segment.
    #[serde(default)]
    exchange: Option<String>,
}

/// Exchange reported by the screener, or `Unknown` when it is blank.
fn exchange_segment(exchange: Option<&str>) -> String {
    match exchange.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_ascii_uppercase(),
        _ => String::from("Unknown"),
    }
}

fn parse_screener(body: &[u8]) -> Result<Vec<ListedInstrument>, SourceError> {
    let envelope: ScreenerEnvelope = serde_json::from_slice(body)
        .map_err(|e| SourceError::internal(format!("nasdaq screener payload: {e}")))?;
    let rows = envelope.data.map(|data| data.rows).unwrap_or_default();

    Ok(rows
        .into_iter()
        .map(|row| {
            let segment = exchange_segment(row.exchange.as_deref());
            ListedInstrument::new(row.symbol.trim(), row.name, segment, row.sector)
        })
        .collect())
}

impl MarketStrategy for UsStrategy {
    fn market(&self) -> Market {
        Market::Us
    }

    fn profile(&self) -> MarketProfile {
        MarketProfile {
            expected_min: 3_000,
            fallback: &["AAPL", "MSFT"],
            concurrency: 4,
            ci_concurrency: 3,
            batch_size: Some(200),
            batch_cooldown: Duration::from_secs(5),
            delay_ms: (20, 120),
            ci_delay_ms: (300, 800),
            timeout_ms: 30_000,
            full_window: FetchWindow::Since(date!(2010 - 01 - 01)),
        }
    }

    fn fetch_listing<'a>(&'a self, http: &'a dyn HttpClient) -> ListingFuture<'a> {
        Box::pin(async move {
            let request = HttpRequest::get(SCREENER_URL)
                .with_browser_agent()
                .with_header("accept", "application/json, text/plain, */*")
                .with_header("referer", SCREENER_REFERER)
                .with_timeout_ms(30_000);
            let response = fetch_checked(http, request, "nasdaq").await?;
            parse_screener(&response.body)
        })
    }

    fn normalize_symbol(&self, instrument: &ListedInstrument) -> Option<Symbol> {
        let ticker = instrument.code.trim().to_ascii_uppercase();
        if ticker.is_empty() || !ticker.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return None;
        }
        // Five-letter tickers ending in R/W/U are rights, warrants, and units.
        if ticker.len() > 4 && matches!(ticker.chars().last(), Some('R' | 'W' | 'U')) {
            return None;
        }
        if instrument.name.to_ascii_uppercase().contains("INDEX") {
            return None;
        }
        Symbol::parse(&ticker).ok()
    }
}
