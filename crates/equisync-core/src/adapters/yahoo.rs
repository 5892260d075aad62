use std::collections::BTreeMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use time::{Date, OffsetDateTime, Time};

use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{HistoryRequest, PriceProvider, SourceError};
use crate::{FetchWindow, PriceRow, Symbol};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_REQUESTS_PER_SECOND: u32 = 8;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Daily history from the Yahoo Finance v8 chart endpoint.
///
/// One adapter is shared by every market in a process, so its rate limiter
/// caps the combined request rate even when several dispatchers run at once.
#[derive(Clone)]
pub struct YahooAdapter {
    http_client: Arc<dyn HttpClient>,
    limiter: Arc<DirectRateLimiter>,
    base_url: String,
}

impl YahooAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_rate_limit(http_client, DEFAULT_REQUESTS_PER_SECOND)
    }

    pub fn with_rate_limit(http_client: Arc<dyn HttpClient>, requests_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            http_client,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            base_url: String::from(DEFAULT_BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn chart_url(&self, symbol: &Symbol, window: FetchWindow, now: OffsetDateTime) -> String {
        let span = match window {
            FetchWindow::Period(period) => format!("range={period}"),
            FetchWindow::Since(start) => format!(
                "period1={}&period2={}",
                start.with_time(Time::MIDNIGHT).assume_utc().unix_timestamp(),
                now.unix_timestamp()
            ),
        };
        format!(
            "{}/v8/finance/chart/{}?{}&interval=1d&events=div%2Csplit&includeAdjustedClose=true",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(symbol.as_str()),
            span
        )
    }

    async fn fetch_history(&self, request: HistoryRequest) -> Result<Vec<PriceRow>, SourceError> {
        self.limiter.until_ready().await;

        let url = self.chart_url(&request.symbol, request.window, OffsetDateTime::now_utc());
        let response = self
            .http_client
            .execute(
                HttpRequest::get(url)
                    .with_header("referer", "https://finance.yahoo.com/")
                    .with_browser_agent()
                    .with_timeout_ms(request.timeout_ms),
            )
            .await
            .map_err(|e| {
                if e.retryable() {
                    SourceError::unavailable(format!("yahoo transport error: {}", e.message()))
                } else {
                    SourceError::internal(format!("yahoo transport error: {}", e.message()))
                }
            })?;

        match response.status {
            429 => {
                return Err(SourceError::rate_limited(format!(
                    "yahoo rate limited {}",
                    request.symbol
                )))
            }
            404 => return Ok(Vec::new()),
            status if status >= 500 => {
                return Err(SourceError::unavailable(format!(
                    "yahoo returned status {status}"
                )))
            }
            status if !response.is_success() => {
                return Err(SourceError::invalid_request(format!(
                    "yahoo returned status {status}"
                )))
            }
            _ => {}
        }

        let body = response.text();
        let chart: ChartResponse = serde_json::from_str(&body).map_err(|e| {
            // Throttled responses sometimes arrive as a 200 with a plain-text body.
            if body.contains("Too Many Requests") {
                SourceError::rate_limited("yahoo rate limited (plain-text body)")
            } else {
                SourceError::internal(format!("failed to parse yahoo chart: {e}"))
            }
        })?;

        normalize_chart(&request.symbol, chart)
    }
}

impl PriceProvider for YahooAdapter {
    fn id(&self) -> &'static str {
        "yahoo"
    }

    fn history<'a>(
        &'a self,
        request: HistoryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PriceRow>, SourceError>> + Send + 'a>> {
        Box::pin(self.fetch_history(request))
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
    #[serde(default)]
    adjclose: Vec<ChartAdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ChartAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Turn a chart payload into validated daily rows.
///
/// Timestamps are shifted into the exchange's own offset before the date is
/// taken, prices are scaled by the adjusted-close ratio, rows with gaps or
/// broken OHLC bounds are dropped, and a repeated date keeps its last row.
fn normalize_chart(symbol: &Symbol, chart: ChartResponse) -> Result<Vec<PriceRow>, SourceError> {
    if let Some(error) = chart.chart.error {
        if error.code.eq_ignore_ascii_case("Not Found") {
            return Ok(Vec::new());
        }
        return Err(SourceError::unavailable(format!(
            "yahoo chart error {}: {}",
            error.code, error.description
        )));
    }

    let Some(result) = chart.chart.result.and_then(|mut results| results.pop()) else {
        return Ok(Vec::new());
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|series| series.adjclose)
        .unwrap_or_default();

    let mut by_date: BTreeMap<Date, PriceRow> = BTreeMap::new();
    let mut dropped = 0usize;
    for (index, ts) in result.timestamp.iter().enumerate() {
        let Some(date) = local_date(*ts, result.meta.gmtoffset) else {
            dropped += 1;
            continue;
        };
        let value = |series: &[Option<f64>]| series.get(index).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (
            value(&quote.open),
            value(&quote.high),
            value(&quote.low),
            value(&quote.close),
        ) else {
            dropped += 1;
            continue;
        };

        let factor = match value(&adjclose) {
            Some(adjusted) if close > 0.0 && adjusted > 0.0 => adjusted / close,
            _ => 1.0,
        };
        let volume = value(&quote.volume)
            .filter(|volume| volume.is_finite() && *volume >= 0.0)
            .map_or(0, |volume| volume.round() as u64);

        match PriceRow::new(
            symbol.clone(),
            date,
            open * factor,
            high * factor,
            low * factor,
            close * factor,
            volume,
        ) {
            Ok(row) => {
                by_date.insert(date, row);
            }
            Err(_) => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(symbol = %symbol, dropped, "dropped incomplete or invalid chart rows");
    }

    Ok(by_date.into_values().collect())
}

fn local_date(timestamp: i64, gmtoffset: i64) -> Option<Date> {
    OffsetDateTime::from_unix_timestamp(timestamp.checked_add(gmtoffset)?)
        .ok()
        .map(OffsetDateTime::date)
}
