use std::time::Duration;

use serde::Deserialize;
use time::macros::date;

use super::{
    fetch_checked, pause_between, ListedInstrument, ListingFuture, MarketProfile, MarketStrategy,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::SourceError;
use crate::{FetchWindow, Market, Symbol};

const CLIST_URL: &str = "https://82.push2.eastmoney.com/api/qt/clist/get";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 80;
const A_SHARE_PREFIXES: &[&str] = &[
    "000", "001", "002", "003", "300", "301", "600", "601", "603", "605", "688",
];

/// Mainland China: Eastmoney A-share list (Shanghai and Shenzhen).
#[derive(Debug, Clone, Copy, Default)]
pub struct CnStrategy;

#[derive(Debug, Deserialize)]
struct ClistEnvelope {
    data: Option<ClistData>,
}

#[derive(Debug, Deserialize)]
struct ClistData {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    diff: Vec<ClistRow>,
}

#[derive(Debug, Deserialize)]
struct ClistRow {
    #[serde(rename = "f12")]
    code: String,
    #[serde(rename = "f14", default)]
    name: String,
}

fn page_url(page: usize) -> String {
    format!(
        "{CLIST_URL}?pn={page}&pz={PAGE_SIZE}&po=1&np=1&fltt=2&invt=2&fid=f3\
         &fs=m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23,m:0+t:81+s:2048&fields=f12,f14"
    )
}

/// One page of rows plus the advertised total.
fn parse_page(body: &[u8]) -> Result<(usize, Vec<ListedInstrument>), SourceError> {
    let envelope: ClistEnvelope = serde_json::from_slice(body)
        .map_err(|e| SourceError::internal(format!("eastmoney payload: {e}")))?;
    let Some(data) = envelope.data else {
        return Ok((0, Vec::new()));
    };

    let rows = data
        .diff
        .into_iter()
        .map(|row| {
            let segment = if row.code.starts_with('6') { "SSE" } else { "SZSE" };
            ListedInstrument::new(row.code, row.name, segment, None)
        })
        .collect();
    Ok((data.total, rows))
}

impl MarketStrategy for CnStrategy {
    fn market(&self) -> Market {
        Market::Cn
    }

    fn profile(&self) -> MarketProfile {
        MarketProfile {
            expected_min: 4_000,
            fallback: &["600519.SS", "000001.SZ"],
            concurrency: 4,
            ci_concurrency: 3,
            batch_size: Some(200),
            batch_cooldown: Duration::from_secs(5),
            delay_ms: (50, 200),
            ci_delay_ms: (300, 800),
            timeout_ms: 25_000,
            full_window: FetchWindow::Since(date!(2015 - 01 - 01)),
        }
    }

    fn fetch_listing<'a>(&'a self, http: &'a dyn HttpClient) -> ListingFuture<'a> {
        Box::pin(async move {
            let mut instruments = Vec::new();
            let mut page = 1;

            loop {
                let request = HttpRequest::get(page_url(page))
                    .with_browser_agent()
                    .with_header("referer", "https://quote.eastmoney.com/")
                    .with_timeout_ms(15_000);
                let response = fetch_checked(http, request, "eastmoney").await?;
                let (total, rows) = parse_page(&response.body)?;

                let received = rows.len();
                instruments.extend(rows);
                if received == 0 || instruments.len() >= total || page >= MAX_PAGES {
                    break;
                }
                page += 1;
                pause_between((100, 300)).await;
            }

            tracing::debug!(pages = page, rows = instruments.len(), "fetched eastmoney list");
            Ok(instruments)
        })
    }

    fn normalize_symbol(&self, instrument: &ListedInstrument) -> Option<Symbol> {
        let code = instrument.code.trim();
        if code.len() != 6 || !code.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        if !A_SHARE_PREFIXES.iter().any(|prefix| code.starts_with(prefix)) {
            return None;
        }
        let suffix = if code.starts_with('6') { ".SS" } else { ".SZ" };
        Symbol::parse(&format!("{code}{suffix}")).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_carries_total_and_segment() {
        let body = r#"{"rc":0,"data":{"total":5321,"diff":[
            {"f12":"600519","f14":"贵州茅台"},
            {"f12":"000001","f14":"平安银行"}
        ]}}"#;

        let (total, rows) = parse_page(body.as_bytes()).expect("payload parses");

        assert_eq!(total, 5321);
        assert_eq!(rows[0].segment, "SSE");
        assert_eq!(rows[1].segment, "SZSE");
    }

    #[test]
    fn exchange_suffix_follows_leading_digit() {
        let strategy = CnStrategy;
        let moutai = ListedInstrument::new("600519", "贵州茅台", "SSE", None);
        let chinext = ListedInstrument::new("300750", "宁德时代", "SZSE", None);
        let bshare = ListedInstrument::new("900901", "云赛B股", "SSE", None);

        assert_eq!(
            strategy.normalize_symbol(&moutai).map(String::from),
            Some(String::from("600519.SS"))
        );
        assert_eq!(
            strategy.normalize_symbol(&chinext).map(String::from),
            Some(String::from("300750.SZ"))
        );
        assert_eq!(strategy.normalize_symbol(&bshare), None);
    }
}
