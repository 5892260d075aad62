use std::time::Duration;

use super::{
    cell, fetch_checked, html_tables, pause_between, ListedInstrument, ListingFuture,
    MarketProfile, MarketStrategy,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::SourceError;
use crate::{FetchWindow, Market, Symbol};

const KIND_URL: &str =
    "http://kind.krx.co.kr/corpgeneral/corpList.do?method=download&searchType=13";

/// (KIND market type, segment label).
const BOARDS: &[(&str, &str)] = &[("stockMkt", "KOSPI"), ("kosdaqMkt", "KOSDAQ")];

/// South Korea: KIND corporate list for KOSPI and KOSDAQ.
#[derive(Debug, Clone, Copy, Default)]
pub struct KrStrategy;

/// KIND serves its "download" as an HTML table.
fn parse_corp_list(html: &str, segment: &str) -> Vec<ListedInstrument> {
    let mut out = Vec::new();
    for table in html_tables(html) {
        let Some(header) = table.first() else {
            continue;
        };
        let column = |needle: &str| header.iter().position(|cell| cell.contains(needle));
        let (Some(name_col), Some(code_col)) = (column("회사명"), column("종목코드")) else {
            continue;
        };
        let sector_col = column("업종");

        for row in &table[1..] {
            let code = cell(row, code_col);
            if code.is_empty() {
                continue;
            }
            out.push(ListedInstrument::new(
                code,
                cell(row, name_col),
                segment,
                sector_col.map(|col| cell(row, col).to_string()),
            ));
        }
    }
    out
}

impl MarketStrategy for KrStrategy {
    fn market(&self) -> Market {
        Market::Kr
    }

    fn profile(&self) -> MarketProfile {
        MarketProfile {
            expected_min: 2_000,
            fallback: &["005930.KS", "000660.KS"],
            concurrency: 4,
            ci_concurrency: 3,
            batch_size: Some(200),
            batch_cooldown: Duration::from_secs(5),
            delay_ms: (50, 200),
            ci_delay_ms: (300, 800),
            timeout_ms: 30_000,
            full_window: FetchWindow::Period("10y"),
        }
    }

    fn fetch_listing<'a>(&'a self, http: &'a dyn HttpClient) -> ListingFuture<'a> {
        Box::pin(async move {
            let mut instruments = Vec::new();
            for (index, (market_type, segment)) in BOARDS.iter().enumerate() {
                if index > 0 {
                    pause_between((300, 800)).await;
                }
                let request = HttpRequest::get(format!("{KIND_URL}&marketType={market_type}"))
                    .with_browser_agent()
                    .with_charset("euc-kr")
                    .with_timeout_ms(30_000);
                let response = fetch_checked(http, request, "kind").await?;
                instruments.extend(parse_corp_list(&response.text(), segment));
            }
            Ok::<_, SourceError>(instruments)
        })
    }

    fn normalize_symbol(&self, instrument: &ListedInstrument) -> Option<Symbol> {
        let code = instrument.code.trim();
        if code.is_empty() || code.len() > 6 || !code.chars().all(|ch| ch.is_ascii_alphanumeric())
        {
            return None;
        }
        let suffix = match instrument.segment.as_str() {
            "KOSPI" => ".KS",
            "KOSDAQ" => ".KQ",
            _ => return None,
        };
        Symbol::parse(&format!("{code:0>6}{suffix}")).ok()
    }
}
