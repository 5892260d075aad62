use std::time::Duration;

use time::macros::date;

use super::{
    fetch_checked, html_tables, pause_between, ListedInstrument, ListingFuture, MarketProfile,
    MarketStrategy,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::SourceError;
use crate::{FetchWindow, Market, Symbol};

const ISIN_BASE: &str = "https://isin.twse.com.tw/isin/class_main.jsp";

struct Board {
    segment: &'static str,
    query: &'static str,
    suffix: &'static str,
}

// ETF pages are left out on purpose: only operating companies are synced.
const BOARDS: &[Board] = &[
    Board {
        segment: "listed",
        query: "market=1&issuetype=1",
        suffix: ".TW",
    },
    Board {
        segment: "otc",
        query: "market=2&issuetype=4",
        suffix: ".TWO",
    },
    Board {
        segment: "emerging",
        query: "market=E&issuetype=R",
        suffix: ".TWO",
    },
    Board {
        segment: "tw_innovation",
        query: "market=C&issuetype=C",
        suffix: ".TW",
    },
    Board {
        segment: "otc_innovation",
        query: "market=A&issuetype=C",
        suffix: ".TWO",
    },
    Board {
        segment: "dr",
        query: "market=1&issuetype=J",
        suffix: ".TW",
    },
];

/// Taiwan: TWSE ISIN registry, one HTML page per board.
#[derive(Debug, Clone)]
pub struct TwStrategy {
    page_pause_ms: (u64, u64),
}

impl Default for TwStrategy {
    fn default() -> Self {
        Self {
            page_pause_ms: (500, 1_000),
        }
    }
}

impl TwStrategy {
    /// Same source without the politeness pause between pages.
    pub fn without_page_pause() -> Self {
        Self {
            page_pause_ms: (0, 0),
        }
    }

    async fn fetch_boards(
        &self,
        http: &dyn HttpClient,
    ) -> Result<Vec<ListedInstrument>, SourceError> {
        let mut instruments = Vec::new();
        let mut failures = 0usize;

        for board in BOARDS {
            pause_between(self.page_pause_ms).await;
            let request = HttpRequest::get(format!("{ISIN_BASE}?{}&Page=1&chklike=Y", board.query))
                .with_browser_agent()
                .with_charset("big5")
                .with_timeout_ms(15_000);

            let page = match fetch_checked(http, request, "twse").await {
                Ok(response) => response,
                Err(error) => {
                    // One missing board should not sink the others.
                    tracing::warn!(segment = board.segment, %error, "twse board unavailable");
                    failures += 1;
                    continue;
                }
            };

            let before = instruments.len();
            parse_board(&page.text(), board.segment, &mut instruments);
            tracing::debug!(
                segment = board.segment,
                rows = instruments.len() - before,
                "parsed twse board"
            );
        }

        if failures == BOARDS.len() {
            return Err(SourceError::unavailable("every twse board failed"));
        }
        Ok(instruments)
    }
}

fn parse_board(html: &str, segment: &str, out: &mut Vec<ListedInstrument>) {
    for table in html_tables(html) {
        let Some(header) = table
            .iter()
            .position(|row| row.iter().any(|cell| cell.contains("有價證券代號")))
        else {
            continue;
        };
        let column = |needle: &str| table[header].iter().position(|cell| cell.contains(needle));
        let (Some(code_col), Some(name_col)) = (column("有價證券代號"), column("有價證券名稱"))
        else {
            continue;
        };
        let sector_col = column("產業別");

        for row in &table[header + 1..] {
            let code = super::cell(row, code_col);
            if code.is_empty() {
                continue;
            }
            let sector = sector_col.map(|col| super::cell(row, col).to_string());
            out.push(ListedInstrument::new(
                code,
                super::cell(row, name_col),
                segment,
                sector,
            ));
        }
    }
}

impl MarketStrategy for TwStrategy {
    fn market(&self) -> Market {
        Market::Tw
    }

    fn profile(&self) -> MarketProfile {
        MarketProfile {
            expected_min: 900,
            fallback: &["2330.TW", "2317.TW"],
            concurrency: 4,
            ci_concurrency: 3,
            batch_size: None,
            batch_cooldown: Duration::ZERO,
            delay_ms: (200, 500),
            ci_delay_ms: (1_500, 3_200),
            timeout_ms: 25_000,
            full_window: FetchWindow::Since(date!(1993 - 01 - 04)),
        }
    }

    fn fetch_listing<'a>(&'a self, http: &'a dyn HttpClient) -> ListingFuture<'a> {
        Box::pin(self.fetch_boards(http))
    }

    fn normalize_symbol(&self, instrument: &ListedInstrument) -> Option<Symbol> {
        let code = instrument.code.trim();
        if code.len() < 4 || !code.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return None;
        }
        let board = BOARDS
            .iter()
            .find(|board| board.segment == instrument.segment)?;
        Symbol::parse(&format!("{code}{}", board.suffix)).ok()
    }
}
