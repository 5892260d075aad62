use std::time::Duration;

use time::macros::date;

use super::{
    cell, fetch_checked, find_header, sheet_rows, ListedInstrument, ListingFuture, MarketProfile,
    MarketStrategy,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::SourceError;
use crate::{FetchWindow, Market, Symbol};

const LISTED_ISSUES_URL: &str = "https://www.jpx.co.jp/english/markets/statistics-equities/misc/\
tvdivq0000001vg2-att/data_e.xls";
const LISTED_ISSUES_REFERER: &str =
    "https://www.jpx.co.jp/english/markets/statistics-equities/misc/01.html";

/// Japan: JPX list of TSE listed issues.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpStrategy;

fn parse_listed_issues(rows: &[Vec<String>]) -> Result<Vec<ListedInstrument>, SourceError> {
    let (header, columns) = find_header(
        rows,
        &["Local Code", "Name (English)", "Section/Products", "33 Sector(name)"],
        10,
    )
    .ok_or_else(|| SourceError::internal("jpx list has no Local Code header"))?;
    let &[code_col, name_col, section_col, sector_col] = columns.as_slice() else {
        return Err(SourceError::internal("jpx header columns incomplete"));
    };

    Ok(rows[header + 1..]
        .iter()
        .filter(|row| !cell(row, code_col).is_empty())
        .filter(|row| !cell(row, section_col).starts_with("ETFs"))
        .map(|row| {
            ListedInstrument::new(
                cell(row, code_col),
                cell(row, name_col),
                cell(row, section_col),
                Some(cell(row, sector_col).to_string()),
            )
        })
        .collect())
}

impl MarketStrategy for JpStrategy {
    fn market(&self) -> Market {
        Market::Jp
    }

    fn profile(&self) -> MarketProfile {
        MarketProfile {
            expected_min: 3_000,
            fallback: &["7203.T", "6758.T"],
            concurrency: 5,
            ci_concurrency: 4,
            batch_size: None,
            batch_cooldown: Duration::ZERO,
            delay_ms: (100, 300),
            ci_delay_ms: (100, 300),
            timeout_ms: 30_000,
            full_window: FetchWindow::Since(date!(2000 - 01 - 01)),
        }
    }

    fn fetch_listing<'a>(&'a self, http: &'a dyn HttpClient) -> ListingFuture<'a> {
        Box::pin(async move {
            let request = HttpRequest::get(LISTED_ISSUES_URL)
                .with_browser_agent()
                .with_header("referer", LISTED_ISSUES_REFERER)
                .with_timeout_ms(30_000);
            let response = fetch_checked(http, request, "jpx").await?;
            let rows = sheet_rows(response.body, "jpx")?;
            parse_listed_issues(&rows)
        })
    }

    fn normalize_symbol(&self, instrument: &ListedInstrument) -> Option<Symbol> {
        // Numeric cells come through as `7203` or `7203.0`.
        let code = instrument.code.split('.').next()?.trim();
        if code.len() != 4 || !code.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return None;
        }
        Symbol::parse(&format!("{code}.T")).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|cell| cell.to_string()).collect()
    }

    #[test]
    fn etf_sections_are_skipped() {
        let rows = vec![
            row(&[
                "Effective Date",
                "Local Code",
                "Name (English)",
                "Section/Products",
                "33 Sector(code)",
                "33 Sector(name)",
            ]),
            row(&[
                "20240131",
                "7203",
                "TOYOTA MOTOR CORPORATION",
                "Prime Market (Domestic)",
                "3700",
                "Transportation Equipment",
            ]),
            row(&["20240131", "1306", "NEXT FUNDS TOPIX ETF", "ETFs/ ETNs", "-", "-"]),
        ];

        let listing = parse_listed_issues(&rows).expect("header present");

        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].segment, "Prime Market (Domestic)");
        assert_eq!(listing[0].sector.as_deref(), Some("Transportation Equipment"));
    }

    #[test]
    fn accepts_numeric_and_alphanumeric_codes() {
        let strategy = JpStrategy;
        let toyota = ListedInstrument::new("7203.0", "TOYOTA", "Prime Market (Domestic)", None);
        let newer = ListedInstrument::new("130A", "VERITAS IN SILICO", "Growth Market", None);
        let short = ListedInstrument::new("25", "BAD", "Prime Market (Domestic)", None);

        assert_eq!(
            strategy.normalize_symbol(&toyota).map(String::from),
            Some(String::from("7203.T"))
        );
        assert_eq!(
            strategy.normalize_symbol(&newer).map(String::from),
            Some(String::from("130A.T"))
        );
        assert_eq!(strategy.normalize_symbol(&short), None);
    }
}
