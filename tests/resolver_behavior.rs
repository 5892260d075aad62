//! Behavior-driven tests for symbol universe resolution.
//!
//! These tests drive real market strategies against an in-process transport
//! and check the fallback floor that keeps a broken listing from shrinking a
//! run to nothing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use equisync_core::markets::TwStrategy;
use equisync_core::resolver::build_universe;
use equisync_core::{
    resolve, HttpClient, HttpError, HttpRequest, HttpResponse, ListedInstrument, Market,
    MarketStrategy,
};

/// Serves the TWSE listed-board page and 404s for every other board.
struct ListedBoardOnly {
    page: String,
    requests: Mutex<Vec<String>>,
}

impl ListedBoardOnly {
    fn new(page: String) -> Self {
        Self {
            page,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl HttpClient for ListedBoardOnly {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests
                .lock()
                .expect("request log")
                .push(request.url.clone());
            if request.url.contains("market=1&issuetype=1") {
                Ok(HttpResponse::ok(self.page.clone().into_bytes()))
            } else {
                Ok(HttpResponse::new(404, Vec::new()))
            }
        })
    }
}

/// Every request fails at the transport.
struct Offline;

impl HttpClient for Offline {
    fn execute<'a>(
        &'a self,
        _request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async { Err(HttpError::new("connection refused")) })
    }
}

fn listed_page(codes: impl Iterator<Item = u32>) -> String {
    let mut html = String::from(
        "<html><body><table><tr><td>有價證券代號</td><td>有價證券名稱</td><td>產業別</td></tr>",
    );
    for code in codes {
        html.push_str(&format!(
            "<tr><td>{code}</td><td>Company {code}</td><td>Industrial</td></tr>"
        ));
    }
    html.push_str("</table></body></html>");
    html
}

fn symbols(universe: &equisync_core::Universe) -> Vec<String> {
    universe.symbols.iter().map(ToString::to_string).collect()
}

// =============================================================================
// Resolver: Fallback Floor
// =============================================================================

#[tokio::test]
async fn when_listing_returns_fewer_than_expected_minimum_fallback_is_used() {
    // Given: The listing yields 5 symbols against a minimum of 900
    let http = ListedBoardOnly::new(listed_page(1101..1106));
    let strategy = TwStrategy::without_page_pause();

    // When: The universe is resolved
    let universe = resolve(&strategy, &http).await;

    // Then: The fixed fallback list replaces the 5
    assert!(universe.used_fallback);
    assert_eq!(universe.raw_count, 5);
    assert_eq!(symbols(&universe), ["2317.TW", "2330.TW"]);
    assert!(universe.instruments.is_empty());
}

#[tokio::test]
async fn when_listing_meets_the_minimum_every_row_is_kept() {
    // Given: 950 listed companies; the other boards are down
    let http = ListedBoardOnly::new(listed_page(1000..1950));
    let strategy = TwStrategy::without_page_pause();

    // When: The universe is resolved
    let universe = resolve(&strategy, &http).await;

    // Then: All 950 symbols carry the listed-board suffix and their names
    assert!(!universe.used_fallback);
    assert_eq!(universe.len(), 950);
    assert_eq!(universe.symbols[0].as_str(), "1000.TW");
    assert_eq!(universe.instruments[0].name, "Company 1000");
    assert_eq!(universe.instruments[0].segment, "listed");
    assert_eq!(
        http.requests.lock().expect("request log").len(),
        6,
        "every board is attempted"
    );
}

#[tokio::test]
async fn when_listing_source_is_unreachable_fallback_is_used() {
    // Given: No network
    let strategy = TwStrategy::without_page_pause();

    // When: The universe is resolved
    let universe = resolve(&strategy, &Offline).await;

    // Then: Resolution still succeeds with the fallback list
    assert_eq!(universe.market, Market::Tw);
    assert!(universe.used_fallback);
    assert_eq!(universe.raw_count, 0);
    assert!(!universe.is_empty());
}

#[test]
fn when_listing_repeats_a_code_the_symbol_appears_once() {
    // Given: A listing above the minimum with one duplicate and one warrant
    let strategy = TwStrategy::without_page_pause();
    let mut listing: Vec<ListedInstrument> = (2000..2950)
        .map(|code| {
            ListedInstrument::new(code.to_string(), format!("Company {code}"), "listed", None)
        })
        .collect();
    listing.push(ListedInstrument::new("2000", "Company 2000 again", "listed", None));
    listing.push(ListedInstrument::new("0300", "Acme Warrant", "listed", None));

    // When: It is turned into a universe
    let universe = build_universe(&strategy, listing);

    // Then: The duplicate collapses, the warrant is dropped, the first name wins
    assert_eq!(universe.len(), 950);
    assert_eq!(universe.raw_count, 952);
    assert_eq!(universe.instruments[0].name, "Company 2000");
    assert!(universe
        .symbols
        .windows(2)
        .all(|pair| pair[0] < pair[1]));
    assert_eq!(strategy.market(), Market::Tw);
}
