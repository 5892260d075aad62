//! Symbol universe resolution with a fallback floor.
//!
//! The resolver never fails. A listing source that errors, or that yields
//! fewer symbols than the market's expected minimum, is replaced by the
//! market's short fallback list so a broken source can never shrink a run to
//! zero symbols and report full coverage of nothing.

use std::collections::{BTreeMap, BTreeSet};

use crate::http_client::HttpClient;
use crate::markets::{is_excluded_name, ListedInstrument, MarketStrategy};
use crate::{Market, Symbol};

/// Listing row after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstrument {
    pub symbol: Symbol,
    pub name: String,
    pub segment: String,
    pub sector: Option<String>,
}

/// Symbols to dispatch for one market run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    pub market: Market,
    /// Sorted, de-duplicated, never empty.
    pub symbols: Vec<Symbol>,
    /// Name and sector metadata; empty when the fallback list is used.
    pub instruments: Vec<ResolvedInstrument>,
    pub used_fallback: bool,
    /// Rows the listing source returned before filtering.
    pub raw_count: usize,
}

impl Universe {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Fetch the listing for `strategy` and turn it into a dispatchable universe.
pub async fn resolve(strategy: &dyn MarketStrategy, http: &dyn HttpClient) -> Universe {
    let market = strategy.market();
    match strategy.fetch_listing(http).await {
        Ok(listing) => build_universe(strategy, listing),
        Err(error) => {
            tracing::warn!(
                market = %market,
                code = error.code(),
                error = %error,
                "listing source failed, using fallback symbols"
            );
            fallback_universe(strategy, 0)
        }
    }
}

/// Filter, normalize and de-duplicate a raw listing, then apply the floor.
pub fn build_universe(strategy: &dyn MarketStrategy, listing: Vec<ListedInstrument>) -> Universe {
    let market = strategy.market();
    let raw_count = listing.len();
    let mut resolved = BTreeMap::new();
    let mut excluded = 0usize;

    for instrument in listing {
        if is_excluded_name(&instrument.name) {
            excluded += 1;
            continue;
        }
        let Some(symbol) = strategy.normalize_symbol(&instrument) else {
            excluded += 1;
            continue;
        };
        resolved
            .entry(symbol.clone())
            .or_insert_with(|| ResolvedInstrument {
                symbol,
                name: instrument.name,
                segment: instrument.segment,
                sector: instrument.sector,
            });
    }

    let expected_min = strategy.profile().expected_min;
    if resolved.len() < expected_min {
        tracing::warn!(
            market = %market,
            resolved = resolved.len(),
            expected_min,
            "listing below expected minimum, using fallback symbols"
        );
        return fallback_universe(strategy, raw_count);
    }

    tracing::info!(
        market = %market,
        raw = raw_count,
        excluded,
        symbols = resolved.len(),
        "resolved symbol universe"
    );

    let symbols = resolved.keys().cloned().collect();
    Universe {
        market,
        symbols,
        instruments: resolved.into_values().collect(),
        used_fallback: false,
        raw_count,
    }
}

/// The market's fixed fallback list as a universe.
pub fn fallback_universe(strategy: &dyn MarketStrategy, raw_count: usize) -> Universe {
    let symbols = strategy
        .profile()
        .fallback
        .iter()
        .filter_map(|raw| Symbol::parse(raw).ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    Universe {
        market: strategy.market(),
        symbols,
        instruments: Vec::new(),
        used_fallback: true,
        raw_count,
    }
}
