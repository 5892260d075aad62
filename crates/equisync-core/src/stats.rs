//! Run-level tallies.

use std::time::Duration;

use serde::Serialize;

use crate::worker::{FailureKind, FetchOutcome};
use crate::{Market, Symbol};

/// Symbol that ended the run as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSymbol {
    pub symbol: Symbol,
    pub kind: FailureKind,
    pub message: String,
}

/// Aggregate over one dispatcher run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub market: Market,
    pub total: usize,
    pub success: usize,
    pub empty: usize,
    pub cache_hit: usize,
    pub error: usize,
    pub failed_symbols: Vec<FailedSymbol>,
    /// Rows handed to the sink by successful fetches.
    pub rows_written: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunStatistics {
    pub fn new(market: Market, total: usize) -> Self {
        Self {
            market,
            total,
            success: 0,
            empty: 0,
            cache_hit: 0,
            error: 0,
            failed_symbols: Vec::new(),
            rows_written: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// `(success + cache_hit) / total`, or 0 for an empty run.
    pub fn coverage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.success + self.cache_hit) as f64 / self.total as f64
        }
    }

    /// Coverage as a percentage.
    pub fn success_rate(&self) -> f64 {
        self.coverage() * 100.0
    }

    pub fn completed(&self) -> usize {
        self.success + self.empty + self.cache_hit + self.error
    }

    pub fn record(&mut self, symbol: &Symbol, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Success(_) => self.success += 1,
            FetchOutcome::Empty => self.empty += 1,
            FetchOutcome::CacheHit => self.cache_hit += 1,
            FetchOutcome::Error(failure) => {
                self.error += 1;
                self.failed_symbols.push(FailedSymbol {
                    symbol: symbol.clone(),
                    kind: failure.kind,
                    message: failure.message.clone(),
                });
            }
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            market = %self.market,
            total = self.total,
            success = self.success,
            empty = self.empty,
            cache_hit = self.cache_hit,
            error = self.error,
            rows = self.rows_written,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "dispatch finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::FetchFailure;

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    #[test]
    fn coverage_counts_cache_hits_as_covered() {
        let mut stats = RunStatistics::new(Market::Us, 4);
        stats.record(&symbol("A"), &FetchOutcome::Success(Vec::new()));
        stats.record(&symbol("B"), &FetchOutcome::CacheHit);
        stats.record(&symbol("C"), &FetchOutcome::Empty);
        stats.record(
            &symbol("D"),
            &FetchOutcome::Error(FetchFailure::new(FailureKind::Transient, "reset")),
        );

        assert!((stats.coverage() - 0.5).abs() < f64::EPSILON);
        assert!((stats.success_rate() - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.completed(), 4);
        assert_eq!(stats.failed_symbols[0].symbol.as_str(), "D");
    }

    #[test]
    fn empty_run_has_zero_coverage() {
        let stats = RunStatistics::new(Market::Tw, 0);

        assert_eq!(stats.coverage(), 0.0);
        assert!(!stats.coverage().is_nan());
    }
}
