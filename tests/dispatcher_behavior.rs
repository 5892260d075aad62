//! Behavior-driven tests for the concurrent dispatcher.
//!
//! These tests verify HOW a market run classifies each symbol, what reaches
//! the store, and that one bad symbol never stops the others.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use equisync_core::{
    CacheEntry, CacheGate, DispatchPlan, Dispatcher, FailureKind, FetchWindow, FetchWorker,
    FreshnessSource, HistoryRequest, Market, PriceProvider, PriceRow, PriceSink, RetryPolicy,
    SourceError, Symbol, WarehouseSink,
};
use equisync_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
use tempfile::tempdir;
use time::macros::date;
use time::OffsetDateTime;

/// Returns two bars for symbols it knows and a scripted error otherwise.
struct FakeProvider {
    failing: BTreeSet<String>,
    empty: BTreeSet<String>,
    error: SourceError,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeProvider {
    fn healthy() -> Self {
        Self {
            failing: BTreeSet::new(),
            empty: BTreeSet::new(),
            error: SourceError::unavailable("connection reset"),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    fn failing_for(mut self, symbols: &[&str], error: SourceError) -> Self {
        self.failing = symbols.iter().map(|s| s.to_string()).collect();
        self.error = error;
        self
    }

    fn empty_for(mut self, symbols: &[&str]) -> Self {
        self.empty = symbols.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl PriceProvider for FakeProvider {
    fn id(&self) -> &'static str {
        "fake"
    }

    fn history<'a>(
        &'a self,
        request: HistoryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PriceRow>, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let symbol = request.symbol.as_str();
            if self.failing.contains(symbol) {
                return Err(self.error.clone());
            }
            if self.empty.contains(symbol) {
                return Ok(Vec::new());
            }
            Ok(vec![
                PriceRow::new(
                    request.symbol.clone(),
                    date!(2024 - 01 - 10),
                    10.0,
                    11.0,
                    9.0,
                    10.5,
                    1_000,
                )
                .map_err(|e| SourceError::internal(e.to_string()))?,
                PriceRow::new(
                    request.symbol.clone(),
                    date!(2024 - 01 - 11),
                    10.5,
                    12.0,
                    10.0,
                    11.5,
                    1_200,
                )
                .map_err(|e| SourceError::internal(e.to_string()))?,
            ])
        })
    }
}

/// Records writes and rejects the symbols it is told to.
#[derive(Default)]
struct RecordingSink {
    rejected: BTreeSet<String>,
    written: Mutex<Vec<String>>,
}

impl PriceSink for RecordingSink {
    fn write(&self, symbol: &Symbol, rows: &[PriceRow]) -> Result<usize, WarehouseError> {
        if self.rejected.contains(symbol.as_str()) {
            return Err(WarehouseError::InvalidData(format!("disk full writing {symbol}")));
        }
        self.written
            .lock()
            .expect("write log")
            .push(symbol.to_string());
        Ok(rows.len())
    }
}

/// Remembers which thread each write ran on.
#[derive(Default)]
struct ThreadRecordingSink {
    threads: Mutex<Vec<std::thread::ThreadId>>,
}

impl PriceSink for ThreadRecordingSink {
    fn write(&self, _symbol: &Symbol, rows: &[PriceRow]) -> Result<usize, WarehouseError> {
        self.threads
            .lock()
            .expect("thread log")
            .push(std::thread::current().id());
        Ok(rows.len())
    }
}

/// Reports a large, just-written artifact for the listed symbols.
struct FreshFor(BTreeSet<String>);

impl FreshnessSource for FreshFor {
    fn cache_entry(&self, symbol: &Symbol) -> Option<CacheEntry> {
        self.0.contains(symbol.as_str()).then(|| CacheEntry {
            last_modified: OffsetDateTime::now_utc(),
            size_bytes: 4_096,
        })
    }
}

fn symbols(raw: &[&str]) -> Vec<Symbol> {
    raw.iter()
        .map(|s| Symbol::parse(s).expect("valid symbol"))
        .collect()
}

fn numbered(count: usize) -> Vec<Symbol> {
    (0..count)
        .map(|i| Symbol::parse(&format!("S{i:03}")).expect("valid symbol"))
        .collect()
}

fn build_dispatcher(
    provider: Arc<FakeProvider>,
    sink: Arc<dyn PriceSink>,
    plan: DispatchPlan,
    retry: RetryPolicy,
) -> Dispatcher {
    let worker = FetchWorker::new(provider, retry, (0, 0), 1_000);
    Dispatcher::new(Market::Us, Arc::new(worker), sink, plan)
}

// =============================================================================
// Dispatcher: Outcome Classification
// =============================================================================

#[tokio::test]
async fn when_provider_fails_for_every_symbol_the_run_still_completes() {
    // Given: 10 symbols and a provider that errors for all of them
    let universe = numbered(10);
    let names: Vec<String> = universe.iter().map(ToString::to_string).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let provider = Arc::new(
        FakeProvider::healthy().failing_for(&name_refs, SourceError::unavailable("503")),
    );
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = build_dispatcher(
        Arc::clone(&provider),
        sink.clone(),
        DispatchPlan::new(4),
        RetryPolicy::immediate(2),
    );

    // When: The market is dispatched
    let stats = dispatcher.run(&universe, FetchWindow::INCREMENTAL).await;

    // Then: Every symbol is an error, each retried exactly once
    assert_eq!(stats.total, 10);
    assert_eq!(stats.error, 10);
    assert_eq!(stats.success, 0);
    assert_eq!(stats.coverage(), 0.0);
    assert_eq!(stats.failed_symbols.len(), 10);
    assert!(stats
        .failed_symbols
        .iter()
        .all(|failed| failed.kind == FailureKind::Transient));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 20);
    assert!(sink.written.lock().expect("write log").is_empty());
}

#[tokio::test]
async fn when_outcomes_are_mixed_each_symbol_lands_in_exactly_one_bucket() {
    // Given: One failing, one empty, and two healthy symbols
    let provider = Arc::new(
        FakeProvider::healthy()
            .failing_for(&["BAD"], SourceError::invalid_request("unknown symbol"))
            .empty_for(&["GONE"]),
    );
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = build_dispatcher(
        Arc::clone(&provider),
        sink.clone(),
        DispatchPlan::new(2),
        RetryPolicy::immediate(2),
    );

    // When: The market is dispatched
    let stats = dispatcher
        .run(&symbols(&["AAA", "BAD", "BBB", "GONE"]), FetchWindow::INCREMENTAL)
        .await;

    // Then: Counters add up and only healthy symbols reach the sink
    assert_eq!(
        (stats.success, stats.empty, stats.error, stats.cache_hit),
        (2, 1, 1, 0)
    );
    assert_eq!(stats.completed(), stats.total);
    assert_eq!(stats.rows_written, 4);
    assert_eq!(stats.failed_symbols[0].kind, FailureKind::Provider);
    // The rejected symbol still gets its one retry: 4 symbols, 5 calls.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 5);

    let mut written = sink.written.lock().expect("write log").clone();
    written.sort();
    assert_eq!(written, ["AAA", "BBB"]);
}

#[tokio::test]
async fn when_store_rejects_a_write_the_symbol_counts_as_an_error() {
    // Given: A sink that refuses BBB
    let provider = Arc::new(FakeProvider::healthy());
    let sink = Arc::new(RecordingSink {
        rejected: ["BBB".to_string()].into_iter().collect(),
        written: Mutex::new(Vec::new()),
    });
    let dispatcher = build_dispatcher(
        provider,
        sink,
        DispatchPlan::new(2),
        RetryPolicy::no_retry(),
    );

    // When: The market is dispatched
    let stats = dispatcher
        .run(&symbols(&["AAA", "BBB"]), FetchWindow::INCREMENTAL)
        .await;

    // Then: BBB is a persistence error, not a success
    assert_eq!(stats.success, 1);
    assert_eq!(stats.error, 1);
    assert_eq!(stats.failed_symbols[0].symbol.as_str(), "BBB");
    assert_eq!(stats.failed_symbols[0].kind, FailureKind::Persistence);
    assert_eq!(stats.coverage(), 0.5);
}

#[tokio::test]
async fn when_provider_rate_limits_the_failure_is_classified_as_rate_limited() {
    // Given: A provider that keeps rate limiting one symbol
    let provider = Arc::new(
        FakeProvider::healthy().failing_for(&["HOT"], SourceError::rate_limited("429")),
    );
    let dispatcher = build_dispatcher(
        Arc::clone(&provider),
        Arc::new(RecordingSink::default()),
        DispatchPlan::new(1),
        RetryPolicy::immediate(2),
    );

    // When: The market is dispatched
    let stats = dispatcher
        .run(&symbols(&["HOT"]), FetchWindow::INCREMENTAL)
        .await;

    // Then: One retry, then a rate-limit failure
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(stats.failed_symbols[0].kind, FailureKind::RateLimited);
}

// =============================================================================
// Dispatcher: Cache Gate and Pool Shape
// =============================================================================

#[tokio::test]
async fn when_artifact_is_fresh_the_symbol_is_skipped_and_counted_as_covered() {
    // Given: AAA was written moments ago
    let provider = Arc::new(FakeProvider::healthy());
    let freshness: Arc<dyn FreshnessSource> =
        Arc::new(FreshFor(["AAA".to_string()].into_iter().collect()));
    let dispatcher = build_dispatcher(
        Arc::clone(&provider),
        Arc::new(RecordingSink::default()),
        DispatchPlan::new(2),
        RetryPolicy::no_retry(),
    )
    .with_cache(CacheGate::default(), freshness);

    // When: The market is dispatched
    let stats = dispatcher
        .run(&symbols(&["AAA", "BBB"]), FetchWindow::INCREMENTAL)
        .await;

    // Then: Only BBB reaches the provider; coverage includes the cache hit
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.cache_hit, 1);
    assert_eq!(stats.success, 1);
    assert_eq!(stats.coverage(), 1.0);
}

#[tokio::test]
async fn when_pool_is_bounded_no_more_than_that_many_fetches_overlap() {
    // Given: 12 symbols, a pool of 3, batches of 5
    let provider = Arc::new(FakeProvider::healthy());
    let plan = DispatchPlan::new(3)
        .with_batches(5, Duration::from_millis(1))
        .with_progress_every(4);
    let dispatcher = build_dispatcher(
        Arc::clone(&provider),
        Arc::new(RecordingSink::default()),
        plan,
        RetryPolicy::no_retry(),
    );

    // When: The market is dispatched
    let stats = dispatcher.run(&numbered(12), FetchWindow::INCREMENTAL).await;

    // Then: Everything completes and concurrency never exceeds the pool
    assert_eq!(stats.success, 12);
    assert!(provider.peak_in_flight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn when_universe_is_empty_coverage_is_zero() {
    // Given: Nothing to fetch
    let dispatcher = build_dispatcher(
        Arc::new(FakeProvider::healthy()),
        Arc::new(RecordingSink::default()),
        DispatchPlan::new(2),
        RetryPolicy::no_retry(),
    );

    // When: The market is dispatched
    let stats = dispatcher.run(&[], FetchWindow::INCREMENTAL).await;

    // Then: No division by zero
    assert_eq!(stats.total, 0);
    assert_eq!(stats.coverage(), 0.0);
}

#[tokio::test]
async fn when_rows_are_persisted_the_write_runs_off_the_dispatching_thread() {
    // Given: A sink that records the thread of every write
    let sink = Arc::new(ThreadRecordingSink::default());
    let dispatcher = build_dispatcher(
        Arc::new(FakeProvider::healthy()),
        sink.clone(),
        DispatchPlan::new(2),
        RetryPolicy::no_retry(),
    );
    let dispatching_thread = std::thread::current().id();

    // When: The market is dispatched on this test's runtime thread
    let stats = dispatcher
        .run(&symbols(&["AAA", "BBB"]), FetchWindow::INCREMENTAL)
        .await;

    // Then: Both writes ran on the blocking pool and were counted
    assert_eq!(stats.rows_written, 4);
    let threads = sink.threads.lock().expect("thread log").clone();
    assert_eq!(threads.len(), 2);
    assert!(threads.iter().all(|id| *id != dispatching_thread));
}

// =============================================================================
// Dispatcher: Real Store
// =============================================================================

#[tokio::test]
async fn when_rerun_against_the_store_rows_are_not_duplicated() {
    // Given: A real market store behind the warehouse sink
    let temp = tempdir().expect("tempdir");
    let warehouse = Arc::new(
        Warehouse::open(WarehouseConfig::for_market(temp.path(), "us")).expect("warehouse open"),
    );
    let sink: Arc<dyn PriceSink> = Arc::new(WarehouseSink::new(Arc::clone(&warehouse), None));
    let dispatcher = build_dispatcher(
        Arc::new(FakeProvider::healthy()),
        sink,
        DispatchPlan::new(2),
        RetryPolicy::no_retry(),
    );
    let universe = symbols(&["AAA", "BBB"]);

    // When: The same run happens twice
    dispatcher.run(&universe, FetchWindow::INCREMENTAL).await;
    let second = dispatcher.run(&universe, FetchWindow::INCREMENTAL).await;

    // Then: Two symbols with two days each
    assert_eq!(second.success, 2);
    let summary = warehouse.read_summary().expect("summary");
    assert_eq!(summary.row_count, 4);
    assert_eq!(summary.distinct_symbol_count, 2);
    assert_eq!(summary.max_date.as_deref(), Some("2024-01-11"));
}
