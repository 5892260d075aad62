//! Bounded-concurrency fan-out of fetch workers for one market run.
//!
//! Workers run on a [`JoinSet`] gated by a [`Semaphore`]; completions are
//! consumed in arrival order by the dispatching task, which is also the only
//! caller of the [`PriceSink`]. Store writes are therefore serialized without
//! any locking in the sink itself.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache_gate::{CacheGate, FreshnessSource};
use crate::sink::PriceSink;
use crate::stats::RunStatistics;
use crate::worker::{FailureKind, FetchFailure, FetchOutcome, FetchWorker};
use crate::{FetchWindow, Market, Symbol};

/// Pool shape for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPlan {
    pub concurrency: usize,
    /// Submit at most this many symbols at once, pausing `batch_cooldown`
    /// between groups.
    pub batch_size: Option<usize>,
    pub batch_cooldown: Duration,
    /// Log progress after this many completions.
    pub progress_every: usize,
}

impl DispatchPlan {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            batch_size: None,
            batch_cooldown: Duration::ZERO,
            progress_every: 50,
        }
    }

    pub fn with_batches(mut self, size: usize, cooldown: Duration) -> Self {
        self.batch_size = Some(size.max(1));
        self.batch_cooldown = cooldown;
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }
}

pub struct Dispatcher {
    market: Market,
    worker: Arc<FetchWorker>,
    sink: Arc<dyn PriceSink>,
    cache: Option<(CacheGate, Arc<dyn FreshnessSource>)>,
    plan: DispatchPlan,
}

impl Dispatcher {
    pub fn new(
        market: Market,
        worker: Arc<FetchWorker>,
        sink: Arc<dyn PriceSink>,
        plan: DispatchPlan,
    ) -> Self {
        Self {
            market,
            worker,
            sink,
            cache: None,
            plan,
        }
    }

    /// Skip symbols whose artifact in `source` is still fresh under `gate`.
    pub fn with_cache(mut self, gate: CacheGate, source: Arc<dyn FreshnessSource>) -> Self {
        self.cache = Some((gate, source));
        self
    }

    /// Fetch every symbol once and persist successes. Per-symbol failures are
    /// captured in the returned statistics; nothing is cancelled early.
    pub async fn run(&self, symbols: &[Symbol], window: FetchWindow) -> RunStatistics {
        let started = Instant::now();
        let mut stats = RunStatistics::new(self.market, symbols.len());
        let semaphore = Arc::new(Semaphore::new(self.plan.concurrency));
        let batch_size = self.plan.batch_size.unwrap_or(symbols.len()).max(1);
        let batch_count = symbols.len().div_ceil(batch_size);

        tracing::info!(
            market = %self.market,
            total = symbols.len(),
            concurrency = self.plan.concurrency,
            batches = batch_count,
            window = %window,
            "dispatch started"
        );

        for (index, batch) in symbols.chunks(batch_size).enumerate() {
            if index > 0 && !self.plan.batch_cooldown.is_zero() {
                tracing::debug!(
                    market = %self.market,
                    batch = index + 1,
                    cooldown_ms = self.plan.batch_cooldown.as_millis() as u64,
                    "cooling down between batches"
                );
                tokio::time::sleep(self.plan.batch_cooldown).await;
            }
            self.run_batch(batch, window, &semaphore, &mut stats).await;
        }

        stats.elapsed = started.elapsed();
        stats.log_summary();
        stats
    }

    async fn run_batch(
        &self,
        batch: &[Symbol],
        window: FetchWindow,
        semaphore: &Arc<Semaphore>,
        stats: &mut RunStatistics,
    ) {
        let now = OffsetDateTime::now_utc();
        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();

        for symbol in batch {
            if let Some((gate, source)) = &self.cache {
                if gate.is_fresh(source.as_ref(), symbol, now) {
                    self.complete(symbol, FetchOutcome::CacheHit, stats);
                    continue;
                }
            }

            pending.insert(symbol.clone());
            let worker = Arc::clone(&self.worker);
            let semaphore = Arc::clone(semaphore);
            let symbol = symbol.clone();
            tasks.spawn(async move {
                // The semaphore is never closed, so a permit always arrives.
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = worker.fetch(&symbol, window).await;
                (symbol, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, outcome)) => {
                    pending.remove(&symbol);
                    let outcome = self.persist(&symbol, outcome, stats).await;
                    self.complete(&symbol, outcome, stats);
                }
                Err(error) => {
                    tracing::error!(market = %self.market, %error, "fetch task failed");
                }
            }
        }

        // Anything still pending belonged to a task that panicked.
        for symbol in pending {
            let failure = FetchFailure::new(FailureKind::Panicked, "fetch task panicked");
            self.complete(&symbol, FetchOutcome::Error(failure), stats);
        }
    }

    /// Write a successful fetch through the sink on the blocking pool. The
    /// dispatching task awaits each write, so writes stay serialized.
    async fn persist(
        &self,
        symbol: &Symbol,
        outcome: FetchOutcome,
        stats: &mut RunStatistics,
    ) -> FetchOutcome {
        let FetchOutcome::Success(rows) = outcome else {
            return outcome;
        };

        let sink = Arc::clone(&self.sink);
        let owned = symbol.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let written = sink.write(&owned, &rows);
            (written, rows)
        })
        .await;

        let message = match joined {
            Ok((Ok(written), rows)) => {
                stats.rows_written += written;
                return FetchOutcome::Success(rows);
            }
            Ok((Err(error), _)) => error.to_string(),
            Err(error) => format!("persist task failed: {error}"),
        };
        tracing::warn!(market = %self.market, symbol = %symbol, error = %message, "persist failed");
        FetchOutcome::Error(FetchFailure::new(FailureKind::Persistence, message))
    }

    fn complete(&self, symbol: &Symbol, outcome: FetchOutcome, stats: &mut RunStatistics) {
        if let FetchOutcome::Error(failure) = &outcome {
            tracing::debug!(market = %self.market, symbol = %symbol, %failure, "symbol failed");
        }
        stats.record(symbol, &outcome);

        let done = stats.completed();
        if done % self.plan.progress_every.max(1) == 0 || done == stats.total {
            tracing::info!(
                market = %self.market,
                done,
                total = stats.total,
                success = stats.success,
                cache_hit = stats.cache_hit,
                empty = stats.empty,
                error = stats.error,
                "progress"
            );
        }
    }
}
