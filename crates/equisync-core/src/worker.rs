//! Single-symbol fetch with delay, timeout and the shared retry policy.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::provider::{HistoryRequest, PriceProvider, SourceError, SourceErrorKind};
use crate::retry::RetryPolicy;
use crate::{FetchWindow, PriceRow, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Provider kept rate limiting after the long backoff.
    RateLimited,
    /// Transport failure, timeout, or provider outage.
    Transient,
    /// Provider rejected the request or returned garbage.
    Provider,
    /// Rows were fetched but could not be stored.
    Persistence,
    /// The worker task died before reporting.
    Panicked,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Provider => "provider",
            Self::Persistence => "persistence",
            Self::Panicked => "panicked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<SourceError> for FetchFailure {
    fn from(error: SourceError) -> Self {
        let kind = match error.kind() {
            SourceErrorKind::RateLimited => FailureKind::RateLimited,
            SourceErrorKind::Unavailable => FailureKind::Transient,
            SourceErrorKind::InvalidRequest | SourceErrorKind::Internal => FailureKind::Provider,
        };
        Self::new(kind, error.to_string())
    }
}

impl Display for FetchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Result of one symbol's trip through the gate and worker.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(Vec<PriceRow>),
    /// Provider answered with no rows; benign.
    Empty,
    /// Skipped because a recent artifact is still fresh.
    CacheHit,
    Error(FetchFailure),
}

impl FetchOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Empty => "empty",
            Self::CacheHit => "cache_hit",
            Self::Error(_) => "error",
        }
    }
}

/// Fetches one symbol at a time; cheap to share across tasks.
pub struct FetchWorker {
    provider: Arc<dyn PriceProvider>,
    retry: RetryPolicy,
    delay_ms: (u64, u64),
    timeout_ms: u64,
}

impl FetchWorker {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        retry: RetryPolicy,
        delay_ms: (u64, u64),
        timeout_ms: u64,
    ) -> Self {
        Self {
            provider,
            retry,
            delay_ms,
            timeout_ms,
        }
    }

    pub fn delay_ms(&self) -> (u64, u64) {
        self.delay_ms
    }

    /// Fetch `symbol` over `window`. Never panics on provider failures; every
    /// problem becomes [`FetchOutcome::Error`].
    pub async fn fetch(&self, symbol: &Symbol, window: FetchWindow) -> FetchOutcome {
        let (low, high) = self.delay_ms;
        if high > 0 {
            let delay = fastrand::u64(low..=high.max(low));
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let timeout = Duration::from_millis(self.timeout_ms);
        let result = self
            .retry
            .execute(|_| {
                let request = HistoryRequest::new(symbol.clone(), window, self.timeout_ms);
                async move {
                    match tokio::time::timeout(timeout, self.provider.history(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(SourceError::unavailable(format!(
                            "no response within {} ms",
                            self.timeout_ms
                        ))),
                    }
                }
            })
            .await;

        match result {
            Ok(rows) if rows.is_empty() => FetchOutcome::Empty,
            Ok(rows) => FetchOutcome::Success(rows),
            Err(error) => {
                tracing::debug!(
                    symbol = %symbol,
                    provider = self.provider.id(),
                    code = error.code(),
                    "fetch failed"
                );
                FetchOutcome::Error(error.into())
            }
        }
    }
}
