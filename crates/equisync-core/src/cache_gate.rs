//! Freshness check that lets the dispatcher skip recently fetched symbols.

use std::time::Duration;

use equisync_warehouse::SymbolArtifactStore;
use time::OffsetDateTime;

use crate::Symbol;

pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(60 * 60);
/// Artifacts at or below this size are treated as empty or truncated.
pub const DEFAULT_MIN_SIZE_BYTES: u64 = 256;

/// Freshness state of a previously written symbol artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub last_modified: OffsetDateTime,
    pub size_bytes: u64,
}

/// Anything that can report when a symbol was last written.
pub trait FreshnessSource: Send + Sync {
    fn cache_entry(&self, symbol: &Symbol) -> Option<CacheEntry>;
}

impl FreshnessSource for SymbolArtifactStore {
    fn cache_entry(&self, symbol: &Symbol) -> Option<CacheEntry> {
        match self.metadata(symbol.as_str()) {
            Ok(meta) => meta.map(|meta| CacheEntry {
                last_modified: meta.last_modified,
                size_bytes: meta.size_bytes,
            }),
            Err(error) => {
                tracing::warn!(symbol = %symbol, %error, "artifact metadata unreadable");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGate {
    pub expiry: Duration,
    pub min_size_bytes: u64,
}

impl Default for CacheGate {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_CACHE_EXPIRY,
            min_size_bytes: DEFAULT_MIN_SIZE_BYTES,
        }
    }
}

impl CacheGate {
    pub const fn new(expiry: Duration, min_size_bytes: u64) -> Self {
        Self {
            expiry,
            min_size_bytes,
        }
    }

    /// Fresh iff the entry exists, is younger than `expiry`, and is larger
    /// than `min_size_bytes`.
    pub fn is_fresh_entry(&self, entry: Option<CacheEntry>, now: OffsetDateTime) -> bool {
        let Some(entry) = entry else {
            return false;
        };
        let age = now - entry.last_modified;
        age < self.expiry && entry.size_bytes > self.min_size_bytes
    }

    pub fn is_fresh(
        &self,
        source: &dyn FreshnessSource,
        symbol: &Symbol,
        now: OffsetDateTime,
    ) -> bool {
        self.is_fresh_entry(source.cache_entry(symbol), now)
    }
}
