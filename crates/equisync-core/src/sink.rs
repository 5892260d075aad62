//! Where successful fetches are written.

use std::sync::Arc;

use equisync_warehouse::{PriceRecord, SymbolArtifactStore, Warehouse, WarehouseError};

use crate::{PriceRow, Symbol};

/// Destination for one symbol's fetched rows. Called from a single consumer,
/// so implementations need no internal write ordering.
pub trait PriceSink: Send + Sync {
    /// Upsert `rows` keyed by `(date, symbol)`; returns rows written.
    fn write(&self, symbol: &Symbol, rows: &[PriceRow]) -> Result<usize, WarehouseError>;
}

/// Market database plus the optional per-symbol CSV layout.
pub struct WarehouseSink {
    warehouse: Arc<Warehouse>,
    artifacts: Option<SymbolArtifactStore>,
}

impl WarehouseSink {
    pub fn new(warehouse: Arc<Warehouse>, artifacts: Option<SymbolArtifactStore>) -> Self {
        Self {
            warehouse,
            artifacts,
        }
    }
}

impl PriceSink for WarehouseSink {
    fn write(&self, symbol: &Symbol, rows: &[PriceRow]) -> Result<usize, WarehouseError> {
        let records: Vec<PriceRecord> = rows.iter().map(PriceRecord::from).collect();
        let written = self.warehouse.upsert_prices(&records)?;

        // The artifact doubles as the cache entry, so it is written last: a
        // failed database write must not leave a fresh-looking artifact.
        if let Some(artifacts) = &self.artifacts {
            artifacts.upsert(symbol.as_str(), &records)?;
        }
        Ok(written)
    }
}
