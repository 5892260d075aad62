//! Append-only run audit.

use std::sync::Arc;

use equisync_warehouse::{AuditRecord, Warehouse, WarehouseError};
use time::format_description::well_known::Rfc3339;
use time::macros::offset;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::stats::RunStatistics;
use crate::Market;

/// Civil offset every audit timestamp is expressed in, so rows from different
/// markets line up in one report.
pub const REPORT_OFFSET: UtcOffset = offset!(+8);

/// Project run statistics onto an audit row.
///
/// Cache hits count toward `success`: a symbol skipped because its data is
/// already fresh is covered for this run.
pub fn audit_record(
    market: Market,
    stats: &RunStatistics,
    timestamp: OffsetDateTime,
) -> AuditRecord {
    let covered = stats.success + stats.cache_hit;
    let recorded_at = timestamp
        .to_offset(REPORT_OFFSET)
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string());

    AuditRecord {
        run_id: Uuid::new_v4().to_string(),
        recorded_at,
        market: market.code().to_string(),
        total: stats.total as u64,
        success: covered as u64,
        fail: stats.error as u64,
        cache_hit: stats.cache_hit as u64,
        empty: stats.empty as u64,
        success_rate: stats.success_rate(),
        duration_ms: stats.elapsed.as_millis() as u64,
    }
}

/// Writes one audit row per completed run. Never reads history.
pub struct AuditRecorder {
    warehouse: Arc<Warehouse>,
}

impl AuditRecorder {
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }

    pub fn record(
        &self,
        market: Market,
        stats: &RunStatistics,
        timestamp: OffsetDateTime,
    ) -> Result<AuditRecord, WarehouseError> {
        let record = audit_record(market, stats, timestamp);
        self.warehouse.append_audit(&record)?;
        tracing::info!(
            market = %market,
            run_id = %record.run_id,
            success_rate = record.success_rate,
            "audit recorded"
        );
        Ok(record)
    }
}
