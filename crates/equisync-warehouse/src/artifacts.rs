//! Per-symbol CSV layout.
//!
//! Each symbol lives in `<root>/<SYMBOL>.csv`. Writes merge by date, so the
//! layout honours the same idempotent upsert contract as `stock_prices`, and
//! the file's modification time doubles as the cache entry for freshness
//! checks.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::{PriceRecord, WarehouseError};

/// File metadata of one symbol artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactMeta {
    pub last_modified: OffsetDateTime,
    pub size_bytes: u64,
}

/// Directory of per-symbol CSV files.
#[derive(Debug, Clone)]
pub struct SymbolArtifactStore {
    root: PathBuf,
}

impl SymbolArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("{symbol}.csv"))
    }

    /// `None` when no artifact has been written for `symbol`.
    pub fn metadata(&self, symbol: &str) -> Result<Option<ArtifactMeta>, WarehouseError> {
        let metadata = match fs::metadata(self.path_for(symbol)) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        Ok(Some(ArtifactMeta {
            last_modified: OffsetDateTime::from(metadata.modified()?),
            size_bytes: metadata.len(),
        }))
    }

    pub fn read(&self, symbol: &str) -> Result<Vec<PriceRecord>, WarehouseError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            rows.push(record?);
        }
        Ok(rows)
    }

    /// Merge `rows` into the symbol's artifact, replacing rows with the same
    /// date. Returns the number of rows in the artifact afterwards.
    pub fn upsert(&self, symbol: &str, rows: &[PriceRecord]) -> Result<usize, WarehouseError> {
        let mut merged: BTreeMap<String, PriceRecord> = self
            .read(symbol)?
            .into_iter()
            .map(|row| (row.date.clone(), row))
            .collect();
        for row in rows {
            merged.insert(row.date.clone(), row.clone());
        }

        let target = self.path_for(symbol);
        let staging = self.root.join(format!(".{symbol}.csv.tmp"));
        {
            let mut writer = csv::Writer::from_path(&staging)?;
            for row in merged.values() {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&staging, &target)?;

        Ok(merged.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(date: &str, close: f64) -> PriceRecord {
        PriceRecord {
            date: date.to_string(),
            symbol: String::from("7203.T"),
            open: 2_000.0,
            high: 2_100.0,
            low: 1_950.0,
            close,
            volume: 10,
        }
    }

    #[test]
    fn missing_artifact_has_no_metadata() {
        let temp = tempdir().expect("tempdir");
        let store = SymbolArtifactStore::open(temp.path()).expect("store");

        assert_eq!(store.metadata("7203.T").expect("metadata"), None);
        assert!(store.read("7203.T").expect("read").is_empty());
    }

    #[test]
    fn upsert_merges_by_date() {
        let temp = tempdir().expect("tempdir");
        let store = SymbolArtifactStore::open(temp.path()).expect("store");

        store
            .upsert("7203.T", &[row("2024-01-04", 2_010.0), row("2024-01-05", 2_020.0)])
            .expect("first write");
        let count = store
            .upsert("7203.T", &[row("2024-01-05", 2_050.0), row("2024-01-09", 2_060.0)])
            .expect("second write");

        assert_eq!(count, 3);
        let rows = store.read("7203.T").expect("read");
        let dates: Vec<&str> = rows.iter().map(|row| row.date.as_str()).collect();
        assert_eq!(dates, ["2024-01-04", "2024-01-05", "2024-01-09"]);
        assert_eq!(rows[1].close, 2_050.0);

        let meta = store.metadata("7203.T").expect("metadata").expect("present");
        assert!(meta.size_bytes > 0);
    }
}
