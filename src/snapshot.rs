use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

const DATE_FORMAT: &str = "%d/%m/%Y";

/// One price row as published in the bulletin. Numeric fields keep their
/// decimal text instead of being re-encoded as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    #[serde(rename = "producto")]
    pub product: String,
    #[serde(rename = "unidad")]
    pub unit: String,
    #[serde(rename = "mayorista")]
    pub wholesaler: String,
    #[serde(rename = "minimo")]
    pub minimum: String,
    #[serde(rename = "maximo")]
    pub maximum: String,
    #[serde(rename = "moda")]
    pub mode: String,
    #[serde(rename = "promedio")]
    pub average: String,
    /// `DD/MM/YYYY`, or empty when no date marker preceded the row.
    #[serde(rename = "fecha")]
    pub effective_date: String,
}

impl PriceRecord {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_date(&self.effective_date)
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

/// Newest first. Stable: records with equal (or equally unparseable) dates
/// keep their file-processing order. `None` sorts below every real date.
pub fn sort_by_date_desc(records: &mut [PriceRecord]) {
    records.sort_by(|a, b| b.parsed_date().cmp(&a.parsed_date()));
}

// ── Persistence ──

/// The JSON file holding the output of the last completed run.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot wholesale. The data goes to a temp file in the
    /// same directory which is then renamed over the old snapshot, so a
    /// concurrent reader sees either the old file or the new one.
    pub fn write(&self, records: &[PriceRecord]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), records)?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace snapshot {}", self.path.display()))?;

        info!(path = %self.path.display(), records = records.len(), "Snapshot written");
        Ok(())
    }

    /// `Ok(None)` when no run has produced a snapshot yet.
    pub async fn load(&self) -> Result<Option<Vec<PriceRecord>>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let records = serde_json::from_slice(&bytes)
            .with_context(|| format!("Malformed snapshot {}", self.path.display()))?;
        Ok(Some(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(product: &str, date: &str) -> PriceRecord {
        PriceRecord {
            product: product.into(),
            unit: "kg".into(),
            wholesaler: "kg".into(),
            minimum: "100".into(),
            maximum: "200".into(),
            mode: "150".into(),
            average: "160".into(),
            effective_date: date.into(),
        }
    }

    #[test]
    fn newest_first_unparseable_last() {
        let mut rs = vec![
            record("a", ""),
            record("b", "01/01/2020"),
            record("c", "15/06/2024"),
            record("d", "not-a-date"),
        ];
        sort_by_date_desc(&mut rs);
        let order: Vec<&str> = rs.iter().map(|r| r.product.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn sort_keeps_order_within_same_date() {
        let mut rs = vec![
            record("first", "02/03/2024"),
            record("older", "01/03/2024"),
            record("second", "02/03/2024"),
            record("third", " 02/03/2024 "),
        ];
        sort_by_date_desc(&mut rs);
        let order: Vec<&str> = rs.iter().map(|r| r.product.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third", "older"]);
    }

    #[test]
    fn serializes_with_bulletin_keys() {
        let json = serde_json::to_value(record("Papa", "01/02/2024")).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for key in ["producto", "unidad", "mayorista", "minimo", "maximo", "moda", "promedio", "fecha"] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(json["minimo"], serde_json::json!("100"));
    }

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("datos_cache.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested").join("datos_cache.json"));

        store.write(&[record("Chayote", "01/01/2024"), record("Ñame", "")]).unwrap();
        store.write(&[record("Yuca", "05/01/2024")]).unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, vec![record("Yuca", "05/01/2024")]);

        // Only the snapshot itself is left behind, no temp files.
        let entries = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn non_ascii_is_written_unescaped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("datos_cache.json"));
        store.write(&[record("Ñame", "")]).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("Ñame"));
    }

    #[tokio::test]
    async fn malformed_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datos_cache.json");
        std::fs::write(&path, "[{\"producto\": ").unwrap();
        let store = SnapshotStore::new(path);
        assert!(store.load().await.is_err());
    }
}
