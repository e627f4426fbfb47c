//! Durable references to platform-stored artifacts and external objects.
//!
//! The index is a pure record table; downstream pruning reads `expires_at`
//! and deletes what it points at. TTLs are resolved by the caller from
//! platform policy by `(place, type)`.

use {
    crate::csvio,
    chrono::{Duration, Utc},
    ordo_shared::error::Result,
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

pub const CACHE_INDEX_FILE: &str = "cache_index.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheIndexRow {
    pub place: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug)]
pub struct CacheIndex {
    path: PathBuf,
    rows: Vec<CacheIndexRow>,
}

impl CacheIndex {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(CACHE_INDEX_FILE);
        Ok(Self {
            rows: csvio::read_rows(&path)?,
            path,
        })
    }

    pub fn rows(&self) -> &[CacheIndexRow] {
        &self.rows
    }

    /// Insert or refresh the entry identified by `(place, type, ref)`.
    pub fn upsert(&mut self, place: &str, kind: &str, reference: &str, now_iso: &str, ttl_days: i64) {
        let expires_at = add_days(now_iso, ttl_days);
        if let Some(row) = self
            .rows
            .iter_mut()
            .find(|r| r.place == place && r.kind == kind && r.reference == reference)
        {
            row.created_at = now_iso.to_owned();
            row.expires_at = expires_at;
            return;
        }
        self.rows.push(CacheIndexRow {
            place: place.to_owned(),
            kind: kind.to_owned(),
            reference: reference.to_owned(),
            created_at: now_iso.to_owned(),
            expires_at,
        });
    }

    pub fn flush(&self) -> Result<()> {
        csvio::write_rows(&self.path, &self.rows)
    }
}

fn add_days(now_iso: &str, days: i64) -> String {
    match chrono::DateTime::parse_from_rfc3339(now_iso) {
        Ok(dt) => ordo_shared::time::format_iso(dt.with_timezone(&Utc) + Duration::days(days)),
        Err(_) => String::new(),
    }
}
