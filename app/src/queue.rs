//! The externally-written workorder queue.

use {
    ordo_ledger::csvio,
    ordo_shared::error::{Error, Result},
    serde::{Deserialize, Serialize},
    std::path::Path,
};

pub const WORKORDERS_INDEX_FILE: &str = "workorders_index.csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub tenant_id: String,
    pub work_order_id: String,
    pub enabled: String,
    #[serde(default)]
    pub schedule_cron: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub notes: String,
    pub path: String,
}

impl QueueEntry {
    pub fn is_enabled(&self) -> bool {
        self.enabled.trim().eq_ignore_ascii_case("true")
    }
}

pub fn load_queue(index_path: &Path) -> Result<Vec<QueueEntry>> {
    if !index_path.exists() {
        return Err(Error::Infra(format!(
            "missing workorders index (run Maintenance): {}",
            index_path.display()
        )));
    }
    csvio::read_rows(index_path)
}

/// Resolve a global work_order_id to its single queue row.
///
/// Deliberately ignores the enabled flag so verification runners can
/// resolve disabled workorders deterministically.
pub fn resolve_workorder_by_id(index_path: &Path, work_order_id: &str) -> Result<QueueEntry> {
    let wanted = work_order_id.trim();
    if wanted.is_empty() {
        return Err(Error::Infra("work_order_id is empty".into()));
    }
    let rows = load_queue(index_path)?;
    let hits: Vec<&QueueEntry> = rows
        .iter()
        .filter(|r| r.work_order_id.trim() == wanted)
        .collect();
    match hits.as_slice() {
        [] => Err(Error::Infra(format!(
            "work_order_id not found in {}: {wanted}",
            index_path.display()
        ))),
        [only] => {
            if only.tenant_id.trim().is_empty() {
                return Err(Error::Infra(format!("tenant_id missing for work_order_id={wanted}")));
            }
            if only.path.trim().is_empty() {
                return Err(Error::Infra(format!("path missing for work_order_id={wanted}")));
            }
            Ok((*only).clone())
        }
        many => {
            let mut paths: Vec<&str> = many.iter().map(|r| r.path.trim()).collect();
            paths.sort_unstable();
            Err(Error::Infra(format!(
                "work_order_id is not unique: {wanted}; paths={paths:?}"
            )))
        }
    }
}

/// Write a one-row index containing only the selected workorder, forced
/// enabled, for targeted runs.
pub fn write_single_workorder_index(out_path: &Path, entry: &QueueEntry) -> Result<()> {
    let row = QueueEntry {
        enabled: "true".to_owned(),
        schedule_cron: String::new(),
        title: String::new(),
        notes: String::new(),
        ..entry.clone()
    };
    csvio::write_rows(out_path, &[row])
}
