//! CSV table I/O with atomic replacement.
//!
//! The durable contract is replace-on-success, keep-prior-on-failure: rows
//! are serialized to a sibling temp file, fsynced, then renamed over the
//! target. Readers never observe a half-written table.

use {
    ordo_shared::error::{Error, Result},
    serde::{Serialize, de::DeserializeOwned},
    std::{
        fs::{self, File},
        io::Write,
        path::Path,
    },
};

pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(Error::from)
}

/// Read a whole table. A missing file is an empty table.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::Infra(format!("open {}: {e}", path.display())))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.map_err(|e| Error::Infra(format!("parse {}: {e}", path.display())))?);
    }
    Ok(rows)
}

/// Serialize `rows` and atomically replace `path`.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| Error::Infra(format!("serialize {}: {e}", path.display())))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Infra(format!("flush {}: {e}", path.display())))?;
    atomic_write(path, &bytes)
}

/// Write `bytes` to a temp file in the target directory, fsync, rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Infra(format!("no parent directory: {}", path.display())))?;
    ensure_dir(dir)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Infra(format!("invalid table path: {}", path.display())))?;
    let tmp = dir.join(format!(".{file_name}.tmp"));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).map_err(|e| {
        // Leave the prior table intact; the temp file is best-effort cleanup.
        let _ = fs::remove_file(&tmp);
        Error::Infra(format!("rename {} -> {}: {e}", tmp.display(), path.display()))
    })
}
