//! Durable evidence capture.
//!
//! After a workorder run, every file under its runtime output tree is
//! packed into a byte-stable zip plus a JSON manifest of SHA-256 digests,
//! stored next to the billing tables. Entry order, arcnames, and zip
//! metadata are all fixed so identical inputs produce identical archives.

use {
    flate2::{Compression, write::DeflateEncoder},
    ordo_shared::error::{Error, Result},
    serde::Serialize,
    sha2::{Digest, Sha256},
    std::{
        fs,
        io::Write,
        path::{Path, PathBuf},
    },
};

pub const EVIDENCE_SUBDIR: &str = "runtime_evidence_zips";

/// Fixed DOS date for zip entries: 1980-01-01 00:00:00. Real times live in
/// the manifest's `created_at`; the archive bytes must not depend on them.
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = 0x0021;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceReceipt {
    pub zip_path: PathBuf,
    pub manifest_path: PathBuf,
    pub zip_name: String,
    pub manifest_name: String,
}

#[derive(Debug, Serialize)]
struct ManifestFile {
    path: String,
    sha256: String,
}

#[derive(Debug, Serialize)]
struct Manifest {
    billing_state_version: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    tenant_id: String,
    work_order_id: String,
    created_at: String,
    zip_name: String,
    files: Vec<ManifestFile>,
}

/// Archive `runtime_dir/runs/<tenant>/<workorder>` into billing state.
///
/// Returns `None` when the workorder produced no runtime outputs at all.
pub fn archive_runtime_evidence(
    billing_state_dir: &Path,
    runtime_dir: &Path,
    tenant_id: &str,
    work_order_id: &str,
    run_stamp_iso: &str,
    created_at: &str,
) -> Result<Option<EvidenceReceipt>> {
    let source = runtime_dir.join("runs").join(tenant_id).join(work_order_id);
    if !source.exists() {
        tracing::debug!(source = %source.display(), "no runtime outputs to archive");
        return Ok(None);
    }

    let out_dir = billing_state_dir.join(EVIDENCE_SUBDIR);
    fs::create_dir_all(&out_dir)?;

    let stamp = sanitize_stamp(run_stamp_iso);
    let zip_name =
        format!("runtime_evidence__tenant={tenant_id}__workorder={work_order_id}__{stamp}.zip");
    let manifest_name = format!(
        "runtime_evidence__tenant={tenant_id}__workorder={work_order_id}__{stamp}.manifest.json"
    );
    let zip_path = out_dir.join(&zip_name);
    let manifest_path = out_dir.join(&manifest_name);

    let files = collect_files(&source)?;
    let arc_root = PathBuf::from("runtime_evidence")
        .join("runs")
        .join(tenant_id)
        .join(work_order_id);

    let mut zip = ZipBuilder::new();
    let mut manifest_files = Vec::with_capacity(files.len());
    for relative in &files {
        let absolute = source.join(relative);
        let bytes = fs::read(&absolute)?;
        let arcname = arc_root.join(relative).display().to_string();
        zip.add_file(&arcname, &bytes)?;
        manifest_files.push(ManifestFile {
            path: arcname,
            sha256: hex::encode(Sha256::digest(&bytes)),
        });
    }
    fs::write(&zip_path, zip.finish())?;

    let manifest = Manifest {
        billing_state_version: "v1",
        kind: "runtime_evidence",
        tenant_id: tenant_id.to_owned(),
        work_order_id: work_order_id.to_owned(),
        created_at: created_at.to_owned(),
        zip_name: zip_name.clone(),
        files: manifest_files,
    };
    let mut body = serde_json::to_string_pretty(&manifest)
        .map_err(|e| Error::Infra(format!("manifest serialization: {e}")))?;
    body.push('\n');
    fs::write(&manifest_path, body)?;

    tracing::info!(zip = %zip_name, files = files.len(), "wrote runtime evidence");
    Ok(Some(EvidenceReceipt {
        zip_path,
        manifest_path,
        zip_name,
        manifest_name,
    }))
}

/// Keep timestamps path-safe and bounded: alphanumerics and `T` pass,
/// everything else becomes `_`, truncated to 64 chars.
fn sanitize_stamp(iso: &str) -> String {
    iso.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == 'T' { c } else { '_' })
        .take(64)
        .collect()
}

/// All regular files under `root`, as relative paths in lexicographic
/// order.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, root, out)?;
            } else if path.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| Error::Infra(format!("walk escaped root: {e}")))?;
                out.push(relative.to_path_buf());
            }
        }
        Ok(())
    }
    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

struct ZipEntry {
    name: String,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    offset: u32,
}

/// Minimal deterministic zip container: DEFLATE entries, fixed timestamps,
/// no extra fields, entries in insertion order.
struct ZipBuilder {
    bytes: Vec<u8>,
    entries: Vec<ZipEntry>,
}

impl ZipBuilder {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            entries: Vec::new(),
        }
    }

    fn add_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        let crc32 = crc.sum();

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder
            .finish()
            .map_err(|e| Error::Infra(format!("deflate: {e}")))?;

        let offset = self.bytes.len() as u32;
        // Local file header.
        self.put_u32(0x0403_4b50);
        self.put_u16(20); // version needed
        self.put_u16(0); // flags
        self.put_u16(8); // method: deflate
        self.put_u16(DOS_TIME);
        self.put_u16(DOS_DATE);
        self.put_u32(crc32);
        self.put_u32(compressed.len() as u32);
        self.put_u32(data.len() as u32);
        self.put_u16(name.len() as u16);
        self.put_u16(0); // extra length
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.extend_from_slice(&compressed);

        self.entries.push(ZipEntry {
            name: name.to_owned(),
            crc32,
            compressed_size: compressed.len() as u32,
            uncompressed_size: data.len() as u32,
            offset,
        });
        Ok(())
    }

    fn finish(mut self) -> Vec<u8> {
        let central_offset = self.bytes.len() as u32;
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            self.put_u32(0x0201_4b50);
            self.put_u16(20); // version made by
            self.put_u16(20); // version needed
            self.put_u16(0); // flags
            self.put_u16(8); // method
            self.put_u16(DOS_TIME);
            self.put_u16(DOS_DATE);
            self.put_u32(entry.crc32);
            self.put_u32(entry.compressed_size);
            self.put_u32(entry.uncompressed_size);
            self.put_u16(entry.name.len() as u16);
            self.put_u16(0); // extra length
            self.put_u16(0); // comment length
            self.put_u16(0); // disk number
            self.put_u16(0); // internal attributes
            self.put_u32(0); // external attributes
            self.put_u32(entry.offset);
            self.bytes.extend_from_slice(entry.name.as_bytes());
        }
        let central_size = self.bytes.len() as u32 - central_offset;
        // End of central directory.
        self.put_u32(0x0605_4b50);
        self.put_u16(0);
        self.put_u16(0);
        self.put_u16(entries.len() as u16);
        self.put_u16(entries.len() as u16);
        self.put_u32(central_size);
        self.put_u32(central_offset);
        self.put_u16(0);
        self.bytes
    }

    fn put_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::Value};

    fn seed_runtime(runtime: &Path) {
        let base = runtime.join("runs").join("t1").join("wo1");
        fs::create_dir_all(base.join("s2")).unwrap();
        fs::create_dir_all(base.join("s1")).unwrap();
        fs::write(base.join("s1").join("outputs.json"), b"{\"results\":[]}").unwrap();
        fs::write(base.join("s2").join("bundle.bin"), b"artifact-bytes").unwrap();
        fs::write(base.join("summary.txt"), b"two steps").unwrap();
    }

    #[test]
    fn archives_are_byte_stable() {
        let billing_a = tempfile::tempdir().unwrap();
        let billing_b = tempfile::tempdir().unwrap();
        let runtime = tempfile::tempdir().unwrap();
        seed_runtime(runtime.path());

        let stamp = "2026-08-01T12:00:00Z";
        let a = archive_runtime_evidence(billing_a.path(), runtime.path(), "t1", "wo1", stamp, stamp)
            .unwrap()
            .unwrap();
        let b = archive_runtime_evidence(billing_b.path(), runtime.path(), "t1", "wo1", stamp, stamp)
            .unwrap()
            .unwrap();

        assert_eq!(a.zip_name, "runtime_evidence__tenant=t1__workorder=wo1__2026_08_01T12_00_00Z.zip");
        assert_eq!(fs::read(&a.zip_path).unwrap(), fs::read(&b.zip_path).unwrap());
        assert_eq!(
            fs::read(&a.manifest_path).unwrap(),
            fs::read(&b.manifest_path).unwrap()
        );
    }

    #[test]
    fn manifest_lists_files_in_order_with_digests() {
        let billing = tempfile::tempdir().unwrap();
        let runtime = tempfile::tempdir().unwrap();
        seed_runtime(runtime.path());

        let stamp = "2026-08-01T12:00:00Z";
        let receipt =
            archive_runtime_evidence(billing.path(), runtime.path(), "t1", "wo1", stamp, stamp)
                .unwrap()
                .unwrap();
        let manifest: Value =
            serde_json::from_str(&fs::read_to_string(&receipt.manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["billing_state_version"], "v1");
        assert_eq!(manifest["type"], "runtime_evidence");
        assert_eq!(manifest["zip_name"], receipt.zip_name.as_str());
        let files: Vec<String> = manifest["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["path"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(
            files,
            vec![
                "runtime_evidence/runs/t1/wo1/s1/outputs.json",
                "runtime_evidence/runs/t1/wo1/s2/bundle.bin",
                "runtime_evidence/runs/t1/wo1/summary.txt",
            ]
        );
        let digest = manifest["files"][1]["sha256"].as_str().unwrap();
        assert_eq!(digest, hex::encode(Sha256::digest(b"artifact-bytes")));
    }

    #[test]
    fn missing_source_is_a_skip() {
        let billing = tempfile::tempdir().unwrap();
        let runtime = tempfile::tempdir().unwrap();
        let receipt = archive_runtime_evidence(
            billing.path(),
            runtime.path(),
            "t1",
            "wo1",
            "2026-08-01T12:00:00Z",
            "2026-08-01T12:00:00Z",
        )
        .unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn zip_container_is_well_formed() {
        let mut zip = ZipBuilder::new();
        zip.add_file("a.txt", b"hello").unwrap();
        zip.add_file("b/c.txt", b"world").unwrap();
        let bytes = zip.finish();
        // Local header magic at the start, EOCD magic near the end.
        assert_eq!(bytes[..4], 0x0403_4b50u32.to_le_bytes());
        let eocd = bytes.len() - 22;
        assert_eq!(bytes[eocd..eocd + 4], 0x0605_4b50u32.to_le_bytes());
        // Entry count recorded in the EOCD.
        assert_eq!(bytes[eocd + 10..eocd + 12], 2u16.to_le_bytes());
    }
}
