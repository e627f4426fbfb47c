//! Global platform configuration keys compiled by Maintenance.

use {
    ordo_shared::error::{Error, Result},
    serde::Deserialize,
    std::{collections::HashMap, path::Path},
};

pub const PLATFORM_POLICY_FILE: &str = "platform_policy.csv";

const DEFAULT_CACHE_TTL_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
struct PolicyRow {
    key: String,
    value: String,
}

#[derive(Debug, Default)]
pub struct PlatformPolicy {
    values: HashMap<String, String>,
}

impl PlatformPolicy {
    pub fn load(maintenance_dir: &Path) -> Result<Self> {
        let path = maintenance_dir.join(PLATFORM_POLICY_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| Error::Infra(format!("open {}: {e}", path.display())))?;
        let mut values = HashMap::new();
        for record in reader.deserialize() {
            let row: PolicyRow =
                record.map_err(|e| Error::Infra(format!("parse {}: {e}", path.display())))?;
            values.insert(row.key.trim().to_owned(), row.value.trim().to_owned());
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Cache retention for `(place, type)`: a specific
    /// `cache_ttl_days:<place>:<type>` key, else `cache_ttl_days_default`,
    /// else the built-in default.
    pub fn cache_ttl_days(&self, place: &str, kind: &str) -> i64 {
        self.get(&format!("cache_ttl_days:{place}:{kind}"))
            .or_else(|| self.get("cache_ttl_days_default"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::fs};

    #[test]
    fn ttl_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PLATFORM_POLICY_FILE),
            "key,value\n\
             cache_ttl_days:billing_state:runtime_evidence,7\n\
             cache_ttl_days_default,14\n",
        )
        .unwrap();
        let policy = PlatformPolicy::load(dir.path()).unwrap();
        assert_eq!(policy.cache_ttl_days("billing_state", "runtime_evidence"), 7);
        assert_eq!(policy.cache_ttl_days("github_release", "release"), 14);
    }

    #[test]
    fn missing_file_uses_builtin_default() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PlatformPolicy::load(dir.path()).unwrap();
        assert_eq!(policy.cache_ttl_days("billing_state", "runtime_evidence"), 30);
    }
}
