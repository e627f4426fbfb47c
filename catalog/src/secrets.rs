//! Per-module secret and variable store.
//!
//! The store is a JSON document provisioned outside the repository. Values
//! still carrying the provisioning placeholder count as missing so a
//! half-configured module cannot pass preflight.

use {
    ordo_shared::error::{Error, Result},
    serde::Deserialize,
    std::{collections::HashMap, fs, path::Path},
};

const SUPPORTED_VERSION: u32 = 1;
const PLACEHOLDER: &str = "REPLACE_ME";

#[derive(Debug, Default, Deserialize)]
pub struct ModuleSecrets {
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SecretStore {
    version: u32,
    #[serde(default)]
    modules: HashMap<String, ModuleSecrets>,
}

impl Default for SecretStore {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            modules: HashMap::new(),
        }
    }
}

pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(PLACEHOLDER)
}

impl SecretStore {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Infra(format!("secretstore not readable: {}: {e}", path.display())))?;
        let store: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Infra(format!("secretstore malformed: {}: {e}", path.display())))?;
        if store.version != SUPPORTED_VERSION {
            return Err(Error::Infra(format!(
                "unsupported secretstore version: {}",
                store.version
            )));
        }
        Ok(store)
    }

    pub fn module(&self, module_id: &str) -> Option<&ModuleSecrets> {
        self.modules.get(module_id)
    }

    /// Search secrets first, then vars.
    pub fn lookup(&self, module_id: &str, key: &str) -> Option<&str> {
        let module = self.module(module_id)?;
        module
            .secrets
            .get(key)
            .or_else(|| module.vars.get(key))
            .map(String::as_str)
    }

    /// Required keys that are absent or still placeholders.
    pub fn missing_keys(&self, module_id: &str, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|key| {
                self.lookup(module_id, key)
                    .map(is_placeholder)
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::fs};

    fn store(json: &str) -> Result<SecretStore> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secretstore.json");
        fs::write(&path, json).unwrap();
        SecretStore::load(&path)
    }

    #[test]
    fn loads_and_looks_up() {
        let store = store(
            r#"{"version":1,"modules":{"search":{"secrets":{"SEARCH_API_KEY":"sk-123"},"vars":{"SEARCH_REGION":"eu"}}}}"#,
        )
        .unwrap();
        assert_eq!(store.lookup("search", "SEARCH_API_KEY"), Some("sk-123"));
        assert_eq!(store.lookup("search", "SEARCH_REGION"), Some("eu"));
        assert_eq!(store.lookup("search", "OTHER"), None);
    }

    #[test]
    fn wrong_version_is_rejected() {
        assert!(store(r#"{"version":2,"modules":{}}"#).is_err());
    }

    #[test]
    fn placeholders_count_as_missing() {
        let store = store(
            r#"{"version":1,"modules":{"search":{"secrets":{"A":"replace_me","B":"  ","C":"ok"}}}}"#,
        )
        .unwrap();
        let missing = store.missing_keys("search", &["A".into(), "B".into(), "C".into(), "D".into()]);
        assert_eq!(missing, vec!["A", "B", "D"]);
    }
}
