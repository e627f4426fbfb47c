//! Outcome classification: reason codes and refundability policy.

use {
    ordo_shared::{
        error::{Error, Result},
        ids::{ReasonScope, canon_module_id, parse_reason_code},
    },
    serde::Deserialize,
    std::{
        collections::{HashMap, HashSet},
        path::Path,
    },
};

pub const REASON_CATALOG_FILE: &str = "reason_catalog.csv";
pub const REASON_POLICY_FILE: &str = "reason_policy.csv";

const GLOBAL_MODULE_PART: &str = "000";

#[derive(Debug, Deserialize)]
struct CatalogRow {
    reason_code: String,
    scope: String,
    #[serde(default)]
    module_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason_key: String,
    reason_slug: String,
    #[serde(default)]
    category_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    category_name: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct PolicyRow {
    reason_code: String,
    refundable: String,
    #[serde(default)]
    #[allow(dead_code)]
    notes: String,
}

#[derive(Debug, Clone)]
pub struct Reason {
    pub reason_code: String,
    pub scope: ReasonScope,
    pub module_id: String,
    pub reason_slug: String,
    pub category_id: String,
}

#[derive(Debug)]
pub struct ReasonCatalog {
    by_key: HashMap<(ReasonScope, String, String), Reason>,
    refundable: HashMap<String, bool>,
}

fn read_table<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::Infra(format!("open {}: {e}", path.display())))?;
    reader
        .deserialize()
        .map(|row| row.map_err(|e| Error::Infra(format!("parse {}: {e}", path.display()))))
        .collect()
}

impl ReasonCatalog {
    pub fn load(maintenance_dir: &Path) -> Result<Self> {
        let rows: Vec<CatalogRow> = read_table(&maintenance_dir.join(REASON_CATALOG_FILE))?;
        let policy: Vec<PolicyRow> = read_table(&maintenance_dir.join(REASON_POLICY_FILE))?;

        let mut by_key = HashMap::new();
        let mut seen_codes = HashSet::new();
        for row in rows {
            let parsed = parse_reason_code(row.reason_code.trim())?;
            if !seen_codes.insert(parsed.reason_code.clone()) {
                return Err(Error::Infra(format!(
                    "duplicate reason_code in {REASON_CATALOG_FILE}: {}",
                    parsed.reason_code
                )));
            }
            let scope = ReasonScope::parse(&row.scope)?;
            let module_id = match scope {
                ReasonScope::Global => GLOBAL_MODULE_PART.to_owned(),
                ReasonScope::Module => canon_module_id(&row.module_id)?,
            };
            let slug = row.reason_slug.trim().to_owned();
            let reason = Reason {
                reason_code: parsed.reason_code,
                scope,
                module_id: module_id.clone(),
                reason_slug: slug.clone(),
                category_id: if row.category_id.trim().is_empty() {
                    parsed.category_id
                } else {
                    row.category_id.trim().to_owned()
                },
            };
            if by_key.insert((scope, module_id, slug), reason).is_some() {
                return Err(Error::Infra(format!(
                    "duplicate reason_slug within scope/module in {REASON_CATALOG_FILE}: {}",
                    row.reason_slug
                )));
            }
        }

        let mut refundable = HashMap::new();
        for row in policy {
            refundable.insert(
                row.reason_code.trim().to_owned(),
                row.refundable.trim().eq_ignore_ascii_case("true"),
            );
        }

        Ok(Self { by_key, refundable })
    }

    fn lookup(&self, scope: ReasonScope, module_id: &str, slug: &str) -> Result<&Reason> {
        let module_key = match scope {
            ReasonScope::Global => GLOBAL_MODULE_PART.to_owned(),
            ReasonScope::Module => canon_module_id(module_id)?,
        };
        self.by_key
            .get(&(scope, module_key, slug.trim().to_owned()))
            .ok_or_else(|| Error::UnknownReason {
                scope: scope.to_string(),
                module_id: module_id.to_owned(),
                slug: slug.to_owned(),
            })
    }

    /// Resolve a slug to its 9-digit wire code. GLOBAL scope ignores the
    /// module argument.
    pub fn reason_code(&self, scope: ReasonScope, module_id: &str, slug: &str) -> Result<String> {
        Ok(self.lookup(scope, module_id, slug)?.reason_code.clone())
    }

    /// Resolve a module-scoped slug, falling back to the global scope when
    /// the module has no classification of its own.
    pub fn reason_code_with_fallback(&self, module_id: &str, slug: &str) -> Result<String> {
        match self.reason_code(ReasonScope::Module, module_id, slug) {
            Ok(code) => Ok(code),
            Err(Error::UnknownReason { .. }) => {
                self.reason_code(ReasonScope::Global, GLOBAL_MODULE_PART, slug)
            }
            Err(e) => Err(e),
        }
    }

    /// Refund policy for a code. Unlisted codes default by scope: module
    /// reasons refundable, global reasons not.
    pub fn refundable(&self, reason_code: &str) -> bool {
        if let Some(&flag) = self.refundable.get(reason_code) {
            return flag;
        }
        parse_reason_code(reason_code)
            .map(|parsed| parsed.scope == ReasonScope::Module)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::fs};

    fn catalog(dir: &Path) -> ReasonCatalog {
        fs::write(
            dir.join(REASON_CATALOG_FILE),
            "reason_code,scope,module_id,reason_key,reason_slug,category_id,category_name,description\n\
             001000001,GLOBAL,,g.secrets,secrets_missing,01,platform,Missing required secrets\n\
             001000002,GLOBAL,,g.credits,not_enough_credits,01,platform,Insufficient credits\n\
             001000003,GLOBAL,,g.timeout,timeout,01,platform,Step timed out\n\
             001000004,GLOBAL,,g.cancelled,cancelled,01,platform,Run cancelled\n\
             102017001,MODULE,017,m.017.upstream,upstream_unavailable,02,acquisition,Upstream gone\n",
        )
        .unwrap();
        fs::write(
            dir.join(REASON_POLICY_FILE),
            "reason_code,refundable,notes\n\
             001000001,false,\n\
             001000004,true,cancellations restore reserved credits\n\
             102017001,true,\n",
        )
        .unwrap();
        ReasonCatalog::load(dir).unwrap()
    }

    #[test]
    fn global_scope_ignores_module() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        assert_eq!(
            catalog.reason_code(ReasonScope::Global, "017", "secrets_missing").unwrap(),
            "001000001"
        );
    }

    #[test]
    fn module_slug_resolves_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        assert_eq!(
            catalog.reason_code_with_fallback("017", "upstream_unavailable").unwrap(),
            "102017001"
        );
        assert_eq!(
            catalog.reason_code_with_fallback("017", "timeout").unwrap(),
            "001000003"
        );
    }

    #[test]
    fn unknown_slug_errors() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        assert!(matches!(
            catalog.reason_code(ReasonScope::Global, "", "nope"),
            Err(Error::UnknownReason { .. })
        ));
    }

    #[test]
    fn refundability_follows_policy_then_scope_default() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        assert!(!catalog.refundable("001000001"));
        assert!(catalog.refundable("001000004"));
        assert!(catalog.refundable("102017001"));
        // 001000003 has no policy row: global default is non-refundable.
        assert!(!catalog.refundable("001000003"));
    }
}
