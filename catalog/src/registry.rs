//! Compiled module contracts.
//!
//! Maintenance compiles each module's manifest into a tabular catalog; the
//! registry loads that catalog once and serves immutable contracts for the
//! rest of the run.

use {
    ordo_shared::{
        error::{Error, Result},
        ids::canon_module_id,
    },
    serde::Deserialize,
    serde_json::{Map, Value},
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        path::Path,
    },
};

pub const MODULES_INDEX_FILE: &str = "modules_index.csv";
pub const CONTRACT_RULES_FILE: &str = "module_contract_rules.csv";
pub const DELIVERABLES_FILE: &str = "module_deliverables.csv";
pub const REQUIREMENTS_FILE: &str = "module_requirements_index.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Acquisition,
    Transform,
    Packaging,
    Delivery,
}

impl ModuleKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "acquisition" => Ok(Self::Acquisition),
            "transform" => Ok(Self::Transform),
            "packaging" => Ok(Self::Packaging),
            "delivery" => Ok(Self::Delivery),
            other => Err(Error::Infra(format!("unknown module kind: {other}"))),
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acquisition => f.write_str("acquisition"),
            Self::Transform => f.write_str("transform"),
            Self::Packaging => f.write_str("packaging"),
            Self::Delivery => f.write_str("delivery"),
        }
    }
}

/// Input/output visibility sets compiled from the contract rules table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ports {
    pub tenant_inputs: HashSet<String>,
    pub platform_inputs: HashSet<String>,
    pub tenant_outputs: HashSet<String>,
    pub platform_outputs: HashSet<String>,
    /// Platform-only outputs that downstream steps may still read, granted
    /// by an explicit forwarding rule.
    pub forwarded_outputs: HashSet<String>,
}

impl Ports {
    /// Output keys a later step may bind against.
    pub fn readable_outputs(&self) -> HashSet<String> {
        self.tenant_outputs
            .union(&self.forwarded_outputs)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deliverable {
    /// Platform-only inputs injected when the deliverable is purchased.
    pub limited_inputs: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub secrets: Vec<String>,
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleContract {
    pub module_id: String,
    pub kind: ModuleKind,
    pub version: String,
    pub depends_on: Vec<String>,
    pub supports_downloadable_artifacts: bool,
    pub ports: Ports,
    pub deliverables: BTreeMap<String, Deliverable>,
    pub requirements: Requirements,
}

#[derive(Debug, Deserialize)]
struct IndexRow {
    module_id: String,
    #[allow(dead_code)]
    path: String,
    kind: String,
    version: String,
    supports_downloadable_artifacts: String,
    #[serde(default)]
    depends_on_module_ids: String,
}

#[derive(Debug, Deserialize)]
struct ContractRuleRow {
    module_id: String,
    field: String,
    direction: String,
    visibility: String,
}

#[derive(Debug, Deserialize)]
struct DeliverableRow {
    module_id: String,
    deliverable_id: String,
    #[serde(default)]
    limited_inputs_json: String,
}

#[derive(Debug, Deserialize)]
struct RequirementRow {
    module_id: String,
    requirement_type: String,
    requirement_key: String,
}

#[derive(Debug)]
pub struct ModuleRegistry {
    contracts: HashMap<String, ModuleContract>,
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

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

impl ModuleRegistry {
    pub fn load(maintenance_dir: &Path) -> Result<Self> {
        let index: Vec<IndexRow> = read_table(&maintenance_dir.join(MODULES_INDEX_FILE))?;
        let rules: Vec<ContractRuleRow> = read_table(&maintenance_dir.join(CONTRACT_RULES_FILE))?;
        let deliverables: Vec<DeliverableRow> = read_table(&maintenance_dir.join(DELIVERABLES_FILE))?;
        let requirements: Vec<RequirementRow> = read_table(&maintenance_dir.join(REQUIREMENTS_FILE))?;

        let mut contracts = HashMap::new();
        for row in index {
            let module_id = canon_module_id(&row.module_id)?;
            let depends_on = parse_depends_on(&row.depends_on_module_ids)?;
            let contract = ModuleContract {
                module_id: module_id.clone(),
                kind: ModuleKind::parse(&row.kind)?,
                version: row.version.trim().to_owned(),
                depends_on,
                supports_downloadable_artifacts: parse_bool(&row.supports_downloadable_artifacts),
                ports: Ports::default(),
                deliverables: BTreeMap::new(),
                requirements: Requirements::default(),
            };
            if contracts.insert(module_id.clone(), contract).is_some() {
                return Err(Error::Infra(format!(
                    "duplicate module_id in {MODULES_INDEX_FILE}: {module_id}"
                )));
            }
        }

        for rule in rules {
            let module_id = canon_module_id(&rule.module_id)?;
            let Some(contract) = contracts.get_mut(&module_id) else {
                return Err(Error::UnknownModule(module_id));
            };
            let field = rule.field.trim().to_owned();
            match (
                rule.direction.trim().to_ascii_lowercase().as_str(),
                rule.visibility.trim().to_ascii_lowercase().as_str(),
            ) {
                ("input", "tenant_visible") => {
                    contract.ports.tenant_inputs.insert(field);
                }
                ("input", "platform_only") => {
                    contract.ports.platform_inputs.insert(field);
                }
                ("output", "tenant_visible") => {
                    contract.ports.tenant_outputs.insert(field);
                }
                ("output", "platform_only") => {
                    contract.ports.platform_outputs.insert(field);
                }
                ("output", "platform_forward") => {
                    contract.ports.platform_outputs.insert(field.clone());
                    contract.ports.forwarded_outputs.insert(field);
                }
                (direction, visibility) => {
                    return Err(Error::Infra(format!(
                        "invalid contract rule for {module_id}: direction={direction} visibility={visibility}"
                    )));
                }
            }
        }

        for row in deliverables {
            let module_id = canon_module_id(&row.module_id)?;
            let Some(contract) = contracts.get_mut(&module_id) else {
                return Err(Error::UnknownModule(module_id));
            };
            let limited_inputs = parse_limited_inputs(&row.limited_inputs_json)?;
            contract
                .deliverables
                .insert(row.deliverable_id.trim().to_owned(), Deliverable { limited_inputs });
        }

        for row in requirements {
            let module_id = canon_module_id(&row.module_id)?;
            let Some(contract) = contracts.get_mut(&module_id) else {
                return Err(Error::UnknownModule(module_id));
            };
            let key = row.requirement_key.trim().to_owned();
            match row.requirement_type.trim().to_ascii_lowercase().as_str() {
                "secret" => contract.requirements.secrets.push(key),
                "var" => contract.requirements.vars.push(key),
                other => {
                    return Err(Error::Infra(format!(
                        "invalid requirement_type for {module_id}: {other}"
                    )));
                }
            }
        }

        Ok(Self { contracts })
    }

    pub fn contract(&self, module_id: &str) -> Result<&ModuleContract> {
        let key = canon_module_id(module_id)?;
        self.contracts
            .get(&key)
            .ok_or(Error::UnknownModule(key))
    }

    pub fn ports(&self, module_id: &str) -> Result<&Ports> {
        Ok(&self.contract(module_id)?.ports)
    }

    pub fn deliverables(&self, module_id: &str) -> Result<&BTreeMap<String, Deliverable>> {
        Ok(&self.contract(module_id)?.deliverables)
    }

    /// `module_id -> depends_on` for every known module; planner input.
    pub fn dependency_index(&self) -> HashMap<String, Vec<String>> {
        self.contracts
            .iter()
            .map(|(id, c)| (id.clone(), c.depends_on.clone()))
            .collect()
    }
}

fn parse_depends_on(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(Vec::new());
    }
    let values: Vec<String> = serde_json::from_str(trimmed)
        .map_err(|e| Error::Infra(format!("invalid depends_on_module_ids {trimmed:?}: {e}")))?;
    values.iter().map(|v| canon_module_id(v)).collect()
}

fn parse_limited_inputs(raw: &str) -> Result<Map<String, Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => Err(Error::Infra(format!(
            "limited_inputs_json must be a JSON object: {trimmed:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::fs};

    fn write_catalog(dir: &Path) {
        fs::write(
            dir.join(MODULES_INDEX_FILE),
            "module_id,path,kind,version,supports_downloadable_artifacts,depends_on_module_ids\n\
             search,modules/search,acquisition,1.2.0,false,[]\n\
             package_std,modules/package_std,packaging,0.9.1,true,\"[\"\"search\"\"]\"\n",
        )
        .unwrap();
        fs::write(
            dir.join(CONTRACT_RULES_FILE),
            "module_id,field,direction,visibility\n\
             search,query,input,tenant_visible\n\
             search,api_tier,input,platform_only\n\
             search,results,output,tenant_visible\n\
             search,billing_trace,output,platform_only\n\
             search,session_ref,output,platform_forward\n",
        )
        .unwrap();
        fs::write(
            dir.join(DELIVERABLES_FILE),
            "module_id,deliverable_id,limited_inputs_json\n\
             search,queries,\"{\"\"max_queries\"\": 10}\"\n",
        )
        .unwrap();
        fs::write(
            dir.join(REQUIREMENTS_FILE),
            "module_id,requirement_type,requirement_key\n\
             search,secret,SEARCH_API_KEY\n\
             search,var,SEARCH_REGION\n",
        )
        .unwrap();
    }

    #[test]
    fn loads_contracts_with_ports_and_deliverables() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(dir.path());
        let registry = ModuleRegistry::load(dir.path()).unwrap();

        let search = registry.contract("search").unwrap();
        assert_eq!(search.kind, ModuleKind::Acquisition);
        assert!(search.ports.tenant_inputs.contains("query"));
        assert!(search.ports.platform_inputs.contains("api_tier"));
        assert!(search.ports.tenant_outputs.contains("results"));
        assert!(search.ports.platform_outputs.contains("billing_trace"));
        assert!(search.ports.readable_outputs().contains("session_ref"));
        assert!(!search.ports.readable_outputs().contains("billing_trace"));
        assert_eq!(
            search.deliverables["queries"].limited_inputs["max_queries"],
            serde_json::json!(10)
        );
        assert_eq!(search.requirements.secrets, vec!["SEARCH_API_KEY"]);

        let packaging = registry.contract("package_std").unwrap();
        assert_eq!(packaging.depends_on, vec!["search"]);
        assert!(packaging.supports_downloadable_artifacts);
    }

    #[test]
    fn unknown_module_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(dir.path());
        let registry = ModuleRegistry::load(dir.path()).unwrap();
        assert!(matches!(
            registry.contract("nope"),
            Err(Error::UnknownModule(_))
        ));
    }

    #[test]
    fn digit_ids_match_without_leading_zeros() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MODULES_INDEX_FILE),
            "module_id,path,kind,version,supports_downloadable_artifacts,depends_on_module_ids\n\
             000123,modules/000123,transform,1.0.0,false,[]\n",
        )
        .unwrap();
        let registry = ModuleRegistry::load(dir.path()).unwrap();
        assert!(registry.contract("123").is_ok());
        assert!(registry.contract("0123").is_ok());
    }
}
