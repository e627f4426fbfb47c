//! Declarative work order documents.
//!
//! A work order is a tenant-owned YAML file; the engine treats it as a
//! read-only input and never writes it back.

use {
    ordo_shared::error::{Error, Result, ValidationError},
    serde::Deserialize,
    serde_json::Value,
    std::{collections::BTreeMap, fs, path::Path},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ExecutionMode {
    #[serde(rename = "ALL_OR_NOTHING")]
    AllOrNothing,
    #[default]
    #[serde(rename = "PARTIAL_ALLOWED")]
    PartialAllowed,
}

/// One step input: a literal value, a binding against a prior step's
/// declared output port, or a fixture reference (self-tests only).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InputSpec {
    Binding {
        from_step: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        json_path: Option<String>,
        #[serde(default)]
        take: Option<usize>,
    },
    Fixture {
        fixture: String,
    },
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepDoc {
    pub step_id: String,
    pub module_id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default)]
    pub requested_deliverables: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkOrderDoc {
    pub work_order_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub artifacts_requested: bool,
    #[serde(default)]
    pub steps: Vec<StepDoc>,
}

const fn default_enabled() -> bool {
    true
}

impl WorkOrderDoc {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Infra(format!("workorder not readable: {}: {e}", path.display())))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| ValidationError::Document(format!("workorder yaml: {e}")).into())
    }

    /// Steps that participate in planning, billing, and execution.
    pub fn enabled_steps(&self) -> Vec<&StepDoc> {
        self.steps.iter().filter(|s| s.enabled).collect()
    }
}
