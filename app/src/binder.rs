//! Step input resolution and port enforcement.
//!
//! Tenants may only set tenant-visible inputs; platform-only inputs come
//! from deliverable contracts and win on collision. Bindings read prior
//! step outputs through the producer's readable output set. Every failure
//! here is a [`BindingError`]: the step fails, siblings continue under
//! PARTIAL_ALLOWED.

use {
    crate::workorder::{InputSpec, StepDoc},
    ordo_catalog::ModuleContract,
    ordo_shared::error::{BindingError, Result},
    serde_json::{Map, Value},
    std::{
        collections::{HashMap, HashSet},
        path::Path,
    },
};

/// Captured outputs of a completed step, with the producer's readable
/// output port set.
#[derive(Debug, Clone, Default)]
pub struct StepOutputs {
    pub values: Map<String, Value>,
    pub readable: HashSet<String>,
}

/// Resolve one step's effective parameters.
///
/// `limited_inputs` are the platform-injected values derived from the
/// purchased deliverable contracts; they are applied last and override any
/// tenant-supplied value for the same key.
pub fn resolve_inputs(
    step: &StepDoc,
    contract: &ModuleContract,
    limited_inputs: &Map<String, Value>,
    prior: &HashMap<String, StepOutputs>,
    fixtures_root: Option<&Path>,
) -> Result<Map<String, Value>> {
    let mut params = Map::new();

    for (key, spec) in &step.inputs {
        if !contract.ports.tenant_inputs.contains(key) {
            return Err(BindingError::InputPortViolation {
                key: key.clone(),
                input: key.clone(),
                module_id: contract.module_id.clone(),
            }
            .into());
        }
        let value = match spec {
            InputSpec::Literal(value) => value.clone(),
            InputSpec::Fixture { fixture } => resolve_fixture(key, fixture, fixtures_root)?,
            InputSpec::Binding {
                from_step,
                selector,
                json_path,
                take,
            } => resolve_binding(key, from_step, selector.as_deref(), json_path.as_deref(), *take, prior)?,
        };
        params.insert(key.clone(), value);
    }

    for (key, value) in limited_inputs {
        params.insert(key.clone(), value.clone());
    }

    Ok(params)
}

fn resolve_fixture(key: &str, fixture: &str, fixtures_root: Option<&Path>) -> Result<Value> {
    let relative = Path::new(fixture);
    let escapes = relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    let Some(root) = fixtures_root else {
        return Err(BindingError::FixtureOutsideRoot {
            key: key.to_owned(),
            fixture: fixture.to_owned(),
        }
        .into());
    };
    if escapes {
        return Err(BindingError::FixtureOutsideRoot {
            key: key.to_owned(),
            fixture: fixture.to_owned(),
        }
        .into());
    }
    Ok(Value::String(format!("file://{}", root.join(relative).display())))
}

fn resolve_binding(
    key: &str,
    from_step: &str,
    selector: Option<&str>,
    json_path: Option<&str>,
    take: Option<usize>,
    prior: &HashMap<String, StepOutputs>,
) -> Result<Value> {
    let outputs = prior.get(from_step).ok_or_else(|| BindingError::UndefinedFromStep {
        key: key.to_owned(),
        from_step: from_step.to_owned(),
    })?;

    let path = match (selector, json_path) {
        (Some(s), _) => s.to_owned(),
        (None, Some(p)) => normalize_json_path(p),
        (None, None) => String::new(),
    };
    let segments = parse_path(&path).ok_or_else(|| BindingError::PathEvaluation {
        key: key.to_owned(),
        path: path.clone(),
    })?;

    let port = match segments.first() {
        Some(PathSegment::Key(port)) => port.clone(),
        _ => {
            return Err(BindingError::PathEvaluation {
                key: key.to_owned(),
                path,
            }
            .into());
        }
    };
    if !outputs.readable.contains(&port) {
        return Err(BindingError::OutputPortViolation {
            key: key.to_owned(),
            output: port,
            from_step: from_step.to_owned(),
        }
        .into());
    }

    let root = Value::Object(outputs.values.clone());
    let mut value = eval_path(&root, &segments).ok_or_else(|| BindingError::PathEvaluation {
        key: key.to_owned(),
        path: path.clone(),
    })?;

    if let (Some(n), Value::Array(items)) = (take, &mut value) {
        items.truncate(n);
    }
    Ok(value)
}

fn normalize_json_path(path: &str) -> String {
    path.trim()
        .strip_prefix("$.")
        .or_else(|| path.trim().strip_prefix('$'))
        .unwrap_or(path.trim())
        .to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse a dotted key path with optional `[n]` array access, e.g.
/// `results.items[0].url`.
fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        let key_end = rest.find('[').unwrap_or(rest.len());
        let key = &rest[..key_end];
        if key.is_empty() {
            return None;
        }
        segments.push(PathSegment::Key(key.to_owned()));
        rest = &rest[key_end..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            let index: usize = stripped[..close].parse().ok()?;
            segments.push(PathSegment::Index(index));
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }
    Some(segments)
}

fn eval_path(root: &Value, segments: &[PathSegment]) -> Option<Value> {
    let mut current = root;
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current.clone())
}
