use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Engine-visible failure kinds.
///
/// Per-step failures are caught by the executor and mapped into outcome
/// records; workorder-level failures terminate the workorder with an audit
/// transaction. Nothing here escapes the executor loop as a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("unknown reason slug: scope={scope} module={module_id} slug={slug}")]
    UnknownReason {
        scope: String,
        module_id: String,
        slug: String,
    },
    #[error("no price found for module {module_id} deliverable {deliverable_id}")]
    MissingPrice {
        module_id: String,
        deliverable_id: String,
    },
    #[error("work order missing required dependency modules: {0:?}")]
    MissingDep(Vec<String>),
    #[error("dependency cycle detected at module {0}")]
    Cycle(String),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("module {module_id} failed: {reason_slug}")]
    ModuleFailure {
        module_id: String,
        reason_slug: String,
    },
    #[error("infrastructure failure: {0}")]
    Infra(String),
}

impl Error {
    pub fn infra(e: impl std::fmt::Display) -> Self {
        Self::Infra(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Infra(value.to_string())
    }
}

/// Document-shape and activation-gating violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("invalid reason code: {0}")]
    InvalidReasonCode(String),
    #[error("workorder document malformed: {0}")]
    Document(String),
    #[error("step {step_id}: missing required field 'kind'")]
    MissingStepKind { step_id: String },
    #[error("step {step_id}: declared kind {declared} does not match module {module_id} kind {actual}")]
    KindMismatch {
        step_id: String,
        module_id: String,
        declared: String,
        actual: String,
    },
    #[error("duplicate step_id: {0}")]
    DuplicateStepId(String),
    #[error("artifacts requested but missing packaging step")]
    MissingPackaging,
    #[error("packaging present but missing delivery step")]
    MissingDelivery,
    #[error("wrong order (delivery before packaging)")]
    DeliveryBeforePackaging,
}

/// Input resolution failures. These fail the affected step only; siblings
/// continue under PARTIAL_ALLOWED.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("step input {key}: unknown source step {from_step}")]
    UndefinedFromStep { key: String, from_step: String },
    #[error("step input {key}: {input} is not a tenant-visible input of module {module_id}")]
    InputPortViolation {
        key: String,
        input: String,
        module_id: String,
    },
    #[error("step input {key}: {output} is not a readable output of step {from_step}")]
    OutputPortViolation {
        key: String,
        output: String,
        from_step: String,
    },
    #[error("step input {key}: path {path:?} did not match the output document")]
    PathEvaluation { key: String, path: String },
    #[error("step input {key}: fixture escapes the fixtures root: {fixture}")]
    FixtureOutsideRoot { key: String, fixture: String },
    #[error("step inputs must be a mapping")]
    InputsNotAMapping,
}
