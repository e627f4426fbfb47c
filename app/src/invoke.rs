//! The module entry point seam.
//!
//! Modules are pluggable units of work registered in a [`ModuleTable`].
//! The engine calls them blocking (module I/O and subprocesses are their
//! own concern, including retries) from a worker thread, bounded by a
//! per-kind timeout, and only observes the returned outcome plus the files
//! written under `outputs_dir`.

use {
    ordo_shared::error::{Error, Result},
    serde::Deserialize,
    serde_json::{Map, Value},
    std::{collections::HashMap, path::PathBuf, sync::Arc},
    tokio::sync::watch,
};

/// Declared outputs a module surfaces to later steps, written as
/// `outputs.json` in its outputs directory.
pub const OUTPUTS_FILE: &str = "outputs.json";

/// Cooperative cancellation token passed to every step.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    /// A token that can never fire; useful for targeted runs and tests.
    /// The receiver keeps reporting the last value after the sender drops.
    pub fn none() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ModuleStatus {
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

/// What a module reports back through the entry point ABI.
#[derive(Debug, Clone)]
pub struct ModuleOutcome {
    pub status: ModuleStatus,
    pub reason_slug: Option<String>,
    pub refund_eligible: Option<bool>,
    pub output_ref: Option<String>,
    pub metadata: Map<String, Value>,
}

impl ModuleOutcome {
    pub fn completed() -> Self {
        Self {
            status: ModuleStatus::Completed,
            reason_slug: None,
            refund_eligible: None,
            output_ref: None,
            metadata: Map::new(),
        }
    }

    pub fn failed(reason_slug: &str) -> Self {
        Self {
            status: ModuleStatus::Failed,
            reason_slug: Some(reason_slug.to_owned()),
            refund_eligible: None,
            output_ref: None,
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub module_id: String,
    pub params: Map<String, Value>,
    pub outputs_dir: PathBuf,
    pub cancel: CancelToken,
}

/// A registered module implementation.
pub trait ModuleRun: Send + Sync {
    fn run(&self, request: InvokeRequest) -> Result<ModuleOutcome>;
}

impl<F> ModuleRun for F
where
    F: Fn(InvokeRequest) -> Result<ModuleOutcome> + Send + Sync,
{
    fn run(&self, request: InvokeRequest) -> Result<ModuleOutcome> {
        self(request)
    }
}

/// Module implementations by module id.
#[derive(Default, Clone)]
pub struct ModuleTable {
    entries: HashMap<String, Arc<dyn ModuleRun>>,
}

impl std::fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleTable")
            .field("modules", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module_id: impl Into<String>, module: Arc<dyn ModuleRun>) {
        self.entries.insert(module_id.into(), module);
    }

    pub fn with(mut self, module_id: impl Into<String>, module: Arc<dyn ModuleRun>) -> Self {
        self.register(module_id, module);
        self
    }

    pub fn get(&self, module_id: &str) -> Result<Arc<dyn ModuleRun>> {
        self.entries
            .get(module_id)
            .cloned()
            .ok_or_else(|| Error::UnknownModule(module_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_observes_handle() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn none_token_never_fires() {
        let token = CancelToken::none();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn closures_register_as_modules() {
        let table = ModuleTable::new().with(
            "echo",
            Arc::new(|request: InvokeRequest| -> Result<ModuleOutcome> {
                let mut outcome = ModuleOutcome::completed();
                outcome.metadata = request.params;
                Ok(outcome)
            }),
        );
        let module = table.get("echo").unwrap();
        let outcome = module
            .run(InvokeRequest {
                module_id: "echo".into(),
                params: Map::new(),
                outputs_dir: PathBuf::from("unused"),
                cancel: CancelToken::none(),
            })
            .unwrap();
        assert_eq!(outcome.status, ModuleStatus::Completed);
        assert!(table.get("missing").is_err());
    }
}
