//! Per-workorder execution lifecycle and the queue runner.
//!
//! One executor task per enabled queue entry, bounded by a worker pool;
//! steps inside a workorder run strictly sequentially in plan order. The
//! ledger, run-state, and cache index are shared single-writer components:
//! the mutex is held only for write sections, never across a module
//! invocation.

use {
    crate::{
        binder::{self, StepOutputs},
        evidence::{self, EvidenceReceipt},
        invoke::{CancelToken, InvokeRequest, ModuleStatus, ModuleTable, OUTPUTS_FILE},
        planner,
        preflight::{self, MissingSecret},
        publish::{PublishRequest, Publisher},
        queue::QueueEntry,
        refunds::{self, StepExecution},
        workorder::{ExecutionMode, StepDoc, WorkOrderDoc},
    },
    ordo_catalog::{
        ModuleKind, ModuleRegistry, PlatformPolicy, PriceBook, ReasonCatalog, SecretStore,
    },
    ordo_ledger::{CacheIndex, Ledger, NewTransaction, NewTransactionItem, TxKind},
    ordo_runstate::{RunStateStore, StatusInputs, StepStatus, WorkOrderStatus, reduce},
    ordo_shared::{
        error::{Error, Result},
        ids::{ReasonScope, canon_tenant_id, canon_work_order_id},
        keys,
        time::Clock,
    },
    serde_json::{Map, Value, json},
    std::{
        collections::{BTreeMap, HashMap},
        fs,
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
    tokio::{sync::Mutex, sync::Semaphore, task::JoinSet},
};

const PLAN_TYPE: &str = "steps";

const SLUG_SECRETS_MISSING: &str = "secrets_missing";
const SLUG_NOT_ENOUGH_CREDITS: &str = "not_enough_credits";
const SLUG_VALIDATION_FAILED: &str = "validation_failed";
const SLUG_PLAN_FAILED: &str = "plan_failed";
const SLUG_MISSING_PRICE: &str = "missing_price";
const SLUG_BINDING_ERROR: &str = "binding_error";
const SLUG_MODULE_FAILURE: &str = "module_failure";
const SLUG_TIMEOUT: &str = "timeout";
const SLUG_CANCELLED: &str = "cancelled";

/// Per-kind module invocation timeouts.
#[derive(Debug, Clone)]
pub struct KindTimeouts {
    pub acquisition: Duration,
    pub transform: Duration,
    pub packaging: Duration,
    pub delivery: Duration,
}

impl Default for KindTimeouts {
    fn default() -> Self {
        Self {
            acquisition: Duration::from_secs(120),
            transform: Duration::from_secs(60),
            packaging: Duration::from_secs(300),
            delivery: Duration::from_secs(600),
        }
    }
}

impl KindTimeouts {
    pub const fn for_kind(&self, kind: ModuleKind) -> Duration {
        match kind {
            ModuleKind::Acquisition => self.acquisition,
            ModuleKind::Transform => self.transform,
            ModuleKind::Packaging => self.packaging,
            ModuleKind::Delivery => self.delivery,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base directory for relative workorder paths from the queue.
    pub repo_root: PathBuf,
    pub billing_state_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub fixtures_dir: Option<PathBuf>,
    pub max_workers: usize,
    pub timeouts: KindTimeouts,
}

/// Read-only catalog context, loaded once and passed to the executor at
/// construction.
#[derive(Debug)]
pub struct Context {
    pub registry: ModuleRegistry,
    pub prices: PriceBook,
    pub reasons: ReasonCatalog,
    pub secrets: SecretStore,
    pub policy: PlatformPolicy,
}

/// Mutable per-process stores with exclusive single-writer ownership.
#[derive(Debug)]
pub struct Stores {
    pub ledger: Ledger,
    pub run_state: RunStateStore,
    pub cache: CacheIndex,
}

#[derive(Debug)]
pub enum EntryOutcome {
    Executed(WorkOrderStatus),
    /// Document shape, gating, or plan-time catalog failure; nothing was
    /// reserved.
    ValidationFailed(Vec<Error>),
    /// Required secrets unresolved; audit transaction emitted, no steps
    /// executed.
    PreflightFailed(Vec<MissingSecret>),
    Disabled,
    Infra(Error),
}

#[derive(Debug)]
pub struct QueueSummary {
    pub results: Vec<(String, EntryOutcome)>,
}

impl QueueSummary {
    pub fn any_validation_failures(&self) -> bool {
        self.results.iter().any(|(_, outcome)| {
            matches!(
                outcome,
                EntryOutcome::ValidationFailed(_) | EntryOutcome::PreflightFailed(_)
            )
        })
    }

    pub fn any_infra_failures(&self) -> bool {
        self.results
            .iter()
            .any(|(_, outcome)| matches!(outcome, EntryOutcome::Infra(_)))
    }
}

pub struct Orchestrator {
    ctx: Arc<Context>,
    modules: Arc<ModuleTable>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    stores: Arc<Mutex<Stores>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct PlannedCharges {
    est_total: i64,
    breakdowns: BTreeMap<String, BTreeMap<String, i64>>,
}

impl Orchestrator {
    pub fn new(
        ctx: Context,
        modules: ModuleTable,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        stores: Stores,
    ) -> Self {
        Self {
            ctx: Arc::new(ctx),
            modules: Arc::new(modules),
            publisher,
            clock,
            config: Arc::new(config),
            stores: Arc::new(Mutex::new(stores)),
        }
    }

    pub fn stores(&self) -> Arc<Mutex<Stores>> {
        Arc::clone(&self.stores)
    }

    /// Run every enabled queue entry, parallel across workorders up to the
    /// configured pool size. Across workorders no ordering is guaranteed.
    pub async fn run_queue(
        self: &Arc<Self>,
        entries: Vec<QueueEntry>,
        cancel: CancelToken,
    ) -> QueueSummary {
        let permits = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut results = Vec::new();

        for entry in entries {
            if !entry.is_enabled() {
                results.push((entry.work_order_id.clone(), EntryOutcome::Disabled));
                continue;
            }
            let orchestrator = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = orchestrator.execute_entry(&entry, cancel).await;
                (entry.work_order_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("executor task panicked: {e}");
                }
            }
        }
        QueueSummary { results }
    }

    #[tracing::instrument(level = "info", skip_all, fields(work_order_id = %entry.work_order_id))]
    pub async fn execute_entry(&self, entry: &QueueEntry, cancel: CancelToken) -> EntryOutcome {
        match self.execute_workorder(entry, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("workorder failed with infrastructure error: {e}");
                EntryOutcome::Infra(e)
            }
        }
    }

    async fn execute_workorder(
        &self,
        entry: &QueueEntry,
        cancel: CancelToken,
    ) -> Result<EntryOutcome> {
        let tenant_id = canon_tenant_id(&entry.tenant_id)?;
        let work_order_id = canon_work_order_id(&entry.work_order_id)?;
        let workorder_path = self.resolve_workorder_path(&entry.path);

        let doc = match WorkOrderDoc::load(&workorder_path) {
            Ok(doc) => doc,
            Err(e @ Error::Validation(_)) => {
                self.record_blocked(
                    &tenant_id,
                    &work_order_id,
                    &entry.path,
                    SLUG_VALIDATION_FAILED,
                    &e.to_string(),
                )
                .await?;
                return Ok(EntryOutcome::ValidationFailed(vec![e]));
            }
            Err(e) => return Err(e),
        };
        if !doc.enabled {
            return Ok(EntryOutcome::Disabled);
        }

        {
            let now = self.clock.now_iso();
            let mut stores = self.stores.lock().await;
            let mut metadata = Map::new();
            metadata.insert("workorder_path".into(), json!(entry.path));
            metadata.insert("artifacts_requested".into(), json!(doc.artifacts_requested));
            stores.run_state.create_run(&tenant_id, &work_order_id, metadata, &now);
        }

        // Document validation and activation gating.
        let report = preflight::validate_workorder(&doc, &self.ctx.registry);
        for warning in &report.warnings {
            tracing::warn!(work_order_id = %work_order_id, "{warning}");
        }
        if report.blocks_execution() {
            let note = report
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            self.record_blocked(
                &tenant_id,
                &work_order_id,
                &entry.path,
                SLUG_VALIDATION_FAILED,
                &note,
            )
            .await?;
            return Ok(EntryOutcome::ValidationFailed(report.errors));
        }

        // Plan construction.
        let steps = doc.enabled_steps();
        let plan = match planner::plan(&steps, &self.ctx.registry.dependency_index()) {
            Ok(plan) => plan,
            Err(e) => {
                self.record_blocked(
                    &tenant_id,
                    &work_order_id,
                    &entry.path,
                    SLUG_PLAN_FAILED,
                    &e.to_string(),
                )
                .await?;
                return Ok(EntryOutcome::ValidationFailed(vec![e]));
            }
        };

        // Required-secret gate.
        if let Err(missing) =
            preflight::check_required_secrets(&plan, &self.ctx.registry, &self.ctx.secrets)
        {
            let compact: Vec<String> = missing
                .iter()
                .map(|m| format!("{}:{}:{}", m.step_id, m.module_id, m.secret_key))
                .collect();
            tracing::warn!(work_order_id = %work_order_id, missing = ?compact, "preflight failed: missing required secrets");
            let reason_code = self.resolve_reason("", SLUG_SECRETS_MISSING);
            let now = self.clock.now_iso();
            let mut stores = self.stores.lock().await;
            let mut metadata = Map::new();
            metadata.insert("workorder_path".into(), json!(entry.path));
            metadata.insert("reason_code".into(), json!(reason_code));
            metadata.insert("missing_secrets".into(), json!(compact));
            Self::post_audit_spend(
                &mut stores.ledger,
                &tenant_id,
                &work_order_id,
                &reason_code,
                "Preflight failed: missing required secrets for one or more enabled steps",
                "__preflight__",
                metadata.clone(),
                &now,
            );
            stores.run_state.set_run_status(
                &tenant_id,
                &work_order_id,
                WorkOrderStatus::Failed,
                metadata,
                &now,
            );
            Self::flush(&mut stores)?;
            return Ok(EntryOutcome::PreflightFailed(missing));
        }

        // Price estimation over the whole plan.
        let charges = match self.estimate_charges(&plan) {
            Ok(charges) => charges,
            Err(e @ Error::MissingPrice { .. }) => {
                self.record_blocked(
                    &tenant_id,
                    &work_order_id,
                    &entry.path,
                    SLUG_MISSING_PRICE,
                    &e.to_string(),
                )
                .await?;
                return Ok(EntryOutcome::ValidationFailed(vec![e]));
            }
            Err(e) => return Err(e),
        };

        // Credit gate and eager reservation.
        let (spend_transaction_id, breakdowns) = {
            let now = self.clock.now_iso();
            let mut stores = self.stores.lock().await;
            let available = stores.ledger.balance(&tenant_id);
            if available < charges.est_total {
                let reason_code = self.resolve_reason("", SLUG_NOT_ENOUGH_CREDITS);
                let note = format!(
                    "Insufficient credits: available={available}, required={}",
                    charges.est_total
                );
                tracing::warn!(work_order_id = %work_order_id, "{note}");
                let mut metadata = Map::new();
                metadata.insert("workorder_path".into(), json!(entry.path));
                metadata.insert("reason_code".into(), json!(reason_code));
                metadata.insert("available".into(), json!(available));
                metadata.insert("required".into(), json!(charges.est_total));
                Self::post_audit_spend(
                    &mut stores.ledger,
                    &tenant_id,
                    &work_order_id,
                    &reason_code,
                    &note,
                    "__credits_gate__",
                    metadata.clone(),
                    &now,
                );
                stores.run_state.set_run_status(
                    &tenant_id,
                    &work_order_id,
                    WorkOrderStatus::Failed,
                    metadata,
                    &now,
                );
                Self::flush(&mut stores)?;
                return Ok(EntryOutcome::Executed(WorkOrderStatus::Failed));
            }

            let reserved = self.reserve(
                &mut stores.ledger,
                &tenant_id,
                &work_order_id,
                &entry.path,
                &plan,
                &charges,
                &now,
            );
            stores.run_state.set_run_status(
                &tenant_id,
                &work_order_id,
                WorkOrderStatus::Running,
                Map::new(),
                &now,
            );
            reserved
        };

        // Sequential step execution in plan order.
        let mut prior: HashMap<String, StepOutputs> = HashMap::new();
        let mut executions: Vec<StepExecution> = Vec::new();
        let mut stop_reason: Option<String> = None;
        let mut cancelled = false;

        for step in &plan {
            let contract = self.ctx.registry.contract(&step.module_id)?;
            let breakdown = breakdowns
                .get(&step.step_id)
                .cloned()
                .unwrap_or_default();
            let label = format!("{} [{}]", contract.module_id, step.step_id);

            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                tracing::warn!(work_order_id = %work_order_id, "cancellation requested");
            }
            if cancelled || stop_reason.is_some() {
                let reason_code = if cancelled {
                    self.resolve_reason(&contract.module_id, SLUG_CANCELLED)
                } else {
                    stop_reason.clone().unwrap_or_default()
                };
                self.record_skipped_step(&tenant_id, &work_order_id, step, &reason_code)
                    .await;
                executions.push(StepExecution {
                    step_id: step.step_id.clone(),
                    module_id: contract.module_id.clone(),
                    kind: contract.kind,
                    status: StepStatus::Skipped,
                    reason_code,
                    refund_eligible: true,
                    breakdown,
                    label,
                });
                continue;
            }

            let execution = self
                .execute_step(
                    &tenant_id,
                    &work_order_id,
                    step,
                    breakdown,
                    label,
                    &mut prior,
                    cancel.clone(),
                )
                .await?;

            if execution.status == StepStatus::Failed && doc.mode == ExecutionMode::AllOrNothing {
                stop_reason = Some(execution.reason_code.clone());
            }
            executions.push(execution);
        }

        // Refund phase.
        {
            let now = self.clock.now_iso();
            let mut stores = self.stores.lock().await;
            let refunded = refunds::emit_refunds(
                &mut stores.ledger,
                &tenant_id,
                &work_order_id,
                &spend_transaction_id,
                &executions,
                &self.ctx.reasons,
                &now,
            );
            if refunded > 0 {
                tracing::info!(work_order_id = %work_order_id, refunded, "refunds applied");
            }
        }

        // Evidence archival; failure is reported, never corrupting.
        let ended_at = self.clock.now_iso();
        let receipt = match evidence::archive_runtime_evidence(
            &self.config.billing_state_dir,
            &self.config.runtime_dir,
            &tenant_id,
            &work_order_id,
            &ended_at,
            &ended_at,
        ) {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(work_order_id = %work_order_id, "failed to persist evidence: {e}");
                None
            }
        };
        if let Some(receipt) = &receipt {
            self.register_evidence(receipt, &ended_at).await;
        }

        // Publisher seam: only consulted when everything completed.
        let statuses: Vec<StepStatus> = executions.iter().map(|e| e.status).collect();
        let all_completed = !statuses.is_empty()
            && statuses.iter().all(|s| *s == StepStatus::Completed);
        let publish_required = doc.artifacts_requested;
        let mut publish_completed = false;
        if publish_required && all_completed {
            publish_completed = self
                .publisher
                .publish(&PublishRequest {
                    tenant_id: &tenant_id,
                    work_order_id: &work_order_id,
                    evidence: receipt.as_ref(),
                })
                .unwrap_or_else(|e| {
                    tracing::warn!(work_order_id = %work_order_id, "publisher failed: {e}");
                    false
                });
        }

        // Status reduction and durable save.
        let final_status = {
            let mut stores = self.stores.lock().await;
            let refunds_exist = stores.ledger.refunds_exist(&tenant_id, &work_order_id);
            let reduced = reduce(&StatusInputs {
                step_statuses: statuses,
                refunds_exist,
                publish_required,
                publish_completed,
            });
            let final_status = if cancelled {
                WorkOrderStatus::Failed
            } else {
                reduced
            };
            let mut metadata = Map::new();
            metadata.insert("plan_type".into(), json!(PLAN_TYPE));
            metadata.insert("run_id".into(), json!(spend_transaction_id));
            metadata.insert("ended_at".into(), json!(ended_at));
            if cancelled {
                metadata.insert("reason_slug".into(), json!(SLUG_CANCELLED));
            }
            stores.run_state.set_run_status(
                &tenant_id,
                &work_order_id,
                final_status,
                metadata,
                &ended_at,
            );
            Self::flush(&mut stores)?;
            final_status
        };

        tracing::info!(
            work_order_id = %work_order_id,
            status = %final_status,
            plan_type = PLAN_TYPE,
            "workorder finished"
        );
        Ok(EntryOutcome::Executed(final_status))
    }

    /// Run one step end to end: bind, inject, invoke with timeout, classify.
    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        tenant_id: &str,
        work_order_id: &str,
        step: &StepDoc,
        breakdown: BTreeMap<String, i64>,
        label: String,
        prior: &mut HashMap<String, StepOutputs>,
        cancel: CancelToken,
    ) -> Result<StepExecution> {
        let contract = self.ctx.registry.contract(&step.module_id)?;
        let outputs_dir = self
            .config
            .runtime_dir
            .join("runs")
            .join(tenant_id)
            .join(work_order_id)
            .join(&step.step_id);

        {
            let now = self.clock.now_iso();
            let step_run_key =
                keys::step_run(tenant_id, work_order_id, &step.step_id, &contract.module_id);
            let mut stores = self.stores.lock().await;
            let mut metadata = Map::new();
            metadata.insert("plan_type".into(), json!(PLAN_TYPE));
            stores.run_state.create_step_run(
                tenant_id,
                work_order_id,
                &step.step_id,
                &contract.module_id,
                &step_run_key,
                &outputs_dir,
                metadata,
                &now,
            );
        }

        // Platform-only inputs from the purchased deliverable contracts.
        let mut limited_inputs = Map::new();
        for deliverable_id in &step.requested_deliverables {
            if let Some(deliverable) = contract.deliverables.get(deliverable_id.trim()) {
                for (key, value) in &deliverable.limited_inputs {
                    limited_inputs.insert(key.clone(), value.clone());
                }
            }
        }

        let params = match binder::resolve_inputs(
            step,
            contract,
            &limited_inputs,
            prior,
            self.config.fixtures_dir.as_deref(),
        ) {
            Ok(params) => params,
            Err(e @ Error::Binding(_)) => {
                tracing::warn!(step_id = %step.step_id, "input binding failed: {e}");
                let reason_code = self.resolve_reason(&contract.module_id, SLUG_BINDING_ERROR);
                return Ok(self
                    .finish_failed_step(
                        work_order_id,
                        step,
                        contract.kind,
                        &contract.module_id,
                        reason_code,
                        default_refund_eligibility(contract.kind),
                        breakdown,
                        label,
                        &e.to_string(),
                    )
                    .await);
            }
            Err(e) => return Err(e),
        };

        fs::create_dir_all(&outputs_dir)?;

        let invoked = match self.modules.get(&contract.module_id) {
            Ok(module) => {
                let request = InvokeRequest {
                    module_id: contract.module_id.clone(),
                    params,
                    outputs_dir: outputs_dir.clone(),
                    cancel,
                };
                let timeout = self.config.timeouts.for_kind(contract.kind);
                match tokio::time::timeout(
                    timeout,
                    tokio::task::spawn_blocking(move || module.run(request)),
                )
                .await
                {
                    Err(_elapsed) => {
                        tracing::warn!(step_id = %step.step_id, ?timeout, "module invocation timed out");
                        Err(SLUG_TIMEOUT)
                    }
                    Ok(Err(join_error)) => {
                        return Err(Error::Infra(format!("module task failed: {join_error}")));
                    }
                    Ok(Ok(Err(module_error))) => {
                        tracing::warn!(step_id = %step.step_id, "module errored: {module_error}");
                        Err(SLUG_MODULE_FAILURE)
                    }
                    Ok(Ok(Ok(outcome))) => Ok(outcome),
                }
            }
            Err(_) => {
                tracing::warn!(
                    step_id = %step.step_id,
                    module_id = %contract.module_id,
                    "module has no registered implementation"
                );
                Err(SLUG_MODULE_FAILURE)
            }
        };

        match invoked {
            Ok(outcome) if outcome.status == ModuleStatus::Completed => {
                let values = read_step_outputs(&outputs_dir, &outcome.metadata);
                prior.insert(
                    step.step_id.clone(),
                    StepOutputs {
                        values,
                        readable: contract.ports.readable_outputs(),
                    },
                );
                let now = self.clock.now_iso();
                let mut stores = self.stores.lock().await;
                let mut metadata = Map::new();
                if let Some(output_ref) = &outcome.output_ref {
                    metadata.insert("output_ref".into(), json!(output_ref));
                }
                stores.run_state.finish_step_run(
                    work_order_id,
                    &step.step_id,
                    StepStatus::Completed,
                    metadata,
                    &now,
                );
                Ok(StepExecution {
                    step_id: step.step_id.clone(),
                    module_id: contract.module_id.clone(),
                    kind: contract.kind,
                    status: StepStatus::Completed,
                    reason_code: String::new(),
                    refund_eligible: false,
                    breakdown,
                    label,
                })
            }
            Ok(outcome) => {
                let slug = outcome
                    .reason_slug
                    .as_deref()
                    .unwrap_or(SLUG_MODULE_FAILURE);
                let reason_code = self.resolve_reason(&contract.module_id, slug);
                let eligible = outcome
                    .refund_eligible
                    .unwrap_or_else(|| default_refund_eligibility(contract.kind));
                Ok(self
                    .finish_failed_step(
                        work_order_id,
                        step,
                        contract.kind,
                        &contract.module_id,
                        reason_code,
                        eligible,
                        breakdown,
                        label,
                        slug,
                    )
                    .await)
            }
            Err(slug) => {
                let reason_code = self.resolve_reason(&contract.module_id, slug);
                Ok(self
                    .finish_failed_step(
                        work_order_id,
                        step,
                        contract.kind,
                        &contract.module_id,
                        reason_code,
                        default_refund_eligibility(contract.kind),
                        breakdown,
                        label,
                        slug,
                    )
                    .await)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_failed_step(
        &self,
        work_order_id: &str,
        step: &StepDoc,
        kind: ModuleKind,
        module_id: &str,
        reason_code: String,
        refund_eligible: bool,
        breakdown: BTreeMap<String, i64>,
        label: String,
        note: &str,
    ) -> StepExecution {
        let now = self.clock.now_iso();
        let mut stores = self.stores.lock().await;
        let mut metadata = Map::new();
        metadata.insert("reason_code".into(), json!(reason_code));
        metadata.insert("note".into(), json!(note));
        stores.run_state.finish_step_run(
            work_order_id,
            &step.step_id,
            StepStatus::Failed,
            metadata,
            &now,
        );
        StepExecution {
            step_id: step.step_id.clone(),
            module_id: module_id.to_owned(),
            kind,
            status: StepStatus::Failed,
            reason_code,
            refund_eligible,
            breakdown,
            label,
        }
    }

    async fn record_skipped_step(
        &self,
        tenant_id: &str,
        work_order_id: &str,
        step: &StepDoc,
        reason_code: &str,
    ) {
        let now = self.clock.now_iso();
        let step_run_key = keys::step_run(tenant_id, work_order_id, &step.step_id, &step.module_id);
        let outputs_dir = self
            .config
            .runtime_dir
            .join("runs")
            .join(tenant_id)
            .join(work_order_id)
            .join(&step.step_id);
        let mut stores = self.stores.lock().await;
        stores.run_state.create_step_run(
            tenant_id,
            work_order_id,
            &step.step_id,
            &step.module_id,
            &step_run_key,
            &outputs_dir,
            Map::new(),
            &now,
        );
        let mut metadata = Map::new();
        metadata.insert("reason_code".into(), json!(reason_code));
        stores.run_state.finish_step_run(
            work_order_id,
            &step.step_id,
            StepStatus::Skipped,
            metadata,
            &now,
        );
    }

    /// Estimate the whole plan's reservation: base `__run__` price plus
    /// every requested deliverable per step.
    fn estimate_charges(&self, plan: &[&StepDoc]) -> Result<PlannedCharges> {
        let at = self.clock.now();
        let mut breakdowns = BTreeMap::new();
        let mut est_total = 0;
        for step in plan {
            let breakdown = self.ctx.prices.breakdown(
                &step.module_id,
                &step.requested_deliverables,
                at,
            )?;
            est_total += breakdown.values().sum::<i64>();
            breakdowns.insert(step.step_id.clone(), breakdown);
        }
        Ok(PlannedCharges {
            est_total,
            breakdowns,
        })
    }

    /// Post the reservation SPEND and its per-deliverable items; decrement
    /// the balance only when a new reservation row was written. On a
    /// deduplicated rerun the reservation-time prices recorded in the
    /// prior transaction metadata replace the freshly computed ones.
    #[allow(clippy::too_many_arguments)]
    fn reserve(
        &self,
        ledger: &mut Ledger,
        tenant_id: &str,
        work_order_id: &str,
        workorder_path: &str,
        plan: &[&StepDoc],
        charges: &PlannedCharges,
        now: &str,
    ) -> (String, BTreeMap<String, BTreeMap<String, i64>>) {
        let spend_key = keys::workorder_spend(tenant_id, work_order_id, workorder_path, PLAN_TYPE);
        let plan_human = plan
            .iter()
            .map(|s| format!("{} [{}]", s.module_id, s.step_id))
            .collect::<Vec<_>>()
            .join(", ");

        let mut metadata = Map::new();
        metadata.insert("workorder_path".into(), json!(workorder_path));
        metadata.insert("plan_type".into(), json!(PLAN_TYPE));
        metadata.insert(
            "steps".into(),
            json!(plan.iter().map(|s| s.step_id.clone()).collect::<Vec<_>>()),
        );
        metadata.insert("prices".into(), json!(charges.breakdowns));
        metadata.insert("idempotency_key".into(), json!(spend_key));

        let posted = ledger.post_transaction(
            NewTransaction {
                tenant_id: tenant_id.to_owned(),
                work_order_id: work_order_id.to_owned(),
                kind: TxKind::Spend,
                amount_credits: -charges.est_total,
                reason_code: String::new(),
                note: format!("Work order spend: {plan_human}"),
                metadata,
            },
            now,
        );

        let breakdowns = if posted.created {
            ledger.apply_balance_delta(tenant_id, -charges.est_total, now);
            charges.breakdowns.clone()
        } else {
            // Re-run: re-use the prices the reservation was charged at.
            ledger
                .find_transaction(&posted.transaction_id)
                .map(|tx| tx.metadata())
                .and_then(|meta| meta.get("prices").cloned())
                .and_then(|prices| serde_json::from_value(prices).ok())
                .unwrap_or_else(|| charges.breakdowns.clone())
        };

        for step in plan {
            let Some(breakdown) = breakdowns.get(&step.step_id) else {
                continue;
            };
            let label = format!("{} [{}]", step.module_id, step.step_id);
            for (deliverable_id, amount) in breakdown {
                if *amount <= 0 {
                    continue;
                }
                let (item_key, note) = if deliverable_id == ordo_catalog::prices::RUN_DELIVERABLE {
                    (
                        keys::step_run_charge(tenant_id, work_order_id, &step.step_id, &step.module_id),
                        format!("Run spend: {label}"),
                    )
                } else {
                    (
                        keys::deliverable_charge(
                            tenant_id,
                            work_order_id,
                            &step.step_id,
                            &step.module_id,
                            deliverable_id,
                        ),
                        format!("Deliverable spend ({deliverable_id}): {label}"),
                    )
                };
                let mut item_meta = Map::new();
                item_meta.insert("step_id".into(), json!(step.step_id));
                item_meta.insert("deliverable_id".into(), json!(deliverable_id));
                item_meta.insert(
                    "requested_deliverables".into(),
                    json!(step.requested_deliverables),
                );
                item_meta.insert("idempotency_key".into(), json!(item_key));
                ledger.post_transaction_item(
                    NewTransactionItem {
                        transaction_id: posted.transaction_id.clone(),
                        tenant_id: tenant_id.to_owned(),
                        module_id: step.module_id.clone(),
                        work_order_id: work_order_id.to_owned(),
                        step_id: step.step_id.clone(),
                        deliverable_id: deliverable_id.clone(),
                        feature: deliverable_id.clone(),
                        kind: TxKind::Spend,
                        amount_credits: -amount,
                        note,
                        metadata: item_meta,
                    },
                    now,
                );
            }
        }

        (posted.transaction_id, breakdowns)
    }

    /// Zero-amount SPEND transaction + item making a blocked run visible in
    /// billing state.
    #[allow(clippy::too_many_arguments)]
    fn post_audit_spend(
        ledger: &mut Ledger,
        tenant_id: &str,
        work_order_id: &str,
        reason_code: &str,
        note: &str,
        feature: &str,
        metadata: Map<String, Value>,
        now: &str,
    ) {
        let posted = ledger.post_transaction(
            NewTransaction {
                tenant_id: tenant_id.to_owned(),
                work_order_id: work_order_id.to_owned(),
                kind: TxKind::Spend,
                amount_credits: 0,
                reason_code: reason_code.to_owned(),
                note: note.to_owned(),
                metadata: metadata.clone(),
            },
            now,
        );
        ledger.post_transaction_item(
            NewTransactionItem {
                transaction_id: posted.transaction_id,
                tenant_id: tenant_id.to_owned(),
                module_id: String::new(),
                work_order_id: work_order_id.to_owned(),
                step_id: String::new(),
                deliverable_id: String::new(),
                feature: feature.to_owned(),
                kind: TxKind::Spend,
                amount_credits: 0,
                note: note.to_owned(),
                metadata,
            },
            now,
        );
    }

    /// Terminal handling for workorder-level failures before any
    /// reservation: audit transaction, FAILED run status, durable flush.
    async fn record_blocked(
        &self,
        tenant_id: &str,
        work_order_id: &str,
        workorder_path: &str,
        slug: &str,
        note: &str,
    ) -> Result<()> {
        let reason_code = self.resolve_reason("", slug);
        let now = self.clock.now_iso();
        let mut stores = self.stores.lock().await;
        stores
            .run_state
            .create_run(tenant_id, work_order_id, Map::new(), &now);
        let mut metadata = Map::new();
        metadata.insert("workorder_path".into(), json!(workorder_path));
        metadata.insert("reason_code".into(), json!(reason_code));
        Self::post_audit_spend(
            &mut stores.ledger,
            tenant_id,
            work_order_id,
            &reason_code,
            note,
            "__preflight__",
            metadata.clone(),
            &now,
        );
        metadata.insert("note".into(), json!(note));
        stores.run_state.set_run_status(
            tenant_id,
            work_order_id,
            WorkOrderStatus::Failed,
            metadata,
            &now,
        );
        Self::flush(&mut stores)?;
        Ok(())
    }

    async fn register_evidence(&self, receipt: &EvidenceReceipt, now: &str) {
        let mut stores = self.stores.lock().await;
        let zip_ref = format!("{}/{}", evidence::EVIDENCE_SUBDIR, receipt.zip_name);
        let manifest_ref = format!("{}/{}", evidence::EVIDENCE_SUBDIR, receipt.manifest_name);
        let zip_ttl = self.ctx.policy.cache_ttl_days("billing_state", "runtime_evidence");
        let manifest_ttl = self
            .ctx
            .policy
            .cache_ttl_days("billing_state", "runtime_evidence_manifest");
        stores
            .cache
            .upsert("billing_state", "runtime_evidence", &zip_ref, now, zip_ttl);
        stores.cache.upsert(
            "billing_state",
            "runtime_evidence_manifest",
            &manifest_ref,
            now,
            manifest_ttl,
        );
    }

    /// Module scope first, then global, else unclassified.
    fn resolve_reason(&self, module_id: &str, slug: &str) -> String {
        if !module_id.is_empty()
            && let Ok(code) = self
                .ctx
                .reasons
                .reason_code(ReasonScope::Module, module_id, slug)
        {
            return code;
        }
        match self.ctx.reasons.reason_code(ReasonScope::Global, "000", slug) {
            Ok(code) => code,
            Err(_) => {
                tracing::warn!(slug, "reason slug missing from catalog; recording unclassified");
                String::new()
            }
        }
    }

    fn resolve_workorder_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.config.repo_root.join(candidate)
        }
    }

    fn flush(stores: &mut Stores) -> Result<()> {
        stores.ledger.flush()?;
        stores.run_state.flush()?;
        stores.cache.flush()?;
        Ok(())
    }
}

const fn default_refund_eligibility(kind: ModuleKind) -> bool {
    // Delivery modules must assert non-delivery themselves; every other
    // kind failed before producing a billable deliverable.
    !matches!(kind, ModuleKind::Delivery)
}

/// Declared outputs of a completed step: `outputs.json` under the step's
/// outputs directory, falling back to the outcome metadata.
fn read_step_outputs(outputs_dir: &Path, metadata: &Map<String, Value>) -> Map<String, Value> {
    let path = outputs_dir.join(OUTPUTS_FILE);
    if let Ok(raw) = fs::read_to_string(&path)
        && let Ok(Value::Object(map)) = serde_json::from_str(&raw)
    {
        return map;
    }
    metadata.clone()
}
