//! Durable, restart-visible run state.
//!
//! The store owns two append-mostly tables next to the billing ledger:
//! `workorders_log.csv` (one row per workorder run) and
//! `module_runs_log.csv` (one row per step run). Step run creation is
//! idempotent on `(work_order_id, step_id, idempotency_key)` so a re-run
//! reuses the prior record instead of minting a new one.

use {
    crate::status::{StepStatus, WorkOrderStatus},
    ordo_ledger::csvio,
    ordo_shared::error::Result,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    std::path::{Path, PathBuf},
};

pub const WORKORDERS_LOG_FILE: &str = "workorders_log.csv";
pub const MODULE_RUNS_LOG_FILE: &str = "module_runs_log.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id: String,
    pub tenant_id: String,
    pub work_order_id: String,
    pub status: WorkOrderStatus,
    pub created_at: String,
    pub updated_at: String,
    pub metadata_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRunRow {
    pub module_run_id: String,
    pub run_id: String,
    pub tenant_id: String,
    pub work_order_id: String,
    pub step_id: String,
    pub module_id: String,
    pub status: StepStatus,
    pub outputs_dir: String,
    pub idempotency_key: String,
    pub created_at: String,
    pub ended_at: String,
    pub metadata_json: String,
}

#[derive(Debug)]
pub struct RunStateStore {
    dir: PathBuf,
    runs: Vec<RunRow>,
    step_runs: Vec<StepRunRow>,
}

fn merge_metadata(existing: &str, patch: &Map<String, Value>) -> String {
    let mut map: Map<String, Value> = serde_json::from_str(existing).unwrap_or_default();
    for (k, v) in patch {
        map.insert(k.clone(), v.clone());
    }
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_owned())
}

impl RunStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        csvio::ensure_dir(&dir)?;
        Ok(Self {
            runs: csvio::read_rows(&dir.join(WORKORDERS_LOG_FILE))?,
            step_runs: csvio::read_rows(&dir.join(MODULE_RUNS_LOG_FILE))?,
            dir,
        })
    }

    pub fn runs(&self) -> &[RunRow] {
        &self.runs
    }

    pub fn step_runs(&self) -> &[StepRunRow] {
        &self.step_runs
    }

    pub fn find_run(&self, tenant_id: &str, work_order_id: &str) -> Option<&RunRow> {
        self.runs
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.work_order_id == work_order_id)
    }

    /// Create the run record for `(tenant, workorder)`, or return the
    /// existing one's id on a re-attempt.
    pub fn create_run(
        &mut self,
        tenant_id: &str,
        work_order_id: &str,
        metadata: Map<String, Value>,
        now: &str,
    ) -> String {
        if let Some(run) = self.find_run(tenant_id, work_order_id) {
            return run.run_id.clone();
        }
        let run_id = format!("run-{:06}", self.runs.len() + 1);
        self.runs.push(RunRow {
            run_id: run_id.clone(),
            tenant_id: tenant_id.to_owned(),
            work_order_id: work_order_id.to_owned(),
            status: WorkOrderStatus::Pending,
            created_at: now.to_owned(),
            updated_at: now.to_owned(),
            metadata_json: merge_metadata("{}", &metadata),
        });
        run_id
    }

    pub fn set_run_status(
        &mut self,
        tenant_id: &str,
        work_order_id: &str,
        status: WorkOrderStatus,
        metadata: Map<String, Value>,
        now: &str,
    ) {
        if let Some(run) = self
            .runs
            .iter_mut()
            .find(|r| r.tenant_id == tenant_id && r.work_order_id == work_order_id)
        {
            run.status = status;
            run.updated_at = now.to_owned();
            run.metadata_json = merge_metadata(&run.metadata_json, &metadata);
        }
    }

    /// Create a step run, or return a clone of the prior record when the
    /// same `(work_order_id, step_id, idempotency_key)` was seen before.
    #[allow(clippy::too_many_arguments)]
    pub fn create_step_run(
        &mut self,
        tenant_id: &str,
        work_order_id: &str,
        step_id: &str,
        module_id: &str,
        idempotency_key: &str,
        outputs_dir: &Path,
        metadata: Map<String, Value>,
        now: &str,
    ) -> StepRunRow {
        if let Some(existing) = self.step_runs.iter().find(|r| {
            r.work_order_id == work_order_id
                && r.step_id == step_id
                && r.idempotency_key == idempotency_key
        }) {
            return existing.clone();
        }
        let row = StepRunRow {
            module_run_id: format!("mr-{:06}", self.step_runs.len() + 1),
            run_id: self
                .find_run(tenant_id, work_order_id)
                .map(|r| r.run_id.clone())
                .unwrap_or_default(),
            tenant_id: tenant_id.to_owned(),
            work_order_id: work_order_id.to_owned(),
            step_id: step_id.to_owned(),
            module_id: module_id.to_owned(),
            status: StepStatus::Pending,
            outputs_dir: outputs_dir.display().to_string(),
            idempotency_key: idempotency_key.to_owned(),
            created_at: now.to_owned(),
            ended_at: String::new(),
            metadata_json: merge_metadata("{}", &metadata),
        };
        self.step_runs.push(row.clone());
        row
    }

    pub fn finish_step_run(
        &mut self,
        work_order_id: &str,
        step_id: &str,
        status: StepStatus,
        metadata: Map<String, Value>,
        now: &str,
    ) {
        if let Some(row) = self
            .step_runs
            .iter_mut()
            .find(|r| r.work_order_id == work_order_id && r.step_id == step_id)
        {
            row.status = status;
            row.ended_at = now.to_owned();
            row.metadata_json = merge_metadata(&row.metadata_json, &metadata);
        }
    }

    pub fn flush(&self) -> Result<()> {
        csvio::write_rows(&self.dir.join(WORKORDERS_LOG_FILE), &self.runs)?;
        csvio::write_rows(&self.dir.join(MODULE_RUNS_LOG_FILE), &self.step_runs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    const NOW: &str = "2026-08-01T00:00:00Z";

    fn meta(kv: (&str, &str)) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert(kv.0.into(), json!(kv.1));
        m
    }

    #[test]
    fn create_run_is_idempotent_per_workorder() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RunStateStore::open(dir.path()).unwrap();
        let a = store.create_run("t1", "wo1", Map::new(), NOW);
        let b = store.create_run("t1", "wo1", Map::new(), NOW);
        assert_eq!(a, b);
        assert_eq!(store.runs().len(), 1);
    }

    #[test]
    fn step_run_reuses_record_for_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RunStateStore::open(dir.path()).unwrap();
        store.create_run("t1", "wo1", Map::new(), NOW);
        let first = store.create_step_run(
            "t1",
            "wo1",
            "s1",
            "search",
            "key-1",
            Path::new("/runtime/runs/t1/wo1/s1"),
            Map::new(),
            NOW,
        );
        let second = store.create_step_run(
            "t1",
            "wo1",
            "s1",
            "search",
            "key-1",
            Path::new("/elsewhere"),
            meta(("attempt", "2")),
            "2026-08-02T00:00:00Z",
        );
        assert_eq!(first, second);
        assert_eq!(store.step_runs().len(), 1);
    }

    #[test]
    fn status_transitions_and_metadata_merge() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RunStateStore::open(dir.path()).unwrap();
        store.create_run("t1", "wo1", meta(("plan_type", "steps")), NOW);
        store.set_run_status("t1", "wo1", WorkOrderStatus::Running, Map::new(), NOW);
        store.set_run_status(
            "t1",
            "wo1",
            WorkOrderStatus::Completed,
            meta(("note", "done")),
            NOW,
        );
        let run = store.find_run("t1", "wo1").unwrap();
        assert_eq!(run.status, WorkOrderStatus::Completed);
        let parsed: Map<String, Value> = serde_json::from_str(&run.metadata_json).unwrap();
        assert_eq!(parsed["plan_type"], "steps");
        assert_eq!(parsed["note"], "done");
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = RunStateStore::open(dir.path()).unwrap();
            store.create_run("t1", "wo1", Map::new(), NOW);
            store.create_step_run(
                "t1",
                "wo1",
                "s1",
                "search",
                "key-1",
                Path::new("out"),
                Map::new(),
                NOW,
            );
            store.finish_step_run("wo1", "s1", StepStatus::Completed, Map::new(), NOW);
            store.flush().unwrap();
        }
        let mut store = RunStateStore::open(dir.path()).unwrap();
        assert_eq!(store.runs().len(), 1);
        assert_eq!(store.step_runs()[0].status, StepStatus::Completed);
        // The idempotency key still guards re-creation after restart.
        let again = store.create_step_run(
            "t1",
            "wo1",
            "s1",
            "search",
            "key-1",
            Path::new("out"),
            Map::new(),
            NOW,
        );
        assert_eq!(again.module_run_id, "mr-000001");
    }
}
