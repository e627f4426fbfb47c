//! Work order status reduction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkOrderStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "AWAITING_PUBLISH")]
    AwaitingPublish,
}

impl std::fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Partial => "PARTIAL",
            Self::AwaitingPublish => "AWAITING_PUBLISH",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInputs {
    /// Terminal per-step statuses in plan order. Steps skipped by an
    /// ALL_OR_NOTHING stop or a cancellation appear as `Skipped`.
    pub step_statuses: Vec<StepStatus>,
    pub refunds_exist: bool,
    pub publish_required: bool,
    pub publish_completed: bool,
}

/// Reduce per-step outcomes to the workorder terminal status.
///
/// Total and deterministic: depends only on the multiset of statuses and
/// the flags, not on step order or call order. Used both at end of run and
/// when reloading a run for audit.
pub fn reduce(inputs: &StatusInputs) -> WorkOrderStatus {
    let total = inputs.step_statuses.len();
    if total == 0 {
        return WorkOrderStatus::Failed;
    }
    let completed = inputs
        .step_statuses
        .iter()
        .filter(|s| **s == StepStatus::Completed)
        .count();

    if completed == total && !inputs.refunds_exist {
        if inputs.publish_required && !inputs.publish_completed {
            return WorkOrderStatus::AwaitingPublish;
        }
        return WorkOrderStatus::Completed;
    }
    if completed == 0 {
        return WorkOrderStatus::Failed;
    }
    WorkOrderStatus::Partial
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    fn inputs(statuses: &[StepStatus], refunds: bool, required: bool, done: bool) -> StatusInputs {
        StatusInputs {
            step_statuses: statuses.to_vec(),
            refunds_exist: refunds,
            publish_required: required,
            publish_completed: done,
        }
    }

    use StepStatus::{Completed, Failed, Skipped};

    #[test_case(&[Completed, Completed], false, false, false, WorkOrderStatus::Completed)]
    #[test_case(&[Completed, Completed], false, true, false, WorkOrderStatus::AwaitingPublish)]
    #[test_case(&[Completed, Completed], false, true, true, WorkOrderStatus::Completed)]
    #[test_case(&[Failed, Failed], true, false, false, WorkOrderStatus::Failed)]
    #[test_case(&[Skipped, Skipped], true, false, false, WorkOrderStatus::Failed)]
    #[test_case(&[Completed, Failed, Skipped], true, false, false, WorkOrderStatus::Partial)]
    #[test_case(&[Completed, Completed], true, false, false, WorkOrderStatus::Partial)]
    #[test_case(&[], false, false, false, WorkOrderStatus::Failed)]
    fn reduction_table(
        statuses: &[StepStatus],
        refunds: bool,
        required: bool,
        done: bool,
        expected: WorkOrderStatus,
    ) {
        assert_eq!(reduce(&inputs(statuses, refunds, required, done)), expected);
    }

    #[test]
    fn independent_of_step_order() {
        let a = inputs(&[Completed, Failed], false, false, false);
        let b = inputs(&[Failed, Completed], false, false, false);
        assert_eq!(reduce(&a), reduce(&b));
    }

    #[test]
    fn total_over_flag_domain() {
        for statuses in [
            vec![Completed],
            vec![Failed],
            vec![Skipped],
            vec![Completed, Failed],
        ] {
            for refunds in [false, true] {
                for required in [false, true] {
                    for done in [false, true] {
                        // Must not panic for any input combination.
                        let _ = reduce(&inputs(&statuses, refunds, required, done));
                    }
                }
            }
        }
    }
}
