//! Deterministic idempotency keys.
//!
//! Every billing or execution event that must happen at most once is
//! identified by a SHA-256 hex digest over a canonically ordered, delimited
//! tuple. No clocks, no randomness: identical inputs produce identical keys
//! across processes and releases.

use sha2::{Digest, Sha256};

const DELIMITER: u8 = 0x1f;

fn digest(family: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(family.as_bytes());
    for part in parts {
        hasher.update([DELIMITER]);
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Key for the single reservation SPEND of a workorder run.
pub fn workorder_spend(
    tenant_id: &str,
    work_order_id: &str,
    workorder_path: &str,
    plan_type: &str,
) -> String {
    digest(
        "workorder_spend",
        &[tenant_id, work_order_id, workorder_path, plan_type],
    )
}

/// Key for a step's base `__run__` charge item.
pub fn step_run_charge(
    tenant_id: &str,
    work_order_id: &str,
    step_id: &str,
    module_id: &str,
) -> String {
    digest(
        "step_run_charge",
        &[tenant_id, work_order_id, step_id, module_id],
    )
}

/// Key for a named deliverable charge item.
pub fn deliverable_charge(
    tenant_id: &str,
    work_order_id: &str,
    step_id: &str,
    module_id: &str,
    deliverable_id: &str,
) -> String {
    digest(
        "deliverable_charge",
        &[tenant_id, work_order_id, step_id, module_id, deliverable_id],
    )
}

/// Key for a refund item; `reason_key` scopes distinct refund reasons.
pub fn refund(
    tenant_id: &str,
    work_order_id: &str,
    step_id: &str,
    module_id: &str,
    deliverable_id: &str,
    reason_key: &str,
) -> String {
    digest(
        "refund",
        &[
            tenant_id,
            work_order_id,
            step_id,
            module_id,
            deliverable_id,
            reason_key,
        ],
    )
}

/// Execution idempotency key for a step run record.
pub fn step_run(tenant_id: &str, work_order_id: &str, step_id: &str, module_id: &str) -> String {
    digest("step_run", &[tenant_id, work_order_id, step_id, module_id])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_across_releases() {
        // Golden values: changing these breaks duplicate suppression for
        // ledgers written by earlier releases.
        assert_eq!(
            workorder_spend("t1", "wo1", "tenants/t1/workorders/wo1.yml", "steps"),
            "cfd545b1088b666576fdd2c13637fbf8f0602522ad96a0a77b908a67e54026ff"
        );
        assert_eq!(
            step_run("t1", "wo1", "s1", "search"),
            "3d16f05302a3827ae7accebf3894db2c231e897a21ff4ed9b5ec2d1dbb6dc536"
        );
    }

    #[test]
    fn families_do_not_collide() {
        let charge = step_run_charge("t1", "wo1", "s1", "m1");
        let run = step_run("t1", "wo1", "s1", "m1");
        assert_ne!(charge, run);
    }

    #[test]
    fn parts_are_delimited() {
        // "ab" + "c" must differ from "a" + "bc".
        assert_ne!(
            step_run_charge("t", "ab", "c", "m"),
            step_run_charge("t", "a", "bc", "m")
        );
    }

    #[test]
    fn refund_keys_scope_by_reason() {
        let a = refund("t1", "wo1", "s1", "m1", "__run__", "102017004");
        let b = refund("t1", "wo1", "s1", "m1", "__run__", "102017005");
        assert_ne!(a, b);
    }
}
