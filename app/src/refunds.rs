//! Policy-driven refund emission.
//!
//! Refunds reverse reservation charges for steps that did not deliver.
//! Amounts come from the reservation-time price breakdown (stored with the
//! SPEND), never from the live price book, so later price changes cannot
//! alter a refund. Everything here is idempotent: transactions and items
//! are keyed, and the balance moves only when a new row is actually
//! written.

use {
    ordo_catalog::{ModuleKind, ReasonCatalog},
    ordo_ledger::{Ledger, NewTransaction, NewTransactionItem, TxKind},
    ordo_runstate::StepStatus,
    ordo_shared::keys,
    serde_json::{Map, json},
    std::collections::BTreeMap,
};

/// Sentinel deliverable used for the step-level refund transaction key,
/// distinct from the per-deliverable item keys.
const STEP_REFUND_DELIVERABLE: &str = "__step__";

/// Execution record the refund engine works from; assembled by the
/// executor as steps finish.
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub step_id: String,
    pub module_id: String,
    pub kind: ModuleKind,
    pub status: StepStatus,
    /// Classified reason for FAILED and SKIPPED steps.
    pub reason_code: String,
    /// For delivery modules this is the module's own non-delivery
    /// assertion; other kinds default to eligible on failure.
    pub refund_eligible: bool,
    /// Reservation-time prices per deliverable, `__run__` included.
    pub breakdown: BTreeMap<String, i64>,
    pub label: String,
}

impl StepExecution {
    fn refundable_amount(&self) -> i64 {
        self.breakdown.values().filter(|v| **v > 0).sum()
    }
}

/// Emit refunds for every non-completed step with a refundable outcome.
/// Returns the total amount restored to the tenant balance.
pub fn emit_refunds(
    ledger: &mut Ledger,
    tenant_id: &str,
    work_order_id: &str,
    spend_transaction_id: &str,
    steps: &[StepExecution],
    reasons: &ReasonCatalog,
    now: &str,
) -> i64 {
    let mut total_refunded = 0;

    for step in steps {
        if step.status == StepStatus::Completed {
            continue;
        }
        if !reasons.refundable(&step.reason_code) {
            tracing::debug!(
                step_id = %step.step_id,
                reason_code = %step.reason_code,
                "outcome not refundable by policy"
            );
            continue;
        }
        if !step.refund_eligible {
            tracing::debug!(step_id = %step.step_id, "module did not assert non-delivery");
            continue;
        }
        let refund_amount = step.refundable_amount();
        if refund_amount <= 0 {
            continue;
        }

        let tx_key = keys::refund(
            tenant_id,
            work_order_id,
            &step.step_id,
            &step.module_id,
            STEP_REFUND_DELIVERABLE,
            &step.reason_code,
        );
        let mut tx_meta = Map::new();
        tx_meta.insert("step_id".into(), json!(step.step_id));
        tx_meta.insert("module_id".into(), json!(step.module_id));
        tx_meta.insert("spend_transaction_id".into(), json!(spend_transaction_id));
        tx_meta.insert("idempotency_key".into(), json!(tx_key));
        let posted = ledger.post_transaction(
            NewTransaction {
                tenant_id: tenant_id.to_owned(),
                work_order_id: work_order_id.to_owned(),
                kind: TxKind::Refund,
                amount_credits: refund_amount,
                reason_code: step.reason_code.clone(),
                note: format!("Refund: {} (reason={})", step.label, step.reason_code),
                metadata: tx_meta,
            },
            now,
        );
        if !posted.created {
            continue;
        }

        for (deliverable_id, amount) in &step.breakdown {
            if *amount <= 0 {
                continue;
            }
            let item_key = keys::refund(
                tenant_id,
                work_order_id,
                &step.step_id,
                &step.module_id,
                deliverable_id,
                &step.reason_code,
            );
            let mut item_meta = Map::new();
            item_meta.insert("step_id".into(), json!(step.step_id));
            item_meta.insert("deliverable_id".into(), json!(deliverable_id));
            item_meta.insert("spend_transaction_id".into(), json!(spend_transaction_id));
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
                    kind: TxKind::Refund,
                    amount_credits: *amount,
                    note: format!(
                        "Refund item ({}): {} (reason={})",
                        deliverable_id, step.label, step.reason_code
                    ),
                    metadata: item_meta,
                },
                now,
            );
        }

        ledger.apply_balance_delta(tenant_id, refund_amount, now);
        total_refunded += refund_amount;
        tracing::info!(
            step_id = %step.step_id,
            refund_amount,
            reason_code = %step.reason_code,
            "refund emitted"
        );
    }

    total_refunded
}
