//! Append-only ledger writer over the billing tables.
//!
//! Transactions and items are kept in memory during a run and flushed
//! atomically at end of run. Duplicate suppression happens at post time:
//! transactions by `(tenant_id, work_order_id, type, idempotency_key)`,
//! items by their item-level key scoped to the workorder. The per-tenant
//! balance row is a last-writer-wins cache over transaction history; on
//! load it is reconciled against the recomputed sum and mismatches are
//! logged, not fatal.

use {
    crate::{
        csvio,
        tables::{
            NewTransaction, NewTransactionItem, TenantCreditsRow, TransactionItemRow,
            TransactionRow, encode_metadata,
        },
    },
    ordo_shared::error::Result,
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

pub const TENANTS_CREDITS_FILE: &str = "tenants_credits.csv";
pub const TRANSACTIONS_FILE: &str = "transactions.csv";
pub const TRANSACTION_ITEMS_FILE: &str = "transaction_items.csv";

const ACTIVE_STATUS: &str = "ACTIVE";

/// Result of posting a transaction: the row id, and whether the post
/// created a new row or resolved to a prior one by idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted {
    pub transaction_id: String,
    pub created: bool,
}

#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    transactions: Vec<TransactionRow>,
    transaction_items: Vec<TransactionItemRow>,
    tenants_credits: Vec<TenantCreditsRow>,
}

impl Ledger {
    /// Open the billing-state directory, bootstrapping missing tables from
    /// `template_dir` (copy when present, header-only otherwise).
    pub fn open(dir: impl Into<PathBuf>, template_dir: Option<&Path>) -> Result<Self> {
        let dir = dir.into();
        csvio::ensure_dir(&dir)?;
        for name in [TENANTS_CREDITS_FILE, TRANSACTIONS_FILE, TRANSACTION_ITEMS_FILE] {
            let target = dir.join(name);
            if target.exists() {
                continue;
            }
            match template_dir.map(|t| t.join(name)) {
                Some(src) if src.is_file() => {
                    fs::copy(&src, &target)?;
                }
                _ => {}
            }
        }

        let ledger = Self {
            transactions: csvio::read_rows(&dir.join(TRANSACTIONS_FILE))?,
            transaction_items: csvio::read_rows(&dir.join(TRANSACTION_ITEMS_FILE))?,
            tenants_credits: csvio::read_rows(&dir.join(TENANTS_CREDITS_FILE))?,
            dir,
        };
        ledger.reconcile();
        Ok(ledger)
    }

    /// Compare each stored balance against the sum of committed
    /// transactions. The stored row wins (history may have been archived
    /// externally); disagreement is surfaced for the operator.
    fn reconcile(&self) {
        for row in &self.tenants_credits {
            let history: Vec<i64> = self
                .transactions
                .iter()
                .filter(|tx| tx.tenant_id == row.tenant_id)
                .map(|tx| tx.amount_credits)
                .collect();
            let recomputed: i64 = history.iter().sum();
            if !history.is_empty() && recomputed != row.credits_available {
                tracing::warn!(
                    tenant_id = %row.tenant_id,
                    stored = row.credits_available,
                    recomputed,
                    "tenant balance does not match transaction history"
                );
            }
        }
    }

    pub fn transactions(&self) -> &[TransactionRow] {
        &self.transactions
    }

    pub fn transaction_items(&self) -> &[TransactionItemRow] {
        &self.transaction_items
    }

    pub fn tenants_credits(&self) -> &[TenantCreditsRow] {
        &self.tenants_credits
    }

    pub fn find_transaction(&self, transaction_id: &str) -> Option<&TransactionRow> {
        self.transactions
            .iter()
            .find(|tx| tx.transaction_id == transaction_id)
    }

    pub fn balance(&self, tenant_id: &str) -> i64 {
        self.tenants_credits
            .iter()
            .find(|row| row.tenant_id == tenant_id)
            .map(|row| row.credits_available)
            .unwrap_or(0)
    }

    /// Adjust a tenant balance, creating the row on first spend.
    pub fn apply_balance_delta(&mut self, tenant_id: &str, delta: i64, now: &str) {
        if let Some(row) = self
            .tenants_credits
            .iter_mut()
            .find(|row| row.tenant_id == tenant_id)
        {
            row.credits_available += delta;
            row.updated_at = now.to_owned();
            return;
        }
        self.tenants_credits.push(TenantCreditsRow {
            tenant_id: tenant_id.to_owned(),
            credits_available: delta,
            updated_at: now.to_owned(),
            status: ACTIVE_STATUS.to_owned(),
        });
    }

    fn next_transaction_id(&self) -> String {
        format!("tx-{:06}", next_ordinal(self.transactions.iter().map(|t| t.transaction_id.as_str()), "tx-"))
    }

    fn next_item_id(&self) -> String {
        format!(
            "ti-{:06}",
            next_ordinal(
                self.transaction_items.iter().map(|t| t.transaction_item_id.as_str()),
                "ti-"
            )
        )
    }

    /// Append a transaction unless one with the same idempotency key was
    /// already committed for this `(tenant, workorder, type)`.
    pub fn post_transaction(&mut self, tx: NewTransaction, now: &str) -> Posted {
        if let Some(key) = tx.idempotency_key() {
            let existing = self.transactions.iter().find(|row| {
                row.tenant_id == tx.tenant_id
                    && row.work_order_id == tx.work_order_id
                    && row.kind == tx.kind
                    && row.idempotency_key().as_deref() == Some(key)
            });
            if let Some(row) = existing {
                return Posted {
                    transaction_id: row.transaction_id.clone(),
                    created: false,
                };
            }
        }
        let transaction_id = self.next_transaction_id();
        self.transactions.push(TransactionRow {
            transaction_id: transaction_id.clone(),
            tenant_id: tx.tenant_id,
            work_order_id: tx.work_order_id,
            kind: tx.kind,
            amount_credits: tx.amount_credits,
            created_at: now.to_owned(),
            reason_code: tx.reason_code,
            note: tx.note,
            metadata_json: encode_metadata(&tx.metadata),
        });
        Posted {
            transaction_id,
            created: true,
        }
    }

    /// Append an item unless its idempotency key already exists among the
    /// workorder's items. Returns whether a row was created.
    pub fn post_transaction_item(&mut self, item: NewTransactionItem, now: &str) -> bool {
        if let Some(key) = item.idempotency_key() {
            let duplicate = self.transaction_items.iter().any(|row| {
                row.tenant_id == item.tenant_id
                    && row.work_order_id == item.work_order_id
                    && row.idempotency_key().as_deref() == Some(key)
            });
            if duplicate {
                return false;
            }
        }
        let transaction_item_id = self.next_item_id();
        self.transaction_items.push(TransactionItemRow {
            transaction_item_id,
            transaction_id: item.transaction_id,
            tenant_id: item.tenant_id,
            module_id: item.module_id,
            work_order_id: item.work_order_id,
            step_id: item.step_id,
            deliverable_id: item.deliverable_id,
            feature: item.feature,
            kind: item.kind,
            amount_credits: item.amount_credits,
            created_at: now.to_owned(),
            note: item.note,
            metadata_json: encode_metadata(&item.metadata),
        });
        true
    }

    pub fn refunds_exist(&self, tenant_id: &str, work_order_id: &str) -> bool {
        self.transaction_items.iter().any(|row| {
            row.tenant_id == tenant_id
                && row.work_order_id == work_order_id
                && row.kind == crate::tables::TxKind::Refund
        })
    }

    /// Atomically persist every table. On failure the prior files remain.
    pub fn flush(&self) -> Result<()> {
        csvio::write_rows(&self.dir.join(TENANTS_CREDITS_FILE), &self.tenants_credits)?;
        csvio::write_rows(&self.dir.join(TRANSACTIONS_FILE), &self.transactions)?;
        csvio::write_rows(
            &self.dir.join(TRANSACTION_ITEMS_FILE),
            &self.transaction_items,
        )?;
        Ok(())
    }
}

fn next_ordinal<'a>(ids: impl Iterator<Item = &'a str>, prefix: &str) -> u64 {
    ids.filter_map(|id| id.strip_prefix(prefix))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
        + 1
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::tables::{METADATA_IDEMPOTENCY_KEY, TxKind},
        serde_json::{Map, Value, json},
    };

    const NOW: &str = "2026-08-01T00:00:00Z";

    fn meta(key: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(METADATA_IDEMPOTENCY_KEY.into(), json!(key));
        map
    }

    fn spend(key: &str, amount: i64) -> NewTransaction {
        NewTransaction {
            tenant_id: "t1".into(),
            work_order_id: "wo1".into(),
            kind: TxKind::Spend,
            amount_credits: amount,
            reason_code: String::new(),
            note: "spend".into(),
            metadata: meta(key),
        }
    }

    fn open_empty() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path(), None).unwrap();
        (dir, ledger)
    }

    #[test]
    fn duplicate_transaction_key_resolves_to_prior_row() {
        let (_dir, mut ledger) = open_empty();
        let first = ledger.post_transaction(spend("k1", -15), NOW);
        let second = ledger.post_transaction(spend("k1", -15), NOW);
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(ledger.transactions().len(), 1);
    }

    #[test]
    fn distinct_kinds_do_not_collide_on_key() {
        let (_dir, mut ledger) = open_empty();
        ledger.post_transaction(spend("k1", -15), NOW);
        let refund = NewTransaction {
            kind: TxKind::Refund,
            amount_credits: 15,
            ..spend("k1", -15)
        };
        let posted = ledger.post_transaction(refund, NOW);
        assert!(posted.created);
        assert_eq!(ledger.transactions().len(), 2);
    }

    #[test]
    fn duplicate_item_key_is_suppressed() {
        let (_dir, mut ledger) = open_empty();
        let tx = ledger.post_transaction(spend("k1", -5), NOW);
        let item = NewTransactionItem {
            transaction_id: tx.transaction_id.clone(),
            tenant_id: "t1".into(),
            module_id: "search".into(),
            work_order_id: "wo1".into(),
            step_id: "s1".into(),
            deliverable_id: "__run__".into(),
            feature: "__run__".into(),
            kind: TxKind::Spend,
            amount_credits: -5,
            note: String::new(),
            metadata: meta("item-key"),
        };
        assert!(ledger.post_transaction_item(item.clone(), NOW));
        assert!(!ledger.post_transaction_item(item, NOW));
        assert_eq!(ledger.transaction_items().len(), 1);
    }

    #[test]
    fn balance_row_created_on_first_delta() {
        let (_dir, mut ledger) = open_empty();
        assert_eq!(ledger.balance("t1"), 0);
        ledger.apply_balance_delta("t1", 100, NOW);
        ledger.apply_balance_delta("t1", -15, NOW);
        assert_eq!(ledger.balance("t1"), 85);
        assert_eq!(ledger.tenants_credits().len(), 1);
        assert_eq!(ledger.tenants_credits()[0].status, "ACTIVE");
    }

    #[test]
    fn flush_and_reload_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ledger = Ledger::open(dir.path(), None).unwrap();
            ledger.post_transaction(spend("k1", -15), NOW);
            ledger.apply_balance_delta("t1", -15, NOW);
            ledger.flush().unwrap();
        }
        let reloaded = Ledger::open(dir.path(), None).unwrap();
        assert_eq!(reloaded.transactions().len(), 1);
        assert_eq!(reloaded.balance("t1"), -15);
    }

    #[test]
    fn reload_assigns_fresh_ids_after_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ledger = Ledger::open(dir.path(), None).unwrap();
            ledger.post_transaction(spend("k1", -1), NOW);
            ledger.flush().unwrap();
        }
        let mut reloaded = Ledger::open(dir.path(), None).unwrap();
        let posted = reloaded.post_transaction(spend("k2", -2), NOW);
        assert_eq!(posted.transaction_id, "tx-000002");
    }

    #[test]
    fn bootstraps_missing_tables_from_template() {
        let template = tempfile::tempdir().unwrap();
        let seeded = TenantCreditsRow {
            tenant_id: "t1".into(),
            credits_available: 100,
            updated_at: NOW.into(),
            status: "ACTIVE".into(),
        };
        csvio::write_rows(&template.path().join(TENANTS_CREDITS_FILE), &[seeded]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path(), Some(template.path())).unwrap();
        assert_eq!(ledger.balance("t1"), 100);
    }
}
