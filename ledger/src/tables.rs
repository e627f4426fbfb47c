//! Billing table row shapes.
//!
//! Column order of the serialized structs is the on-disk header contract;
//! `metadata_json` is an opaque JSON object column carrying, among other
//! things, the idempotency key that drives duplicate suppression.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

pub const METADATA_IDEMPOTENCY_KEY: &str = "idempotency_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    #[serde(rename = "SPEND")]
    Spend,
    #[serde(rename = "REFUND")]
    Refund,
    #[serde(rename = "TOPUP")]
    Topup,
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spend => f.write_str("SPEND"),
            Self::Refund => f.write_str("REFUND"),
            Self::Topup => f.write_str("TOPUP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub transaction_id: String,
    pub tenant_id: String,
    pub work_order_id: String,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub amount_credits: i64,
    pub created_at: String,
    pub reason_code: String,
    pub note: String,
    pub metadata_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionItemRow {
    pub transaction_item_id: String,
    pub transaction_id: String,
    pub tenant_id: String,
    pub module_id: String,
    pub work_order_id: String,
    pub step_id: String,
    pub deliverable_id: String,
    pub feature: String,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub amount_credits: i64,
    pub created_at: String,
    pub note: String,
    pub metadata_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantCreditsRow {
    pub tenant_id: String,
    pub credits_available: i64,
    pub updated_at: String,
    pub status: String,
}

/// A transaction to post; the ledger assigns the row id and timestamps the
/// row on first write.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tenant_id: String,
    pub work_order_id: String,
    pub kind: TxKind,
    pub amount_credits: i64,
    pub reason_code: String,
    pub note: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct NewTransactionItem {
    pub transaction_id: String,
    pub tenant_id: String,
    pub module_id: String,
    pub work_order_id: String,
    pub step_id: String,
    pub deliverable_id: String,
    pub feature: String,
    pub kind: TxKind,
    pub amount_credits: i64,
    pub note: String,
    pub metadata: Map<String, Value>,
}

pub(crate) fn encode_metadata(metadata: &Map<String, Value>) -> String {
    if metadata.is_empty() {
        return "{}".to_owned();
    }
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_owned())
}

pub(crate) fn decode_metadata(metadata_json: &str) -> Map<String, Value> {
    let trimmed = metadata_json.trim();
    if trimmed.is_empty() {
        return Map::new();
    }
    match serde_json::from_str(trimmed) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn metadata_key(metadata_json: &str) -> Option<String> {
    decode_metadata(metadata_json)
        .get(METADATA_IDEMPOTENCY_KEY)
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .map(str::to_owned)
}

impl TransactionRow {
    pub fn metadata(&self) -> Map<String, Value> {
        decode_metadata(&self.metadata_json)
    }

    pub fn idempotency_key(&self) -> Option<String> {
        metadata_key(&self.metadata_json)
    }
}

impl TransactionItemRow {
    pub fn metadata(&self) -> Map<String, Value> {
        decode_metadata(&self.metadata_json)
    }

    pub fn idempotency_key(&self) -> Option<String> {
        metadata_key(&self.metadata_json)
    }
}

impl NewTransaction {
    pub fn idempotency_key(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_IDEMPOTENCY_KEY)
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
    }
}

impl NewTransactionItem {
    pub fn idempotency_key(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_IDEMPOTENCY_KEY)
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
    }
}
