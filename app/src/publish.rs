//! Publisher seam.
//!
//! Publishing packaged artifacts to an external release store is outside
//! the engine; the executor only asks whether publication completed so the
//! status reducer can distinguish `COMPLETED` from `AWAITING_PUBLISH`.

use {crate::evidence::EvidenceReceipt, ordo_shared::error::Result};

#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub tenant_id: &'a str,
    pub work_order_id: &'a str,
    pub evidence: Option<&'a EvidenceReceipt>,
}

pub trait Publisher: Send + Sync {
    /// Returns whether the workorder's artifacts are published. `false`
    /// leaves the workorder awaiting an external reconciliation pass.
    fn publish(&self, request: &PublishRequest<'_>) -> Result<bool>;
}

/// Default publisher: records nothing and never completes publication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, _request: &PublishRequest<'_>) -> Result<bool> {
        Ok(false)
    }
}
