use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;

/// Post-run data checks. Runs detached; failures are logged, never fatal.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, playground_id: Uuid) -> Result<(), EngineError>;
}

/// Reconciler for deployments without a reconciliation backend.
pub struct NoReconciliation;

#[async_trait]
impl Reconciler for NoReconciliation {
    async fn reconcile(&self, playground_id: Uuid) -> Result<(), EngineError> {
        debug!(playground_id = %playground_id, "No reconciliation configured");
        Ok(())
    }
}
