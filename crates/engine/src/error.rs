use thiserror::Error;

/// Persistence failures surfaced by a [`crate::store::PlaygroundStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reconciliation failed: {0}")]
    Reconcile(String),

    #[error("Run dispatcher is shut down")]
    ShuttingDown,
}
