use thiserror::Error;

/// Errors reading or writing document snapshots.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors constructing a [`crate::store::Store`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Hook tasks are spawned on the ambient Tokio runtime.
    #[error("Store must be created inside a Tokio runtime")]
    NoRuntime,
}
