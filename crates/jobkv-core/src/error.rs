use jobkv_exec::ExecError;
use jobkv_model::ModelError;
use jobkv_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed settings or an unusable local file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A job-scoped operation ran without a job.
    #[error("not in a job")]
    NoJob,

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("timed out waiting for key {key}")]
    KeyTimeout { key: String },

    #[error("keystore credential error: {0}")]
    Credential(String),

    #[error("batch error: {0}")]
    Batch(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// The store error behind this one, if any.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            CoreError::Store(e) => Some(e),
            _ => None,
        }
    }
}
