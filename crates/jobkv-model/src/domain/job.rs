use serde::{Deserialize, Serialize};

use crate::ProcessRole;

/// Batch scheduler job identifier. Zero means "no job".
pub type JobId = u64;

/// Who this process is with respect to the batch scheduler.
///
/// Resolved once at process start and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdentity {
    /// Job the process belongs to (`0` when there is no job context).
    pub batch_id: JobId,
    /// Owner of the job.
    pub user: String,
    /// Role of the current process.
    pub role: ProcessRole,
}

impl JobIdentity {
    pub fn new(batch_id: JobId, user: impl Into<String>, role: ProcessRole) -> Self {
        Self {
            batch_id,
            user: user.into(),
            role,
        }
    }

    /// Returns `true` if a job was resolved for this process.
    #[inline]
    pub fn in_job(&self) -> bool {
        self.batch_id != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_batch_id_means_no_job() {
        let id = JobIdentity::new(0, "alice", ProcessRole::User);
        assert!(!id.in_job());

        let id = JobIdentity::new(4242, "alice", ProcessRole::User);
        assert!(id.in_job());
    }
}
