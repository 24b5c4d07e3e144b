use thiserror::Error;

/// Error code the store uses for missing or expired credentials.
pub const AUTH_EXPIRED_CODE: u32 = 110;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found: {key}")]
    KeyNotFound { key: String, index: u64 },
    #[error("compare failed on {key}")]
    CompareFailed { key: String },
    #[error("key already exists: {key}")]
    AlreadyExists { key: String },
    #[error("not a file: {key}")]
    NotAFile { key: String },
    #[error("not a directory: {key}")]
    NotADirectory { key: String },
    #[error("directory not empty: {key}")]
    DirectoryNotEmpty { key: String },
    #[error("watch timed out on {key}")]
    WatchTimedOut { key: String },
    #[error("event index cleared, store is at {index}")]
    IndexCleared { index: u64 },
    #[error("store cluster identity changed, store is at {index}")]
    ClusterIdChanged { index: u64 },
    #[error("request rejected (code {error_code:?}, status {status:?}): {message}")]
    Rejected {
        error_code: Option<u32>,
        status: Option<u16>,
        message: String,
    },
    #[error("store unreachable: {0}")]
    Transport(String),
    #[error("malformed store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Returns `true` when the store refused the request because the
    /// presented credential is missing, wrong or expired.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            StoreError::Rejected {
                error_code: Some(AUTH_EXPIRED_CODE),
                ..
            } | StoreError::Rejected {
                status: Some(401),
                ..
            }
        )
    }

    /// Returns `true` for the signals a concurrent writer produces during a
    /// read-modify-write cycle.
    pub fn is_race(&self) -> bool {
        matches!(
            self,
            StoreError::CompareFailed { .. }
                | StoreError::AlreadyExists { .. }
                | StoreError::KeyNotFound { .. }
        )
    }

    /// Store index to re-arm a watch from, when the watched history is gone.
    pub fn rebaseline_index(&self) -> Option<u64> {
        match self {
            StoreError::IndexCleared { index } | StoreError::ClusterIdChanged { index } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(error_code: Option<u32>, status: Option<u16>) -> StoreError {
        StoreError::Rejected {
            error_code,
            status,
            message: String::new(),
        }
    }

    #[test]
    fn auth_expiry_signals() {
        assert!(rejected(Some(110), None).is_auth_expired());
        assert!(rejected(None, Some(401)).is_auth_expired());
        assert!(rejected(Some(110), Some(401)).is_auth_expired());

        assert!(!rejected(Some(300), Some(500)).is_auth_expired());
        assert!(!rejected(None, Some(403)).is_auth_expired());
        assert!(!StoreError::Transport("down".into()).is_auth_expired());
    }

    #[test]
    fn race_signals() {
        assert!(StoreError::CompareFailed { key: "/k".into() }.is_race());
        assert!(StoreError::AlreadyExists { key: "/k".into() }.is_race());
        assert!(
            StoreError::KeyNotFound {
                key: "/k".into(),
                index: 3
            }
            .is_race()
        );
        assert!(!StoreError::NotAFile { key: "/k".into() }.is_race());
    }

    #[test]
    fn rebaseline_signals_carry_the_store_index() {
        assert_eq!(StoreError::IndexCleared { index: 40 }.rebaseline_index(), Some(40));
        assert_eq!(
            StoreError::ClusterIdChanged { index: 7 }.rebaseline_index(),
            Some(7)
        );
        assert_eq!(
            StoreError::WatchTimedOut { key: "/k".into() }.rebaseline_index(),
            None
        );
    }
}
