use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid task distribution: {0}")]
    InvalidDistribution(String),
    #[error("invalid node set: {0}")]
    InvalidNodeSet(String),
    #[error("invalid range set: {0}")]
    InvalidRangeSet(String),
    #[error("unknown key scope: {0}")]
    UnknownScope(String),
    #[error("invalid process role: {0}")]
    InvalidRole(String),
    #[error("invalid rank map encoding: {0}")]
    InvalidRankMap(String),
    #[error("invalid batch configuration: {0}")]
    InvalidConfig(String),
}
