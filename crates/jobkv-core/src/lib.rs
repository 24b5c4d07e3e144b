//! Coordination layer shared by every process of a batch job.
//!
//! A [`JobContext`] resolves which job the process belongs to, opens one
//! authenticated [`Connection`] to the keystore on first use, and exposes a
//! [`Keyspace`] offering namespaced reads, compare-and-swap updates and
//! blocking watches. Task placement comes from a rank map built once per job
//! and shared through the keystore.

mod error;
pub use error::CoreError;

pub mod system;

mod credential;
pub use credential::{
    CredentialSource, MungeCredential, PasswordCredential, SECRET_BYTES,
    is_password_credential,
};

mod connection;
pub use connection::{Connection, ConnectionConfig, Connector};

mod namespace;
pub use namespace::KeyNamespace;

mod keyspace;
pub use keyspace::{Attempt, Keyspace, WatchConfig};

mod placement;
pub use placement::{Placement, RANK_MAP_KEY};

mod scheduler;
pub use scheduler::{Scheduler, SlurmPrograms, SlurmScheduler, parse_memory_per_core};

mod scratch;
pub use scratch::{ScratchDir, ScratchLayout};

mod context;
pub use context::{ContextOptions, JobContext, credential_source};

pub mod prelude {
    pub use crate::{CoreError, JobContext, Keyspace, Placement};
    pub use jobkv_model::{JobIdentity, ProcessRole, RankMap, Scope};
}
