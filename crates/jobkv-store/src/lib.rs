//! Keystore wire contract and its implementations.
//!
//! [`KeyStore`] is the narrow surface the coordination layer needs from a
//! replicated, indexed key-value store: reads, conditional writes, deletes,
//! watches from an index, and the few auth calls used to grant a job's user
//! access to its keys. [`EtcdStore`] speaks the etcd v2 HTTP API;
//! [`MemoryStore`] keeps the same semantics in process.

mod error;
pub use error::{AUTH_EXPIRED_CODE, StoreError};

mod request;
pub use request::{DeleteOptions, Fetched, RoleGrant, StoreUser, WatchOptions, WriteOptions};

mod store;
pub use store::KeyStore;

mod etcd;
pub use etcd::{EtcdConfig, EtcdStore};

mod memory;
pub use memory::MemoryStore;
