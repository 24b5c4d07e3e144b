mod domain;
pub use domain::*;

mod error;
pub use error::ModelError;

mod nodeset;
pub use nodeset::{expand_node_set, expand_range_set};

mod settings;
pub use settings::{AuthKind, BatchConfig, Protocol, SchedulerKind, StoreSettings};
