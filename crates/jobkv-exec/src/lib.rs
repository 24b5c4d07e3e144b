mod error;
pub use error::ExecError;

pub mod proc;
pub use proc::{ProcConfig, ProcOutput, capture, run_inherited};

pub mod utils;
pub use utils::affinity::cpu_affinity;

pub mod prelude {
    pub use crate::error::ExecError;
    pub use crate::proc::{ProcConfig, ProcOutput, capture, run_inherited};
}
