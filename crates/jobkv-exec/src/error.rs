use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("missing program")]
    MissingProgram,
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("{program} exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("{program} was killed by a signal")]
    KilledBySignal { program: String },
    #[error("{program} did not finish within {after_ms}ms")]
    TimedOut { program: String, after_ms: u128 },
    #[error("{program} produced non UTF-8 output")]
    InvalidOutput { program: String },
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}
