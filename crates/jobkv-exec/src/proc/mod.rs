use std::{path::PathBuf, process::Stdio, time::Duration};

use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::ExecError;

/// Description of an external command run by the library.
///
/// Every interaction with the batch scheduler and with the local
/// authentication daemon goes through one of these.
#[derive(Clone, Debug, Default)]
pub struct ProcConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Kill the child and fail once this much time has elapsed.
    pub timeout: Option<Duration>,
}

impl ProcConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self) -> Result<Command, ExecError> {
        if self.program.trim().is_empty() {
            return Err(ExecError::MissingProgram);
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd.kill_on_drop(true);
        Ok(cmd)
    }

    fn spawn_error(&self, e: std::io::Error) -> ExecError {
        ExecError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        }
    }
}

/// Captured result of a successful run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion and capture its output.
///
/// A non-zero exit, a signal or an elapsed timeout are errors.
pub async fn capture(cfg: &ProcConfig) -> Result<ProcOutput, ExecError> {
    let mut cmd = cfg.command()?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    trace!(target: "jobkv.exec", program = %cfg.program, args = ?cfg.args, "spawn");
    let child = cmd.spawn().map_err(|e| cfg.spawn_error(e))?;

    let output = match cfg.timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ExecError::TimedOut {
                program: cfg.program.clone(),
                after_ms: limit.as_millis(),
            })??,
        None => child.wait_with_output().await?,
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(match output.status.code() {
            Some(code) => {
                debug!(target: "jobkv.exec", program = %cfg.program, code, "exit non-zero");
                ExecError::NonZeroExit {
                    program: cfg.program.clone(),
                    code,
                    stderr,
                }
            }
            None => ExecError::KilledBySignal {
                program: cfg.program.clone(),
            },
        });
    }

    let stdout = String::from_utf8(output.stdout).map_err(|_| ExecError::InvalidOutput {
        program: cfg.program.clone(),
    })?;
    Ok(ProcOutput { stdout, stderr })
}

/// Run a command attached to the caller's terminal and return its exit code.
///
/// Used for interactive commands whose exit code belongs to the user.
pub async fn run_inherited(cfg: &ProcConfig) -> Result<i32, ExecError> {
    let mut cmd = cfg.command()?;
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    trace!(target: "jobkv.exec", program = %cfg.program, args = ?cfg.args, "spawn attached");
    let mut child = cmd.spawn().map_err(|e| cfg.spawn_error(e))?;
    let status = child.wait().await?;

    status.code().ok_or_else(|| ExecError::KilledBySignal {
        program: cfg.program.clone(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = capture(&ProcConfig::new("echo").args(["hello", "world"]))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello world");
    }

    #[tokio::test]
    async fn passes_environment() {
        let cfg = ProcConfig::new("sh")
            .args(["-c", "printf %s \"$JOBKV_PROBE\""])
            .env("JOBKV_PROBE", "42");
        assert_eq!(capture(&cfg).await.unwrap().stdout, "42");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let cfg = ProcConfig::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        match capture(&cfg).await {
            Err(ExecError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let cfg = ProcConfig::new("/nonexistent/jobkv-binary");
        assert!(matches!(
            capture(&cfg).await,
            Err(ExecError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn empty_program_is_rejected() {
        assert!(matches!(
            capture(&ProcConfig::new(" ")).await,
            Err(ExecError::MissingProgram)
        ));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let cfg = ProcConfig::new("sleep")
            .arg("5")
            .with_timeout(Duration::from_millis(100));
        assert!(matches!(
            capture(&cfg).await,
            Err(ExecError::TimedOut { .. })
        ));
    }

    #[tokio::test]
    async fn inherited_run_reports_exit_code() {
        let code = run_inherited(&ProcConfig::new("sh").args(["-c", "exit 7"]))
            .await
            .unwrap();
        assert_eq!(code, 7);
    }
}
