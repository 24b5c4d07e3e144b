//! Scratch directories owned by job processes.

use std::{
    fs::DirBuilder,
    io,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

use jobkv_model::{JobId, TaskRank};
use tracing::{debug, warn};

const DEFAULT_TMP_DIR: &str = "/tmp";

/// Where a job keeps its node-local and per-user state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchLayout {
    batch_id: JobId,
    state_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl ScratchLayout {
    pub fn new(batch_id: JobId, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            batch_id,
            state_dir: state_dir.into(),
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
        }
    }

    /// Node-local base directory, `/tmp` unless overridden.
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    /// Shared by every process of the job on one node.
    pub fn node_dir(&self) -> PathBuf {
        self.tmp_dir.join(format!(".pcocc_{}_node", self.batch_id))
    }

    pub fn vm_dir(&self, rank: TaskRank) -> PathBuf {
        self.tmp_dir
            .join(format!(".pcocc_{}_vm_{}", self.batch_id, rank))
    }

    /// Per-user directory of the job, under the user state directory.
    pub fn cluster_dir(&self) -> PathBuf {
        self.state_dir.join(format!("job_{}", self.batch_id))
    }

    pub fn cluster_state_path(&self, name: &str) -> PathBuf {
        self.cluster_dir().join(name)
    }

    pub fn vm_state_path(&self, rank: TaskRank, name: &str) -> PathBuf {
        self.vm_dir(rank).join(name)
    }
}

/// A directory created for the lifetime of the guard.
///
/// The tree is removed on drop. Removal failures are logged and otherwise
/// ignored; the keystore TTL on the job keys covers processes that never get
/// to run their destructors.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `path` and any missing parents with mode 0700.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        DirBuilder::new().recursive(true).mode(0o700).create(&path)?;
        debug!(path = %path.display(), "scratch directory ready");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "scratch directory removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn layout_paths() {
        let layout = ScratchLayout::new(42, "/home/alice/.pcocc");
        assert_eq!(layout.node_dir(), PathBuf::from("/tmp/.pcocc_42_node"));
        assert_eq!(layout.vm_dir(3), PathBuf::from("/tmp/.pcocc_42_vm_3"));
        assert_eq!(
            layout.cluster_state_path("ssh_config"),
            PathBuf::from("/home/alice/.pcocc/job_42/ssh_config")
        );
        assert_eq!(
            layout.vm_state_path(0, "monitor"),
            PathBuf::from("/tmp/.pcocc_42_vm_0/monitor")
        );
    }

    #[test]
    fn guard_creates_private_directory_and_removes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ScratchLayout::new(7, tmp.path()).with_tmp_dir(tmp.path());

        let dir = ScratchDir::create(layout.vm_dir(1)).unwrap();
        std::fs::write(dir.path().join("state"), b"x").unwrap();
        let mode = std::fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let path = dir.path().to_path_buf();
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn guard_accepts_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("job_1");
        std::fs::create_dir(&path).unwrap();

        let dir = ScratchDir::create(&path).unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();
        drop(dir);
    }
}
