//! On-disk layout of an activation
//!
//! ```text
//! <data_dir>/.cargo/<cluster>/
//!     <node>.<index>.cid        container id marker
//!     <node>.<index>.run/
//!         run.sh                wrapper executed inside the container
//!         cmd.sh                current command script
//!         cmd.sh.exit           exit code of the last command
//! ```
//!
//! The data directory is bind-mounted at [`WORKSPACE`] in every container,
//! so the same files are reachable from both sides.

use std::path::{Component, Path, PathBuf};

/// Mount point of the data directory inside containers
pub const WORKSPACE: &str = "/.cargo.workspace";
/// State directory name under the data directory
pub const STATE_DIR: &str = ".cargo";
/// Wrapper script name
pub const WRAPPER_SCRIPT: &str = "run.sh";
/// Command script name
pub const COMMAND_SCRIPT: &str = "cmd.sh";

/// Paths used by one cluster activation
#[derive(Debug, Clone)]
pub struct StateLayout {
    data_dir: PathBuf,
    state_dir: PathBuf,
    remote_state_dir: String,
}

impl StateLayout {
    /// Layout for `cluster` under `data_dir`
    pub fn new(data_dir: &Path, cluster: &str) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            state_dir: data_dir.join(STATE_DIR).join(cluster),
            remote_state_dir: format!("{}/{}/{}", WORKSPACE, STATE_DIR, cluster),
        }
    }

    /// Host data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Host state directory of the cluster
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Container id marker of an instance
    pub fn cidfile(&self, instance: &str) -> PathBuf {
        self.state_dir.join(format!("{}.cid", instance))
    }

    /// Host run directory of an instance
    pub fn run_dir(&self, instance: &str) -> PathBuf {
        self.state_dir.join(format!("{}.run", instance))
    }

    /// Run directory of an instance as seen from inside its container
    pub fn remote_run_dir(&self, instance: &str) -> String {
        format!("{}/{}.run", self.remote_state_dir, instance)
    }

    /// Bind mount of the data directory at the workspace
    pub fn workspace_mount(&self) -> String {
        format!("{}:{}", self.data_dir.display(), WORKSPACE)
    }

    /// Resolve the host side of a `host:container[:opts]` volume mapping
    ///
    /// Relative host paths are taken relative to the data directory.
    pub fn resolve_volume(&self, spec: &str) -> String {
        match spec.find(':') {
            Some(pos) if pos > 0 => {
                let (src, rest) = spec.split_at(pos);
                let src = Path::new(src);
                if src.is_absolute() {
                    spec.to_string()
                } else {
                    format!("{}{}", normalize(&self.data_dir.join(src)).display(), rest)
                }
            }
            _ => spec.to_string(),
        }
    }
}

/// Name of an instance in logs and file names
pub fn instance_name(node: &str, index: usize) -> String {
    format!("{}.{}", node, index)
}

/// Lexically clean a path, resolving `.` and `..`
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
