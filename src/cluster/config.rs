//! Cluster definition types

use serde::{Deserialize, Serialize};

/// Shell used for command scripts when a group does not name one
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// A set of clusters loaded from one definition file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Clusters {
    /// Clusters in definition order
    pub clusters: Vec<Cluster>,
    /// Name of the cluster selected when none is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Clusters {
    /// The cluster named by `default`, or the first one
    pub fn default_cluster(&self) -> Option<&Cluster> {
        match &self.default {
            Some(name) => self.cluster_by_name(name),
            None => self.clusters.first(),
        }
    }

    /// Find a cluster by name
    pub fn cluster_by_name(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }
}

/// Cluster definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster name
    #[serde(default)]
    pub name: String,
    /// Node templates
    pub nodes: Vec<Node>,
}

impl Cluster {
    /// Find a node template by name
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Node template: one image and command set producing `instances` containers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: String,
    /// Image reference, may contain `%(var)` macros
    pub image: String,
    /// Number of instances
    #[serde(default = "default_instances")]
    pub instances: u32,
    /// Container invocation properties
    #[serde(default)]
    pub docker: DockerProperties,
    /// Commands for the prepare phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepare: Option<CommandGroup>,
    /// Commands for the run phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<CommandGroup>,
    /// Files to capture from instances
    #[serde(default)]
    pub capture: Capture,
}

fn default_instances() -> u32 {
    1
}

impl Node {
    /// Command group for a phase, if declared
    pub fn commands(&self, phase: Phase) -> Option<&CommandGroup> {
        match phase {
            Phase::Prepare => self.prepare.as_ref(),
            Phase::Run => self.run.as_ref(),
        }
    }
}

/// Command phases a node may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Run,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Run => write!(f, "run"),
        }
    }
}

/// Container invocation properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerProperties {
    /// Entrypoint override
    #[serde(default)]
    pub entrypoint: Option<String>,
    /// Command line arguments after the image
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Environment entries (`KEY=value`)
    #[serde(default)]
    pub env: Vec<String>,
    /// Privileged mode
    #[serde(default)]
    pub privileged: bool,
    /// Volume mappings (`host:container[:opts]`)
    #[serde(default)]
    pub volumes: Vec<String>,
}

/// Ordered command list run inside every instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandGroup {
    /// Interpreter for the generated command script
    #[serde(default)]
    pub shell: Option<String>,
    /// Working directory
    #[serde(default)]
    pub workdir: Option<String>,
    /// Environment entries
    #[serde(default)]
    pub env: Vec<String>,
    /// Commands, may contain `%(var)` macros
    #[serde(default)]
    pub commands: Vec<String>,
}

impl CommandGroup {
    /// Interpreter, falling back to [`DEFAULT_SHELL`]
    pub fn shell(&self) -> &str {
        self.shell
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SHELL)
    }
}

/// Capture settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capture {
    #[serde(default)]
    pub files: Vec<CaptureFile>,
}

/// A file to copy out of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureFile {
    /// Same path on both sides
    Path(String),
    /// Distinct local and remote paths
    Mapped { local: String, remote: String },
}

impl CaptureFile {
    /// Path on the host
    pub fn local(&self) -> &str {
        match self {
            CaptureFile::Path(p) => p,
            CaptureFile::Mapped { local, .. } => local,
        }
    }

    /// Path inside the container
    pub fn remote(&self) -> &str {
        match self {
            CaptureFile::Path(p) => p,
            CaptureFile::Mapped { remote, .. } => remote,
        }
    }
}
