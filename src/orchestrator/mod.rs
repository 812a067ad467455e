//! Cluster orchestration
//!
//! An activation runs one cluster definition against a container engine:
//!
//! - [`RunState::activate`] spawns one task per node and waits for all of them
//! - each node task resolves its image and container arguments, loads the
//!   image through the shared [`ImageCache`], then spawns one task per instance
//! - each instance task creates, starts and optionally drives its container
//!   through the command scripts of the `run` group
//!
//! Tasks exchange data only through variable scopes and the activation's
//! [`Coordinator`]; see [`crate::vars`] for the cross-reference protocol.

pub mod image;
mod instance;
pub mod layout;
mod node;
pub mod signal;
mod state;
mod stop;


pub use image::{ImageCache, ImageLoad};
pub use instance::InstanceState;
pub use layout::StateLayout;
pub use node::NodeState;
pub use signal::Coordinator;
pub use state::RunState;
pub use stop::stop_cluster;

use crate::cluster::Cluster;
use crate::error::Result;
use async_trait::async_trait;
use bitflags::bitflags;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

bitflags! {
    /// Lifecycle phases performed by an activation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RunFlags: u32 {
        /// Re-create containers instead of reusing the ones in marker files
        const CREATE = 0x0001;
        /// Run the node preparation hook
        const PREPARE = 0x0002;
        /// Run the `run` command group in every instance
        const RUN = 0x0004;
        /// Start containers detached
        const DETACH = 0x0008;
        /// Stop containers when their instance finishes
        const STOP = 0x0010;
        /// Remove stopped containers
        const REMOVE = 0x0020;
    }
}

/// Bounded polling with linearly increasing delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Number of checks
    pub attempts: u32,
    /// Delay after the first failed check; grows by this much every attempt
    pub step: Duration,
}

impl PollPolicy {
    /// Delay after the failed check number `attempt` (zero based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step * (attempt + 1)
    }
}

/// Everything an activation needs besides the driver
#[derive(Debug, Clone)]
pub struct ActivationEnv {
    /// Cluster definition
    pub cluster: Arc<Cluster>,
    /// Data directory, mounted into every container
    pub data_dir: PathBuf,
    /// Phases to perform
    pub flags: RunFlags,
    /// Confirmation that a started container is running
    pub start_policy: PollPolicy,
    /// Wait for the exit-code marker of a command
    pub exit_marker_policy: PollPolicy,
}

impl ActivationEnv {
    /// Environment with the default polling policies
    pub fn new(cluster: Arc<Cluster>, data_dir: PathBuf, flags: RunFlags) -> Self {
        Self {
            cluster,
            data_dir,
            flags,
            start_policy: PollPolicy {
                attempts: 8,
                step: Duration::from_millis(100),
            },
            exit_marker_policy: PollPolicy {
                attempts: 8,
                step: Duration::from_millis(50),
            },
        }
    }

    /// Override the start confirmation policy
    pub fn start_policy(mut self, policy: PollPolicy) -> Self {
        self.start_policy = policy;
        self
    }

    /// Override the exit-code marker policy
    pub fn exit_marker_policy(mut self, policy: PollPolicy) -> Self {
        self.exit_marker_policy = policy;
        self
    }
}

/// Extension points of the node and instance lifecycles
///
/// Both hooks do nothing by default.
#[async_trait]
pub trait ActivationHooks: Send + Sync {
    /// Called once per node with the `PREPARE` flag, after the container
    /// arguments are built and before instances are launched
    async fn prepare_node(&self, _run: &RunState, _node: &NodeState) -> Result<()> {
        Ok(())
    }

    /// Called once per instance after its commands succeeded
    async fn capture(
        &self,
        _run: &RunState,
        _node: &NodeState,
        _instance: &InstanceState,
    ) -> Result<()> {
        Ok(())
    }
}

/// Hooks without behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ActivationHooks for NoHooks {}
