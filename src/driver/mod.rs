//! Container engine drivers
//!
//! The orchestrator never talks to a container engine directly. Every engine
//! operation goes through [`ContainerDriver`], which keeps the lifecycle logic
//! independent of how the engine is reached.

pub mod docker;
#[cfg(test)]
pub(crate) mod mock;

pub use docker::{DockerCli, DockerCliConfig};

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::path::Path;

/// Inspect template reporting whether a container is running
pub const RUNNING_TEMPLATE: &str = "{{.State.Running}}";
/// Inspect template reporting a container's IP address
pub const IP_TEMPLATE: &str = "{{.NetworkSettings.IPAddress}}";
/// Inspect template reporting a container's MAC address
pub const MAC_TEMPLATE: &str = "{{.NetworkSettings.MacAddress}}";

/// Completes when an attached container's foreground process exits
pub type AttachedWait = BoxFuture<'static, ()>;

/// Options applied to a command executed inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Working directory inside the container
    pub workdir: Option<String>,
    /// Extra environment entries (`KEY=value`)
    pub env: Vec<String>,
}

/// Operations the orchestrator needs from a container engine
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Engine identifier, published as the `container` variable
    fn engine(&self) -> &str;

    /// Pull an image
    async fn pull(&self, image: &str) -> Result<()>;

    /// Create a container and return its id
    ///
    /// The engine writes the new id to `cidfile`, which must not exist.
    async fn create(&self, cidfile: &Path, args: &[String]) -> Result<String>;

    /// Start a container
    ///
    /// When `attached` is set the returned future completes once the
    /// container's foreground process exits.
    async fn start(&self, id: &str, attached: bool) -> Result<Option<AttachedWait>>;

    /// Render an inspect template for a container
    async fn inspect(&self, id: &str, template: &str) -> Result<String>;

    /// Execute a command inside a running container
    async fn exec(&self, id: &str, options: &ExecOptions, command: &[String]) -> Result<()>;

    /// Stop a container
    async fn stop(&self, id: &str) -> Result<()>;

    /// Remove a container
    async fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Whether the engine reports the container as running
    async fn is_running(&self, id: &str) -> Result<bool> {
        Ok(self.inspect(id, RUNNING_TEMPLATE).await? == "true")
    }
}
