//! Stevedore - a cluster orchestrator for container engines
//!
//! Stevedore brings up a cluster of containers described by a YAML
//! definition: every node names an image, an instance count and the commands
//! to run in each instance. Nodes and instances come up concurrently and can
//! refer to each other's addresses through `%(var)` macros, which block until
//! the referenced instance publishes the value.
//!
//! - [`cluster`]: definition types and loader
//! - [`orchestrator`]: activation state and the node/instance lifecycles
//! - [`vars`]: variable scopes and cross-reference providers
//! - [`driver`]: container engine access

pub mod cluster;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod vars;

pub use error::{Result, StevedoreError};
