//! Declarative cluster definitions
//!
//! This module provides the typed cluster tree and the YAML loader that
//! produces it. The orchestrator only ever receives validated definitions.

pub mod config;
pub mod parser;

pub use config::{
    Capture, CaptureFile, Cluster, Clusters, CommandGroup, DockerProperties, Node, Phase,
};
pub use parser::ClusterParser;
