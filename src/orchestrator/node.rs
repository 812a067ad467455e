//! Node lifecycle

use super::instance::{self, InstanceState};
use super::layout::WORKSPACE;
use super::signal::Coordinator;
use super::{RunFlags, RunState};
use crate::cluster::{Cluster, Node};
use crate::error::{Result, StevedoreError};
use crate::vars::{LocalScope, VarContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, Instrument};

/// Mutable state of one node during an activation
pub struct NodeState {
    cluster: Arc<Cluster>,
    index: usize,
    image: OnceLock<String>,
    docker_args: OnceLock<Vec<String>>,
    vars: LocalScope,
    instances: Vec<InstanceState>,
    error: OnceLock<StevedoreError>,
    stopped: AtomicBool,
}

impl NodeState {
    pub(crate) fn new(cluster: Arc<Cluster>, index: usize, instances: Vec<InstanceState>) -> Self {
        Self {
            cluster,
            index,
            image: OnceLock::new(),
            docker_args: OnceLock::new(),
            vars: LocalScope::new(),
            instances,
            error: OnceLock::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Node definition
    pub fn definition(&self) -> &Node {
        &self.cluster.nodes[self.index]
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.definition().name
    }

    /// Image reference after macro expansion
    pub fn image(&self) -> Option<&str> {
        self.image.get().map(String::as_str)
    }

    /// Arguments passed to every container create of this node
    pub fn docker_args(&self) -> Option<&[String]> {
        self.docker_args.get().map(Vec::as_slice)
    }

    /// Node-local variables
    pub fn vars(&self) -> &LocalScope {
        &self.vars
    }

    /// Instance states in index order
    pub fn instances(&self) -> &[InstanceState] {
        &self.instances
    }

    /// Error that aborted the node before its instances ran
    pub fn error(&self) -> Option<&StevedoreError> {
        self.error.get()
    }

    /// Whether any instance of the node failed
    pub fn any_instance_error(&self) -> bool {
        self.instances.iter().any(|i| i.error().is_some())
    }

    /// Whether the node task has finished
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn record_error(&self, error: StevedoreError) {
        let _ = self.error.set(error);
    }

    pub(crate) fn mark_stopped(&self, coordinator: &Coordinator) {
        self.stopped.store(true, Ordering::SeqCst);
        coordinator.notify();
    }
}

/// Run one node and record its outcome
pub(crate) async fn node_task(run: Arc<RunState>, index: usize) {
    let node = &run.nodes()[index];
    if let Err(e) = run_node(&run, node).await {
        error!("{}", e);
        node.record_error(e);
    }
    node.mark_stopped(run.coordinator());
}

async fn run_node(run: &Arc<RunState>, node: &NodeState) -> Result<()> {
    run.ensure_state_dir().await?;

    let def = node.definition();
    let ctx = VarContext::node(run, node);

    node.vars.set("template", def.name.as_str());
    node.vars.set("instances", node.instances.len().to_string());
    let image = run.substitute(&def.image, &ctx).await;
    node.vars.set("image", image.as_str());
    let _ = node.image.set(image.clone());
    run.coordinator().notify();

    run.load_image(&image).await?;

    let mut args = vec![
        "-v".to_string(),
        run.layout().workspace_mount(),
        "-w".to_string(),
        WORKSPACE.to_string(),
    ];
    if def.docker.privileged {
        args.push("--privileged".to_string());
    }
    if let Some(ref entrypoint) = def.docker.entrypoint {
        args.push("--entrypoint".to_string());
        args.push(run.substitute(entrypoint, &ctx).await);
    }
    for env in &def.docker.env {
        args.push("-e".to_string());
        args.push(run.substitute(env, &ctx).await);
    }
    for volume in &def.docker.volumes {
        let volume = run.substitute(volume, &ctx).await;
        args.push("-v".to_string());
        args.push(run.layout().resolve_volume(&volume));
    }

    if run.flags().contains(RunFlags::PREPARE) {
        debug!("Preparing node");
        run.hooks().prepare_node(run, node).await?;
    }

    args.push(image);
    args.extend(def.docker.cmd.iter().cloned());
    let _ = node.docker_args.set(args);

    info!("Launching {} instance(s)", node.instances.len());
    let node_index = node.index;
    let handles: Vec<_> = (0..node.instances.len())
        .map(|i| {
            let span = tracing::info_span!("instance", name = %node.instances[i].name());
            tokio::spawn(instance::instance_task(Arc::clone(run), node_index, i).instrument(span))
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        if let Err(e) = handle.await {
            let instance = &node.instances[i];
            error!("Instance {} task failed: {}", instance.name(), e);
            instance.record_error(StevedoreError::TaskFailed(e.to_string()));
            instance.mark_stopped(run.coordinator());
        }
    }

    Ok(())
}
