//! Per-activation run state

use super::image::ImageCache;
use super::instance::InstanceState;
use super::layout::{instance_name, StateLayout};
use super::node::{self, NodeState};
use super::signal::Coordinator;
use super::{ActivationEnv, ActivationHooks, RunFlags};
use crate::cluster::Cluster;
use crate::driver::ContainerDriver;
use crate::error::{Result, StevedoreError};
use crate::vars::{GlobalScope, VarContext};
use regex::Regex;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

/// `%(name)` macro
static MACRO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\(([^()]+)\)").expect("macro pattern is valid"));

/// State of one cluster activation
///
/// Created by [`RunState::activate`] and shared by every node and instance
/// task of the activation.
pub struct RunState {
    env: ActivationEnv,
    layout: StateLayout,
    driver: Arc<dyn ContainerDriver>,
    hooks: Arc<dyn ActivationHooks>,
    coordinator: Coordinator,
    images: ImageCache,
    vars: GlobalScope,
    nodes: Vec<NodeState>,
    attached: Mutex<Vec<JoinHandle<()>>>,
}

impl RunState {
    /// Build the state of an activation without launching anything
    pub fn new(
        env: ActivationEnv,
        driver: Arc<dyn ContainerDriver>,
        hooks: Arc<dyn ActivationHooks>,
    ) -> Self {
        let cluster = Arc::clone(&env.cluster);
        let layout = StateLayout::new(&env.data_dir, &cluster.name);

        let nodes = (0..cluster.nodes.len())
            .map(|index| {
                let def = &cluster.nodes[index];
                let instances = (0..def.instances as usize)
                    .map(|i| {
                        let name = instance_name(&def.name, i);
                        let cidfile = layout.cidfile(&name);
                        InstanceState::new(i, name, cidfile)
                    })
                    .collect();
                NodeState::new(Arc::clone(&cluster), index, instances)
            })
            .collect();

        let vars = GlobalScope::with_builtin_providers();
        vars.set("project", cluster.name.as_str());
        vars.set("cluster", cluster.name.as_str());
        vars.set("container", driver.engine());
        vars.set("os", std::env::consts::OS);

        Self {
            env,
            layout,
            driver,
            hooks,
            coordinator: Coordinator::new(),
            images: ImageCache::new(),
            vars,
            nodes,
            attached: Mutex::new(Vec::new()),
        }
    }

    /// Run a cluster: launch every node in parallel and wait for all of them
    pub async fn activate(
        env: ActivationEnv,
        driver: Arc<dyn ContainerDriver>,
        hooks: Arc<dyn ActivationHooks>,
    ) -> Arc<Self> {
        let state = Arc::new(Self::new(env, driver, hooks));
        info!("Starting cluster {}", state.cluster().name);
        state.launch().await;
        state
    }

    /// Spawn the node tasks and wait for them
    pub async fn launch(self: &Arc<Self>) {
        let handles: Vec<_> = (0..self.nodes.len())
            .map(|index| {
                let span = tracing::info_span!("node", name = %self.nodes[index].name());
                tokio::spawn(node::node_task(Arc::clone(self), index).instrument(span))
            })
            .collect();

        for (index, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                let node = &self.nodes[index];
                error!("Node {} task failed: {}", node.name(), e);
                node.record_error(StevedoreError::TaskFailed(e.to_string()));
                node.mark_stopped(&self.coordinator);
            }
        }
    }

    /// Cluster definition
    pub fn cluster(&self) -> &Cluster {
        &self.env.cluster
    }

    /// Activation environment
    pub fn env(&self) -> &ActivationEnv {
        &self.env
    }

    /// Phases performed by this activation
    pub fn flags(&self) -> RunFlags {
        self.env.flags
    }

    /// On-disk layout
    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Container driver
    pub fn driver(&self) -> &dyn ContainerDriver {
        self.driver.as_ref()
    }

    pub(crate) fn hooks(&self) -> &dyn ActivationHooks {
        self.hooks.as_ref()
    }

    /// Shared wake-up signal
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Image-load cache
    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    /// Global variable scope
    pub fn vars(&self) -> &GlobalScope {
        &self.vars
    }

    /// Node states in definition order
    pub fn nodes(&self) -> &[NodeState] {
        &self.nodes
    }

    /// Find a node state by node name
    pub fn node_by_name(&self, name: &str) -> Option<&NodeState> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Whether any node or instance recorded an error
    pub fn any_error(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.error().is_some() || n.any_instance_error())
    }

    /// Release every task blocked on a cross-reference
    pub fn abort(&self) {
        self.coordinator.abort();
    }

    /// Create the cluster state directory
    pub(crate) async fn ensure_state_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.layout.state_dir()).await?;
        Ok(())
    }

    /// Load an image, pulling it at most once per activation
    pub async fn load_image(&self, name: &str) -> Result<()> {
        let result = self.images.load(self.driver(), name).await;
        self.coordinator.notify();
        result
    }

    /// Expand every `%(name)` macro in `text`
    ///
    /// Names resolve through the context's instance scope, then its node
    /// scope, then the global scope. Unresolved macros expand to nothing.
    pub async fn substitute(&self, text: &str, ctx: &VarContext<'_>) -> String {
        let mut result = String::with_capacity(text.len());
        let mut cursor = 0;

        let macros: Vec<_> = MACRO
            .captures_iter(text)
            .filter_map(|caps| Some((caps.get(0)?.range(), caps.get(1)?.as_str())))
            .collect();

        for (range, name) in macros {
            result.push_str(&text[cursor..range.start]);
            cursor = range.end;
            if let Some(value) = self.resolve(name, ctx).await {
                result.push_str(&value);
            }
        }

        result.push_str(&text[cursor..]);
        result
    }

    async fn resolve(&self, name: &str, ctx: &VarContext<'_>) -> Option<String> {
        if let Some(value) = ctx.instance.and_then(|i| i.vars().get(name)) {
            return Some(value);
        }
        if let Some(value) = ctx.node.and_then(|n| n.vars().get(name)) {
            return Some(value);
        }
        self.vars.query(name, ctx).await
    }

    pub(crate) fn track_attached(&self, handle: JoinHandle<()>) {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Wait until every attached container has exited
    pub async fn wait_attached(&self) {
        let handles = std::mem::take(
            &mut *self.attached.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Stop every container of the activation, then wait for attached
    /// containers to exit
    ///
    /// Stop failures are logged and ignored.
    pub async fn teardown_all(&self) {
        for node in &self.nodes {
            for instance in node.instances() {
                instance.stop(self.driver()).await;
            }
        }
        self.wait_attached().await;
    }
}
