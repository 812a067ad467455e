//! Instance lifecycle
//!
//! `create -> start -> publish ip/mac -> run commands -> capture -> stop -> remove`
//!
//! A failing step skips the remaining ones except cleanup. Commands are not
//! passed to the engine directly: each one is written to `cmd.sh` in the
//! instance's run directory, and a fixed wrapper `run.sh` executed inside the
//! container runs it and records the exit code next to it.

use super::layout::{COMMAND_SCRIPT, WRAPPER_SCRIPT};
use super::node::NodeState;
use super::signal::Coordinator;
use super::{PollPolicy, RunFlags, RunState};
use crate::cluster::{CommandGroup, Phase};
use crate::driver::{ContainerDriver, ExecOptions, IP_TEMPLATE, MAC_TEMPLATE};
use crate::error::{Result, StevedoreError};
use crate::vars::{LocalScope, VarContext};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, error, info, warn};

/// Mutable state of one instance during an activation
pub struct InstanceState {
    index: usize,
    name: String,
    container_id: Mutex<Option<String>>,
    vars: LocalScope,
    error: OnceLock<StevedoreError>,
    stopped: AtomicBool,
    cidfile: PathBuf,
}

impl InstanceState {
    pub(crate) fn new(index: usize, name: String, cidfile: PathBuf) -> Self {
        Self {
            index,
            name,
            container_id: Mutex::new(None),
            vars: LocalScope::new(),
            error: OnceLock::new(),
            stopped: AtomicBool::new(false),
            cidfile,
        }
    }

    /// Index within the node
    pub fn index(&self) -> usize {
        self.index
    }

    /// `<node>.<index>`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the container currently owned by the instance
    pub fn container_id(&self) -> Option<String> {
        self.container_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_container_id(&self, id: Option<String>) {
        *self.container_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Container id marker file
    pub fn cidfile(&self) -> &Path {
        &self.cidfile
    }

    /// Instance-local variables (`ip`, `mac`)
    pub fn vars(&self) -> &LocalScope {
        &self.vars
    }

    /// Error that ended the instance lifecycle
    pub fn error(&self) -> Option<&StevedoreError> {
        self.error.get()
    }

    /// Whether the instance task has finished
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

    /// Stop the container, ignoring failures
    pub(crate) async fn stop(&self, driver: &dyn ContainerDriver) {
        if let Some(id) = self.container_id() {
            info!("Stopping {}", self.name);
            if let Err(e) = driver.stop(&id).await {
                warn!("Failed to stop container {}: {}", id, e);
            }
        }
    }

    /// Force-remove the container and its marker file, ignoring failures
    pub(crate) async fn remove(&self, driver: &dyn ContainerDriver) {
        if let Some(id) = self.container_id() {
            info!("Removing {}", self.name);
            if let Err(e) = driver.remove(&id, true).await {
                warn!("Failed to remove container {}: {}", id, e);
            }
            remove_marker(&self.cidfile).await;
            self.set_container_id(None);
        }
    }
}

/// Run one instance and record its outcome
pub(crate) async fn instance_task(run: Arc<RunState>, node_index: usize, index: usize) {
    let node = &run.nodes()[node_index];
    let instance = &node.instances()[index];
    if let Err(e) = run_instance(&run, node, instance).await {
        error!("{}", e);
        instance.record_error(e);
    }
    instance.mark_stopped(run.coordinator());
}

async fn run_instance(run: &RunState, node: &NodeState, instance: &InstanceState) -> Result<()> {
    let flags = run.flags();
    let driver = run.driver();
    let run_dir = run.layout().run_dir(instance.name());
    let remote_run_dir = run.layout().remote_run_dir(instance.name());
    let run_commands = flags.contains(RunFlags::RUN);

    if run_commands {
        tokio::fs::create_dir_all(&run_dir).await?;
        write_executable(
            &run_dir.join(WRAPPER_SCRIPT),
            &wrapper_script(&format!("{}/{}", remote_run_dir, COMMAND_SCRIPT)),
        )
        .await?;
    }

    info!("Spawning instance");
    let id = create_container(run, node, instance).await?;
    instance.set_container_id(Some(id.clone()));

    if let Err(e) = start_container(run, &id).await {
        instance.remove(driver).await;
        return Err(e);
    }

    publish_identity(run, instance, &id).await;

    let mut result = Ok(());
    if run_commands {
        if let Some(group) = node.definition().commands(Phase::Run) {
            let ctx = VarContext::instance(run, node, instance);
            let wrapper = format!("{}/{}", remote_run_dir, WRAPPER_SCRIPT);
            result = run_group(run, &ctx, group, &id, &run_dir, &wrapper).await;
        }
        if result.is_ok() {
            result = run.hooks().capture(run, node, instance).await;
        }
    }

    if flags.contains(RunFlags::STOP) {
        instance.stop(driver).await;
        if flags.contains(RunFlags::REMOVE) {
            instance.remove(driver).await;
        }
    }

    result
}

/// Create the instance's container, carrying volumes over from the container
/// named in the marker file
///
/// Without the `CREATE` flag an existing container is reused as is.
async fn create_container(
    run: &RunState,
    node: &NodeState,
    instance: &InstanceState,
) -> Result<String> {
    let driver = run.driver();
    let cidfile = instance.cidfile();

    let previous = match read_marker(cidfile).await {
        Some(id) => match driver.is_running(&id).await {
            Ok(running) => Some((id, running)),
            Err(e) => {
                debug!("Ignoring stale container {}: {}", id, e);
                None
            }
        },
        None => None,
    };

    if let Some((ref id, _)) = previous {
        if !run.flags().contains(RunFlags::CREATE) {
            info!("Reusing container {}", id);
            return Ok(id.clone());
        }
    }

    let mut args = Vec::new();
    if let Some((ref id, running)) = previous {
        if running {
            info!("Stopping superseded container {}", id);
            if let Err(e) = driver.stop(id).await {
                warn!("Failed to stop container {}: {}", id, e);
            }
        }
        args.push(format!("--volumes-from={}", id));
    }
    args.extend(node.docker_args().unwrap_or_default().iter().cloned());

    if let Err(e) = tokio::fs::remove_file(cidfile).await {
        if e.kind() != ErrorKind::NotFound {
            return Err(e.into());
        }
    }

    match driver.create(cidfile, &args).await {
        Ok(id) => {
            if let Some((old, _)) = previous {
                if let Err(e) = driver.remove(&old, true).await {
                    warn!("Failed to remove superseded container {}: {}", old, e);
                }
            }
            Ok(id)
        }
        Err(e) => {
            if let Some((old, _)) = previous {
                if let Err(restore) = tokio::fs::write(cidfile, &old).await {
                    warn!("Failed to restore {}: {}", cidfile.display(), restore);
                }
            }
            Err(e)
        }
    }
}

/// Start a container and wait until the engine reports it running
async fn start_container(run: &RunState, id: &str) -> Result<()> {
    let driver = run.driver();
    let attached = !run.flags().contains(RunFlags::DETACH);

    if let Some(wait) = driver.start(id, attached).await? {
        run.track_attached(tokio::spawn(wait));
    }

    confirm_running(driver, id, run.env().start_policy).await
}

async fn confirm_running(driver: &dyn ContainerDriver, id: &str, policy: PollPolicy) -> Result<()> {
    for attempt in 0..policy.attempts {
        match driver.is_running(id).await {
            Ok(true) => return Ok(()),
            Ok(false) => debug!("Container {} not running yet", id),
            Err(e) => debug!("Failed to inspect container {}: {}", id, e),
        }
        if attempt + 1 < policy.attempts {
            tokio::time::sleep(policy.delay(attempt)).await;
        }
    }
    Err(StevedoreError::StartTimeout(id.to_string()))
}

/// Publish the container's addresses and wake cross-reference waiters
async fn publish_identity(run: &RunState, instance: &InstanceState, id: &str) {
    let driver = run.driver();
    match driver.inspect(id, IP_TEMPLATE).await {
        Ok(ip) => instance.vars.set("ip", ip),
        Err(e) => warn!("Failed to inspect IP address of {}: {}", id, e),
    }
    match driver.inspect(id, MAC_TEMPLATE).await {
        Ok(mac) => instance.vars.set("mac", mac),
        Err(e) => warn!("Failed to inspect MAC address of {}: {}", id, e),
    }
    run.coordinator().notify();
}

async fn run_group(
    run: &RunState,
    ctx: &VarContext<'_>,
    group: &CommandGroup,
    id: &str,
    run_dir: &Path,
    wrapper: &str,
) -> Result<()> {
    let script = run_dir.join(COMMAND_SCRIPT);
    let marker = run_dir.join(format!("{}.exit", COMMAND_SCRIPT));

    let mut options = ExecOptions {
        workdir: group.workdir.clone(),
        env: Vec::with_capacity(group.env.len()),
    };
    for env in &group.env {
        options.env.push(run.substitute(env, ctx).await);
    }

    for command in &group.commands {
        let command = run.substitute(command, ctx).await;
        let command = command.trim();
        if command.is_empty() {
            continue;
        }

        info!("RUN {}", command);
        remove_marker(&marker).await;
        write_executable(&script, &format!("#!{}\n{}\n", group.shell(), command)).await?;
        run.driver()
            .exec(id, &options, &[wrapper.to_string()])
            .await?;

        let code = read_exit_code(&marker, run.env().exit_marker_policy).await?;
        if code != 0 {
            let err = StevedoreError::CommandExit {
                code,
                command: command.to_string(),
            };
            error!("ERR {}", err);
            return Err(err);
        }
    }

    Ok(())
}

/// Script run inside the container for every command
fn wrapper_script(remote_command: &str) -> String {
    format!(
        "#!/bin/sh\n{cmd}\necho $? > {cmd}.exit\nchmod 0777 {cmd}.exit\n",
        cmd = remote_command
    )
}

async fn read_exit_code(marker: &Path, policy: PollPolicy) -> Result<i32> {
    let unreadable = |reason: String| StevedoreError::ExitMarker {
        path: marker.display().to_string(),
        reason,
    };

    for attempt in 0..policy.attempts {
        match tokio::fs::read_to_string(marker).await {
            Ok(content) => {
                let content = content.trim();
                return content
                    .parse()
                    .map_err(|_| unreadable(format!("{:?} is not an exit code", content)));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if attempt + 1 < policy.attempts {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(unreadable("not written".to_string()))
}

async fn read_marker(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let id = content.trim();
    (!id.is_empty()).then(|| id.to_string())
}

async fn remove_marker(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

async fn write_executable(path: &Path, content: &str) -> Result<()> {
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).await?;
    }
    Ok(())
}
