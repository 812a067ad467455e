//! In-memory driver recording every engine call

use super::{AttachedWait, ContainerDriver, ExecOptions, IP_TEMPLATE, MAC_TEMPLATE, RUNNING_TEMPLATE};
use crate::error::{Result, StevedoreError};
use crate::orchestrator::layout::WORKSPACE;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

struct MockContainer {
    seq: usize,
    running: watch::Sender<bool>,
    stuck: bool,
}

/// Records calls and emulates containers, including the exit-code marker
/// written by the in-container wrapper script
pub(crate) struct MockDriver {
    data_dir: PathBuf,
    calls: Mutex<Vec<String>>,
    scripts: Mutex<Vec<String>>,
    containers: Mutex<HashMap<String, MockContainer>>,
    next_id: AtomicUsize,
    pull_delay: Duration,
    failing_images: HashSet<String>,
    failing_commands: HashMap<String, i32>,
    fail_create: bool,
    never_running: bool,
    stuck_images: HashSet<String>,
}

impl MockDriver {
    pub(crate) fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            calls: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
            containers: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            pull_delay: Duration::ZERO,
            failing_images: HashSet::new(),
            failing_commands: HashMap::new(),
            fail_create: false,
            never_running: false,
            stuck_images: HashSet::new(),
        }
    }

    pub(crate) fn pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = delay;
        self
    }

    pub(crate) fn failing_image(mut self, image: &str) -> Self {
        self.failing_images.insert(image.to_string());
        self
    }

    /// Commands containing `pattern` exit with `code`
    pub(crate) fn failing_command(mut self, pattern: &str, code: i32) -> Self {
        self.failing_commands.insert(pattern.to_string(), code);
        self
    }

    pub(crate) fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub(crate) fn never_running(mut self) -> Self {
        self.never_running = true;
        self
    }

    /// Containers created from `image` never report running
    pub(crate) fn stuck_image(mut self, image: &str) -> Self {
        self.stuck_images.insert(image.to_string());
        self
    }

    /// Register a container the engine already knows
    pub(crate) fn with_container(self, id: &str, running: bool) -> Self {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, _) = watch::channel(running);
        self.lock_containers()
            .insert(
                id.to_string(),
                MockContainer {
                    seq,
                    running: tx,
                    stuck: false,
                },
            );
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Command scripts in execution order
    pub(crate) fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub(crate) fn is_known(&self, id: &str) -> bool {
        self.lock_containers().contains_key(id)
    }

    fn lock_containers(&self) -> std::sync::MutexGuard<'_, HashMap<String, MockContainer>> {
        self.containers.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn unknown(id: &str) -> StevedoreError {
        StevedoreError::Driver {
            command: "mock".to_string(),
            message: format!("No such container: {}", id),
        }
    }

    fn local_path(&self, remote: &str) -> PathBuf {
        let relative = remote
            .strip_prefix(WORKSPACE)
            .unwrap_or(remote)
            .trim_start_matches('/');
        self.data_dir.join(relative)
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    fn engine(&self) -> &str {
        "mock"
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.record(format!("pull {}", image));
        tokio::time::sleep(self.pull_delay).await;
        if self.failing_images.contains(image) {
            return Err(StevedoreError::Driver {
                command: "mock pull".to_string(),
                message: format!("manifest for {} not found", image),
            });
        }
        Ok(())
    }

    async fn create(&self, cidfile: &Path, args: &[String]) -> Result<String> {
        self.record(format!("create {}", args.join(" ")));
        if self.fail_create {
            return Err(StevedoreError::Driver {
                command: "mock create".to_string(),
                message: "create refused".to_string(),
            });
        }
        if cidfile.exists() {
            return Err(StevedoreError::Driver {
                command: "mock create".to_string(),
                message: format!("cidfile {} exists", cidfile.display()),
            });
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("c{}", seq);
        std::fs::write(cidfile, &id)?;
        let stuck = args.iter().any(|a| self.stuck_images.contains(a));
        let (tx, _) = watch::channel(false);
        self.lock_containers().insert(
            id.clone(),
            MockContainer {
                seq,
                running: tx,
                stuck,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str, attached: bool) -> Result<Option<AttachedWait>> {
        self.record(format!("start {}", id));
        let mut rx = {
            let containers = self.lock_containers();
            let container = containers.get(id).ok_or_else(|| Self::unknown(id))?;
            if !self.never_running && !container.stuck {
                container.running.send_replace(true);
            }
            container.running.subscribe()
        };

        if !attached {
            return Ok(None);
        }

        Ok(Some(Box::pin(async move {
            while *rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })))
    }

    async fn inspect(&self, id: &str, template: &str) -> Result<String> {
        let containers = self.lock_containers();
        let container = containers.get(id).ok_or_else(|| Self::unknown(id))?;
        let value = match template {
            RUNNING_TEMPLATE => container.running.borrow().to_string(),
            IP_TEMPLATE => format!("172.17.0.{}", container.seq + 1),
            MAC_TEMPLATE => format!("02:42:ac:11:00:{:02x}", container.seq + 1),
            _ => String::new(),
        };
        Ok(value)
    }

    async fn exec(&self, id: &str, options: &ExecOptions, command: &[String]) -> Result<()> {
        self.record(format!("exec {} {}", id, command.join(" ")));
        if !self.is_known(id) {
            return Err(Self::unknown(id));
        }

        let wrapper = command.last().map(String::as_str).unwrap_or_default();
        let run_dir = self
            .local_path(wrapper)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let script = std::fs::read_to_string(run_dir.join("cmd.sh"))?;
        self.scripts.lock().unwrap().push(script.clone());

        let code = self
            .failing_commands
            .iter()
            .find(|(pattern, _)| script.contains(pattern.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);
        std::fs::write(run_dir.join("cmd.sh.exit"), format!("{}\n", code))?;

        if let Some(ref workdir) = options.workdir {
            self.record(format!("workdir {}", workdir));
        }
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.record(format!("stop {}", id));
        let containers = self.lock_containers();
        let container = containers.get(id).ok_or_else(|| Self::unknown(id))?;
        container.running.send_replace(false);
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.record(if force {
            format!("remove {} force", id)
        } else {
            format!("remove {}", id)
        });
        let mut containers = self.lock_containers();
        let running = match containers.get(id) {
            Some(c) => *c.running.borrow(),
            None => return Err(Self::unknown(id)),
        };
        if running && !force {
            return Err(StevedoreError::Driver {
                command: "mock rm".to_string(),
                message: format!("container {} is running", id),
            });
        }
        if let Some(c) = containers.remove(id) {
            c.running.send_replace(false);
        }
        Ok(())
    }
}
