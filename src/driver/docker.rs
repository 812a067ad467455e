//! Driver backed by the `docker` command line client

use super::{AttachedWait, ContainerDriver, ExecOptions};
use crate::error::{Result, StevedoreError};
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, trace};

/// Sequence number shared by every invocation, used to correlate log lines
static INVOCATION_SEQ: AtomicU32 = AtomicU32::new(0);

/// Docker CLI driver configuration
#[derive(Debug, Clone)]
pub struct DockerCliConfig {
    /// Client executable
    pub executable: String,
}

impl Default for DockerCliConfig {
    fn default() -> Self {
        Self {
            executable: "docker".to_string(),
        }
    }
}

/// Issues engine operations by running the docker client
#[derive(Debug, Clone, Default)]
pub struct DockerCli {
    config: DockerCliConfig,
}

impl DockerCli {
    /// Create a driver with the given configuration
    pub fn new(config: DockerCliConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[String]) -> (u32, Command) {
        let seq = INVOCATION_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("DOCKER.{} {:?}", seq, args);

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(args).stdin(Stdio::null());
        (seq, cmd)
    }

    fn describe(&self, args: &[String]) -> String {
        let verb = args.first().map(String::as_str).unwrap_or_default();
        format!("{} {}", self.config.executable, verb)
    }

    async fn output(&self, args: &[String]) -> Result<(u32, Output)> {
        let (seq, mut cmd) = self.command(args);
        let output = cmd.output().await?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            trace!("{}.&2| {}", seq, line);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(StevedoreError::Driver {
                command: self.describe(args),
                message,
            });
        }

        Ok((seq, output))
    }

    /// Run a command, forwarding its output to the log
    async fn run(&self, args: Vec<String>) -> Result<()> {
        let (seq, output) = self.output(&args).await?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            trace!("{}.&1| {}", seq, line);
        }
        Ok(())
    }

    /// Run a command and return its trimmed standard output
    async fn capture(&self, args: Vec<String>) -> Result<String> {
        let (seq, output) = self.output(&args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        for line in stdout.lines() {
            debug!("{}.o | {}", seq, line);
        }
        Ok(stdout)
    }
}

fn forward_lines<R>(seq: u32, stream: R, fd: u8) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            trace!("{}.&{}| {}", seq, fd, line);
        }
    })
}

#[async_trait]
impl ContainerDriver for DockerCli {
    fn engine(&self) -> &str {
        "docker"
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.run(vec!["pull".to_string(), image.to_string()]).await
    }

    async fn create(&self, cidfile: &Path, args: &[String]) -> Result<String> {
        let mut cmd_args = Vec::with_capacity(args.len() + 2);
        cmd_args.push("create".to_string());
        cmd_args.push(format!("--cidfile={}", cidfile.display()));
        cmd_args.extend_from_slice(args);
        self.capture(cmd_args).await
    }

    async fn start(&self, id: &str, attached: bool) -> Result<Option<AttachedWait>> {
        if !attached {
            self.run(vec!["start".to_string(), id.to_string()]).await?;
            return Ok(None);
        }

        let args = vec!["start".to_string(), "-a".to_string(), id.to_string()];
        let (seq, mut cmd) = self.command(&args);
        let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;

        let stdout = child.stdout.take().map(|s| forward_lines(seq, s, 1));
        let stderr = child.stderr.take().map(|s| forward_lines(seq, s, 2));
        let id = id.to_string();

        Ok(Some(Box::pin(async move {
            match child.wait().await {
                Ok(status) => debug!("DOCKER.{} attached to {} exited: {}", seq, id, status),
                Err(e) => debug!("DOCKER.{} attached to {} failed: {}", seq, id, e),
            }
            for forwarder in [stdout, stderr].into_iter().flatten() {
                let _ = forwarder.await;
            }
        })))
    }

    async fn inspect(&self, id: &str, template: &str) -> Result<String> {
        self.capture(vec![
            "inspect".to_string(),
            "-f".to_string(),
            template.to_string(),
            id.to_string(),
        ])
        .await
    }

    async fn exec(&self, id: &str, options: &ExecOptions, command: &[String]) -> Result<()> {
        let mut args = vec!["exec".to_string()];
        if let Some(ref workdir) = options.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }
        for env in &options.env {
            args.push("-e".to_string());
            args.push(env.clone());
        }
        args.push(id.to_string());
        args.extend_from_slice(command);
        self.run(args).await
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.run(vec!["stop".to_string(), id.to_string()]).await
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(id.to_string());
        self.run(args).await
    }
}
