//! Stevedore - a cluster orchestrator for container engines
//!
//! This is the main CLI entry point for Stevedore.

use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stevedore::cluster::parser::DEFAULT_DEFINITION_FILE;
use stevedore::cluster::{Cluster, ClusterParser};
use stevedore::driver::{ContainerDriver, DockerCli, DockerCliConfig};
use stevedore::error::{Result, StevedoreError};
use stevedore::orchestrator::{stop_cluster, ActivationEnv, NoHooks, RunFlags, RunState};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Stevedore - container cluster orchestrator
#[derive(Parser)]
#[command(name = "stevedore")]
#[command(version)]
#[command(about = "Bring up clusters of cooperating containers", long_about = None)]
struct Cli {
    /// Cluster definition file
    #[arg(short, long, global = true, default_value = DEFAULT_DEFINITION_FILE)]
    file: PathBuf,

    /// Data directory, mounted into every container
    #[arg(short = 'd', long, global = true, default_value = ".")]
    datadir: PathBuf,

    /// Container engine client
    #[arg(long, global = true, default_value = "docker")]
    docker: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with_all = ["debug", "verbose"])]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cluster, run its commands and tear it down
    Run {
        /// Cluster name, defaults to the definition's default cluster
        cluster: Option<String>,
        /// Re-create containers instead of reusing existing ones
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        create: bool,
        /// Leave containers running in the background
        #[arg(long)]
        detach: bool,
        /// Keep containers running until interrupted
        #[arg(long, conflicts_with = "detach")]
        hold: bool,
        /// Remove containers once stopped
        #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
        remove: bool,
    },

    /// Bring the cluster up without running commands
    Up {
        /// Cluster name, defaults to the definition's default cluster
        cluster: Option<String>,
        /// Re-create containers instead of reusing existing ones
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        create: bool,
        /// Run node preparation
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        prepare: bool,
        /// Leave containers running in the background
        #[arg(long)]
        detach: bool,
    },

    /// Stop the containers of a cluster started earlier
    Stop {
        /// Cluster name, defaults to the definition's default cluster
        cluster: Option<String>,
        /// Remove containers and their marker files
        #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
        remove: bool,
    },

    /// Validate the definition and print the selected cluster
    Config {
        /// Cluster name, defaults to the definition's default cluster
        cluster: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.debug || cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = std::path::absolute(&cli.datadir)?;
    let driver: Arc<dyn ContainerDriver> = Arc::new(DockerCli::new(DockerCliConfig {
        executable: cli.docker.clone(),
    }));

    match cli.command {
        Commands::Run {
            cluster,
            create,
            detach,
            hold,
            remove,
        } => {
            let cluster = load_cluster(&cli.file, cluster.as_deref())?;
            let flags = run_flags(create, detach, hold, remove);

            let run = activate(cluster, data_dir, flags, driver).await;
            if run.any_error() {
                error!("Cluster {} failed", run.cluster().name);
                run.teardown_all().await;
                std::process::exit(1);
            }

            if !detach {
                if hold {
                    info!("Holding cluster {}, press Ctrl-C to stop", run.cluster().name);
                    tokio::signal::ctrl_c().await?;
                }
                run.teardown_all().await;
            }
            info!("Cluster {} finished", run.cluster().name);
        }

        Commands::Up {
            cluster,
            create,
            prepare,
            detach,
        } => {
            let cluster = load_cluster(&cli.file, cluster.as_deref())?;
            let flags = up_flags(create, prepare, detach);

            let run = activate(cluster, data_dir, flags, driver).await;
            if run.any_error() {
                error!("Cluster {} failed", run.cluster().name);
                std::process::exit(1);
            }

            info!("Cluster {} is up", run.cluster().name);
            if !detach {
                run.wait_attached().await;
            }
        }

        Commands::Stop { cluster, remove } => {
            let cluster = load_cluster(&cli.file, cluster.as_deref())?;
            let found = stop_cluster(&cluster, &data_dir, driver.as_ref(), remove).await?;
            if found == 0 {
                warn!("No containers recorded for cluster {}", cluster.name);
            } else {
                info!("Stopped {} container(s) of {}", found, cluster.name);
            }
        }

        Commands::Config { cluster } => {
            let cluster = load_cluster(&cli.file, cluster.as_deref())?;
            print!("{}", serde_yaml::to_string(&cluster)?);
        }
    }

    Ok(())
}

/// Phases of `run`: containers are stopped afterwards unless detached or held
fn run_flags(create: bool, detach: bool, hold: bool, remove: bool) -> RunFlags {
    let mut flags = RunFlags::PREPARE | RunFlags::RUN;
    flags.set(RunFlags::CREATE, create);
    if detach {
        flags |= RunFlags::DETACH;
    } else if !hold {
        flags |= RunFlags::STOP;
    }
    flags.set(RunFlags::REMOVE, remove);
    flags
}

/// Phases of `up`
fn up_flags(create: bool, prepare: bool, detach: bool) -> RunFlags {
    let mut flags = RunFlags::empty();
    flags.set(RunFlags::CREATE, create);
    flags.set(RunFlags::PREPARE, prepare);
    flags.set(RunFlags::DETACH, detach);
    flags
}

/// Load the definition file and select a cluster
fn load_cluster(file: &Path, name: Option<&str>) -> Result<Cluster> {
    let clusters = ClusterParser::parse_file(file)?;
    let cluster = match name {
        Some(name) => clusters.cluster_by_name(name),
        None => clusters.default_cluster(),
    };
    cluster.cloned().ok_or_else(|| {
        StevedoreError::ClusterNotFound(name.unwrap_or("<default>").to_string())
    })
}

/// Run an activation, aborting cross-reference waits on Ctrl-C
async fn activate(
    cluster: Cluster,
    data_dir: PathBuf,
    flags: RunFlags,
    driver: Arc<dyn ContainerDriver>,
) -> Arc<RunState> {
    let env = ActivationEnv::new(Arc::new(cluster), data_dir, flags);
    let run = Arc::new(RunState::new(env, driver, Arc::new(NoHooks)));

    let interrupt = {
        let run = Arc::clone(&run);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, aborting cluster {}", run.cluster().name);
                run.abort();
            }
        })
    };

    info!("Starting cluster {}", run.cluster().name);
    run.launch().await;
    interrupt.abort();
    run
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn test_up_creates_and_prepares_by_default() {
        match parse(&["stevedore", "up"]) {
            Commands::Up {
                create,
                prepare,
                detach,
                ..
            } => {
                assert_eq!(
                    up_flags(create, prepare, detach),
                    RunFlags::CREATE | RunFlags::PREPARE
                );
            }
            _ => panic!("expected up"),
        }

        match parse(&["stevedore", "up", "--create", "false", "--prepare=false", "--detach"]) {
            Commands::Up {
                create,
                prepare,
                detach,
                ..
            } => assert_eq!(up_flags(create, prepare, detach), RunFlags::DETACH),
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn test_run_flags() {
        match parse(&["stevedore", "run", "demo"]) {
            Commands::Run {
                cluster,
                create,
                detach,
                hold,
                remove,
            } => {
                assert_eq!(cluster.as_deref(), Some("demo"));
                assert_eq!(
                    run_flags(create, detach, hold, remove),
                    RunFlags::all() - RunFlags::DETACH
                );
            }
            _ => panic!("expected run"),
        }

        match parse(&["stevedore", "run", "--hold", "-r", "false"]) {
            Commands::Run {
                create,
                detach,
                hold,
                remove,
                ..
            } => assert_eq!(
                run_flags(create, detach, hold, remove),
                RunFlags::CREATE | RunFlags::PREPARE | RunFlags::RUN
            ),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_stop_remove_short_flag() {
        match parse(&["stevedore", "stop", "-r", "false"]) {
            Commands::Stop { remove, .. } => assert!(!remove),
            _ => panic!("expected stop"),
        }
        match parse(&["stevedore", "stop"]) {
            Commands::Stop { remove, .. } => assert!(remove),
            _ => panic!("expected stop"),
        }
    }
}
