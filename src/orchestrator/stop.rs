//! Stopping a detached cluster from its marker files

use super::layout::{instance_name, StateLayout};
use crate::cluster::Cluster;
use crate::driver::ContainerDriver;
use crate::error::Result;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Stop every container recorded for `cluster` under `data_dir`
///
/// With `remove`, containers are force-removed and their marker files
/// deleted. Failures are logged and skipped so every recorded instance is
/// attempted. Returns the number of containers found.
pub async fn stop_cluster(
    cluster: &Cluster,
    data_dir: &Path,
    driver: &dyn ContainerDriver,
    remove: bool,
) -> Result<usize> {
    let layout = StateLayout::new(data_dir, &cluster.name);
    let mut found = 0;

    for node in &cluster.nodes {
        for index in 0..node.instances as usize {
            let name = instance_name(&node.name, index);
            let cidfile = layout.cidfile(&name);

            let id = match tokio::fs::read_to_string(&cidfile).await {
                Ok(content) => content.trim().to_string(),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Failed to read {}: {}", cidfile.display(), e);
                    continue;
                }
            };
            if id.is_empty() {
                continue;
            }
            found += 1;

            info!("Stopping {} ({})", name, id);
            if let Err(e) = driver.stop(&id).await {
                warn!("Failed to stop container {}: {}", id, e);
            }

            if remove {
                if let Err(e) = driver.remove(&id, true).await {
                    warn!("Failed to remove container {}: {}", id, e);
                }
                if let Err(e) = tokio::fs::remove_file(&cidfile).await {
                    warn!("Failed to remove {}: {}", cidfile.display(), e);
                }
            }
        }
    }

    Ok(found)
}
