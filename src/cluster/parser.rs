//! Cluster definition file parser

use super::config::{Cluster, Clusters};
use crate::error::{Result, StevedoreError};
use std::collections::HashSet;
use std::path::Path;

/// Definition file looked up when none is given
pub const DEFAULT_DEFINITION_FILE: &str = "stevedore.yml";

/// Cluster definition parser
pub struct ClusterParser;

impl ClusterParser {
    /// Parse a definition file
    ///
    /// A single-cluster document without a name is named after the file.
    pub fn parse_file(path: &Path) -> Result<Clusters> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StevedoreError::ClusterParse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let fallback = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());

        Self::parse_str(&content, fallback.as_deref())
    }

    /// Parse a definition from a string
    pub fn parse_str(content: &str, fallback_name: Option<&str>) -> Result<Clusters> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| StevedoreError::ClusterParse(format!("Failed to parse YAML: {}", e)))?;

        let clusters = if value.get("clusters").is_some() {
            let clusters: Clusters = serde_yaml::from_value(value)
                .map_err(|e| StevedoreError::ClusterParse(e.to_string()))?;
            if clusters.clusters.iter().any(|c| c.name.is_empty()) {
                return Err(StevedoreError::ClusterParse(
                    "Cluster name not defined".to_string(),
                ));
            }
            clusters
        } else {
            let mut cluster: Cluster = serde_yaml::from_value(value)
                .map_err(|e| StevedoreError::ClusterParse(e.to_string()))?;
            if cluster.name.is_empty() {
                cluster.name = fallback_name.unwrap_or_default().to_string();
            }
            Clusters {
                clusters: vec![cluster],
                default: None,
            }
        };

        for cluster in &clusters.clusters {
            Self::validate(cluster)?;
        }

        Ok(clusters)
    }

    /// Validate the shape of a cluster definition
    pub fn validate(cluster: &Cluster) -> Result<()> {
        if cluster.name.is_empty() {
            return Err(StevedoreError::InvalidConfig(
                "Cluster name not defined".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for node in &cluster.nodes {
            if node.name.is_empty() {
                return Err(StevedoreError::InvalidConfig(format!(
                    "Cluster '{}' has a node without a name",
                    cluster.name
                )));
            }
            if node.image.is_empty() {
                return Err(StevedoreError::InvalidConfig(format!(
                    "Node '{}' must specify an image",
                    node.name
                )));
            }
            if !names.insert(node.name.as_str()) {
                return Err(StevedoreError::InvalidConfig(format!(
                    "Duplicate node name '{}' in cluster '{}'",
                    node.name, cluster.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::config::{CaptureFile, Phase, DEFAULT_SHELL};

    #[test]
    fn test_parse_single_cluster() {
        let yaml = r#"
nodes:
  - name: db
    image: postgres:13
  - name: web
    image: "nginx:%(env:TAG)"
    instances: 3
    docker:
      privileged: true
      volumes:
        - data:/app/data
    run:
      shell: /bin/sh
      commands:
        - echo %(ip:db-0)
"#;

        let clusters = ClusterParser::parse_str(yaml, Some("demo.yml")).unwrap();
        let cluster = clusters.default_cluster().unwrap();

        assert_eq!(cluster.name, "demo.yml");
        assert_eq!(cluster.nodes.len(), 2);
        assert_eq!(cluster.node("db").unwrap().instances, 1);

        let web = cluster.node("web").unwrap();
        assert_eq!(web.instances, 3);
        assert!(web.docker.privileged);
        assert_eq!(web.commands(Phase::Run).unwrap().shell(), "/bin/sh");
        assert!(web.commands(Phase::Prepare).is_none());
    }

    #[test]
    fn test_parse_multiple_clusters() {
        let yaml = r#"
default: staging
clusters:
  - name: dev
    nodes:
      - name: app
        image: busybox
  - name: staging
    nodes:
      - name: app
        image: alpine
        run:
          commands: [ "true" ]
"#;

        let clusters = ClusterParser::parse_str(yaml, None).unwrap();
        assert_eq!(clusters.clusters.len(), 2);

        let default = clusters.default_cluster().unwrap();
        assert_eq!(default.name, "staging");
        assert_eq!(
            default.nodes[0].commands(Phase::Run).unwrap().shell(),
            DEFAULT_SHELL
        );
        assert!(clusters.cluster_by_name("dev").is_some());
        assert!(clusters.cluster_by_name("prod").is_none());
    }

    #[test]
    fn test_multiple_clusters_require_names() {
        let yaml = r#"
clusters:
  - nodes:
      - name: app
        image: busybox
"#;

        assert!(ClusterParser::parse_str(yaml, None).is_err());
    }

    #[test]
    fn test_missing_nodes() {
        assert!(ClusterParser::parse_str("name: empty\n", None).is_err());
    }

    #[test]
    fn test_negative_instances_rejected() {
        let yaml = r#"
name: bad
nodes:
  - name: app
    image: busybox
    instances: -1
"#;

        assert!(ClusterParser::parse_str(yaml, None).is_err());
    }

    #[test]
    fn test_validate_missing_image() {
        let yaml = r#"
name: bad
nodes:
  - name: app
    image: ""
"#;

        assert!(ClusterParser::parse_str(yaml, None).is_err());
    }

    #[test]
    fn test_validate_duplicate_nodes() {
        let yaml = r#"
name: bad
nodes:
  - name: app
    image: busybox
  - name: app
    image: alpine
"#;

        assert!(ClusterParser::parse_str(yaml, None).is_err());
    }

    #[test]
    fn test_capture_files() {
        let yaml = r#"
name: capture
nodes:
  - name: app
    image: busybox
    capture:
      files:
        - /var/log/app.log
        - local: out/report.xml
          remote: /work/report.xml
"#;

        let clusters = ClusterParser::parse_str(yaml, None).unwrap();
        let files = &clusters.clusters[0].nodes[0].capture.files;

        assert_eq!(files[0], CaptureFile::Path("/var/log/app.log".to_string()));
        assert_eq!(files[0].local(), files[0].remote());
        assert_eq!(files[1].local(), "out/report.xml");
        assert_eq!(files[1].remote(), "/work/report.xml");
    }
}
