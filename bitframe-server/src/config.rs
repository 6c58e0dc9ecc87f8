//! Server configuration - TOML file plus command-line overrides

use anyhow::Context;
use bitframe_core::cluster::{Cluster, Node};
use bitframe_core::config::{DEFAULT_PARTITION_N, DEFAULT_REPLICA_N};
use bitframe_core::storage::StorageConfig;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "localhost:10101";

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "bitframe")]
#[command(version, about = "Distributed bitmap index server", long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind and advertise (host:port)
    #[arg(long)]
    pub host: Option<String>,

    /// Data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub host: String,
    pub data_dir: PathBuf,
    pub cluster: ClusterConfig,
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClusterConfig {
    pub replicas: usize,
    pub partitions: usize,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            data_dir: PathBuf::from("data"),
            cluster: ClusterConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICA_N,
            partitions: DEFAULT_PARTITION_N,
            hosts: Vec::new(),
        }
    }
}

impl Config {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load the file named by `args` if any, then apply flag overrides
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(host) = &args.host {
            config.host = host.clone();
        }
        if let Some(dir) = &args.data_dir {
            config.data_dir = dir.clone();
        }
        Ok(config)
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            data_dir: self.data_dir.clone(),
            ..Default::default()
        }
    }

    pub fn cluster(&self) -> Cluster {
        Cluster::new(
            Node::new(&self.host),
            self.cluster.hosts.iter().map(Node::new).collect(),
            self.cluster.replicas,
            self.cluster.partitions,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host() {
        let config = Config::parse(r#"host = "local""#).unwrap();
        assert_eq!(config.host, "local");
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_parse_data_dir() {
        let config = Config::parse(r#"data-dir = "/tmp/foo""#).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/foo"));
    }

    #[test]
    fn test_parse_plugins() {
        let config = Config::parse("[plugins]\npath = \"/path/to/plugins\"\n").unwrap();
        assert_eq!(config.plugins.path, Some(PathBuf::from("/path/to/plugins")));
    }

    #[test]
    fn test_parse_cluster() {
        let config = Config::parse(
            r#"
host = "a:10101"

[cluster]
replicas = 2
hosts = ["a:10101", "b:10101", "c:10101"]
"#,
        )
        .unwrap();
        assert_eq!(config.cluster.replicas, 2);
        assert_eq!(config.cluster.partitions, DEFAULT_PARTITION_N);

        let cluster = config.cluster();
        assert_eq!(cluster.nodes().len(), 3);
        assert_eq!(cluster.remote_nodes().len(), 2);
        assert_eq!(cluster.replica_n(), 2);
    }

    #[test]
    fn test_parse_rejects_unknown_types() {
        assert!(Config::parse("host = 12").is_err());
    }

    #[test]
    fn test_args_override_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bitframe.toml");
        std::fs::write(&path, "host = \"file:1\"\ndata-dir = \"/from/file\"\n").unwrap();

        let args = Args {
            config: Some(path),
            host: Some("flag:2".into()),
            data_dir: None,
        };
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.host, "flag:2");
        assert_eq!(config.data_dir, PathBuf::from("/from/file"));

        let missing = Args {
            config: Some(dir.path().join("nope.toml")),
            ..Default::default()
        };
        assert!(Config::from_args(&missing).is_err());
    }
}
