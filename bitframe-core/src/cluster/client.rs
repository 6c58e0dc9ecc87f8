//! Node-to-node client
//!
//! The executor and the restore protocol talk to other nodes only through
//! [`NodeClient`]. The server crate implements it over HTTP;
//! [`InProcessClient`] connects executors living in the same process.

use super::Node;
use crate::query::{ExecOptions, Executor, QueryResponse};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

/// What a node reports about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub host: String,
    pub version: String,
    pub nodes: Vec<Node>,
}

/// Requests one node makes of another
pub trait NodeClient: Send + Sync + 'static {
    /// Run query text on `host`
    fn execute_query(
        &self,
        host: &str,
        db: &str,
        query: &str,
        options: &ExecOptions,
    ) -> impl Future<Output = Result<QueryResponse>> + Send;

    /// Node list and version of `host`
    fn status(&self, host: &str) -> impl Future<Output = Result<NodeStatus>> + Send;

    /// Highest slice of every database known to `host`
    fn max_slices(&self, host: &str) -> impl Future<Output = Result<BTreeMap<String, u64>>> + Send;

    /// Owners of a slice according to `host`'s topology
    fn fragment_nodes(
        &self,
        host: &str,
        db: &str,
        slice: u64,
    ) -> impl Future<Output = Result<Vec<Node>>> + Send;

    /// Backup image of one fragment; `None` if `host` holds no such fragment
    fn backup_fragment(
        &self,
        host: &str,
        db: &str,
        frame: &str,
        slice: u64,
    ) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Overwrite one fragment on `host` with a backup image
    fn restore_fragment(
        &self,
        host: &str,
        db: &str,
        frame: &str,
        slice: u64,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Client for executors registered in the same process
#[derive(Clone, Default)]
pub struct InProcessClient {
    nodes: Arc<RwLock<HashMap<String, Arc<Executor<InProcessClient>>>>>,
}

impl InProcessClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an executor reachable under its local host name
    pub fn register(&self, executor: Arc<Executor<InProcessClient>>) {
        let host = executor.cluster().local().host.clone();
        self.nodes.write().insert(host, executor);
    }

    /// Make a host unreachable
    pub fn unregister(&self, host: &str) {
        self.nodes.write().remove(host);
    }

    fn node(&self, host: &str) -> Result<Arc<Executor<InProcessClient>>> {
        self.nodes
            .read()
            .get(host)
            .cloned()
            .ok_or_else(|| Error::remote(host, "unreachable"))
    }
}

// Requests between nodes always carry `remote`, so they run on the target
// without further fan-out.
impl NodeClient for InProcessClient {
    async fn execute_query(
        &self,
        host: &str,
        db: &str,
        query: &str,
        options: &ExecOptions,
    ) -> Result<QueryResponse> {
        self.node(host)?.execute_local(db, query, options)
    }

    async fn status(&self, host: &str) -> Result<NodeStatus> {
        Ok(self.node(host)?.status())
    }

    async fn max_slices(&self, host: &str) -> Result<BTreeMap<String, u64>> {
        Ok(self.node(host)?.max_slices())
    }

    async fn fragment_nodes(&self, host: &str, db: &str, slice: u64) -> Result<Vec<Node>> {
        Ok(self.node(host)?.fragment_nodes(db, slice))
    }

    async fn backup_fragment(
        &self,
        host: &str,
        db: &str,
        frame: &str,
        slice: u64,
    ) -> Result<Option<Vec<u8>>> {
        self.node(host)?.backup_fragment(db, frame, slice)
    }

    async fn restore_fragment(
        &self,
        host: &str,
        db: &str,
        frame: &str,
        slice: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        self.node(host)?.restore_fragment(db, frame, slice, &data)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cluster::Cluster;
    use crate::storage::{StorageConfig, StorageEngine};
    use crate::wal::SyncPolicy;
    use std::path::Path;

    /// Start an executor for `host` with its data under `dir/host`
    pub(crate) fn start_node(
        dir: &Path,
        host: &str,
        nodes: &[&str],
        replica_n: usize,
        client: &InProcessClient,
    ) -> Arc<Executor<InProcessClient>> {
        let config = StorageConfig {
            data_dir: dir.join(host.replace(':', "_")),
            sync_policy: SyncPolicy::None,
            ..Default::default()
        };
        let engine = Arc::new(StorageEngine::new(config).unwrap());
        let cluster = Arc::new(Cluster::new(
            Node::new(host),
            nodes.iter().map(|h| Node::new(*h)).collect(),
            replica_n,
            crate::config::DEFAULT_PARTITION_N,
        ));
        let executor = Arc::new(Executor::new(engine, cluster, client.clone()));
        client.register(executor.clone());
        executor
    }
}
