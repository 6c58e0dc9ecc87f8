//! Cluster topology
//!
//! Columns map to slices by fixed-width ranges. A slice hashes into one of
//! `partition_n` partitions, and a partition is owned by `replica_n`
//! consecutive nodes starting at a jump-consistent-hash position. Every node
//! configured with the same node list computes the same owners.

pub(crate) mod client;
mod restore;

pub use client::{InProcessClient, NodeClient, NodeStatus};
pub use restore::{restore_frame, RestoreStats};

use crate::config;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xxhash_rust::xxh3::xxh3_64;

/// A cluster member, identified by host address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Node {
    pub host: String,
}

impl Node {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

/// Process-wide cluster topology
pub struct Cluster {
    local: Node,
    nodes: RwLock<Vec<Node>>,
    replica_n: usize,
    partition_n: usize,
}

impl Cluster {
    /// Create a topology; an empty node list means a single local node
    pub fn new(local: Node, nodes: Vec<Node>, replica_n: usize, partition_n: usize) -> Self {
        let cluster = Self {
            nodes: RwLock::new(Vec::new()),
            local,
            replica_n: replica_n.max(1),
            partition_n: partition_n.max(1),
        };
        cluster.set_nodes(nodes);
        cluster
    }

    /// Single-node topology with default replication and partitioning
    pub fn single(host: impl Into<String>) -> Self {
        Self::new(
            Node::new(host),
            Vec::new(),
            config::DEFAULT_REPLICA_N,
            config::DEFAULT_PARTITION_N,
        )
    }

    /// This process's node
    pub fn local(&self) -> &Node {
        &self.local
    }

    pub fn is_local(&self, node: &Node) -> bool {
        node.host == self.local.host
    }

    /// All nodes in configured order
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().clone()
    }

    /// Every node except this one
    pub fn remote_nodes(&self) -> Vec<Node> {
        self.nodes
            .read()
            .iter()
            .filter(|n| !self.is_local(n))
            .cloned()
            .collect()
    }

    /// Replace the node list. Administrative only; not expected to race
    /// with query execution.
    pub fn set_nodes(&self, nodes: Vec<Node>) {
        let nodes = if nodes.is_empty() {
            vec![self.local.clone()]
        } else {
            nodes
        };
        *self.nodes.write() = nodes;
    }

    pub fn replica_n(&self) -> usize {
        self.replica_n
    }

    pub fn partition_n(&self) -> usize {
        self.partition_n
    }

    /// Partition of a (database, slice) pair
    pub fn partition(&self, db: &str, slice: u64) -> usize {
        let mut key = Vec::with_capacity(db.len() + 8);
        key.extend_from_slice(db.as_bytes());
        key.extend_from_slice(&slice.to_be_bytes());
        (xxh3_64(&key) % self.partition_n as u64) as usize
    }

    /// Owners of a partition
    pub fn partition_nodes(&self, partition: usize) -> Vec<Node> {
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return Vec::new();
        }

        let start = jump_hash(partition as u64, nodes.len());
        let n = self.replica_n.min(nodes.len());
        (0..n)
            .map(|i| nodes[(start + i) % nodes.len()].clone())
            .collect()
    }

    /// Owners of a slice of a database
    pub fn fragment_nodes(&self, db: &str, slice: u64) -> Vec<Node> {
        self.partition_nodes(self.partition(db, slice))
    }

    /// Whether this node owns a slice
    pub fn owns(&self, db: &str, slice: u64) -> bool {
        self.fragment_nodes(db, slice)
            .iter()
            .any(|n| self.is_local(n))
    }

    /// Split slices between nodes for a read: a slice goes to this node
    /// when it is an owner, otherwise to its first owner
    pub fn slices_by_node(
        &self,
        db: &str,
        slices: impl IntoIterator<Item = u64>,
    ) -> BTreeMap<Node, Vec<u64>> {
        let mut groups: BTreeMap<Node, Vec<u64>> = BTreeMap::new();
        for slice in slices {
            let owners = self.fragment_nodes(db, slice);
            let node = if owners.is_empty() || owners.iter().any(|n| self.is_local(n)) {
                self.local.clone()
            } else {
                owners[0].clone()
            };
            groups.entry(node).or_default().push(slice);
        }
        groups
    }
}

/// Jump consistent hash (Lamping & Veach): maps a key to a bucket in
/// `[0, buckets)`, moving only `1/n` of the keys when a bucket is added.
pub fn jump_hash(mut key: u64, buckets: usize) -> usize {
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < buckets as i64 {
        b = j;
        key = key.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        j = ((b + 1) as f64 * ((1u64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
    }
    b.max(0) as usize
}
