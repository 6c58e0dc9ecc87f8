//! Query executor
//!
//! `execute` is the coordinator path: it parses and plans the whole query
//! before running anything, then runs operations in order. Bit writes go to
//! every owner of the column's slice, attribute writes go to every node, and
//! bitmap reads are split by slice owner, run concurrently and unioned.
//!
//! `execute_local` serves requests forwarded by other nodes. It never fans
//! out, and it creates the database and frame a write names if this node has
//! not seen them yet.

use super::{
    BitmapExpr, BitmapResult, CallResult, ExecOptions, Operation, QueryParser, QueryPlanner,
    QueryResponse,
};
use crate::bitset::Bitset;
use crate::cluster::{restore_frame, Cluster, Node, NodeClient, NodeStatus, RestoreStats};
use crate::storage::{Database, DatabaseOptions, Frame, FrameOptions, StorageEngine};
use crate::{config, slice_of, AttrMap, Error, Profile, Result};
use futures_util::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Query executor for one node
pub struct Executor<C: NodeClient> {
    engine: Arc<StorageEngine>,
    cluster: Arc<Cluster>,
    client: C,
}

impl<C: NodeClient> Executor<C> {
    pub fn new(engine: Arc<StorageEngine>, cluster: Arc<Cluster>, client: C) -> Self {
        Self {
            engine,
            cluster,
            client,
        }
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Execute query text against a database
    pub async fn execute(
        &self,
        db: &str,
        text: &str,
        options: &ExecOptions,
    ) -> Result<QueryResponse> {
        if options.remote {
            return self.execute_local(db, text, options);
        }

        let query = QueryParser::parse(text)?;
        let database = self.engine.require_database(db)?;
        let operations = QueryPlanner::plan(&query, database.column_label())?;
        for operation in &operations {
            for frame in operation.frames() {
                database.require_frame(frame)?;
            }
        }

        // Cumulative: an error stops the query but keeps earlier effects
        let mut results = Vec::with_capacity(operations.len());
        for operation in &operations {
            results.push(self.execute_operation(&database, operation).await?);
        }

        Ok(respond(&database, results, options.profiles))
    }

    /// Execute a request forwarded by another node, on this node only
    pub fn execute_local(
        &self,
        db: &str,
        text: &str,
        options: &ExecOptions,
    ) -> Result<QueryResponse> {
        let query = QueryParser::parse(text)?;
        let existing = self.engine.database(db);
        let label = existing
            .as_ref()
            .map(|d| d.column_label().to_string())
            .unwrap_or_else(|| config::DEFAULT_COLUMN_LABEL.to_string());
        let operations = QueryPlanner::plan(&query, &label)?;

        let database = match existing {
            Some(database) => Some(database),
            None if operations.iter().any(Operation::is_write) => {
                Some(self.database_or_create(db)?)
            }
            None => None,
        };

        let mut results = Vec::with_capacity(operations.len());
        for operation in &operations {
            let result = match &database {
                Some(database) => self.apply_local(database, operation, options.slices.as_deref())?,
                None => empty_result(operation),
            };
            results.push(result);
        }

        Ok(match &database {
            Some(database) => respond(database, results, options.profiles),
            None => QueryResponse {
                results,
                profiles: Vec::new(),
            },
        })
    }

    async fn execute_operation(
        &self,
        database: &Arc<Database>,
        operation: &Operation,
    ) -> Result<CallResult> {
        match operation {
            Operation::SetBit { row, frame, column }
            | Operation::ClearBit { row, frame, column } => {
                let set = matches!(operation, Operation::SetBit { .. });
                let slice = slice_of(*column);
                database.note_slice(slice);

                let mut changed = false;
                for node in self.cluster.fragment_nodes(database.name(), slice) {
                    changed |= if self.cluster.is_local(&node) {
                        let frame = database.require_frame(frame)?;
                        if set {
                            frame.set_bit(*row, *column)?
                        } else {
                            frame.clear_bit(*row, *column)?
                        }
                    } else {
                        let resp = self.forward(&node, database.name(), operation).await?;
                        matches!(resp.results.first(), Some(CallResult::Bool(true)))
                    };
                }
                Ok(CallResult::Bool(changed))
            }
            Operation::SetBitmapAttrs { row, frame, attrs } => {
                database.require_frame(frame)?.row_attrs().set_attrs(*row, attrs)?;
                self.broadcast(database.name(), operation).await?;
                Ok(CallResult::Null)
            }
            Operation::SetProfileAttrs { column, attrs } => {
                database.column_attrs().set_attrs(*column, attrs)?;
                self.broadcast(database.name(), operation).await?;
                Ok(CallResult::Null)
            }
            Operation::Bitmap(expr) => {
                let bits = self.map_reduce(database, expr).await?;
                Ok(CallResult::Bitmap(BitmapResult {
                    attrs: row_attrs(database, expr),
                    bits: bits.to_vec(),
                }))
            }
            Operation::Count(expr) => {
                let bits = self.map_reduce(database, expr).await?;
                Ok(CallResult::Count(bits.count()))
            }
        }
    }

    /// Evaluate a bitmap expression over every slice of the database
    async fn map_reduce(&self, database: &Database, expr: &BitmapExpr) -> Result<Bitset> {
        let max_slice = self.max_slice(database).await?;
        let mut groups = self.cluster.slices_by_node(database.name(), 0..=max_slice);
        let local = groups.remove(self.cluster.local()).unwrap_or_default();

        let query = Operation::Bitmap(expr.clone()).to_string();
        let db = database.name();
        let requests = groups.into_iter().map(|(node, slices)| {
            let query = &query;
            async move {
                debug!("Forwarding {} slices of {} to {}", slices.len(), db, node.host);
                let resp = self
                    .client
                    .execute_query(&node.host, db, query, &ExecOptions::remote(Some(slices)))
                    .await?;
                match resp.results.into_iter().next() {
                    Some(CallResult::Bitmap(result)) => Ok(result.bits),
                    other => Err(Error::remote(
                        &node.host,
                        format!("expected a bitmap result, got {:?}", other),
                    )),
                }
            }
        });
        let partials = try_join_all(requests).await?;

        let mut bits = eval_slices(database, expr, &local);
        for partial in partials {
            bits.union_with(&partial.into_iter().collect());
        }
        Ok(bits)
    }

    /// Highest slice of a database across the cluster
    async fn max_slice(&self, database: &Database) -> Result<u64> {
        let remotes = self.cluster.remote_nodes();
        let reports = try_join_all(remotes.iter().map(|n| self.client.max_slices(&n.host))).await?;
        Ok(reports
            .iter()
            .filter_map(|slices| slices.get(database.name()).copied())
            .fold(database.max_slice(), u64::max))
    }

    async fn forward(&self, node: &Node, db: &str, operation: &Operation) -> Result<QueryResponse> {
        self.client
            .execute_query(&node.host, db, &operation.to_string(), &ExecOptions::remote(None))
            .await
    }

    /// Send a write to every other node
    async fn broadcast(&self, db: &str, operation: &Operation) -> Result<()> {
        let remotes = self.cluster.remote_nodes();
        if remotes.is_empty() {
            return Ok(());
        }

        let query = operation.to_string();
        let options = ExecOptions::remote(None);
        try_join_all(
            remotes
                .iter()
                .map(|n| self.client.execute_query(&n.host, db, &query, &options)),
        )
        .await?;
        Ok(())
    }

    fn apply_local(
        &self,
        database: &Database,
        operation: &Operation,
        slices: Option<&[u64]>,
    ) -> Result<CallResult> {
        match operation {
            Operation::SetBit { row, frame, column } => {
                let frame = self.frame_or_create(database, frame)?;
                Ok(CallResult::Bool(frame.set_bit(*row, *column)?))
            }
            Operation::ClearBit { row, frame, column } => {
                let changed = match database.frame(frame) {
                    Some(frame) => frame.clear_bit(*row, *column)?,
                    None => false,
                };
                Ok(CallResult::Bool(changed))
            }
            Operation::SetBitmapAttrs { row, frame, attrs } => {
                let frame = self.frame_or_create(database, frame)?;
                frame.row_attrs().set_attrs(*row, attrs)?;
                Ok(CallResult::Null)
            }
            Operation::SetProfileAttrs { column, attrs } => {
                database.column_attrs().set_attrs(*column, attrs)?;
                Ok(CallResult::Null)
            }
            Operation::Bitmap(expr) => {
                let bits = match slices {
                    Some(slices) => eval_slices(database, expr, slices),
                    None => eval_slices(database, expr, &all_slices(database)),
                };
                Ok(CallResult::Bitmap(BitmapResult {
                    attrs: row_attrs(database, expr),
                    bits: bits.to_vec(),
                }))
            }
            Operation::Count(expr) => {
                let bits = match slices {
                    Some(slices) => eval_slices(database, expr, slices),
                    None => eval_slices(database, expr, &all_slices(database)),
                };
                Ok(CallResult::Count(bits.count()))
            }
        }
    }

    fn database_or_create(&self, db: &str) -> Result<Arc<Database>> {
        if let Some(database) = self.engine.database(db) {
            return Ok(database);
        }
        match self.engine.create_database(db, DatabaseOptions::default()) {
            Err(Error::DatabaseExists(_)) => self.engine.require_database(db),
            other => other,
        }
    }

    fn frame_or_create(&self, database: &Database, name: &str) -> Result<Arc<Frame>> {
        if let Some(frame) = database.frame(name) {
            return Ok(frame);
        }
        match database.create_frame(name, FrameOptions::default()) {
            Err(Error::FrameExists(_)) => database.require_frame(name),
            other => other,
        }
    }

    // ========================================================================
    // Node-level handlers, served to other nodes
    // ========================================================================

    /// This node's view of the cluster
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            host: self.cluster.local().host.clone(),
            version: crate::VERSION.to_string(),
            nodes: self.cluster.nodes(),
        }
    }

    /// Highest slice of every local database
    pub fn max_slices(&self) -> BTreeMap<String, u64> {
        self.engine.max_slices()
    }

    /// Owners of a slice according to this node's topology
    pub fn fragment_nodes(&self, db: &str, slice: u64) -> Vec<Node> {
        self.cluster.fragment_nodes(db, slice)
    }

    /// Backup image of a local fragment, `None` if there is none
    pub fn backup_fragment(&self, db: &str, frame: &str, slice: u64) -> Result<Option<Vec<u8>>> {
        let fragment = self
            .engine
            .database(db)
            .and_then(|d| d.frame(frame))
            .and_then(|f| f.fragment(slice));
        fragment.map(|f| f.backup()).transpose()
    }

    /// Overwrite a local fragment with a backup image
    pub fn restore_fragment(&self, db: &str, frame: &str, slice: u64, data: &[u8]) -> Result<()> {
        let database = self.database_or_create(db)?;
        let frame = self.frame_or_create(&database, frame)?;
        frame.create_fragment_if_not_exists(slice)?.restore(data)
    }

    /// Copy a frame from the cluster `source` belongs to into this one
    pub async fn restore_frame(&self, source: &str, db: &str, frame: &str) -> Result<RestoreStats> {
        restore_frame(self, source, db, frame).await
    }
}

fn all_slices(database: &Database) -> Vec<u64> {
    (0..=database.max_slice()).collect()
}

fn eval_slices(database: &Database, expr: &BitmapExpr, slices: &[u64]) -> Bitset {
    let mut bits = Bitset::new();
    for &slice in slices {
        bits.union_with(&eval_slice(database, expr, slice));
    }
    bits
}

fn eval_slice(database: &Database, expr: &BitmapExpr, slice: u64) -> Bitset {
    match expr {
        BitmapExpr::Bitmap { row, frame } => database
            .frame(frame)
            .map(|f| f.row(*row, slice))
            .unwrap_or_default(),
        BitmapExpr::Union(children) => children.iter().fold(Bitset::new(), |acc, child| {
            acc.union(&eval_slice(database, child, slice))
        }),
        BitmapExpr::Intersect(children) | BitmapExpr::Difference(children) => {
            let mut iter = children.iter();
            let Some(first) = iter.next() else {
                return Bitset::new();
            };
            let intersect = matches!(expr, BitmapExpr::Intersect(_));
            iter.fold(eval_slice(database, first, slice), |acc, child| {
                let other = eval_slice(database, child, slice);
                if intersect {
                    acc.intersect(&other)
                } else {
                    acc.difference(&other)
                }
            })
        }
    }
}

/// Row attributes attached to a plain `Bitmap` result
fn row_attrs(database: &Database, expr: &BitmapExpr) -> AttrMap {
    match expr {
        BitmapExpr::Bitmap { row, frame } => database
            .frame(frame)
            .map(|f| f.row_attrs().attrs(*row))
            .unwrap_or_default(),
        _ => AttrMap::new(),
    }
}

fn empty_result(operation: &Operation) -> CallResult {
    match operation {
        Operation::SetBit { .. } | Operation::ClearBit { .. } => CallResult::Bool(false),
        Operation::SetBitmapAttrs { .. } | Operation::SetProfileAttrs { .. } => CallResult::Null,
        Operation::Bitmap(_) => CallResult::Bitmap(BitmapResult::default()),
        Operation::Count(_) => CallResult::Count(0),
    }
}

/// Assemble the response, attaching column attributes when asked
fn respond(database: &Database, results: Vec<CallResult>, profiles: bool) -> QueryResponse {
    let profiles = if profiles {
        let columns: BTreeSet<u64> = results
            .iter()
            .filter_map(|r| match r {
                CallResult::Bitmap(b) => Some(b.bits.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect();

        // Columns without attributes are left out
        let attrs = database.column_attrs();
        attrs
            .ids()
            .into_iter()
            .filter(|id| columns.contains(id))
            .map(|id| Profile {
                id,
                attrs: attrs.attrs(id),
            })
            .filter(|p| !p.attrs.is_empty())
            .collect()
    } else {
        Vec::new()
    };

    QueryResponse { results, profiles }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::client::testing::start_node;
    use crate::cluster::InProcessClient;
    use crate::config::SLICE_WIDTH;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::Path;
    use tempfile::TempDir;

    type TestNode = Arc<Executor<InProcessClient>>;

    fn single(dir: &Path) -> TestNode {
        start_node(dir, "localhost:10101", &[], 1, &InProcessClient::new())
    }

    fn setup(node: &TestNode, label: Option<&str>, frames: &[&str]) {
        let options = match label {
            Some(label) => DatabaseOptions {
                column_label: label.to_string(),
            },
            None => DatabaseOptions::default(),
        };
        let db = node.engine().create_database("d", options).unwrap();
        for frame in frames {
            db.create_frame(frame, FrameOptions::default()).unwrap();
        }
    }

    async fn query(node: &TestNode, q: &str) -> String {
        query_with(node, q, false).await
    }

    async fn query_with(node: &TestNode, q: &str, profiles: bool) -> String {
        let options = ExecOptions {
            profiles,
            ..Default::default()
        };
        let resp = node.execute("d", q, &options).await.unwrap();
        serde_json::to_string(&resp).unwrap()
    }

    #[tokio::test]
    async fn test_set_bit_and_bitmap() {
        let dir = TempDir::new().unwrap();
        let node = single(dir.path());
        setup(&node, None, &["x.n", "z"]);

        assert_eq!(
            query(&node, r#"SetBit(id=1, frame="x.n", profileID=100)"#).await,
            r#"{"results":[true]}"#
        );
        query(&node, r#"SetBit(id=2, frame="x.n", profileID=100)"#).await;
        query(&node, r#"SetBit(id=2, frame="z", profileID=100)"#).await;

        assert_eq!(
            query(&node, r#"Bitmap(id=1, frame="x.n")"#).await,
            r#"{"results":[{"attrs":{},"bits":[100]}]}"#
        );
        assert_eq!(
            query(&node, r#"SetBit(id=1, frame="x.n", profileID=100)"#).await,
            r#"{"results":[false]}"#
        );
        assert_eq!(
            query(&node, r#"Bitmap(id=7, frame="z")"#).await,
            r#"{"results":[{"attrs":{},"bits":[]}]}"#
        );
    }

    #[tokio::test]
    async fn test_bitmap_attrs_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let node = single(dir.path());
            setup(&node, None, &["x.n", "z", "neg"]);

            query(&node, r#"SetBit(id=1, frame="x.n", profileID=100)"#).await;
            query(&node, r#"SetBit(id=2, frame="x.n", profileID=100)"#).await;
            query(&node, r#"SetBit(id=2, frame="z", profileID=100)"#).await;
            query(&node, r#"SetBit(id=3, frame="neg", profileID=100)"#).await;

            assert_eq!(
                query(&node, r#"SetBitmapAttrs(id=1, frame="x.n", x=100)"#).await,
                r#"{"results":[null]}"#
            );
            query(&node, r#"SetBitmapAttrs(id=2, frame="x.n", x=-200)"#).await;
            query(&node, r#"SetBitmapAttrs(id=2, frame="z", x=300)"#).await;
            query(&node, r#"SetBitmapAttrs(id=3, frame="neg", x=-0.44)"#).await;

            assert_eq!(
                query(&node, r#"Bitmap(id=1, frame="x.n")"#).await,
                r#"{"results":[{"attrs":{"x":100},"bits":[100]}]}"#
            );
            assert_eq!(
                query(&node, r#"Bitmap(id=2, frame="x.n")"#).await,
                r#"{"results":[{"attrs":{"x":-200},"bits":[100]}]}"#
            );
        }

        let node = single(dir.path());
        assert_eq!(
            query_with(&node, r#"Bitmap(id=1, frame="x.n")"#, true).await,
            r#"{"results":[{"attrs":{"x":100},"bits":[100]}]}"#
        );
        assert_eq!(
            query_with(&node, r#"Bitmap(id=3, frame="neg")"#, true).await,
            r#"{"results":[{"attrs":{"x":-0.44},"bits":[100]}]}"#
        );
        assert_eq!(
            query(&node, r#"Bitmap(id=2, frame="x.n")"#).await,
            r#"{"results":[{"attrs":{"x":-200},"bits":[100]}]}"#
        );
        assert_eq!(
            query(&node, r#"Bitmap(id=2, frame="z")"#).await,
            r#"{"results":[{"attrs":{"x":300},"bits":[100]}]}"#
        );
    }

    #[tokio::test]
    async fn test_attribute_merge() {
        let dir = TempDir::new().unwrap();
        let node = single(dir.path());
        setup(&node, None, &["f"]);

        query(&node, r#"SetBitmapAttrs(id=1, frame="f", x=1)"#).await;
        query(&node, r#"SetBitmapAttrs(id=1, frame="f", y=2)"#).await;
        assert_eq!(
            query(&node, r#"Bitmap(id=1, frame="f")"#).await,
            r#"{"results":[{"attrs":{"x":1,"y":2},"bits":[]}]}"#
        );

        query(&node, r#"SetBitmapAttrs(id=1, frame="f", x=3)"#).await;
        assert_eq!(
            query(&node, r#"Bitmap(id=1, frame="f")"#).await,
            r#"{"results":[{"attrs":{"x":3,"y":2},"bits":[]}]}"#
        );

        query(&node, r#"SetBitmapAttrs(id=1, frame="f", x=null)"#).await;
        assert_eq!(
            query(&node, r#"Bitmap(id=1, frame="f")"#).await,
            r#"{"results":[{"attrs":{"y":2},"bits":[]}]}"#
        );
    }

    #[tokio::test]
    async fn test_profiles() {
        let dir = TempDir::new().unwrap();
        let expected = r#"{"results":[{"attrs":{},"bits":[100,101]}],"profiles":[{"id":100,"attrs":{"foo":"bar"}}]}"#;
        {
            let node = single(dir.path());
            setup(&node, None, &["x.n"]);

            query(&node, r#"SetBit(id=1, frame="x.n", profileID=100)"#).await;
            query(&node, r#"SetBit(id=1, frame="x.n", profileID=101)"#).await;
            query(&node, r#"SetProfileAttrs(id=100, foo="bar")"#).await;
            query(&node, r#"SetProfileAttrs(id=555, foo="baz")"#).await;

            assert_eq!(query_with(&node, r#"Bitmap(id=1, frame="x.n")"#, true).await, expected);
            assert_eq!(
                query(&node, r#"Bitmap(id=1, frame="x.n")"#).await,
                r#"{"results":[{"attrs":{},"bits":[100,101]}]}"#
            );
        }

        let node = single(dir.path());
        assert_eq!(query_with(&node, r#"Bitmap(id=1, frame="x.n")"#, true).await, expected);
    }

    #[tokio::test]
    async fn test_custom_column_label() {
        let dir = TempDir::new().unwrap();
        let node = single(dir.path());
        setup(&node, Some("col"), &["x.n"]);

        query(&node, r#"SetBit(id=1, frame="x.n", col=100)"#).await;
        query(&node, r#"SetBit(id=1, frame="x.n", profileID=101)"#).await;
        query(&node, r#"SetProfileAttrs(col=100, foo="bar")"#).await;

        assert_eq!(
            query_with(&node, r#"Bitmap(id=1, frame="x.n")"#, true).await,
            r#"{"results":[{"attrs":{},"bits":[100,101]}],"profiles":[{"id":100,"attrs":{"foo":"bar"}}]}"#
        );
    }

    #[tokio::test]
    async fn test_errors_abort_before_execution() {
        let dir = TempDir::new().unwrap();
        let node = single(dir.path());
        setup(&node, None, &["f"]);

        let opts = ExecOptions::default();
        assert!(matches!(
            node.execute("nope", r#"Bitmap(id=1, frame="f")"#, &opts).await,
            Err(Error::DatabaseNotFound(_))
        ));
        assert!(matches!(
            node.execute("d", r#"SetBit(id=1, frame="f", profileID=1) Bitmap(id=1, frame="g")"#, &opts).await,
            Err(Error::FrameNotFound(_))
        ));
        assert!(matches!(
            node.execute("d", r#"SetBit(id=1, frame="f", profileID=2) SetBit(id=1"#, &opts).await,
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            node.execute("d", r#"SetBit(id=1, frame="f", profileID=3) Bogus()"#, &opts).await,
            Err(Error::Query(_))
        ));

        assert_eq!(
            query(&node, r#"Bitmap(id=1, frame="f")"#).await,
            r#"{"results":[{"attrs":{},"bits":[]}]}"#
        );
    }

    #[tokio::test]
    async fn test_multiple_calls_and_set_operations() {
        let dir = TempDir::new().unwrap();
        let node = single(dir.path());
        setup(&node, None, &["a", "b"]);

        let w = SLICE_WIDTH;
        let resp = query(
            &node,
            &format!(
                r#"
                SetBit(id=1, frame="a", profileID=1)
                SetBit(id=1, frame="a", profileID=2)
                SetBit(id=1, frame="a", profileID={})
                SetBit(id=2, frame="b", profileID=2)
                SetBit(id=2, frame="b", profileID={})
                SetBit(id=2, frame="b", profileID=9)
                ClearBit(id=2, frame="b", profileID=9)
                ClearBit(id=2, frame="b", profileID=9)
                "#,
                w + 3,
                2 * w
            ),
        )
        .await;
        assert_eq!(resp, r#"{"results":[true,true,true,true,true,true,true,false]}"#);

        let a = r#"Bitmap(id=1, frame="a")"#;
        let b = r#"Bitmap(id=2, frame="b")"#;
        assert_eq!(
            query(&node, &format!("Union({}, {})", a, b)).await,
            format!(r#"{{"results":[{{"attrs":{{}},"bits":[1,2,{},{}]}}]}}"#, w + 3, 2 * w)
        );
        assert_eq!(
            query(&node, &format!("Intersect({}, {})", a, b)).await,
            r#"{"results":[{"attrs":{},"bits":[2]}]}"#
        );
        assert_eq!(
            query(&node, &format!("Difference({}, {})", a, b)).await,
            format!(r#"{{"results":[{{"attrs":{{}},"bits":[1,{}]}}]}}"#, w + 3)
        );
        assert_eq!(
            query(&node, &format!("Count({}) Count(Union({}, {}))", a, a, b)).await,
            r#"{"results":[3,4]}"#
        );
        assert_eq!(query(&node, "Union()").await, r#"{"results":[{"attrs":{},"bits":[]}]}"#);
    }

    #[tokio::test]
    async fn test_random_set_bits_match_model() {
        let dir = TempDir::new().unwrap();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut model: BTreeMap<(String, u64), BTreeSet<u64>> = BTreeMap::new();
        let frames = ["f0", "f1", "x.n"];

        {
            let node = single(dir.path());
            setup(&node, None, &frames);

            for _ in 0..40 {
                let mut q = String::new();
                for _ in 0..rng.gen_range(1..20) {
                    let frame = frames[rng.gen_range(0..frames.len())];
                    let row = rng.gen_range(0..5u64);
                    let column = rng.gen_range(0..4 * SLICE_WIDTH);
                    q.push_str(&format!(
                        "SetBit(id={}, frame=\"{}\", profileID={})\n",
                        row, frame, column
                    ));
                    // Duplicates must not matter
                    if rng.gen_bool(0.2) {
                        q.push_str(&format!(
                            "SetBit(id={}, frame=\"{}\", profileID={})\n",
                            row, frame, column
                        ));
                    }
                    model.entry((frame.to_string(), row)).or_default().insert(column);
                }
                query(&node, &q).await;
            }

            check_model(&node, &model).await;
        }

        let node = single(dir.path());
        check_model(&node, &model).await;
    }

    async fn check_model(node: &TestNode, model: &BTreeMap<(String, u64), BTreeSet<u64>>) {
        for ((frame, row), columns) in model {
            let resp = node
                .execute("d", &format!(r#"Bitmap(id={}, frame="{}")"#, row, frame), &ExecOptions::default())
                .await
                .unwrap();
            match &resp.results[0] {
                CallResult::Bitmap(result) => {
                    assert_eq!(result.bits, columns.iter().copied().collect::<Vec<_>>());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_two_node_cluster_routes_by_slice() {
        let dir = TempDir::new().unwrap();
        let client = InProcessClient::new();
        let hosts = ["a:10101", "b:10101"];
        let a = start_node(dir.path(), hosts[0], &hosts, 1, &client);
        let b = start_node(dir.path(), hosts[1], &hosts, 1, &client);
        setup(&a, None, &["f"]);
        setup(&b, None, &["f"]);

        let columns: Vec<u64> = (0..32).map(|s| s * SLICE_WIDTH + s).collect();
        let q: String = columns
            .iter()
            .map(|c| format!("SetBit(id=1, frame=\"f\", profileID={})\n", c))
            .collect();
        let resp = a.execute("d", &q, &ExecOptions::default()).await.unwrap();
        assert!(resp.results.iter().all(|r| *r == CallResult::Bool(true)));

        // Each node stores only the slices it owns
        for node in [&a, &b] {
            let frame = node.engine().require_database("d").unwrap().require_frame("f").unwrap();
            for slice in frame.slices() {
                assert!(node.cluster().owns("d", slice), "slice {}", slice);
            }
        }

        // Either node answers with every bit
        let expected = format!(
            r#"{{"results":[{{"attrs":{{}},"bits":{}}}]}}"#,
            serde_json::to_string(&columns).unwrap()
        );
        assert_eq!(query(&a, r#"Bitmap(id=1, frame="f")"#).await, expected);
        assert_eq!(query(&b, r#"Bitmap(id=1, frame="f")"#).await, expected);
        assert_eq!(query(&b, r#"Count(Bitmap(id=1, frame="f"))"#).await, r#"{"results":[32]}"#);

        // Attribute writes reach every node
        query(&a, r#"SetProfileAttrs(profileID=1, k="v")"#).await;
        query(&a, r#"SetBitmapAttrs(id=1, frame="f", n=5)"#).await;
        for node in [&a, &b] {
            let db = node.engine().require_database("d").unwrap();
            assert_eq!(db.column_attrs().attrs(1).get("k"), Some(&"v".into()));
            assert_eq!(
                db.require_frame("f").unwrap().row_attrs().attrs(1).get("n"),
                Some(&crate::AttrValue::Integer(5))
            );
        }
    }

    #[tokio::test]
    async fn test_remote_write_creates_missing_frame() {
        let dir = TempDir::new().unwrap();
        let node = single(dir.path());

        let resp = node
            .execute(
                "d",
                r#"SetBit(id=1, frame="f", profileID=3) Bitmap(id=1, frame="f")"#,
                &ExecOptions::remote(None),
            )
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"results":[true,{"attrs":{},"bits":[3]}]}"#
        );

        let resp = node
            .execute_local("other", r#"Bitmap(id=1, frame="f")"#, &ExecOptions::remote(None))
            .unwrap();
        assert_eq!(resp.results, vec![CallResult::Bitmap(BitmapResult::default())]);
        assert!(node.engine().database("other").is_none());
    }
}
