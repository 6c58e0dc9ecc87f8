//! Frame restore - copies a frame's fragments from another cluster
//!
//! Runs on the destination node. Slices are transferred one at a time and
//! overwrite whatever the destination held, so retrying a failed restore is
//! safe.

use super::NodeClient;
use crate::query::Executor;
use crate::{Error, Result};
use futures_util::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info};

/// Outcome of a restore
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreStats {
    /// Slices copied
    pub slices: u64,
    /// Slices the source holds no data for
    pub skipped: u64,
    /// Backup bytes received
    pub bytes: u64,
}

/// Copy every slice of `db/frame` from the cluster `source` belongs to
pub async fn restore_frame<C: NodeClient>(
    executor: &Executor<C>,
    source: &str,
    db: &str,
    frame: &str,
) -> Result<RestoreStats> {
    // Both must exist here before anything is transferred
    let database = executor.engine().require_database(db)?;
    database.require_frame(frame)?;

    let client = executor.client();
    let cluster = executor.cluster();

    let status = client.status(source).await?;
    let reports = try_join_all(status.nodes.iter().map(|n| client.max_slices(&n.host))).await?;
    let max_slice = reports
        .iter()
        .filter_map(|slices| slices.get(db).copied())
        .max()
        .ok_or_else(|| Error::Restore(format!("{} has no database {:?}", source, db)))?;

    info!(
        "Restoring {}/{} from {} (slices 0..={})",
        db, frame, source, max_slice
    );

    let mut stats = RestoreStats::default();
    for slice in 0..=max_slice {
        let owners = client.fragment_nodes(source, db, slice).await?;

        let mut backup = None;
        for owner in &owners {
            if let Some(data) = client.backup_fragment(&owner.host, db, frame, slice).await? {
                backup = Some(data);
                break;
            }
        }
        let Some(data) = backup else {
            stats.skipped += 1;
            continue;
        };

        for node in cluster.fragment_nodes(db, slice) {
            if cluster.is_local(&node) {
                executor.restore_fragment(db, frame, slice, &data)?;
            } else {
                client
                    .restore_fragment(&node.host, db, frame, slice, data.clone())
                    .await?;
            }
        }

        debug!("Restored slice {} of {}/{} ({} bytes)", slice, db, frame, data.len());
        stats.slices += 1;
        stats.bytes += data.len() as u64;
    }

    info!(
        "Restored {}/{} from {}: {} slices, {} empty",
        db, frame, source, stats.slices, stats.skipped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::client::testing::start_node;
    use crate::cluster::InProcessClient;
    use crate::config::SLICE_WIDTH;
    use crate::query::ExecOptions;
    use crate::storage::{DatabaseOptions, FrameOptions};
    use tempfile::TempDir;

    const COLUMNS: [u64; 7] = [100, 1000, 100000, 200000, 400000, 600000, 800000];

    async fn query(node: &Executor<InProcessClient>, q: &str) -> String {
        let resp = node.execute("d", q, &ExecOptions::default()).await.unwrap();
        serde_json::to_string(&resp).unwrap()
    }

    fn create_frame(node: &Executor<InProcessClient>) {
        let db = node
            .engine()
            .create_database("d", DatabaseOptions::default())
            .unwrap();
        db.create_frame("f", FrameOptions::default()).unwrap();
    }

    async fn write_columns(node: &Executor<InProcessClient>, columns: &[u64]) {
        let q: String = columns
            .iter()
            .map(|c| format!("SetBit(id=1, frame=\"f\", profileID={})\n", c))
            .collect();
        node.execute("d", &q, &ExecOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_from_two_node_cluster() {
        let dir = TempDir::new().unwrap();
        let client = InProcessClient::new();
        let hosts = ["m0:10101", "m1:10101"];
        let m0 = start_node(dir.path(), hosts[0], &hosts, 1, &client);
        let _m1 = start_node(dir.path(), hosts[1], &hosts, 1, &client);
        create_frame(&m0);

        let mut columns = COLUMNS.to_vec();
        columns.extend([3 * SLICE_WIDTH + 1, 5 * SLICE_WIDTH + 2]);
        write_columns(&m0, &columns).await;

        let expected = format!(
            r#"{{"results":[{{"attrs":{{}},"bits":{}}}]}}"#,
            serde_json::to_string(&columns).unwrap()
        );
        assert_eq!(query(&m0, r#"Bitmap(id=1, frame="f")"#).await, expected);

        // Separate single-node cluster
        let m2 = start_node(dir.path(), "m2:10101", &[], 1, &client);
        create_frame(&m2);

        let stats = m2.restore_frame("m0:10101", "d", "f").await.unwrap();
        assert_eq!(stats.slices, 3);
        assert_eq!(stats.skipped, 3);
        assert_eq!(query(&m2, r#"Bitmap(id=1, frame="f")"#).await, expected);

        // Retrying is harmless
        m2.restore_frame("m0:10101", "d", "f").await.unwrap();
        assert_eq!(query(&m2, r#"Bitmap(id=1, frame="f")"#).await, expected);
    }

    #[tokio::test]
    async fn test_restore_overwrites_destination() {
        let dir = TempDir::new().unwrap();
        let client = InProcessClient::new();
        let src = start_node(dir.path(), "src:1", &[], 1, &client);
        let dst = start_node(dir.path(), "dst:1", &[], 1, &client);
        create_frame(&src);
        create_frame(&dst);

        write_columns(&src, &COLUMNS).await;
        write_columns(&dst, &[5, 7]).await;
        query(&dst, r#"SetBit(id=9, frame="f", profileID=1)"#).await;

        dst.restore_frame("src:1", "d", "f").await.unwrap();
        assert_eq!(
            query(&dst, r#"Bitmap(id=1, frame="f") Bitmap(id=9, frame="f")"#).await,
            r#"{"results":[{"attrs":{},"bits":[100,1000,100000,200000,400000,600000,800000]},{"attrs":{},"bits":[]}]}"#
        );
    }

    #[tokio::test]
    async fn test_restore_into_cluster_with_replicas() {
        let dir = TempDir::new().unwrap();
        let client = InProcessClient::new();
        let src = start_node(dir.path(), "src:1", &[], 1, &client);
        create_frame(&src);
        let columns: Vec<u64> = (0..6).map(|s| s * SLICE_WIDTH + s).collect();
        write_columns(&src, &columns).await;

        let hosts = ["a:1", "b:1"];
        let a = start_node(dir.path(), hosts[0], &hosts, 2, &client);
        let b = start_node(dir.path(), hosts[1], &hosts, 2, &client);
        create_frame(&a);

        a.restore_frame("src:1", "d", "f").await.unwrap();

        // Both replicas hold every slice
        for node in [&a, &b] {
            let frame = node.engine().require_database("d").unwrap().require_frame("f").unwrap();
            assert_eq!(frame.slices(), vec![0, 1, 2, 3, 4, 5]);
        }
        let expected = format!(
            r#"{{"results":[{{"attrs":{{}},"bits":{}}}]}}"#,
            serde_json::to_string(&columns).unwrap()
        );
        assert_eq!(query(&b, r#"Bitmap(id=1, frame="f")"#).await, expected);
    }

    #[tokio::test]
    async fn test_restore_preconditions() {
        let dir = TempDir::new().unwrap();
        let client = InProcessClient::new();
        let src = start_node(dir.path(), "src:1", &[], 1, &client);
        let dst = start_node(dir.path(), "dst:1", &[], 1, &client);
        create_frame(&src);
        write_columns(&src, &COLUMNS).await;

        assert!(matches!(
            dst.restore_frame("src:1", "d", "f").await,
            Err(Error::DatabaseNotFound(_))
        ));

        dst.engine().create_database("d", DatabaseOptions::default()).unwrap();
        assert!(matches!(
            dst.restore_frame("src:1", "d", "f").await,
            Err(Error::FrameNotFound(_))
        ));

        dst.engine()
            .require_database("d")
            .unwrap()
            .create_frame("f", FrameOptions::default())
            .unwrap();
        assert!(matches!(
            dst.restore_frame("gone:1", "d", "f").await,
            Err(Error::Remote { .. })
        ));

        let _other = start_node(dir.path(), "other:1", &[], 1, &client);
        assert!(matches!(
            dst.restore_frame("other:1", "d", "f").await,
            Err(Error::Restore(_))
        ));
    }
}
