// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Learning-ready copies of a preprocessed dataset.
//!
//! Three files are written into the dataset directory:
//!
//! | file                   | contents                                          |
//! |------------------------|---------------------------------------------------|
//! | `ml_<name>.csv`        | `u,i,ts,label,idx[,rel]`, reindexed, in time order |
//! | `ml_<name>_edge.cbor`  | edge feature matrix, one row per edge              |
//! | `ml_<name>_node.cbor`  | node feature matrix, row = dense node id           |
//!
//! Each file is replaced atomically. Generation is skipped when all three
//! already exist.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::edges::{Edge, EdgeColumns, NodeId, RelationId, Timestamp};
use crate::error::{Error, Result};
use crate::features::FeatureMatrix;

/// Paths of the three learning-ready files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlFiles {
    /// Reindexed edge table.
    pub edges_csv: PathBuf,
    /// Edge feature matrix.
    pub edge_feat: PathBuf,
    /// Node feature matrix.
    pub node_feat: PathBuf,
}

impl MlFiles {
    /// File set for dataset `name` inside `dir`.
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self {
            edges_csv: dir.join(format!("ml_{name}.csv")),
            edge_feat: dir.join(format!("ml_{name}_edge.cbor")),
            node_feat: dir.join(format!("ml_{name}_node.cbor")),
        }
    }

    /// Returns `true` when every file is present.
    pub fn exist(&self) -> bool {
        [&self.edges_csv, &self.edge_feat, &self.node_feat]
            .iter()
            .all(|p| p.is_file())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MlRow {
    u: NodeId,
    i: NodeId,
    ts: Timestamp,
    label: f64,
    idx: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rel: Option<RelationId>,
}

/// Write the learning-ready files unless all of them already exist.
///
/// Returns `false` when generation was skipped.
pub fn write_ml_files(
    files: &MlFiles,
    edges: &EdgeColumns,
    edge_feat: &FeatureMatrix,
    node_feat: &FeatureMatrix,
) -> Result<bool> {
    if files.exist() {
        info!(path = %files.edges_csv.display(), "learning-ready files found, skipping generation");
        return Ok(false);
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    for e in edges.iter() {
        writer.serialize(MlRow {
            u: e.src,
            i: e.dst,
            ts: e.ts,
            label: e.weight.unwrap_or(0.0),
            idx: e.original_index,
            rel: e.rel,
        })?;
    }
    let table = writer
        .into_inner()
        .map_err(|e| Error::io(&files.edges_csv)(e.into_error()))?;

    tgb_store::write_atomic(&files.edges_csv, &table)?;
    tgb_store::write_atomic(&files.edge_feat, &edge_feat.to_cbor()?)?;
    tgb_store::write_atomic(&files.node_feat, &node_feat.to_cbor()?)?;
    info!(
        path = %files.edges_csv.display(),
        edges = edges.len(),
        edge_feat = ?edge_feat.shape(),
        node_feat = ?node_feat.shape(),
        "learning-ready files written"
    );
    Ok(true)
}

/// Read back the edge table written by [`write_ml_files`].
pub fn read_ml_edges(path: &Path) -> Result<EdgeColumns> {
    if !path.exists() {
        return Err(Error::MissingSource {
            path: path.to_path_buf(),
        });
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut edges = EdgeColumns::default();
    for row in reader.deserialize() {
        let row: MlRow = row?;
        edges.push(Edge {
            src: row.u,
            dst: row.i,
            ts: row.ts,
            rel: row.rel,
            weight: Some(row.label),
            original_index: row.idx,
        })?;
    }
    Ok(edges)
}

/// Read a feature matrix written by [`write_ml_files`].
pub fn read_feature_matrix(path: &Path) -> Result<FeatureMatrix> {
    if !path.exists() {
        return Err(Error::MissingSource {
            path: path.to_path_buf(),
        });
    }
    FeatureMatrix::from_cbor(&fs::read(path).map_err(Error::io(path))?)
}
