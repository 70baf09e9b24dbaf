// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Columnar edge records shared by the full data and every split.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::negative::QueryKey;

/// Node identifier (raw before reindexing, dense after).
pub type NodeId = u64;
/// Event time.
pub type Timestamp = i64;
/// Relation (edge type) identifier.
pub type RelationId = u32;

/// One event. Immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Event time.
    pub ts: Timestamp,
    /// Relation type, for multi-relational graphs.
    pub rel: Option<RelationId>,
    /// Weight or label (edge regression target).
    pub weight: Option<f64>,
    /// Row of this edge in the raw file.
    pub original_index: u64,
}

/// Column-oriented edge table.
///
/// `full_data`, `train_data`, `val_data` and `test_data` all use this type, so
/// optional columns are present or absent uniformly across splits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeColumns {
    /// Source node per edge.
    pub sources: Vec<NodeId>,
    /// Destination node per edge.
    pub destinations: Vec<NodeId>,
    /// Timestamp per edge.
    pub timestamps: Vec<Timestamp>,
    /// Raw-file row per edge.
    pub edge_idxs: Vec<u64>,
    /// Relation per edge, when the input has a relation column.
    pub relations: Option<Vec<RelationId>>,
    /// Weight or label per edge, when the input has one.
    pub y: Option<Vec<f64>>,
}

impl EdgeColumns {
    /// Number of edges.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if there are no edges.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Append one edge. Optional columns must match the table's shape.
    pub fn push(&mut self, edge: Edge) -> Result<()> {
        let shape_differs = edge.rel.is_some() != self.relations.is_some()
            || edge.weight.is_some() != self.y.is_some();
        if shape_differs {
            if !self.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "edge {} does not match the table's optional columns",
                    edge.original_index
                )));
            }
            self.relations = edge.rel.map(|_| Vec::new());
            self.y = edge.weight.map(|_| Vec::new());
        }
        self.sources.push(edge.src);
        self.destinations.push(edge.dst);
        self.timestamps.push(edge.ts);
        self.edge_idxs.push(edge.original_index);
        if let (Some(rels), Some(rel)) = (self.relations.as_mut(), edge.rel) {
            rels.push(rel);
        }
        if let (Some(y), Some(w)) = (self.y.as_mut(), edge.weight) {
            y.push(w);
        }
        Ok(())
    }

    /// Check that every present column has the same length.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        let lens = [
            ("destinations", self.destinations.len()),
            ("timestamps", self.timestamps.len()),
            ("edge_idxs", self.edge_idxs.len()),
            ("relations", self.relations.as_ref().map_or(n, Vec::len)),
            ("y", self.y.as_ref().map_or(n, Vec::len)),
        ];
        match lens.iter().find(|(_, len)| *len != n) {
            Some((name, len)) => Err(Error::InvalidInput(format!(
                "column {name} has {len} rows, sources has {n}"
            ))),
            None => Ok(()),
        }
    }

    /// Edge at `row`.
    pub fn edge(&self, row: usize) -> Option<Edge> {
        Some(Edge {
            src: *self.sources.get(row)?,
            dst: *self.destinations.get(row)?,
            ts: *self.timestamps.get(row)?,
            rel: self.relations.as_ref().and_then(|r| r.get(row).copied()),
            weight: self.y.as_ref().and_then(|y| y.get(row).copied()),
            original_index: *self.edge_idxs.get(row)?,
        })
    }

    /// Iterate edges in table order.
    pub fn iter(&self) -> impl Iterator<Item = Edge> + '_ {
        (0..self.len()).filter_map(|row| self.edge(row))
    }

    /// Negative-sampling key of the edge at `row`.
    pub fn query_key(&self, row: usize) -> Option<QueryKey> {
        self.edge(row).map(|e| QueryKey::new(e.src, e.dst, e.ts, e.rel))
    }

    /// Rows where `mask` is true, preserving order.
    pub fn select(&self, mask: &[bool]) -> Self {
        fn pick<T: Copy>(col: &[T], mask: &[bool]) -> Vec<T> {
            col.iter()
                .zip(mask)
                .filter(|(_, on)| **on)
                .map(|(v, _)| *v)
                .collect()
        }
        Self {
            sources: pick(&self.sources, mask),
            destinations: pick(&self.destinations, mask),
            timestamps: pick(&self.timestamps, mask),
            edge_idxs: pick(&self.edge_idxs, mask),
            relations: self.relations.as_deref().map(|r| pick(r, mask)),
            y: self.y.as_deref().map(|y| pick(y, mask)),
        }
    }

    /// Largest node id referenced, if any.
    pub fn max_node_id(&self) -> Option<NodeId> {
        self.sources.iter().chain(&self.destinations).copied().max()
    }

    /// Number of distinct relations (0 when the relation column is absent).
    pub fn num_relations(&self) -> usize {
        self.relations.as_ref().map_or(0, |rels| {
            let mut seen: Vec<RelationId> = rels.clone();
            seen.sort_unstable();
            seen.dedup();
            seen.len()
        })
    }

    /// Chronological batches of at most `size` edges (the last may be shorter).
    pub fn batches(&self, size: usize) -> Batches<'_> {
        Batches {
            edges: self,
            size: size.max(1),
            next: 0,
        }
    }

    /// BLAKE3 digest of all columns; identifies the data a cache was built on.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"tgb.edges.v1");
        hasher.update(&(self.len() as u64).to_le_bytes());
        for col in [&self.sources, &self.destinations, &self.edge_idxs] {
            for v in col {
                hasher.update(&v.to_le_bytes());
            }
        }
        for ts in &self.timestamps {
            hasher.update(&ts.to_le_bytes());
        }
        match &self.relations {
            Some(rels) => {
                hasher.update(&[1]);
                for r in rels {
                    hasher.update(&r.to_le_bytes());
                }
            }
            None => {
                hasher.update(&[0]);
            }
        }
        match &self.y {
            Some(y) => {
                hasher.update(&[1]);
                for w in y {
                    hasher.update(&w.to_bits().to_le_bytes());
                }
            }
            None => {
                hasher.update(&[0]);
            }
        }
        *hasher.finalize().as_bytes()
    }
}

/// Borrowed window over consecutive edges.
#[derive(Debug, Clone, Copy)]
pub struct EdgeBatch<'a> {
    /// Source node per edge.
    pub sources: &'a [NodeId],
    /// Destination node per edge.
    pub destinations: &'a [NodeId],
    /// Timestamp per edge.
    pub timestamps: &'a [Timestamp],
    /// Raw-file row per edge.
    pub edge_idxs: &'a [u64],
    /// Relation per edge.
    pub relations: Option<&'a [RelationId]>,
    /// Weight or label per edge.
    pub y: Option<&'a [f64]>,
}

impl EdgeBatch<'_> {
    /// Number of edges in the batch.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Iterator returned by [`EdgeColumns::batches`].
pub struct Batches<'a> {
    edges: &'a EdgeColumns,
    size: usize,
    next: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = EdgeBatch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next;
        if start >= self.edges.len() {
            return None;
        }
        let end = (start + self.size).min(self.edges.len());
        self.next = end;
        let e = self.edges;
        Some(EdgeBatch {
            sources: &e.sources[start..end],
            destinations: &e.destinations[start..end],
            timestamps: &e.timestamps[start..end],
            edge_idxs: &e.edge_idxs[start..end],
            relations: e.relations.as_deref().map(|r| &r[start..end]),
            y: e.y.as_deref().map(|y| &y[start..end]),
        })
    }
}
