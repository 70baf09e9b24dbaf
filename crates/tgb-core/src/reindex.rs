// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Raw node ids to a dense contiguous id space.
//!
//! Ids are handed out in first-seen order (source before destination within
//! an edge). When the raw ids of a class already form the contiguous range the
//! class would be assigned, the identity map is used instead, so reindexing a
//! dense table is a no-op.
//!
//! In [`ReindexMode::Bipartite`] sources and destinations get independent
//! counters: sources occupy `[origin, origin + S)` and destinations
//! `[origin + S, origin + S + D)`. A raw id seen in both roles gets two dense
//! ids, one per class. Nodes registered later without any incident edge are
//! placed after the destination range, so both class ranges stay disjoint
//! and unchanged.

use std::ops::Range;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::edges::{EdgeColumns, NodeId};
use crate::error::{Error, Result};

/// How node classes share the dense id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexMode {
    /// One id space for every node.
    #[default]
    Shared,
    /// Sources and destinations occupy disjoint ranges.
    Bipartite,
}

/// Role of a node in an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    /// Edge source.
    Source,
    /// Edge destination.
    Destination,
}

#[derive(Debug, Clone)]
struct ClassIndex {
    start: NodeId,
    raw_to_dense: FxHashMap<NodeId, NodeId>,
    dense_to_raw: Vec<NodeId>,
}

impl ClassIndex {
    fn new(start: NodeId) -> Self {
        Self {
            start,
            raw_to_dense: FxHashMap::default(),
            dense_to_raw: Vec::new(),
        }
    }

    /// Interns raws in the given order, or in ascending order when they
    /// already are exactly `[start, start + n)`.
    fn build(start: NodeId, first_seen: Vec<NodeId>) -> Self {
        let mut index = Self::new(start);
        let n = first_seen.len() as u64;
        // first_seen is distinct, so n in-range ids cover the range exactly
        let is_dense = first_seen.iter().all(|raw| (start..start + n).contains(raw));
        if is_dense {
            let mut sorted = first_seen;
            sorted.sort_unstable();
            for raw in sorted {
                index.intern(raw);
            }
        } else {
            for raw in first_seen {
                index.intern(raw);
            }
        }
        index
    }

    fn intern(&mut self, raw: NodeId) -> NodeId {
        let next = self.start + self.dense_to_raw.len() as u64;
        let dense_to_raw = &mut self.dense_to_raw;
        *self.raw_to_dense.entry(raw).or_insert_with(|| {
            dense_to_raw.push(raw);
            next
        })
    }

    fn dense(&self, raw: NodeId) -> Option<NodeId> {
        self.raw_to_dense.get(&raw).copied()
    }

    fn raw(&self, dense: NodeId) -> Option<NodeId> {
        let offset = dense.checked_sub(self.start)?;
        self.dense_to_raw.get(usize::try_from(offset).ok()?).copied()
    }

    fn range(&self) -> Range<NodeId> {
        self.start..self.start + self.dense_to_raw.len() as u64
    }
}

/// Bidirectional raw ↔ dense node id map.
#[derive(Debug, Clone)]
pub struct NodeIndexMap {
    mode: ReindexMode,
    origin: NodeId,
    sources: ClassIndex,
    /// Present in bipartite mode only.
    destinations: Option<ClassIndex>,
    /// Edge-less nodes placed after the destination range (bipartite only).
    isolated: Option<ClassIndex>,
}

impl NodeIndexMap {
    /// Mapping mode.
    pub fn mode(&self) -> ReindexMode {
        self.mode
    }

    /// First dense id.
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// Number of dense ids handed out.
    pub fn len(&self) -> usize {
        [Some(&self.sources), self.destinations.as_ref(), self.isolated.as_ref()]
            .into_iter()
            .flatten()
            .map(|class| class.dense_to_raw.len())
            .sum()
    }

    /// Returns `true` if no node is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dense id of `raw` in `class`.
    pub fn dense(&self, class: NodeClass, raw: NodeId) -> Option<NodeId> {
        match (class, &self.destinations) {
            (NodeClass::Destination, Some(dst)) => dst.dense(raw),
            _ => self.sources.dense(raw),
        }
    }

    /// Raw id behind a dense id.
    pub fn raw(&self, dense: NodeId) -> Option<NodeId> {
        self.sources
            .raw(dense)
            .or_else(|| self.destinations.as_ref().and_then(|d| d.raw(dense)))
            .or_else(|| self.isolated.as_ref().and_then(|i| i.raw(dense)))
    }

    /// Dense range of a class. In shared mode both classes span every node.
    pub fn class_range(&self, class: NodeClass) -> Range<NodeId> {
        match (class, &self.destinations) {
            (NodeClass::Destination, Some(dst)) => dst.range(),
            _ => self.sources.range(),
        }
    }

    /// Dense range of bipartite nodes without incident edges. Empty in shared
    /// mode, where such nodes extend the single range.
    pub fn isolated_range(&self) -> Range<NodeId> {
        match (&self.isolated, &self.destinations) {
            (Some(isolated), _) => isolated.range(),
            (None, Some(dst)) => dst.range().end..dst.range().end,
            (None, None) => self.sources.range().end..self.sources.range().end,
        }
    }

    /// Dense range covering every registered node.
    pub fn full_range(&self) -> Range<NodeId> {
        self.origin..self.origin + self.len() as u64
    }

    /// Register a node that has no incident edge (e.g. referenced only by
    /// node-type metadata) and return its dense id.
    ///
    /// Ids already present are returned unchanged. In bipartite mode new ids
    /// go to [`NodeIndexMap::isolated_range`], after the destination range.
    pub fn reserve_isolated(&mut self, raw: NodeId) -> NodeId {
        let Some(dst) = &self.destinations else {
            return self.sources.intern(raw);
        };
        if let Some(dense) = self.sources.dense(raw).or_else(|| dst.dense(raw)) {
            return dense;
        }
        let start = dst.range().end;
        self.isolated
            .get_or_insert_with(|| ClassIndex::new(start))
            .intern(raw)
    }
}

fn first_seen(ids: impl Iterator<Item = NodeId>) -> Vec<NodeId> {
    let mut seen = FxHashSet::default();
    ids.filter(|id| seen.insert(*id)).collect()
}

/// Remap `edges` to dense ids starting at `origin`.
pub fn reindex(
    edges: &EdgeColumns,
    mode: ReindexMode,
    origin: NodeId,
) -> Result<(EdgeColumns, NodeIndexMap)> {
    edges.validate()?;
    let map = match mode {
        ReindexMode::Shared => {
            let interleaved = edges
                .sources
                .iter()
                .zip(&edges.destinations)
                .flat_map(|(s, d)| [*s, *d]);
            NodeIndexMap {
                mode,
                origin,
                sources: ClassIndex::build(origin, first_seen(interleaved)),
                destinations: None,
                isolated: None,
            }
        }
        ReindexMode::Bipartite => {
            let sources = ClassIndex::build(origin, first_seen(edges.sources.iter().copied()));
            let dst_start = sources.range().end;
            let destinations =
                ClassIndex::build(dst_start, first_seen(edges.destinations.iter().copied()));
            NodeIndexMap {
                mode,
                origin,
                sources,
                destinations: Some(destinations),
                isolated: None,
            }
        }
    };

    let remap = |class: NodeClass, col: &[NodeId]| -> Result<Vec<NodeId>> {
        col.iter()
            .map(|raw| map.dense(class, *raw).ok_or(Error::Internal("node missing from index map")))
            .collect()
    };
    let out = EdgeColumns {
        sources: remap(NodeClass::Source, &edges.sources)?,
        destinations: remap(NodeClass::Destination, &edges.destinations)?,
        timestamps: edges.timestamps.clone(),
        edge_idxs: edges.edge_idxs.clone(),
        relations: edges.relations.clone(),
        y: edges.y.clone(),
    };

    let src_range = map.class_range(NodeClass::Source);
    let dst_range = map.class_range(NodeClass::Destination);
    info!(
        ?mode,
        origin,
        nodes = map.len(),
        sources = ?src_range,
        destinations = ?dst_range,
        "edges reindexed"
    );
    Ok((out, map))
}
