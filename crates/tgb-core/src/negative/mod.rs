// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reproducible negative sampling with a durable per-split cache.
//!
//! Protocol: a split's negatives must be built ([`NegativeSampler::build`])
//! or loaded ([`NegativeSampler::load`], [`NegativeSampler::ensure`]) before
//! [`NegativeSampler::query_batch`] may read them. Building materializes a
//! [`NegativeSampleSet`] for every positive query of the split, publishes it to
//! the artifact store under `<dataset>_<split>_ns`, and keeps it in memory for
//! the lifetime of the sampler.

mod exec;
mod policy;
mod set;

pub use set::{NegativeSampleSet, NsHeader, NS_FORMAT_VERSION};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tgb_store::ArtifactStore;
use tracing::{debug, info, warn};

use crate::config::NegativeConfig;
use crate::edges::{EdgeColumns, NodeId, RelationId, Timestamp};
use crate::error::{Error, Result};
use crate::features::DEFAULT_FEAT_DIM;
use crate::split::{SplitKind, SplitMask};

use policy::SamplingContext;

/// Identity of one positive query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    /// Source node.
    pub src: NodeId,
    /// Positive destination.
    pub dst: NodeId,
    /// Event time.
    pub ts: Timestamp,
    /// Relation, for multi-relational graphs.
    pub rel: Option<RelationId>,
}

impl QueryKey {
    /// Length of [`QueryKey::to_bytes`].
    pub const ENCODED_LEN: usize = 8 + 8 + 8 + 1 + 4;

    /// Construct a key.
    pub const fn new(src: NodeId, dst: NodeId, ts: Timestamp, rel: Option<RelationId>) -> Self {
        Self { src, dst, ts, rel }
    }

    /// Fixed little-endian encoding: `src ‖ dst ‖ ts ‖ has_rel ‖ rel`.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..8].copy_from_slice(&self.src.to_le_bytes());
        out[8..16].copy_from_slice(&self.dst.to_le_bytes());
        out[16..24].copy_from_slice(&self.ts.to_le_bytes());
        if let Some(rel) = self.rel {
            out[24] = 1;
            out[25..29].copy_from_slice(&rel.to_le_bytes());
        }
        out
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}", self.src, self.dst, self.ts)?;
        match self.rel {
            Some(rel) => write!(f, ", rel {rel})"),
            None => f.write_str(")"),
        }
    }
}

/// How negatives are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingPolicy {
    /// Uniform over the destination class.
    #[default]
    RandomUniform,
    /// Destinations the source reached earlier, padded uniformly.
    Historical,
    /// Destinations unseen before the split starts, padded uniformly.
    Inductive,
}

impl SamplingPolicy {
    /// Stable name used in headers and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RandomUniform => "random-uniform",
            Self::Historical => "historical",
            Self::Inductive => "inductive",
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::RandomUniform => 0,
            Self::Historical => 1,
            Self::Inductive => 2,
        }
    }
}

impl fmt::Display for SamplingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "random-uniform" | "random" | "rnd" | "uniform" => Ok(Self::RandomUniform),
            "historical" | "hist" => Ok(Self::Historical),
            "inductive" | "unseen" => Ok(Self::Inductive),
            other => Err(Error::InvalidInput(format!("unknown sampling policy {other:?}"))),
        }
    }
}

/// Everything that determines a split's negatives besides the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingParams {
    /// Sampling policy.
    pub policy: SamplingPolicy,
    /// Negatives per query.
    pub num_negatives: usize,
    /// Base seed.
    pub seed: u64,
    /// Exclude destinations the source reaches at the same timestamp.
    pub exclude_concurrent_positives: bool,
}

impl SamplingParams {
    /// Params with concurrent-positive exclusion on.
    pub const fn new(policy: SamplingPolicy, num_negatives: usize, seed: u64) -> Self {
        Self {
            policy,
            num_negatives,
            seed,
            exclude_concurrent_positives: true,
        }
    }
}

impl From<&NegativeConfig> for SamplingParams {
    fn from(cfg: &NegativeConfig) -> Self {
        Self {
            policy: cfg.policy,
            num_negatives: cfg.num_negatives,
            seed: cfg.seed,
            exclude_concurrent_positives: cfg.exclude_concurrent_positives,
        }
    }
}

/// Builds, persists, loads and serves negative samples for one dataset.
///
/// `query_batch` only reads immutable, already-materialized sets and is safe
/// to call from many threads at once.
pub struct NegativeSampler {
    dataset: String,
    store: Arc<dyn ArtifactStore>,
    edges: Arc<EdgeColumns>,
    mask: Arc<SplitMask>,
    universe: Range<NodeId>,
    feat_dim: usize,
    fingerprint: [u8; 32],
    split_fingerprint: [u8; 32],
    workers: usize,
    loaded: RwLock<BTreeMap<SplitKind, Arc<NegativeSampleSet>>>,
}

impl fmt::Debug for NegativeSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegativeSampler")
            .field("dataset", &self.dataset)
            .field("edges", &self.edges.len())
            .field("universe", &self.universe)
            .field("feat_dim", &self.feat_dim)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl NegativeSampler {
    /// Sampler over reindexed `edges` split by `mask`; negatives are drawn
    /// from `universe` (the destination class).
    pub fn new(
        dataset: impl Into<String>,
        edges: Arc<EdgeColumns>,
        mask: Arc<SplitMask>,
        universe: Range<NodeId>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let fingerprint = edges.fingerprint();
        let split_fingerprint = mask.fingerprint();
        Self {
            dataset: dataset.into(),
            store,
            edges,
            mask,
            universe,
            feat_dim: DEFAULT_FEAT_DIM,
            fingerprint,
            split_fingerprint,
            workers: 0,
            loaded: RwLock::new(BTreeMap::new()),
        }
    }

    /// Feature width recorded in (and checked against) artifact headers.
    #[must_use]
    pub fn with_feat_dim(mut self, feat_dim: usize) -> Self {
        self.feat_dim = feat_dim;
        self
    }

    /// Sampling threads; 0 picks the available parallelism.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Destination ids negatives are drawn from.
    pub fn universe(&self) -> Range<NodeId> {
        self.universe.clone()
    }

    /// Store key of a split's artifact.
    pub fn artifact_key(&self, split: SplitKind) -> String {
        format!("{}_{}_ns", self.dataset, split)
    }

    /// Header a set built now with `params` would carry.
    pub fn expected_header(&self, split: SplitKind, params: &SamplingParams) -> NsHeader {
        NsHeader {
            format_version: NS_FORMAT_VERSION,
            split,
            policy: params.policy,
            num_negatives: params.num_negatives as u64,
            seed: params.seed,
            exclude_concurrent_positives: params.exclude_concurrent_positives,
            feat_dim: self.feat_dim as u64,
            universe_start: self.universe.start,
            universe_end: self.universe.end,
            split_fingerprint: self.split_fingerprint,
            dataset_fingerprint: self.fingerprint,
        }
    }

    /// Distinct positive queries of a split, in key order.
    pub fn queries(&self, split: SplitKind) -> Vec<QueryKey> {
        self.mask
            .mask(split)
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .filter_map(|(row, _)| self.edges.query_key(row))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Materialize a split's negatives in memory without publishing them.
    pub fn generate(&self, split: SplitKind, params: &SamplingParams) -> Result<NegativeSampleSet> {
        if params.num_negatives == 0 {
            return Err(Error::InvalidConfig("num_negatives must be positive".into()));
        }
        let started = Instant::now();
        let queries = self.queries(split);
        let ctx = SamplingContext::new(
            &self.edges,
            &self.mask,
            split,
            self.universe.clone(),
            *params,
        );
        let negatives = exec::execute(&queries, self.workers, |key| ctx.sample(key))?;

        let short = negatives.iter().filter(|n| n.len() < params.num_negatives).count();
        if short > 0 {
            warn!(
                %split,
                short,
                requested = params.num_negatives,
                "destination universe too small, some queries have fewer negatives"
            );
        }
        let entries: BTreeMap<QueryKey, Vec<NodeId>> = queries.into_iter().zip(negatives).collect();
        let set = NegativeSampleSet::new(self.expected_header(split, params), entries)?;
        info!(
            dataset = %self.dataset,
            %split,
            policy = %params.policy,
            queries = set.len(),
            num_negatives = params.num_negatives,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "negative samples generated"
        );
        Ok(set)
    }

    /// Generate, publish and cache a split's negatives.
    ///
    /// The artifact only becomes visible once fully written; an interrupted
    /// build leaves any previous artifact in place.
    pub fn build(
        &self,
        split: SplitKind,
        params: &SamplingParams,
    ) -> Result<Arc<NegativeSampleSet>> {
        let set = self.generate(split, params)?;
        let key = self.artifact_key(split);
        let hash = self.store.publish(&key, &set.to_canonical_bytes()?)?;
        debug!(%key, checksum = %hash, "negative samples published");
        self.install(split, set)
    }

    /// Load a previously published split and check it matches `params`.
    pub fn load(
        &self,
        split: SplitKind,
        params: &SamplingParams,
    ) -> Result<Arc<NegativeSampleSet>> {
        let key = self.artifact_key(split);
        let payload = self
            .store
            .load(&key)?
            .ok_or_else(|| Error::MissingArtifact { key: key.clone() })?;
        let set = NegativeSampleSet::from_canonical_bytes(&payload)?;
        if let Err(err) = set.check_compatible(&key, &self.expected_header(split, params)) {
            warn!(%key, error = %err, "rejecting stale negative samples");
            return Err(err);
        }
        info!(%key, queries = set.len(), "negative samples loaded");
        self.install(split, set)
    }

    /// Return the in-memory set, else load it, else build and publish it.
    ///
    /// A cached artifact built under a different configuration is an error,
    /// never silently replaced; call [`NegativeSampler::invalidate`] first.
    pub fn ensure(
        &self,
        split: SplitKind,
        params: &SamplingParams,
    ) -> Result<Arc<NegativeSampleSet>> {
        if let Some(set) = self.cached(split)? {
            set.check_compatible(&self.artifact_key(split), &self.expected_header(split, params))?;
            return Ok(set);
        }
        match self.load(split, params) {
            Err(Error::MissingArtifact { key }) => {
                debug!(%key, "no cached negative samples, building");
                self.build(split, params)
            }
            other => other,
        }
    }

    /// Drop a split from memory and from the store. Returns whether a
    /// persisted artifact was removed.
    pub fn invalidate(&self, split: SplitKind) -> Result<bool> {
        self.loaded
            .write()
            .map_err(|_| Error::Internal("negative cache lock poisoned"))?
            .remove(&split);
        let key = self.artifact_key(split);
        let removed = self.store.remove(&key)?;
        info!(%key, removed, "negative samples invalidated");
        Ok(removed)
    }

    /// Returns `true` if the split is loaded in memory.
    pub fn is_loaded(&self, split: SplitKind) -> bool {
        self.cached(split).ok().flatten().is_some()
    }

    /// The loaded set for a split.
    pub fn loaded(&self, split: SplitKind) -> Result<Arc<NegativeSampleSet>> {
        self.cached(split)?.ok_or(Error::NotLoaded { split })
    }

    /// Cached negatives for each row of the query arrays.
    ///
    /// Fails with not-loaded if the split has not been built or loaded, and
    /// with unknown-query for a row whose key has no cached negatives.
    pub fn query_batch(
        &self,
        sources: &[NodeId],
        destinations: &[NodeId],
        timestamps: &[Timestamp],
        relations: Option<&[RelationId]>,
        split: SplitKind,
    ) -> Result<Vec<Vec<NodeId>>> {
        let n = sources.len();
        if destinations.len() != n
            || timestamps.len() != n
            || relations.is_some_and(|r| r.len() != n)
        {
            return Err(Error::InvalidInput(format!(
                "query arrays differ in length: {n} sources, {} destinations, {} timestamps{}",
                destinations.len(),
                timestamps.len(),
                relations.map_or(String::new(), |r| format!(", {} relations", r.len()))
            )));
        }
        let set = self.loaded(split)?;
        (0..n)
            .map(|i| {
                let key = QueryKey::new(
                    sources[i],
                    destinations[i],
                    timestamps[i],
                    relations.map(|r| r[i]),
                );
                set.get(&key)
                    .map(<[NodeId]>::to_vec)
                    .ok_or(Error::UnknownQuery { split, key })
            })
            .collect()
    }

    fn cached(&self, split: SplitKind) -> Result<Option<Arc<NegativeSampleSet>>> {
        Ok(self
            .loaded
            .read()
            .map_err(|_| Error::Internal("negative cache lock poisoned"))?
            .get(&split)
            .cloned())
    }

    fn install(&self, split: SplitKind, set: NegativeSampleSet) -> Result<Arc<NegativeSampleSet>> {
        let set = Arc::new(set);
        self.loaded
            .write()
            .map_err(|_| Error::Internal("negative cache lock poisoned"))?
            .insert(split, Arc::clone(&set));
        Ok(set)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::edges::Edge;
    use crate::split::SplitFractions;
    use tgb_store::MemoryStore;

    /// Ten events over 3 sources and 4 destinations, ts 1..=10.
    fn sampler(store: Arc<dyn ArtifactStore>) -> NegativeSampler {
        let mut cols = EdgeColumns::default();
        for i in 0..10u64 {
            cols.push(Edge {
                src: i % 3,
                dst: 3 + i % 4,
                ts: i as i64 + 1,
                rel: None,
                weight: None,
                original_index: i,
            })
            .unwrap();
        }
        let fractions = SplitFractions::new(0.6, 0.2, 0.2).unwrap();
        let mask = SplitMask::generate(&cols.timestamps, fractions, true).unwrap();
        NegativeSampler::new("toy", Arc::new(cols), Arc::new(mask), 0..40, store)
    }

    fn uniform(n: usize) -> SamplingParams {
        SamplingParams::new(SamplingPolicy::RandomUniform, n, 42)
    }

    // ── 1. load-before-query protocol ───────────────────────────────────

    #[test]
    fn query_before_build_is_not_loaded() {
        let s = sampler(Arc::new(MemoryStore::new()));
        let err = s.query_batch(&[0], &[3], &[7], None, SplitKind::Val).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::NotLoaded);
    }

    #[test]
    fn build_then_query_returns_distinct_negatives() {
        let s = sampler(Arc::new(MemoryStore::new()));
        s.build(SplitKind::Val, &uniform(5)).unwrap();
        // ts 7 is row 6: src 0, dst 5
        let out = s.query_batch(&[0], &[5], &[7], None, SplitKind::Val).unwrap();
        assert_eq!(out.len(), 1);
        let negs = &out[0];
        assert_eq!(negs.len(), 5);
        assert!(!negs.contains(&5));
        let mut sorted = negs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 5);
    }

    #[test]
    fn splits_are_independent() {
        let s = sampler(Arc::new(MemoryStore::new()));
        s.build(SplitKind::Val, &uniform(3)).unwrap();
        assert!(s.is_loaded(SplitKind::Val));
        assert!(!s.is_loaded(SplitKind::Test));
        let err = s.query_batch(&[0], &[3], &[10], None, SplitKind::Test).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::NotLoaded);
    }

    #[test]
    fn unknown_key_is_reported() {
        let s = sampler(Arc::new(MemoryStore::new()));
        s.build(SplitKind::Val, &uniform(3)).unwrap();
        let err = s.query_batch(&[0], &[5], &[8], None, SplitKind::Val).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::UnknownQuery);
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let s = sampler(Arc::new(MemoryStore::new()));
        let err = s.query_batch(&[0, 1], &[5], &[7], None, SplitKind::Val).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidInput);
    }

    // ── 2. persistence ──────────────────────────────────────────────────

    #[test]
    fn fresh_sampler_loads_published_set() {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryStore::new());
        let built = sampler(Arc::clone(&store)).build(SplitKind::Test, &uniform(4)).unwrap();
        let other = sampler(store);
        let loaded = other.load(SplitKind::Test, &uniform(4)).unwrap();
        assert_eq!(*loaded, *built);
    }

    #[test]
    fn load_with_other_params_is_stale() {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryStore::new());
        sampler(Arc::clone(&store)).build(SplitKind::Val, &uniform(4)).unwrap();
        let s = sampler(store).with_feat_dim(64);
        let err = s.load(SplitKind::Val, &uniform(4)).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::StaleCache);
        assert!(err.to_string().contains("feat_dim"));
        assert!(!s.is_loaded(SplitKind::Val));
    }

    #[test]
    fn ensure_builds_once_then_loads() {
        let store = Arc::new(MemoryStore::new());
        let s = sampler(store.clone());
        assert_eq!(
            s.load(SplitKind::Val, &uniform(2)).unwrap_err().code(),
            crate::ErrorCode::MissingSource
        );
        let first = s.ensure(SplitKind::Val, &uniform(2)).unwrap();
        assert!(store.contains("toy_val_ns").unwrap());
        let second = sampler(store).ensure(SplitKind::Val, &uniform(2)).unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn ensure_refuses_incompatible_memory_copy() {
        let s = sampler(Arc::new(MemoryStore::new()));
        s.build(SplitKind::Val, &uniform(2)).unwrap();
        let err = s
            .ensure(SplitKind::Val, &SamplingParams::new(SamplingPolicy::Historical, 2, 42))
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::StaleCache);
    }

    #[test]
    fn invalidate_drops_memory_and_artifact() {
        let store = Arc::new(MemoryStore::new());
        let s = sampler(store.clone());
        s.build(SplitKind::Val, &uniform(2)).unwrap();
        assert!(s.invalidate(SplitKind::Val).unwrap());
        assert!(!s.is_loaded(SplitKind::Val));
        assert!(!store.contains("toy_val_ns").unwrap());
        assert!(!s.invalidate(SplitKind::Val).unwrap());
    }

    #[test]
    fn wider_universe_is_stale() {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryStore::new());
        sampler(Arc::clone(&store)).build(SplitKind::Val, &uniform(4)).unwrap();
        let base = sampler(Arc::new(MemoryStore::new()));
        let wider = NegativeSampler::new(
            "toy",
            Arc::clone(&base.edges),
            Arc::clone(&base.mask),
            0..1000,
            store,
        );
        let err = wider.load(SplitKind::Val, &uniform(4)).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::StaleCache);
        assert!(err.to_string().contains("universe_end"));
    }

    #[test]
    fn different_split_assignment_is_stale() {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryStore::new());
        sampler(Arc::clone(&store)).build(SplitKind::Val, &uniform(4)).unwrap();
        let base = sampler(Arc::new(MemoryStore::new()));
        let fractions = SplitFractions::new(0.5, 0.3, 0.2).unwrap();
        let mask = SplitMask::generate(&base.edges.timestamps, fractions, true).unwrap();
        let resplit =
            NegativeSampler::new("toy", Arc::clone(&base.edges), Arc::new(mask), 0..40, store);
        let err = resplit.load(SplitKind::Val, &uniform(4)).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::StaleCache);
        assert!(err.to_string().contains("split_fingerprint"));
    }

    // ── 3. determinism ──────────────────────────────────────────────────

    #[test]
    fn worker_count_does_not_change_output() {
        let serial = sampler(Arc::new(MemoryStore::new())).with_workers(1);
        let parallel = sampler(Arc::new(MemoryStore::new())).with_workers(4);
        for policy in [
            SamplingPolicy::RandomUniform,
            SamplingPolicy::Historical,
            SamplingPolicy::Inductive,
        ] {
            let p = SamplingParams::new(policy, 6, 9);
            let a = serial.generate(SplitKind::Test, &p).unwrap();
            let b = parallel.generate(SplitKind::Test, &p).unwrap();
            assert_eq!(a.to_canonical_bytes().unwrap(), b.to_canonical_bytes().unwrap());
        }
    }

    // ── 4. keys and names ───────────────────────────────────────────────

    #[test]
    fn artifact_keys_follow_dataset_and_split() {
        let s = sampler(Arc::new(MemoryStore::new()));
        assert_eq!(s.artifact_key(SplitKind::Val), "toy_val_ns");
        assert_eq!(s.artifact_key(SplitKind::Test), "toy_test_ns");
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!("random".parse::<SamplingPolicy>().unwrap(), SamplingPolicy::RandomUniform);
        assert_eq!("hist".parse::<SamplingPolicy>().unwrap(), SamplingPolicy::Historical);
        assert_eq!(
            "random_uniform".parse::<SamplingPolicy>().unwrap(),
            SamplingPolicy::RandomUniform
        );
        assert!("popular".parse::<SamplingPolicy>().is_err());
        assert_eq!(SamplingPolicy::Inductive.to_string(), "inductive");
    }

    #[test]
    fn query_key_bytes_distinguish_missing_relation() {
        let a = QueryKey::new(1, 2, 3, None).to_bytes();
        let b = QueryKey::new(1, 2, 3, Some(0)).to_bytes();
        assert_ne!(a, b);
        assert_eq!(QueryKey::new(1, 2, 3, Some(4)).to_string(), "(1, 2, 3, rel 4)");
    }
}
