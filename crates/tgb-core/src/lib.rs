// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tgb-core: temporal graph benchmark preparation.
//!
//! The pipeline runs in a fixed order:
//!
//! 1. [`loader`] parses a chronological edge file into typed columns and a
//!    zero-padded edge feature matrix.
//! 2. [`reindex`](mod@reindex) maps raw node ids to a dense contiguous space,
//!    optionally with disjoint source/destination ranges.
//! 3. [`split`] cuts the timeline into train/validation/test masks without
//!    reordering or splitting a timestamp across regions.
//! 4. [`negative`] draws reproducible negatives per positive query, persists
//!    them per split and serves batch lookups.
//!
//! [`TemporalDataset`] composes the stages behind a read-only facade.
//!
//! # Determinism
//!
//! Negatives are a pure function of `(seed, policy, split, query key)` and the
//! reindexed data. Building the same split twice, on any machine and with any
//! worker count, yields byte-identical artifacts.
#![forbid(unsafe_code)]

pub mod artifact;
pub mod config;
pub mod dataset;
pub mod edges;
mod error;
pub mod features;
pub mod loader;
pub mod negative;
pub mod prng;
pub mod reindex;
pub mod split;

pub use config::{
    ConfigError, ConfigService, ConfigStore, FsConfigStore, NegativeConfig, PipelineConfig,
};
pub use dataset::{DatasetMeta, DatasetState, TemporalDataset};
pub use edges::{Edge, EdgeBatch, EdgeColumns, NodeId, RelationId, Timestamp};
pub use error::{Error, ErrorCode, Result};
pub use features::{FeatureMatrix, DEFAULT_FEAT_DIM};
pub use negative::{
    NegativeSampleSet, NegativeSampler, NsHeader, QueryKey, SamplingParams, SamplingPolicy,
};
pub use prng::Prng;
pub use reindex::{reindex, NodeClass, NodeIndexMap, ReindexMode};
pub use split::{SplitFractions, SplitKind, SplitMask, SplitThresholds};
