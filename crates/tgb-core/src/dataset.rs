// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-only view over one prepared temporal graph dataset.
//!
//! A [`TemporalDataset`] moves through two states: `Uninitialized` after
//! [`TemporalDataset::open`], `Preprocessed` after
//! [`TemporalDataset::preprocess`] has loaded, reindexed and split the edges.
//! Every data accessor checks the state and fails with not-preprocessed
//! rather than returning an empty structure. Negative samples are then built
//! or loaded per split through the dataset's [`NegativeSampler`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tgb_store::{ArtifactStore, FsStore};
use tracing::info;

use crate::artifact::{write_ml_files, MlFiles};
use crate::config::PipelineConfig;
use crate::edges::EdgeColumns;
use crate::error::{Error, Result};
use crate::features::FeatureMatrix;
use crate::loader::{load_edges, load_node_types, LoaderOptions};
use crate::negative::{NegativeSampleSet, NegativeSampler, SamplingParams};
use crate::reindex::{reindex, NodeClass, NodeIndexMap, ReindexMode};
use crate::split::{SplitKind, SplitMask};

/// Where a dataset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMeta {
    /// Dataset name as published (e.g. `thgl-myket`).
    pub name: String,
    /// Directory name; defaults to the name with `-` replaced by `_`.
    pub dir_name: String,
    /// Dataset directory, `<root>/<dir_name>`.
    pub dir: PathBuf,
    /// Raw edge file; defaults to `<dir>/<name>.csv`.
    pub fname: PathBuf,
    /// Optional `node_id,type` file.
    pub node_type_fname: Option<PathBuf>,
}

impl DatasetMeta {
    /// Default layout for `name` under `root`.
    pub fn new(name: &str, root: &Path) -> Self {
        let dir_name = name.replace('-', "_");
        Self::with_dir_name(name, root, &dir_name)
    }

    /// Layout with an explicit directory name.
    pub fn with_dir_name(name: &str, root: &Path, dir_name: &str) -> Self {
        let dir = root.join(dir_name);
        Self {
            name: name.to_owned(),
            dir_name: dir_name.to_owned(),
            fname: dir.join(format!("{name}.csv")),
            dir,
            node_type_fname: None,
        }
    }

    /// Override the raw edge file.
    #[must_use]
    pub fn fname(mut self, path: impl Into<PathBuf>) -> Self {
        self.fname = path.into();
        self
    }

    /// Attach a node-type file.
    #[must_use]
    pub fn node_types(mut self, path: impl Into<PathBuf>) -> Self {
        self.node_type_fname = Some(path.into());
        self
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    /// Opened, nothing computed.
    Uninitialized,
    /// Edges loaded, reindexed and split.
    Preprocessed,
}

#[derive(Debug)]
struct Prepared {
    full: Arc<EdgeColumns>,
    train: EdgeColumns,
    val: EdgeColumns,
    test: EdgeColumns,
    mask: Arc<SplitMask>,
    node_map: NodeIndexMap,
    node_feat: Option<FeatureMatrix>,
    edge_feat: Option<FeatureMatrix>,
    node_type: Option<Vec<Option<u32>>>,
    timestamp_decimals: u32,
    sampler: NegativeSampler,
}

/// Dataset facade: loader, reindexer, split generator and negative sampler.
pub struct TemporalDataset {
    meta: DatasetMeta,
    config: PipelineConfig,
    store: Arc<dyn ArtifactStore>,
    prepared: Option<Prepared>,
}

impl std::fmt::Debug for TemporalDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalDataset")
            .field("meta", &self.meta)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TemporalDataset {
    /// Open `name` under `root` with artifacts stored in the dataset directory.
    ///
    /// Fails with missing-source if the dataset directory does not exist.
    pub fn open(name: &str, root: &Path, config: PipelineConfig) -> Result<Self> {
        let meta = DatasetMeta::new(name, root);
        Self::check_dir(&meta)?;
        let store: Arc<dyn ArtifactStore> = Arc::new(FsStore::open(&meta.dir)?);
        Self::with_store(meta, config, store)
    }

    /// Open with explicit metadata and artifact store.
    pub fn with_store(
        meta: DatasetMeta,
        config: PipelineConfig,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self> {
        Self::check_dir(&meta)?;
        config.validate()?;
        info!(name = %meta.name, dir = %meta.dir.display(), "dataset opened");
        Ok(Self {
            meta,
            config,
            store,
            prepared: None,
        })
    }

    fn check_dir(meta: &DatasetMeta) -> Result<()> {
        if meta.dir.is_dir() {
            Ok(())
        } else {
            Err(Error::MissingSource {
                path: meta.dir.clone(),
            })
        }
    }

    /// Dataset location.
    pub fn meta(&self) -> &DatasetMeta {
        &self.meta
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Artifact store backing the negative-sample cache.
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DatasetState {
        if self.prepared.is_some() {
            DatasetState::Preprocessed
        } else {
            DatasetState::Uninitialized
        }
    }

    /// Load, reindex and split the raw edges. Running it again recomputes
    /// everything and drops negatives held in memory.
    pub fn preprocess(&mut self) -> Result<()> {
        let cfg = &self.config;
        let opts = LoaderOptions {
            delimiter: cfg.delimiter_byte(),
            feat_dim: cfg.feat_dim,
            timestamp_decimals: cfg.timestamp_decimals,
        };
        let raw = load_edges(&self.meta.fname, &opts)?;
        let mode = if cfg.bipartite {
            ReindexMode::Bipartite
        } else {
            ReindexMode::Shared
        };
        let (full, mut node_map) = reindex(&raw.edges, mode, cfg.id_origin)?;

        let node_type = match &self.meta.node_type_fname {
            None => None,
            Some(path) => {
                let mut typed = Vec::new();
                for (raw_id, ty) in load_node_types(path, opts.delimiter)? {
                    typed.push((node_map.reserve_isolated(raw_id), ty));
                }
                let mut types = vec![None; node_map.len()];
                for (dense, ty) in typed {
                    if let Some(slot) = types.get_mut((dense - node_map.origin()) as usize) {
                        *slot = Some(ty);
                    }
                }
                Some(types)
            }
        };

        let mask = SplitMask::generate(&full.timestamps, cfg.fractions, cfg.strict_time_order)?;
        let [train, val, test] = SplitKind::ALL.map(|kind| full.select(mask.mask(kind)));

        let node_rows = (node_map.origin() as usize) + node_map.len();
        let node_feat = cfg
            .zero_fill_features
            .then(|| FeatureMatrix::zeros(node_rows, cfg.feat_dim));
        let edge_feat =
            (raw.native_feat_dim > 0 || cfg.zero_fill_features).then_some(raw.edge_feat);

        let full = Arc::new(full);
        let mask = Arc::new(mask);
        let sampler = NegativeSampler::new(
            self.meta.dir_name.clone(),
            Arc::clone(&full),
            Arc::clone(&mask),
            node_map.class_range(NodeClass::Destination),
            Arc::clone(&self.store),
        )
        .with_feat_dim(cfg.feat_dim)
        .with_workers(cfg.negatives.workers);

        info!(
            name = %self.meta.name,
            nodes = node_map.len(),
            edges = full.len(),
            relations = full.num_relations(),
            train = train.len(),
            val = val.len(),
            test = test.len(),
            "dataset preprocessed"
        );
        self.prepared = Some(Prepared {
            full,
            train,
            val,
            test,
            mask,
            node_map,
            node_feat,
            edge_feat,
            node_type,
            timestamp_decimals: raw.timestamp_decimals,
            sampler,
        });
        Ok(())
    }

    fn prepared(&self, accessor: &'static str) -> Result<&Prepared> {
        self.prepared
            .as_ref()
            .ok_or(Error::NotPreprocessed { accessor })
    }

    /// Every edge, reindexed, in file order.
    pub fn full_data(&self) -> Result<&EdgeColumns> {
        Ok(&self.prepared("full_data")?.full)
    }

    /// Training edges.
    pub fn train_data(&self) -> Result<&EdgeColumns> {
        Ok(&self.prepared("train_data")?.train)
    }

    /// Validation edges.
    pub fn val_data(&self) -> Result<&EdgeColumns> {
        Ok(&self.prepared("val_data")?.val)
    }

    /// Test edges.
    pub fn test_data(&self) -> Result<&EdgeColumns> {
        Ok(&self.prepared("test_data")?.test)
    }

    /// Edges of one split.
    pub fn data(&self, kind: SplitKind) -> Result<&EdgeColumns> {
        match kind {
            SplitKind::Train => self.train_data(),
            SplitKind::Val => self.val_data(),
            SplitKind::Test => self.test_data(),
        }
    }

    /// Split masks over `full_data`.
    pub fn split_mask(&self) -> Result<&SplitMask> {
        Ok(&self.prepared("split_mask")?.mask)
    }

    /// Raw ↔ dense node id map.
    pub fn node_map(&self) -> Result<&NodeIndexMap> {
        Ok(&self.prepared("node_map")?.node_map)
    }

    /// Node features, one row per dense id. `None` when absent or not yet
    /// computed; check [`TemporalDataset::state`] to tell them apart.
    pub fn node_feat(&self) -> Option<&FeatureMatrix> {
        self.prepared.as_ref().and_then(|p| p.node_feat.as_ref())
    }

    /// Edge features aligned with `full_data`. Same `None` rule as
    /// [`TemporalDataset::node_feat`].
    pub fn edge_feat(&self) -> Option<&FeatureMatrix> {
        self.prepared.as_ref().and_then(|p| p.edge_feat.as_ref())
    }

    /// Node type per dense id (offset by the id origin), when a node-type
    /// file was given.
    pub fn node_type(&self) -> Option<&[Option<u32>]> {
        self.prepared.as_ref().and_then(|p| p.node_type.as_deref())
    }

    /// Number of dense node ids.
    pub fn num_nodes(&self) -> Result<usize> {
        Ok(self.prepared("num_nodes")?.node_map.len())
    }

    /// Number of edges.
    pub fn num_edges(&self) -> Result<usize> {
        Ok(self.prepared("num_edges")?.full.len())
    }

    /// Decimal places the timestamps were scaled by: a stored timestamp `t`
    /// is `t / 10^d` in the source file.
    pub fn timestamp_decimals(&self) -> Result<u32> {
        Ok(self.prepared("timestamp_decimals")?.timestamp_decimals)
    }

    /// Number of distinct relations (0 for single-relation graphs).
    pub fn num_rels(&self) -> Result<usize> {
        Ok(self.prepared("num_rels")?.full.num_relations())
    }

    /// Metric consumers should report.
    pub fn eval_metric(&self) -> &str {
        &self.config.eval_metric
    }

    /// The dataset's negative sampler.
    pub fn negative_sampler(&self) -> Result<&NegativeSampler> {
        Ok(&self.prepared("negative_sampler")?.sampler)
    }

    /// Sampling parameters from the pipeline config.
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams::from(&self.config.negatives)
    }

    /// Make validation negatives available, loading the persisted artifact
    /// or building and publishing it when absent.
    pub fn load_val_ns(&self) -> Result<Arc<NegativeSampleSet>> {
        self.negative_sampler()?
            .ensure(SplitKind::Val, &self.sampling_params())
    }

    /// Test counterpart of [`TemporalDataset::load_val_ns`].
    pub fn load_test_ns(&self) -> Result<Arc<NegativeSampleSet>> {
        self.negative_sampler()?
            .ensure(SplitKind::Test, &self.sampling_params())
    }

    /// Write the learning-ready files into the dataset directory, skipping
    /// generation when they already exist. Returns their paths.
    pub fn output_ml_files(&self) -> Result<MlFiles> {
        let prepared = self.prepared("output_ml_files")?;
        let files = MlFiles::in_dir(&self.meta.dir, &self.meta.name);
        let feat_dim = self.config.feat_dim;
        let edge_feat = prepared
            .edge_feat
            .clone()
            .unwrap_or_else(|| FeatureMatrix::zeros(prepared.full.len(), feat_dim));
        let node_rows = prepared.node_map.origin() as usize + prepared.node_map.len();
        let node_feat = prepared
            .node_feat
            .clone()
            .unwrap_or_else(|| FeatureMatrix::zeros(node_rows, feat_dim));
        write_ml_files(&files, &prepared.full, &edge_feat, &node_feat)?;
        Ok(files)
    }
}
