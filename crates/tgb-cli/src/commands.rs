// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Subcommand implementations. Each one runs against a preprocessed dataset.

use std::path::Path;

use anyhow::{bail, Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use tgb_core::{
    ConfigService, FsConfigStore, NegativeSampleSet, NodeId, PipelineConfig, SamplingParams,
    SplitKind, TemporalDataset, Timestamp,
};
use tgb_store::ArtifactStore;
use tracing::{debug, info};

/// Config from `--config`, else `pipeline.json` under `--config-dir`, else
/// defaults.
pub fn load_config(file: Option<&Path>, dir: Option<&Path>) -> Result<PipelineConfig> {
    if let Some(path) = file {
        return PipelineConfig::from_path(path)
            .with_context(|| format!("read config {}", path.display()));
    }
    if let Some(dir) = dir {
        let service = ConfigService::new(FsConfigStore::at(dir)?);
        return service
            .load_or_default()
            .with_context(|| format!("read config from {}", dir.display()));
    }
    debug!("no config given, using defaults");
    Ok(PipelineConfig::default())
}

/// Open the dataset and run the pipeline up to the split masks.
pub fn prepare(name: &str, root: &Path, config: PipelineConfig) -> Result<TemporalDataset> {
    let mut ds = TemporalDataset::open(name, root, config)
        .with_context(|| format!("open dataset {name} under {}", root.display()))?;
    ds.preprocess().with_context(|| format!("preprocess {name}"))?;
    Ok(ds)
}

pub fn preprocess(ds: &TemporalDataset) -> Result<()> {
    let files = ds.output_ml_files()?;
    println!("nodes      {}", ds.num_nodes()?);
    println!("edges      {}", ds.num_edges()?);
    println!("relations  {}", ds.num_rels()?);
    for kind in SplitKind::ALL {
        println!("{:<10} {}", kind.as_str(), ds.data(kind)?.len());
    }
    println!("written    {}", files.edges_csv.display());
    Ok(())
}

pub fn build_ns(ds: &TemporalDataset, split: SplitKind, params: &SamplingParams) -> Result<()> {
    let sampler = ds.negative_sampler()?;
    let set = sampler
        .build(split, params)
        .with_context(|| format!("build {split} negatives"))?;
    println!("{} {}", sampler.artifact_key(split), set.content_hash()?);
    Ok(())
}

pub fn query(
    ds: &TemporalDataset,
    split: SplitKind,
    params: &SamplingParams,
    [src, dst]: [NodeId; 2],
    ts: Timestamp,
    rel: Option<u32>,
) -> Result<()> {
    let sampler = ds.negative_sampler()?;
    sampler
        .load(split, params)
        .with_context(|| format!("load {split} negatives (run `tgb build-ns` first)"))?;
    let rels = rel.as_ref().map(std::slice::from_ref);
    let mut batch = sampler.query_batch(&[src], &[dst], &[ts], rels, split)?;
    let negatives = batch.pop().unwrap_or_default();
    let line = serde_json::json!({
        "src": src,
        "dst": dst,
        "ts": ts,
        "rel": rel,
        "negatives": negatives,
    });
    println!("{line}");
    Ok(())
}

pub fn verify(
    ds: &TemporalDataset,
    split: SplitKind,
    params: &SamplingParams,
    runs: u32,
) -> Result<()> {
    let sampler = ds.negative_sampler()?;
    let key = sampler.artifact_key(split);
    let published = sampler
        .load(split, params)
        .with_context(|| format!("load published {key}"))?
        .content_hash()?;
    for run in 1..=runs {
        let rebuilt = sampler.generate(split, params)?.content_hash()?;
        if rebuilt != published {
            bail!("{key}: run {run} produced {rebuilt}, published artifact is {published}");
        }
        debug!(%key, run, "rebuild matches");
    }
    info!(%key, runs, "negative samples reproducible");
    println!("ok {key} {published} ({runs} runs)");
    Ok(())
}

pub fn inspect(ds: &TemporalDataset) -> Result<()> {
    let mask = ds.split_mask()?;
    let thresholds = mask.thresholds();
    let [train, val, test] = mask.counts();
    let show = |ts: Option<Timestamp>| ts.map_or_else(|| "-".to_owned(), |t| t.to_string());

    let mut summary = Table::new();
    summary.load_preset(UTF8_FULL).set_header(vec!["dataset", "value"]);
    summary
        .add_row(vec!["name".to_owned(), ds.meta().name.clone()])
        .add_row(vec!["nodes".to_owned(), ds.num_nodes()?.to_string()])
        .add_row(vec!["edges".to_owned(), ds.num_edges()?.to_string()])
        .add_row(vec!["relations".to_owned(), ds.num_rels()?.to_string()])
        .add_row(vec!["ts_decimals".to_owned(), ds.timestamp_decimals()?.to_string()])
        .add_row(vec!["train/val/test".to_owned(), format!("{train}/{val}/{test}")])
        .add_row(vec!["train_end".to_owned(), show(thresholds.train_end)])
        .add_row(vec!["val_end".to_owned(), show(thresholds.val_end)])
        .add_row(vec!["eval_metric".to_owned(), ds.eval_metric().to_owned()]);
    println!("{summary}");

    let params = ds.sampling_params();
    let mut artifacts = Table::new();
    artifacts.load_preset(UTF8_FULL).set_header(vec![
        "artifact",
        "policy",
        "negatives",
        "seed",
        "queries",
        "fingerprint",
        "status",
    ]);
    for key in ds.store().keys()? {
        artifacts.add_row(artifact_row(ds, &params, key)?);
    }
    println!("{artifacts}");
    Ok(())
}

/// One artifact table row. Unreadable artifacts are listed with the error as
/// their status instead of aborting the listing.
fn artifact_row(
    ds: &TemporalDataset,
    params: &SamplingParams,
    key: String,
) -> Result<Vec<String>> {
    let set = match ds.store().load(&key) {
        Ok(Some(payload)) => NegativeSampleSet::from_canonical_bytes(&payload),
        Ok(None) => return Ok(vec![key, "removed".to_owned()]),
        Err(err) => Err(err.into()),
    };
    let set = match set {
        Ok(set) => set,
        Err(err) => {
            let mut row = vec![key];
            row.resize(6, String::new());
            row.push(err.to_string());
            return Ok(row);
        }
    };
    let header = set.header();
    let expected = ds.negative_sampler()?.expected_header(header.split, params);
    let status = match set.check_compatible(&key, &expected) {
        Ok(()) => "current".to_owned(),
        Err(err) => err.to_string(),
    };
    Ok(vec![
        key,
        header.policy.to_string(),
        header.num_negatives.to_string(),
        header.seed.to_string(),
        set.len().to_string(),
        hex::encode(&header.dataset_fingerprint[..8]),
        status,
    ])
}
