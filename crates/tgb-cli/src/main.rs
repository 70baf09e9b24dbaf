// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `tgb`: prepare a temporal graph dataset and manage its negative samples.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tgb_core::{SamplingParams, SamplingPolicy, SplitKind};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "tgb", version, about = "Temporal graph benchmark preparation")]
struct Cli {
    /// Directory containing one sub-directory per dataset
    #[arg(long, global = true, default_value = "datasets")]
    root: PathBuf,
    /// Dataset name (e.g. tgbl-wiki)
    #[arg(long, global = true, default_value = "tgbl-wiki")]
    name: String,
    /// Pipeline config file (JSON)
    #[arg(long, global = true, conflicts_with = "config_dir")]
    config: Option<PathBuf>,
    /// Directory holding `pipeline.json`
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Raise log verbosity to debug (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, reindex and split the dataset, then write learning-ready files
    Preprocess,
    /// Build and publish negative samples for a split
    BuildNs {
        #[arg(long, value_enum)]
        split: EvalSplit,
        #[command(flatten)]
        sampling: SamplingArgs,
    },
    /// Print the cached negatives of one query
    Query {
        #[arg(long, value_enum)]
        split: EvalSplit,
        /// Dense source id
        #[arg(long)]
        src: u64,
        /// Dense destination id
        #[arg(long)]
        dst: u64,
        /// Timestamp
        #[arg(long)]
        ts: i64,
        /// Relation id (multi-relational datasets)
        #[arg(long)]
        rel: Option<u32>,
        #[command(flatten)]
        sampling: SamplingArgs,
    },
    /// Rebuild a split in memory and compare with the published artifact
    Verify {
        #[arg(long, value_enum)]
        split: EvalSplit,
        /// Number of in-memory rebuilds
        #[arg(long, default_value_t = 3)]
        runs: u32,
        #[command(flatten)]
        sampling: SamplingArgs,
    },
    /// Show counts, split thresholds and cached artifacts
    Inspect,
}

/// Splits that carry negative samples.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum EvalSplit {
    Val,
    Test,
}

impl From<EvalSplit> for SplitKind {
    fn from(split: EvalSplit) -> Self {
        match split {
            EvalSplit::Val => Self::Val,
            EvalSplit::Test => Self::Test,
        }
    }
}

/// Overrides for the config's negative sampling section.
#[derive(Args, Debug, Clone, Default)]
struct SamplingArgs {
    /// Sampling policy (random-uniform, historical, inductive)
    #[arg(long)]
    policy: Option<SamplingPolicy>,
    /// Negatives per query
    #[arg(long)]
    negatives: Option<usize>,
    /// Base seed
    #[arg(long)]
    seed: Option<u64>,
}

impl SamplingArgs {
    fn apply(&self, mut params: SamplingParams) -> SamplingParams {
        if let Some(policy) = self.policy {
            params.policy = policy;
        }
        if let Some(n) = self.negatives {
            params.num_negatives = n;
        }
        if let Some(seed) = self.seed {
            params.seed = seed;
        }
        params
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose).context("install log subscriber")?;

    let config = commands::load_config(cli.config.as_deref(), cli.config_dir.as_deref())?;
    let ds = commands::prepare(&cli.name, &cli.root, config)?;

    match cli.command {
        Command::Preprocess => commands::preprocess(&ds),
        Command::BuildNs { split, sampling } => {
            let params = sampling.apply(ds.sampling_params());
            commands::build_ns(&ds, split.into(), &params)
        }
        Command::Query {
            split,
            src,
            dst,
            ts,
            rel,
            sampling,
        } => {
            let params = sampling.apply(ds.sampling_params());
            commands::query(&ds, split.into(), &params, [src, dst], ts, rel)
        }
        Command::Verify {
            split,
            runs,
            sampling,
        } => {
            let params = sampling.apply(ds.sampling_params());
            commands::verify(&ds, split.into(), &params, runs)
        }
        Command::Inspect => commands::inspect(&ds),
    }
}
