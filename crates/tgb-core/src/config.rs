// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pipeline configuration, its storage port and a filesystem adapter.
//!
//! A [`ConfigService`] reads and writes one named profile of
//! [`PipelineConfig`]. Stored profiles are validated on the way in and on
//! the way out, so a profile that loads is one `preprocess` will accept.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result};
use crate::features::DEFAULT_FEAT_DIM;
use crate::loader::MAX_TIMESTAMP_DECIMALS;
use crate::negative::SamplingPolicy;
use crate::split::SplitFractions;

/// Storage port for raw profile blobs.
pub trait ConfigStore {
    /// Raw bytes of `profile`, `Ok(None)` when it was never saved.
    fn load_raw(&self, profile: &str) -> Result<Option<Vec<u8>>, ConfigError>;
    /// Replace `profile` with `data`.
    fn save_raw(&self, profile: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config storage.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Profile names must be usable as file stems.
    #[error("[INVALID_CONFIG] invalid profile name {0:?}")]
    InvalidProfile(String),
    /// Stored profile is not valid JSON for [`PipelineConfig`].
    #[error("[INVALID_CONFIG] profile {profile}: {source}")]
    Parse {
        /// Profile being read.
        profile: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Serialization failure.
    #[error("[INVALID_CONFIG] {0}")]
    Serde(#[from] serde_json::Error),
    /// I/O error while reading or creating the config directory.
    #[error("[IO] config: {0}")]
    Io(#[from] std::io::Error),
    /// Atomic replace of a profile file failed.
    #[error("[IO] config: {0}")]
    Write(#[from] tgb_store::StoreError),
    /// The platform config directory could not be resolved.
    #[error("[IO] config: {0}")]
    NoConfigDir(String),
}

/// Loads, validates and saves one [`PipelineConfig`] profile.
pub struct ConfigService<S> {
    store: S,
    profile: String,
}

impl<S: ConfigStore> ConfigService<S> {
    /// Service over the default profile, [`PipelineConfig::KEY`].
    pub fn new(store: S) -> Self {
        Self {
            store,
            profile: PipelineConfig::KEY.to_owned(),
        }
    }

    /// Switch to another profile (e.g. `"wiki-historical"`).
    pub fn with_profile(mut self, profile: impl Into<String>) -> Result<Self, ConfigError> {
        let profile = profile.into();
        if tgb_store::validate_key(&profile).is_err() {
            return Err(ConfigError::InvalidProfile(profile));
        }
        self.profile = profile;
        Ok(self)
    }

    /// Active profile name.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// The stored profile, or `Ok(None)` if it was never saved. A stored
    /// profile that does not parse or validate is an error, never `None`.
    pub fn load(&self) -> Result<Option<PipelineConfig>> {
        let Some(bytes) = self.store.load_raw(&self.profile)? else {
            return Ok(None);
        };
        let cfg: PipelineConfig =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                profile: self.profile.clone(),
                source,
            })?;
        self.checked(&cfg)?;
        debug!(profile = %self.profile, "config profile loaded");
        Ok(Some(cfg))
    }

    /// The stored profile, or defaults when absent.
    pub fn load_or_default(&self) -> Result<PipelineConfig> {
        Ok(self.load()?.unwrap_or_default())
    }

    /// Validate `cfg` and replace the stored profile with it.
    pub fn save(&self, cfg: &PipelineConfig) -> Result<()> {
        self.checked(cfg)?;
        let mut data = serde_json::to_vec_pretty(cfg).map_err(ConfigError::from)?;
        data.push(b'\n');
        self.store.save_raw(&self.profile, &data)?;
        debug!(profile = %self.profile, "config profile saved");
        Ok(())
    }

    fn checked(&self, cfg: &PipelineConfig) -> Result<()> {
        cfg.validate().map_err(|err| match err {
            Error::InvalidConfig(msg) => {
                Error::InvalidConfig(format!("profile {}: {msg}", self.profile))
            }
            other => other,
        })
    }
}

/// Profiles as `<profile>.json` files in one directory.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Store rooted at the user config directory (e.g. `~/.config/tgb`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "tgb")
            .ok_or_else(|| ConfigError::NoConfigDir("could not resolve config dir".into()))?;
        Self::at(proj.config_dir())
    }

    /// Store rooted at `dir`, created if needed.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let base = dir.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Directory holding the profile files.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, profile: &str) -> PathBuf {
        self.base.join(format!("{profile}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, profile: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        match fs::read(self.path_for(profile)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, profile: &str, data: &[u8]) -> Result<(), ConfigError> {
        tgb_store::write_atomic(&self.path_for(profile), data)?;
        Ok(())
    }
}

/// Negative-sampling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NegativeConfig {
    /// Sampling policy.
    pub policy: SamplingPolicy,
    /// Negatives per positive query.
    pub num_negatives: usize,
    /// Base seed mixed into every per-query stream.
    pub seed: u64,
    /// Exclude every destination the source reaches at the same timestamp.
    pub exclude_concurrent_positives: bool,
    /// Sampling threads; 0 picks the available parallelism.
    pub workers: usize,
}

impl Default for NegativeConfig {
    fn default() -> Self {
        Self {
            policy: SamplingPolicy::RandomUniform,
            num_negatives: 20,
            seed: 42,
            exclude_concurrent_positives: true,
            workers: 0,
        }
    }
}

/// Everything `preprocess` and the negative sampler need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Minimum feature width; native features are zero-padded to it.
    pub feat_dim: usize,
    /// Timeline fractions per split.
    pub fractions: SplitFractions,
    /// Give sources and destinations disjoint id ranges.
    pub bipartite: bool,
    /// First dense id (0 or 1).
    pub id_origin: u64,
    /// Field delimiter of the raw edge file.
    pub delimiter: char,
    /// Require time-sorted input instead of cutting by time regardless of order.
    pub strict_time_order: bool,
    /// Fixed decimal scale for fractional timestamps; unset uses the widest
    /// fraction in the file.
    pub timestamp_decimals: Option<u32>,
    /// Emit all-zero feature matrices when the input has no features.
    pub zero_fill_features: bool,
    /// Metric name reported to consumers.
    pub eval_metric: String,
    /// Negative sampling settings.
    pub negatives: NegativeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feat_dim: DEFAULT_FEAT_DIM,
            fractions: SplitFractions::default(),
            bipartite: false,
            id_origin: 0,
            delimiter: ',',
            strict_time_order: true,
            timestamp_decimals: None,
            zero_fill_features: true,
            eval_metric: "mrr".to_owned(),
            negatives: NegativeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Default profile name used by [`ConfigService`].
    pub const KEY: &'static str = "pipeline";

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingSource {
                path: path.to_path_buf(),
            });
        }
        let bytes = fs::read(path).map_err(Error::io(path))?;
        let cfg: Self = serde_json::from_slice(&bytes).map_err(ConfigError::from)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.fractions.validate()?;
        if self.feat_dim == 0 {
            return Err(Error::InvalidConfig("feat_dim must be positive".into()));
        }
        if self.id_origin > 1 {
            return Err(Error::InvalidConfig(format!(
                "id_origin must be 0 or 1, got {}",
                self.id_origin
            )));
        }
        if !self.delimiter.is_ascii() {
            return Err(Error::InvalidConfig(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )));
        }
        if let Some(d) = self.timestamp_decimals.filter(|d| *d > MAX_TIMESTAMP_DECIMALS) {
            return Err(Error::InvalidConfig(format!(
                "timestamp_decimals must be at most {MAX_TIMESTAMP_DECIMALS}, got {d}"
            )));
        }
        if self.negatives.num_negatives == 0 {
            return Err(Error::InvalidConfig("num_negatives must be positive".into()));
        }
        Ok(())
    }

    /// Delimiter as the byte the csv reader expects.
    pub fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.delimiter).unwrap_or(b',')
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_benchmark_conventions() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.feat_dim, 172);
        assert_eq!(cfg.negatives.num_negatives, 20);
        assert_eq!(cfg.negatives.seed, 42);
        assert_eq!(cfg.eval_metric, "mrr");
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"bipartite": true, "negatives": {"policy": "historical"}}"#)
                .unwrap();
        assert!(cfg.bipartite);
        assert_eq!(cfg.negatives.policy, SamplingPolicy::Historical);
        assert_eq!(cfg.negatives.num_negatives, 20);
        assert_eq!(cfg.feat_dim, 172);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<PipelineConfig>(r#"{"feat_dims": 3}"#).is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = PipelineConfig::default();
        cfg.id_origin = 2;
        assert_eq!(cfg.validate().unwrap_err().code(), crate::ErrorCode::InvalidConfig);

        let mut cfg = PipelineConfig::default();
        cfg.negatives.num_negatives = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.fractions.test = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.timestamp_decimals = Some(19);
        assert!(cfg.validate().is_err());
        cfg.timestamp_decimals = Some(6);
        cfg.validate().unwrap();
    }

    #[test]
    fn fs_store_round_trips_through_service() {
        let dir = tempfile::tempdir().unwrap();
        let service = ConfigService::new(FsConfigStore::at(dir.path()).unwrap());
        assert!(service.load().unwrap().is_none());
        assert_eq!(service.load_or_default().unwrap(), PipelineConfig::default());

        let mut cfg = PipelineConfig::default();
        cfg.negatives.seed = 7;
        service.save(&cfg).unwrap();
        assert_eq!(service.load_or_default().unwrap(), cfg);
        assert!(dir.path().join("pipeline.json").exists());
    }

    #[test]
    fn invalid_stored_profile_fails_instead_of_defaulting() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pipeline.json"), r#"{"id_origin": 5}"#).unwrap();
        let service = ConfigService::new(FsConfigStore::at(dir.path()).unwrap());
        let err = service.load_or_default().unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidConfig);
        assert!(err.to_string().contains("profile pipeline"));

        fs::write(dir.path().join("pipeline.json"), "{ not json").unwrap();
        let err = service.load().unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidConfig);
    }

    #[test]
    fn save_refuses_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let service = ConfigService::new(FsConfigStore::at(dir.path()).unwrap())
            .with_profile("wiki-historical")
            .unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.negatives.num_negatives = 0;
        assert_eq!(service.save(&cfg).unwrap_err().code(), crate::ErrorCode::InvalidConfig);
        assert!(!dir.path().join("wiki-historical.json").exists());

        cfg.negatives.num_negatives = 50;
        service.save(&cfg).unwrap();
        assert_eq!(service.load().unwrap(), Some(cfg));
    }

    #[test]
    fn profile_names_are_file_stems() {
        let dir = tempfile::tempdir().unwrap();
        let service = ConfigService::new(FsConfigStore::at(dir.path()).unwrap());
        assert!(matches!(
            service.with_profile("../escape"),
            Err(ConfigError::InvalidProfile(_))
        ));
    }

    #[test]
    fn from_path_reports_missing_file() {
        let err = PipelineConfig::from_path(Path::new("/nope/tgb.json")).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::MissingSource);
    }
}
