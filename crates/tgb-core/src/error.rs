// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy shared by every pipeline stage.
//!
//! Each message starts with a bracketed stable code so logs can be grepped
//! without parsing prose. Nothing here is retried or recovered internally:
//! stale or partial evaluation data must never reach a caller silently.

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::negative::QueryKey;
use crate::split::SplitKind;

/// Coarse error category for programmatic branching.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    /// An input file, directory or persisted artifact is absent.
    MissingSource,
    /// A dataset accessor was used before `preprocess`.
    NotPreprocessed,
    /// Negative samples were queried before being built or loaded.
    NotLoaded,
    /// A cached artifact was produced under a different configuration.
    StaleCache,
    /// Split boundaries would violate time order.
    TemporalOrdering,
    /// A query key has no cached negatives.
    UnknownQuery,
    /// Malformed input data.
    InvalidInput,
    /// Rejected configuration value.
    InvalidConfig,
    /// Persisted bytes failed integrity or decoding checks.
    CorruptArtifact,
    /// Filesystem failure.
    Io,
    /// Bug or worker failure.
    Internal,
}

/// Canonical error type for the core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input path does not exist.
    #[error("[MISSING_SOURCE] {}", .path.display())]
    MissingSource {
        /// The missing path.
        path: PathBuf,
    },
    /// Persisted artifact does not exist in the store.
    #[error("[MISSING_SOURCE] artifact {key} has not been published")]
    MissingArtifact {
        /// Artifact key.
        key: String,
    },
    /// Dataset accessed before the pipeline ran.
    #[error("[NOT_PREPROCESSED] {accessor}: call preprocess() first")]
    NotPreprocessed {
        /// Name of the accessor that was called.
        accessor: &'static str,
    },
    /// Negative samples for a split have not been built or loaded.
    #[error("[NOT_LOADED] negative samples for split `{split}` have not been built or loaded")]
    NotLoaded {
        /// Split that was queried.
        split: SplitKind,
    },
    /// Cached artifact is incompatible with the requested configuration.
    #[error("[STALE_CACHE] {key}: {field} cached={cached} expected={expected}")]
    StaleCache {
        /// Artifact key.
        key: String,
        /// First mismatching header field.
        field: &'static str,
        /// Value recorded in the artifact.
        cached: String,
        /// Value required by the current configuration.
        expected: String,
    },
    /// Split construction detected out-of-order timestamps.
    #[error("[TEMPORAL_ORDERING] {0}")]
    TemporalOrdering(String),
    /// Query key not present in a loaded split.
    #[error("[UNKNOWN_QUERY] split `{split}` has no negatives for {key}")]
    UnknownQuery {
        /// Split that was queried.
        split: SplitKind,
        /// The unmatched key.
        key: QueryKey,
    },
    /// Malformed input data.
    #[error("[INVALID_INPUT] {0}")]
    InvalidInput(String),
    /// Rejected configuration value.
    #[error("[INVALID_CONFIG] {0}")]
    InvalidConfig(String),
    /// Delimited-file parse failure.
    #[error("[INVALID_INPUT] csv: {0}")]
    Csv(#[from] csv::Error),
    /// Configuration store failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Artifact store failure.
    #[error(transparent)]
    Store(#[from] tgb_store::StoreError),
    /// Persisted bytes could not be decoded or violate set invariants.
    #[error("[CORRUPT_ARTIFACT] {0}")]
    Codec(String),
    /// Filesystem failure outside the artifact store.
    #[error("[IO] {}: {source}", .path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A sampling worker panicked or an internal lock was poisoned.
    #[error("[INTERNAL] {0}")]
    Internal(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Category of this error.
    pub fn code(&self) -> ErrorCode {
        use tgb_store::StoreError;
        match self {
            Self::MissingSource { .. } | Self::MissingArtifact { .. } => ErrorCode::MissingSource,
            Self::NotPreprocessed { .. } => ErrorCode::NotPreprocessed,
            Self::NotLoaded { .. } => ErrorCode::NotLoaded,
            Self::StaleCache { .. } => ErrorCode::StaleCache,
            Self::TemporalOrdering(_) => ErrorCode::TemporalOrdering,
            Self::UnknownQuery { .. } => ErrorCode::UnknownQuery,
            Self::InvalidInput(_) | Self::Csv(_) => ErrorCode::InvalidInput,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::Config(
                ConfigError::Io(_) | ConfigError::Write(_) | ConfigError::NoConfigDir(_),
            ) => ErrorCode::Io,
            Self::Config(_) => ErrorCode::InvalidConfig,
            Self::Store(StoreError::Corrupt { .. } | StoreError::ChecksumMismatch { .. })
            | Self::Codec(_) => ErrorCode::CorruptArtifact,
            Self::Store(StoreError::InvalidKey(_)) => ErrorCode::InvalidInput,
            Self::Store(StoreError::Io { .. }) | Self::Io { .. } => ErrorCode::Io,
            Self::Store(StoreError::Poisoned(_)) | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_stable_codes() {
        let err = Error::NotPreprocessed {
            accessor: "train_data",
        };
        assert!(err.to_string().starts_with("[NOT_PREPROCESSED] train_data"));
        assert_eq!(err.code(), ErrorCode::NotPreprocessed);

        let err = Error::NotLoaded {
            split: SplitKind::Val,
        };
        assert_eq!(
            err.to_string(),
            "[NOT_LOADED] negative samples for split `val` have not been built or loaded"
        );
    }

    #[test]
    fn store_errors_map_to_categories() {
        let err = Error::from(tgb_store::StoreError::Corrupt {
            key: "k".into(),
            reason: "bad magic",
        });
        assert_eq!(err.code(), ErrorCode::CorruptArtifact);
        let err = Error::from(tgb_store::StoreError::InvalidKey("a/b".into()));
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn missing_source_displays_path() {
        let err = Error::MissingSource {
            path: PathBuf::from("/data/wiki/wiki.csv"),
        };
        assert_eq!(err.to_string(), "[MISSING_SOURCE] /data/wiki/wiki.csv");
        assert_eq!(err.code(), ErrorCode::MissingSource);
    }
}
