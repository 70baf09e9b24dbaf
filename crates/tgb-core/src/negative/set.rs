// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Materialized negatives for one split and their canonical encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tgb_store::ArtifactHash;

use super::{QueryKey, SamplingPolicy};
use crate::edges::NodeId;
use crate::error::{Error, Result};
use crate::split::SplitKind;

/// Version of the payload layout. Bump on any change to the encoding or to
/// how negatives are drawn.
pub const NS_FORMAT_VERSION: u32 = 2;

/// Configuration a set was built under. Loading compares it field by field
/// with the requested configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsHeader {
    /// Payload layout version.
    pub format_version: u32,
    /// Split the queries come from.
    pub split: SplitKind,
    /// Policy used to draw negatives.
    pub policy: SamplingPolicy,
    /// Requested negatives per query.
    pub num_negatives: u64,
    /// Base seed.
    pub seed: u64,
    /// Whether same-source same-time positives were excluded.
    pub exclude_concurrent_positives: bool,
    /// Feature width of the dataset the set belongs to.
    pub feat_dim: u64,
    /// First id of the destination universe negatives were drawn from.
    pub universe_start: u64,
    /// End (exclusive) of the destination universe.
    pub universe_end: u64,
    /// BLAKE3 fingerprint of the split assignment.
    pub split_fingerprint: [u8; 32],
    /// BLAKE3 fingerprint of the reindexed edge columns.
    pub dataset_fingerprint: [u8; 32],
}

impl NsHeader {
    /// First field that differs from `expected`, as `(name, cached, expected)`.
    pub fn first_mismatch(&self, expected: &Self) -> Option<(&'static str, String, String)> {
        fn diff<T: PartialEq + ToString>(
            name: &'static str,
            cached: &T,
            expected: &T,
        ) -> Option<(&'static str, String, String)> {
            (cached != expected).then(|| (name, cached.to_string(), expected.to_string()))
        }
        diff("format_version", &self.format_version, &expected.format_version)
            .or_else(|| diff("split", &self.split, &expected.split))
            .or_else(|| diff("policy", &self.policy, &expected.policy))
            .or_else(|| diff("num_negatives", &self.num_negatives, &expected.num_negatives))
            .or_else(|| diff("seed", &self.seed, &expected.seed))
            .or_else(|| {
                diff(
                    "exclude_concurrent_positives",
                    &self.exclude_concurrent_positives,
                    &expected.exclude_concurrent_positives,
                )
            })
            .or_else(|| diff("feat_dim", &self.feat_dim, &expected.feat_dim))
            .or_else(|| diff("universe_start", &self.universe_start, &expected.universe_start))
            .or_else(|| diff("universe_end", &self.universe_end, &expected.universe_end))
            .or_else(|| {
                diff(
                    "split_fingerprint",
                    &ArtifactHash(self.split_fingerprint),
                    &ArtifactHash(expected.split_fingerprint),
                )
            })
            .or_else(|| {
                diff(
                    "dataset_fingerprint",
                    &ArtifactHash(self.dataset_fingerprint),
                    &ArtifactHash(expected.dataset_fingerprint),
                )
            })
    }
}

#[derive(Serialize, Deserialize)]
struct Wire {
    header: NsHeader,
    entries: Vec<(QueryKey, Vec<NodeId>)>,
}

/// Negatives for every positive query of one split.
///
/// Every sequence excludes its query's positive destination and holds no
/// duplicate; both are checked on construction and on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegativeSampleSet {
    header: NsHeader,
    entries: BTreeMap<QueryKey, Vec<NodeId>>,
}

impl NegativeSampleSet {
    /// Assemble a set, rejecting leaked positives and duplicates.
    pub fn new(header: NsHeader, entries: BTreeMap<QueryKey, Vec<NodeId>>) -> Result<Self> {
        for (key, negatives) in &entries {
            if negatives.contains(&key.dst) {
                return Err(Error::Codec(format!(
                    "negatives for {key} contain the positive destination"
                )));
            }
            let mut sorted = negatives.clone();
            sorted.sort_unstable();
            if sorted.windows(2).any(|w| w[0] == w[1]) {
                return Err(Error::Codec(format!("negatives for {key} contain duplicates")));
            }
        }
        Ok(Self { header, entries })
    }

    /// Build configuration.
    pub fn header(&self) -> &NsHeader {
        &self.header
    }

    /// Negatives for `key`.
    pub fn get(&self, key: &QueryKey) -> Option<&[NodeId]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Number of distinct query keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` for a split without queries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&QueryKey, &[NodeId])> + '_ {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Canonical CBOR: header, then entries in ascending key order.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        let wire = Wire {
            header: self.header.clone(),
            entries: self.entries.iter().map(|(k, v)| (*k, v.clone())).collect(),
        };
        let mut out = Vec::new();
        ciborium::ser::into_writer(&wire, &mut out)
            .map_err(|e| Error::Codec(format!("negative set encode: {e}")))?;
        Ok(out)
    }

    /// Decode and re-check every set invariant.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        let wire: Wire = ciborium::de::from_reader(bytes)
            .map_err(|e| Error::Codec(format!("negative set decode: {e}")))?;
        if wire.entries.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(Error::Codec("negative set entries are not in canonical order".into()));
        }
        Self::new(wire.header, wire.entries.into_iter().collect())
    }

    /// BLAKE3 of the canonical bytes.
    pub fn content_hash(&self) -> Result<ArtifactHash> {
        Ok(ArtifactHash(*blake3::hash(&self.to_canonical_bytes()?).as_bytes()))
    }

    /// Fail with a stale-cache error naming the first header field that
    /// differs from `expected`.
    pub fn check_compatible(&self, artifact_key: &str, expected: &NsHeader) -> Result<()> {
        match self.header.first_mismatch(expected) {
            None => Ok(()),
            Some((field, cached, expected)) => Err(Error::StaleCache {
                key: artifact_key.to_owned(),
                field,
                cached,
                expected,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn header() -> NsHeader {
        NsHeader {
            format_version: NS_FORMAT_VERSION,
            split: SplitKind::Val,
            policy: SamplingPolicy::RandomUniform,
            num_negatives: 2,
            seed: 42,
            exclude_concurrent_positives: true,
            feat_dim: 172,
            universe_start: 0,
            universe_end: 40,
            split_fingerprint: [3; 32],
            dataset_fingerprint: [7; 32],
        }
    }

    fn key(dst: NodeId, ts: i64) -> QueryKey {
        QueryKey::new(1, dst, ts, None)
    }

    #[test]
    fn canonical_bytes_decode_to_equal_set() {
        let entries = BTreeMap::from([(key(2, 5), vec![3, 4]), (key(3, 1), vec![2, 9])]);
        let set = NegativeSampleSet::new(header(), entries).unwrap();
        let bytes = set.to_canonical_bytes().unwrap();
        let back = NegativeSampleSet::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.to_canonical_bytes().unwrap(), bytes);
        assert_eq!(back.get(&key(3, 1)), Some(&[2, 9][..]));
    }

    #[test]
    fn positive_leak_is_rejected() {
        let entries = BTreeMap::from([(key(2, 5), vec![3, 2])]);
        let err = NegativeSampleSet::new(header(), entries).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::CorruptArtifact);
    }

    #[test]
    fn duplicates_are_rejected() {
        let entries = BTreeMap::from([(key(2, 5), vec![3, 3])]);
        assert!(NegativeSampleSet::new(header(), entries).is_err());
    }

    #[test]
    fn mismatch_names_first_differing_field() {
        let set = NegativeSampleSet::new(header(), BTreeMap::new()).unwrap();
        let mut expected = header();
        expected.feat_dim = 100;
        expected.dataset_fingerprint = [0; 32];
        let err = set.check_compatible("wiki_val_ns", &expected).unwrap_err();
        match err {
            Error::StaleCache {
                field,
                cached,
                expected,
                ..
            } => {
                assert_eq!(field, "feat_dim");
                assert_eq!(cached, "172");
                assert_eq!(expected, "100");
            }
            other => panic!("unexpected error {other}"),
        }
        set.check_compatible("wiki_val_ns", &header()).unwrap();
    }

    #[test]
    fn universe_and_split_changes_are_stale() {
        let set = NegativeSampleSet::new(header(), BTreeMap::new()).unwrap();
        let field_of = |expected: NsHeader| match set.check_compatible("k", &expected) {
            Err(Error::StaleCache { field, .. }) => field,
            other => panic!("expected stale cache, got {other:?}"),
        };

        let mut wider = header();
        wider.universe_end = 1000;
        assert_eq!(field_of(wider), "universe_end");

        let mut shifted = header();
        shifted.universe_start = 1;
        assert_eq!(field_of(shifted), "universe_start");

        let mut resplit = header();
        resplit.split_fingerprint = [4; 32];
        assert_eq!(field_of(resplit), "split_fingerprint");
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let err = NegativeSampleSet::from_canonical_bytes(b"not cbor").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::CorruptArtifact);
    }
}
