// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Time-ordered train/validation/test partitioning.
//!
//! Splits are quantile cuts over timestamps, never random subsets. Given
//! cumulative fractions `f1 = train` and `f2 = train + val` over `n` edges,
//! the cut timestamps are the `round(f·n)`-th smallest timestamps; an edge
//! belongs to train iff `ts <= cut1`, to val iff `cut1 < ts <= cut2`, and to
//! test otherwise. All edges sharing a timestamp therefore land in the same
//! split, and the edge sequence is never reordered.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::edges::Timestamp;
use crate::error::{Error, Result};

/// Split identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitKind {
    /// Training region (earliest timestamps).
    Train,
    /// Validation region.
    Val,
    /// Test region (latest timestamps).
    Test,
}

impl SplitKind {
    /// All splits in time order.
    pub const ALL: [SplitKind; 3] = [SplitKind::Train, SplitKind::Val, SplitKind::Test];

    /// Stable lowercase name used in artifact keys and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Train => 0,
            Self::Val => 1,
            Self::Test => 2,
        }
    }
}

impl fmt::Display for SplitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplitKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "val" | "valid" | "validation" => Ok(Self::Val),
            "test" => Ok(Self::Test),
            other => Err(Error::InvalidInput(format!("unknown split {other:?}"))),
        }
    }
}

/// Fractions of the timeline assigned to each split (must sum to 1.0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SplitFractions {
    /// Fraction assigned to train.
    pub train: f64,
    /// Fraction assigned to validation.
    pub val: f64,
    /// Fraction assigned to test.
    pub test: f64,
}

impl Default for SplitFractions {
    fn default() -> Self {
        Self {
            train: 0.70,
            val: 0.15,
            test: 0.15,
        }
    }
}

impl SplitFractions {
    /// Construct and validate.
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self> {
        let f = Self { train, val, test };
        f.validate()?;
        Ok(f)
    }

    /// Reject negative, non-finite, or non-unit-sum fractions.
    pub fn validate(&self) -> Result<()> {
        let parts = [self.train, self.val, self.test];
        if parts.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(Error::InvalidConfig(format!(
                "split fractions must be finite and non-negative, got {parts:?}"
            )));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidConfig(format!(
                "split fractions must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Cut timestamps. `None` means the preceding region is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitThresholds {
    /// Largest timestamp in train.
    pub train_end: Option<Timestamp>,
    /// Largest timestamp in train ∪ val.
    pub val_end: Option<Timestamp>,
}

impl SplitThresholds {
    /// Region of a timestamp under these cuts.
    pub fn classify(&self, ts: Timestamp) -> SplitKind {
        if self.train_end.is_some_and(|cut| ts <= cut) {
            SplitKind::Train
        } else if self.val_end.is_some_and(|cut| ts <= cut) {
            SplitKind::Val
        } else {
            SplitKind::Test
        }
    }
}

/// Three disjoint boolean masks over the edge sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitMask {
    train: Vec<bool>,
    val: Vec<bool>,
    test: Vec<bool>,
    thresholds: SplitThresholds,
}

impl SplitMask {
    /// Compute masks for `timestamps` (in edge order).
    ///
    /// With `strict`, non-decreasing input order is required and the first
    /// out-of-order row fails with a temporal-ordering error.
    pub fn generate(
        timestamps: &[Timestamp],
        fractions: SplitFractions,
        strict: bool,
    ) -> Result<Self> {
        fractions.validate()?;
        if strict {
            if let Some(row) = timestamps.windows(2).position(|w| w[1] < w[0]) {
                return Err(Error::TemporalOrdering(format!(
                    "row {} has timestamp {} after row {} with timestamp {}; \
                     strict splits need time-sorted input",
                    row + 1,
                    timestamps[row + 1],
                    row,
                    timestamps[row]
                )));
            }
        }

        let mut sorted = timestamps.to_vec();
        if !strict {
            sorted.sort_unstable();
        }
        let n = sorted.len();
        let cut = |fraction: f64| -> Option<Timestamp> {
            let k = ((fraction * n as f64).round() as usize).min(n);
            k.checked_sub(1).map(|i| sorted[i])
        };
        let thresholds = SplitThresholds {
            train_end: cut(fractions.train),
            val_end: cut(fractions.train + fractions.val),
        };

        let mut mask = Self {
            train: Vec::with_capacity(n),
            val: Vec::with_capacity(n),
            test: Vec::with_capacity(n),
            thresholds,
        };
        for &ts in timestamps {
            let kind = thresholds.classify(ts);
            mask.train.push(kind == SplitKind::Train);
            mask.val.push(kind == SplitKind::Val);
            mask.test.push(kind == SplitKind::Test);
        }
        mask.check(timestamps)?;

        let [train, val, test] = mask.counts();
        info!(
            edges = n,
            train,
            val,
            test,
            train_end = ?thresholds.train_end,
            val_end = ?thresholds.val_end,
            "split masks generated"
        );
        Ok(mask)
    }

    /// Adopt externally supplied masks after checking every invariant.
    pub fn from_masks(
        train: Vec<bool>,
        val: Vec<bool>,
        test: Vec<bool>,
        timestamps: &[Timestamp],
    ) -> Result<Self> {
        let max_of = |m: &[bool]| {
            timestamps
                .iter()
                .zip(m)
                .filter(|(_, on)| **on)
                .map(|(ts, _)| *ts)
                .max()
        };
        let thresholds = SplitThresholds {
            train_end: max_of(&train),
            val_end: max_of(&val).or(max_of(&train)),
        };
        let mask = Self {
            train,
            val,
            test,
            thresholds,
        };
        mask.check(timestamps)?;
        Ok(mask)
    }

    /// Verify lengths, exact-one coverage, and train ≤ val ≤ test in time.
    pub fn check(&self, timestamps: &[Timestamp]) -> Result<()> {
        let n = timestamps.len();
        if self.train.len() != n || self.val.len() != n || self.test.len() != n {
            return Err(Error::InvalidInput(format!(
                "mask lengths {}/{}/{} do not match {n} edges",
                self.train.len(),
                self.val.len(),
                self.test.len()
            )));
        }
        if let Some(row) = (0..n).find(|&i| {
            u8::from(self.train[i]) + u8::from(self.val[i]) + u8::from(self.test[i]) != 1
        }) {
            return Err(Error::InvalidInput(format!(
                "edge {row} is not assigned to exactly one split"
            )));
        }

        let range = |m: &[bool]| {
            timestamps
                .iter()
                .zip(m)
                .filter(|(_, on)| **on)
                .fold(None, |acc: Option<(Timestamp, Timestamp)>, (ts, _)| {
                    Some(acc.map_or((*ts, *ts), |(lo, hi)| (lo.min(*ts), hi.max(*ts))))
                })
        };
        let ranges = [
            (SplitKind::Train, range(&self.train)),
            (SplitKind::Val, range(&self.val)),
            (SplitKind::Test, range(&self.test)),
        ];
        for (i, (early, early_range)) in ranges.iter().enumerate() {
            for (late, late_range) in &ranges[i + 1..] {
                if let (Some((_, early_max)), Some((late_min, _))) = (early_range, late_range) {
                    if early_max > late_min {
                        return Err(Error::TemporalOrdering(format!(
                            "{early} contains timestamp {early_max} but {late} starts at {late_min}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Mask for one split.
    pub fn mask(&self, kind: SplitKind) -> &[bool] {
        match kind {
            SplitKind::Train => &self.train,
            SplitKind::Val => &self.val,
            SplitKind::Test => &self.test,
        }
    }

    /// Split of edge `row`, if in range.
    pub fn assignment(&self, row: usize) -> Option<SplitKind> {
        SplitKind::ALL
            .into_iter()
            .find(|kind| self.mask(*kind).get(row).copied().unwrap_or(false))
    }

    /// Edge counts in `[train, val, test]` order.
    pub fn counts(&self) -> [usize; 3] {
        SplitKind::ALL.map(|kind| self.mask(kind).iter().filter(|b| **b).count())
    }

    /// Cut timestamps.
    pub fn thresholds(&self) -> SplitThresholds {
        self.thresholds
    }

    /// BLAKE3 digest of the per-edge split assignment. Two masks with equal
    /// fingerprints put every edge in the same split.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"tgb.split.v1");
        hasher.update(&(self.len() as u64).to_le_bytes());
        let tags: Vec<u8> = (0..self.len())
            .map(|row| self.assignment(row).map_or(u8::MAX, SplitKind::tag))
            .collect();
        hasher.update(&tags);
        *hasher.finalize().as_bytes()
    }

    /// Number of edges covered.
    pub fn len(&self) -> usize {
        self.train.len()
    }

    /// Returns `true` for an empty edge sequence.
    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }
}
