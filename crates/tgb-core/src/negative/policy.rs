// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-query negative drawing.
//!
//! Each query owns a private [`Prng`] stream keyed by
//! `seed ‖ policy ‖ split ‖ query key`, so a query's negatives never depend
//! on which other queries exist, their order, or the worker that ran them.
//!
//! Collision rules shared by every policy:
//! * the query's positive destination is never drawn;
//! * with `exclude_concurrent_positives`, no destination the source reaches at
//!   the query timestamp is drawn;
//! * a sequence never repeats an id. When the eligible universe is smaller
//!   than requested the sequence is shorter.

use std::ops::Range;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{QueryKey, SamplingParams, SamplingPolicy};
use crate::edges::{EdgeColumns, NodeId, Timestamp};
use crate::prng::Prng;
use crate::split::{SplitKind, SplitMask};

/// Candidate ids a draw picks from. Entries are distinct.
#[derive(Debug, Clone)]
pub(crate) enum Pool<'a> {
    Range(Range<NodeId>),
    Slice(&'a [NodeId]),
}

impl Pool<'_> {
    fn len(&self) -> u64 {
        match self {
            Self::Range(r) => r.end.saturating_sub(r.start),
            Self::Slice(s) => s.len() as u64,
        }
    }

    fn at(&self, i: u64) -> NodeId {
        match self {
            Self::Range(r) => r.start + i,
            Self::Slice(s) => s[i as usize],
        }
    }

    fn contains(&self, id: NodeId) -> bool {
        match self {
            Self::Range(r) => r.contains(&id),
            Self::Slice(s) => s.contains(&id),
        }
    }
}

/// Append up to `target - out.len()` distinct ids from `pool` that are not in
/// `excluded`; every drawn id is added to `excluded`.
pub(crate) fn draw_distinct(
    rng: &mut Prng,
    pool: Pool<'_>,
    excluded: &mut FxHashSet<NodeId>,
    out: &mut Vec<NodeId>,
    target: usize,
) {
    let want = target.saturating_sub(out.len()) as u64;
    let size = pool.len();
    if want == 0 || size == 0 {
        return;
    }
    let blocked = match &pool {
        Pool::Range(_) => excluded.iter().filter(|id| pool.contains(**id)).count() as u64,
        Pool::Slice(s) => s.iter().filter(|id| excluded.contains(*id)).count() as u64,
    };
    let available = size - blocked;
    if available == 0 {
        return;
    }

    if 2 * (blocked + want) <= size {
        // sparse: rejection sampling terminates quickly at ≥ 50% acceptance
        let mut remaining = want;
        while remaining > 0 {
            let id = pool.at(rng.next_below(size));
            if excluded.insert(id) {
                out.push(id);
                remaining -= 1;
            }
        }
        return;
    }

    let mut candidates: Vec<NodeId> = (0..size)
        .map(|i| pool.at(i))
        .filter(|id| !excluded.contains(id))
        .collect();
    let take = (want as usize).min(candidates.len());
    rng.shuffle_prefix(&mut candidates, take);
    for &id in &candidates[..take] {
        excluded.insert(id);
        out.push(id);
    }
}

/// Lookup tables shared read-only by all workers for one split.
pub(crate) struct SamplingContext {
    params: SamplingParams,
    split: SplitKind,
    universe: Range<NodeId>,
    concurrent: FxHashMap<(NodeId, Timestamp), Vec<NodeId>>,
    /// Per source, `(ts, dst)` in time order.
    history: FxHashMap<NodeId, Vec<(Timestamp, NodeId)>>,
    /// Sorted universe ids with no incident edge before the split starts.
    unseen: Vec<NodeId>,
}

impl SamplingContext {
    pub(crate) fn new(
        edges: &EdgeColumns,
        mask: &SplitMask,
        split: SplitKind,
        universe: Range<NodeId>,
        params: SamplingParams,
    ) -> Self {
        let mut concurrent: FxHashMap<(NodeId, Timestamp), Vec<NodeId>> = FxHashMap::default();
        if params.exclude_concurrent_positives {
            for e in edges.iter() {
                concurrent.entry((e.src, e.ts)).or_default().push(e.dst);
            }
        }

        let mut history: FxHashMap<NodeId, Vec<(Timestamp, NodeId)>> = FxHashMap::default();
        if params.policy == SamplingPolicy::Historical {
            for e in edges.iter() {
                history.entry(e.src).or_default().push((e.ts, e.dst));
            }
            for events in history.values_mut() {
                // stable: keeps file order among equal timestamps
                events.sort_by_key(|(ts, _)| *ts);
            }
        }

        let mut unseen = Vec::new();
        if params.policy == SamplingPolicy::Inductive {
            let split_start = edges
                .timestamps
                .iter()
                .zip(mask.mask(split))
                .filter(|(_, on)| **on)
                .map(|(ts, _)| *ts)
                .min();
            let mut seen = FxHashSet::default();
            if let Some(start) = split_start {
                for e in edges.iter().filter(|e| e.ts < start) {
                    seen.insert(e.src);
                    seen.insert(e.dst);
                }
            }
            unseen = universe.clone().filter(|id| !seen.contains(id)).collect();
        }

        Self {
            params,
            split,
            universe,
            concurrent,
            history,
            unseen,
        }
    }

    /// Deterministic stream for one query.
    pub(crate) fn stream(&self, key: &QueryKey) -> Prng {
        let mut material = Vec::with_capacity(8 + 2 + QueryKey::ENCODED_LEN);
        material.extend_from_slice(&self.params.seed.to_le_bytes());
        material.push(self.params.policy.tag());
        material.push(self.split.tag());
        material.extend_from_slice(&key.to_bytes());
        Prng::from_key(&material)
    }

    /// Distinct destinations seen with `src` strictly before `ts`, first-seen order.
    fn historical_pool(&self, src: NodeId, ts: Timestamp) -> Vec<NodeId> {
        let Some(events) = self.history.get(&src) else {
            return Vec::new();
        };
        let end = events.partition_point(|(t, _)| *t < ts);
        let mut seen = FxHashSet::default();
        events[..end]
            .iter()
            .map(|(_, dst)| *dst)
            .filter(|dst| self.universe.contains(dst) && seen.insert(*dst))
            .collect()
    }

    /// Negatives for one query.
    pub(crate) fn sample(&self, key: &QueryKey) -> Vec<NodeId> {
        let target = self.params.num_negatives;
        let mut rng = self.stream(key);
        let mut excluded = FxHashSet::default();
        excluded.insert(key.dst);
        if let Some(positives) = self.concurrent.get(&(key.src, key.ts)) {
            excluded.extend(positives.iter().copied());
        }

        let mut out = Vec::with_capacity(target);
        match self.params.policy {
            SamplingPolicy::RandomUniform => {}
            SamplingPolicy::Historical => {
                let pool = self.historical_pool(key.src, key.ts);
                draw_distinct(&mut rng, Pool::Slice(&pool), &mut excluded, &mut out, target);
            }
            SamplingPolicy::Inductive => {
                draw_distinct(&mut rng, Pool::Slice(&self.unseen), &mut excluded, &mut out, target);
            }
        }
        // uniform draws fill whatever the policy pool could not
        draw_distinct(
            &mut rng,
            Pool::Range(self.universe.clone()),
            &mut excluded,
            &mut out,
            target,
        );
        out
    }
}
