// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use tgb_core::{
    reindex, Edge, EdgeColumns, NegativeSampler, NodeClass, ReindexMode, SamplingParams,
    SamplingPolicy, SplitFractions, SplitKind, SplitMask,
};
use tgb_store::MemoryStore;

fn columns(rows: &[(u64, u64, i64)]) -> EdgeColumns {
    let mut cols = EdgeColumns::default();
    for (i, (src, dst, ts)) in rows.iter().enumerate() {
        cols.push(Edge {
            src: *src,
            dst: *dst,
            ts: *ts,
            rel: None,
            weight: None,
            original_index: i as u64,
        })
        .unwrap();
    }
    cols
}

/// Time-sorted edges over a small raw id space so collisions are common.
fn sorted_edges() -> impl Strategy<Value = Vec<(u64, u64, i64)>> {
    prop::collection::vec((0u64..40, 0u64..40, 0i64..30), 1..120).prop_map(|mut rows| {
        rows.sort_by_key(|(_, _, ts)| *ts);
        rows
    })
}

/// (train, val) fractions; test takes the remainder.
fn fractions() -> impl Strategy<Value = SplitFractions> {
    (0u32..=20, 0u32..=20).prop_filter_map("fractions sum past 1", |(a, b)| {
        (a + b <= 20).then(|| {
            let (train, val) = (f64::from(a) / 20.0, f64::from(b) / 20.0);
            SplitFractions {
                train,
                val,
                test: 1.0 - train - val,
            }
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn reindexed_ids_are_contiguous_and_unique(rows in sorted_edges(), origin in 0u64..=1) {
        let raw = columns(&rows);
        let (dense, map) = reindex(&raw, ReindexMode::Shared, origin).unwrap();
        let ids: HashSet<u64> = dense.sources.iter().chain(&dense.destinations).copied().collect();
        prop_assert_eq!(ids.len(), map.len());
        prop_assert!(ids.iter().all(|id| map.full_range().contains(id)));
        // the mapping is a bijection on the ids it handed out
        for (raw_id, dense_id) in raw.sources.iter().zip(&dense.sources) {
            prop_assert_eq!(map.raw(*dense_id), Some(*raw_id));
        }
    }

    #[test]
    fn bipartite_ranges_never_intersect(rows in sorted_edges()) {
        let raw = columns(&rows);
        let (dense, map) = reindex(&raw, ReindexMode::Bipartite, 0).unwrap();
        let src = map.class_range(NodeClass::Source);
        let dst = map.class_range(NodeClass::Destination);
        prop_assert!(src.end <= dst.start);
        prop_assert!(dense.sources.iter().all(|id| src.contains(id)));
        prop_assert!(dense.destinations.iter().all(|id| dst.contains(id)));
    }

    #[test]
    fn masks_partition_edges_in_time_order(rows in sorted_edges(), f in fractions()) {
        let cols = columns(&rows);
        let mask = SplitMask::generate(&cols.timestamps, f, true).unwrap();
        for row in 0..cols.len() {
            let hits = SplitKind::ALL
                .iter()
                .filter(|kind| mask.mask(**kind)[row])
                .count();
            prop_assert_eq!(hits, 1);
        }
        let max_train = cols.timestamps.iter().zip(mask.mask(SplitKind::Train))
            .filter(|(_, on)| **on).map(|(ts, _)| *ts).max();
        let min_test = cols.timestamps.iter().zip(mask.mask(SplitKind::Test))
            .filter(|(_, on)| **on).map(|(ts, _)| *ts).min();
        if let (Some(train), Some(test)) = (max_train, min_test) {
            prop_assert!(train <= test);
        }
    }

    #[test]
    fn negatives_never_contain_the_positive(
        rows in sorted_edges(),
        policy in prop::sample::select(vec![
            SamplingPolicy::RandomUniform,
            SamplingPolicy::Historical,
            SamplingPolicy::Inductive,
        ]),
        n in 1usize..12,
        seed in any::<u64>(),
    ) {
        let (dense, map) = reindex(&columns(&rows), ReindexMode::Shared, 0).unwrap();
        let mask = SplitMask::generate(&dense.timestamps, SplitFractions::default(), true).unwrap();
        let sampler = NegativeSampler::new(
            "prop",
            Arc::new(dense),
            Arc::new(mask),
            map.full_range(),
            Arc::new(MemoryStore::new()),
        )
        .with_workers(2);
        for split in [SplitKind::Val, SplitKind::Test] {
            let set = sampler.generate(split, &SamplingParams::new(policy, n, seed)).unwrap();
            for (key, negatives) in set.iter() {
                prop_assert!(!negatives.contains(&key.dst));
                prop_assert!(negatives.len() <= n);
                let distinct: HashSet<_> = negatives.iter().collect();
                prop_assert_eq!(distinct.len(), negatives.len());
            }
        }
    }
}
