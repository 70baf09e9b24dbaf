// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Serial and parallel execution of independent per-query work.
//!
//! Items are cut into fixed-size chunks that workers claim through an atomic
//! counter. Execution order across workers is non-deterministic; results are
//! merged back by chunk index, so the output is identical to the serial path
//! for any worker count.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// Items claimed per atomic fetch.
pub(crate) const CHUNK: usize = 256;

/// Worker count for a request; 0 means the available parallelism.
pub(crate) fn resolve_workers(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Serial baseline.
pub(crate) fn execute_serial<T, R>(items: &[T], f: impl Fn(&T) -> R) -> Vec<R> {
    items.iter().map(f).collect()
}

/// Run `f` over `items` on up to `workers` scoped threads, returning results
/// in item order.
pub(crate) fn execute<T, R, F>(items: &[T], workers: usize, f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let chunks = items.len().div_ceil(CHUNK);
    let workers = resolve_workers(workers).min(chunks);
    if workers <= 1 {
        return Ok(execute_serial(items, f));
    }

    let next_chunk = AtomicUsize::new(0);
    let mut claimed: Vec<(usize, Vec<R>)> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let next_chunk = &next_chunk;
                let f = &f;
                s.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let chunk = next_chunk.fetch_add(1, Ordering::Relaxed);
                        if chunk >= chunks {
                            break;
                        }
                        let start = chunk * CHUNK;
                        let end = (start + CHUNK).min(items.len());
                        done.push((chunk, items[start..end].iter().map(f).collect()));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| Error::Internal("sampling worker panicked")))
            .collect::<Result<Vec<Vec<(usize, Vec<R>)>>>>()
    })?
    .into_iter()
    .flatten()
    .collect();

    claimed.sort_unstable_by_key(|(chunk, _)| *chunk);
    Ok(claimed.into_iter().flat_map(|(_, results)| results).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parallel_matches_serial_for_any_worker_count() {
        let items: Vec<u64> = (0..(CHUNK as u64 * 5 + 17)).collect();
        let serial = execute_serial(&items, |x| x * x + 1);
        for workers in [1, 2, 3, 8, 64] {
            assert_eq!(execute(&items, workers, |x| x * x + 1).unwrap(), serial, "{workers}");
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let items: Vec<u8> = Vec::new();
        assert!(execute(&items, 4, |x| *x).unwrap().is_empty());
    }

    #[test]
    fn auto_workers_is_positive() {
        assert!(resolve_workers(0) >= 1);
        assert_eq!(resolve_workers(3), 3);
    }

    #[test]
    fn worker_panic_becomes_internal_error() {
        let items: Vec<usize> = (0..CHUNK * 4).collect();
        let err = execute(&items, 4, |x| {
            assert!(*x != CHUNK * 3, "boom");
            *x
        })
        .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Internal);
    }
}
