// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use tgb_store::{ArtifactStore, FsStore, MemoryStore};

fn payload(writer: u8) -> Vec<u8> {
    vec![writer; 64 * 1024]
}

fn hammer(store: Arc<dyn ArtifactStore>) {
    std::thread::scope(|s| {
        for writer in 0..8u8 {
            let store = Arc::clone(&store);
            s.spawn(move || {
                for _ in 0..10 {
                    store.publish("shared_val_ns", &payload(writer)).unwrap();
                }
            });
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            s.spawn(move || {
                for _ in 0..50 {
                    // Every observed artifact is one writer's complete payload.
                    if let Some(bytes) = store.load("shared_val_ns").unwrap() {
                        assert_eq!(bytes.len(), 64 * 1024);
                        assert!(bytes.iter().all(|b| *b == bytes[0]));
                    }
                }
            });
        }
    });
    assert_eq!(store.keys().unwrap(), vec!["shared_val_ns"]);
}

#[test]
fn fs_store_readers_never_observe_partial_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    hammer(Arc::new(FsStore::open(dir.path()).unwrap()));
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".tmp")
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn memory_store_readers_never_observe_partial_artifacts() {
    hammer(Arc::new(MemoryStore::new()));
}
