use std::sync::Arc;
use std::thread;

use loam_store::{ChunkRecord, ChunkStore, DirChunkStore, MemoryChunkStore, StoreError};
use loam_world::{Block, BlockChange, ChunkCoord};

fn change(x: usize, y: usize, z: usize, after: Block) -> BlockChange {
    BlockChange::new(x, y, z, Block::AIR, after).unwrap()
}

fn exercise_store(store: &dyn ChunkStore) {
    let coord = ChunkCoord::new(-3, 1, 7);
    assert!(store.load_overlay(coord).unwrap().is_empty());

    let first = ChunkRecord::new(coord, vec![change(1, 2, 3, Block::STONE)]);
    store.save(&first).unwrap();
    assert_eq!(store.load_overlay(coord).unwrap(), first.changes);

    // A later save replaces the earlier overlay rather than appending to it.
    let second = ChunkRecord::new(
        coord,
        vec![change(1, 2, 3, Block::STONE), change(15, 0, 15, Block::SNOW)],
    );
    store.save(&second).unwrap();
    store.save(&second).unwrap();
    assert_eq!(store.load_overlay(coord).unwrap(), second.changes);
    assert!(store.load_overlay(coord.offset(1, 0, 0)).unwrap().is_empty());

    assert!(!store.has_world_data());
    assert!(matches!(store.load_seed(), Err(StoreError::MissingWorldData)));
    store.save_seed(-42).unwrap();
    assert!(store.has_world_data());
    assert_eq!(store.load_seed().unwrap(), -42);
}

#[test]
fn memory_store_contract() {
    let store = MemoryChunkStore::new();
    exercise_store(&store);
    assert_eq!(store.saves_of(ChunkCoord::new(-3, 1, 7)), 3);
    assert_eq!(store.stats().block_changes, 2);
}

#[test]
fn dir_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirChunkStore::open(dir.path()).unwrap();
    exercise_store(&store);

    let reopened = DirChunkStore::open(dir.path()).unwrap();
    assert_eq!(reopened.load_seed().unwrap(), -42);
    assert_eq!(reopened.load_overlay(ChunkCoord::new(-3, 1, 7)).unwrap().len(), 2);
}

#[test]
fn dir_store_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirChunkStore::open(dir.path()).unwrap();
    let path = dir.path().join("chunks").join("c.0.0.0.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();
    let err = store.load_overlay(ChunkCoord::new(0, 0, 0)).unwrap_err();
    assert!(matches!(err, StoreError::Decode { .. }));
}

#[test]
fn dir_store_parallel_saves() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DirChunkStore::open(dir.path()).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    // Threads share coordinates pairwise to hit the same-chunk path.
                    let coord = ChunkCoord::new(t / 2, 0, i);
                    let rec = ChunkRecord::new(coord, vec![change(t as usize, 0, 0, Block::DIRT)]);
                    store.save(&rec).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    for cx in 0..4 {
        for i in 0..10 {
            let overlay = store.load_overlay(ChunkCoord::new(cx, 0, i)).unwrap();
            assert_eq!(overlay.len(), 1);
            assert!(overlay[0].x as i32 / 2 == cx);
        }
    }
}
