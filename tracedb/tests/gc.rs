// Copyright 2026 tracedb Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod common;

use std::{
    io,
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::{blob, create_db, create_sharded_db, path_str, shard, CountingFileSystem};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracedb::{index::BLOCK_FOOTPRINT, prelude::*};

#[test_log::test]
fn test_gc_frees_invalidated_entries() {
    let root = tempfile::tempdir().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    create_db(&a, 1, 10, [5]);
    create_db(&b, 1, 10, [5]);
    let db = TraceDbBuilder::new().build();

    let stale = db.resolve_index_block(path_str(&a), 5).unwrap();
    assert_eq!(db.read_to_vec(path_str(&b), 5).unwrap(), blob(5));

    // The id now belongs to `b`, the block of `a` is invalid but still readable by its holder.
    assert!(!stale.is_valid());
    assert!(!stale.path().is_valid());
    assert!(stale.record(5).is_some());
    let statistics = db.statistics();
    assert_eq!(statistics.index_invalidations, 1);

    let usage = db.cache_usage().unwrap();
    assert_eq!(usage.blocks, 2);
    assert_eq!(usage.paths, 2);

    db.collect_garbage();
    let usage = db.cache_usage().unwrap();
    assert_eq!(usage.blocks, 1);
    assert_eq!(usage.paths, 1);
    assert_eq!(stale.path().path(), path_str(&a));

    let fresh = db.resolve_index_block(path_str(&b), 5).unwrap();
    assert!(fresh.is_valid());
    assert_eq!(fresh.path().path(), path_str(&b));
}

#[test_log::test]
fn test_gc_trims_to_soft_limits() {
    let dir = tempfile::tempdir().unwrap();
    create_sharded_db(dir.path(), 4);
    // One blob in each of four index blocks.
    let wide = tempfile::tempdir().unwrap();
    let wide_ids = (0..4u64).map(|block| block * 8192 + 1).collect::<Vec<_>>();
    create_db(wide.path(), 1, 4 * 8192, wide_ids.clone());

    let db = TraceDbBuilder::new().build();
    for n in 1..=4 {
        db.read_to_vec(path_str(dir.path()), n).unwrap();
    }
    for &id in &wide_ids {
        db.read_to_vec(path_str(wide.path()), id).unwrap();
    }
    let usage = db.cache_usage().unwrap();
    // Two index files and five shards.
    assert_eq!(usage.files, 7);
    assert_eq!(usage.blocks, 5);

    db.set_soft_file_limit(2).unwrap();
    db.set_soft_mem_limit(3 * BLOCK_FOOTPRINT).unwrap();
    assert_eq!(db.soft_file_limit(), 2);
    assert_eq!(db.soft_mem_limit(), 3 * BLOCK_FOOTPRINT);

    db.collect_garbage();
    let usage = db.cache_usage().unwrap();
    assert_eq!(usage.files, 2);
    assert_eq!(usage.blocks, 3);
    assert_eq!(db.statistics().gc_sweeps, 1);

    // The most recently used entries survive.
    let before = db.statistics();
    db.read_to_vec(path_str(wide.path()), wide_ids[3]).unwrap();
    let after = db.statistics();
    assert_eq!(after.index_loads, before.index_loads);
}

#[test_log::test]
fn test_zero_soft_limit_disables_caching() {
    let dir = tempfile::tempdir().unwrap();
    create_db(dir.path(), 1, 10, [3]);
    let fs = CountingFileSystem::default();
    let db = TraceDbBuilder::new()
        .with_soft_file_limit(0)
        .with_soft_mem_limit(0)
        .with_file_system(fs.clone())
        .build();
    let path = path_str(dir.path());

    for _ in 0..3 {
        assert_eq!(db.read_to_vec(path, 3).unwrap(), blob(3));
    }
    let usage = db.cache_usage().unwrap();
    assert_eq!(usage.files, 0);
    assert_eq!(usage.blocks, 0);
    assert_eq!(usage.paths, 1);
    assert_eq!(fs.open_now(), 0);
    // Every read loads the block twice (size, then data) and opens the shard once.
    assert_eq!(db.statistics().index_loads, 6);
    assert_eq!(fs.opens(&shard(dir.path(), 1)), 3);
}

#[test_log::test]
fn test_too_many_open_files_lowers_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    create_sharded_db(dir.path(), 4);
    let fs = CountingFileSystem::default();
    fs.set_fd_limit(2);
    let db = TraceDbBuilder::new()
        .with_hard_file_limit(10)
        .with_file_system(fs.clone())
        .build();
    let path = path_str(dir.path());

    for n in 1..=4 {
        assert_eq!(db.read_to_vec(path, n).unwrap(), blob(n));
    }
    assert!(fs.peak() <= 2);
    assert!(db.statistics().file_limit_adaptations >= 1);
    assert!(db.cache_usage().unwrap().files <= 2);
}

#[test_log::test]
fn test_too_many_open_files_with_empty_cache_fails() {
    let dir = tempfile::tempdir().unwrap();
    create_db(dir.path(), 1, 10, [1]);
    let fs = CountingFileSystem::default();
    fs.set_fd_limit(0);
    let db = TraceDbBuilder::new().with_file_system(fs).build();

    let e = db.read(path_str(dir.path()), 1, &mut [0; 8], 0).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::TooManyOpenFiles);
}

#[test_log::test]
fn test_hard_file_limit_under_concurrency() {
    const THREADS: u64 = 8;
    const SHARDS: u32 = 4;

    let dir = tempfile::tempdir().unwrap();
    create_sharded_db(dir.path(), SHARDS);
    let fs = CountingFileSystem::default();
    let db = TraceDbBuilder::new()
        .with_hard_file_limit(3)
        .with_soft_file_limit(2)
        .with_timeout(Duration::from_secs(30))
        .with_file_system(fs.clone())
        .build();
    let gc = db.spawn_gc_task(Duration::from_millis(10)).unwrap();
    let path = path_str(dir.path()).to_string();

    let workers = (0..THREADS)
        .map(|t| {
            let db = db.clone();
            let path = path.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                for _ in 0..200 {
                    let id = rng.random_range(1..=SHARDS as u64);
                    assert_eq!(db.read_to_vec(&path, id).unwrap(), blob(id));
                }
            })
        })
        .collect::<Vec<_>>();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(fs.peak() <= 3, "peak: {}", fs.peak());
    let deadline = Instant::now() + Duration::from_secs(10);
    while db.statistics().gc_sweeps == 0 {
        assert!(Instant::now() < deadline, "gc did not run");
        thread::sleep(Duration::from_millis(10));
    }
    db.whack(Duration::from_secs(10)).unwrap();
    gc.join().unwrap().unwrap();
    assert_eq!(fs.open_now(), 0);
}

#[test_log::test]
fn test_background_gc_and_whack() {
    let dir = tempfile::tempdir().unwrap();
    create_sharded_db(dir.path(), 3);
    let db = TraceDbBuilder::new().build();
    let gc = db.spawn_gc_task(Duration::from_secs(3600)).unwrap();
    let path = path_str(dir.path());

    for n in 1..=3 {
        db.read_to_vec(path, n).unwrap();
    }
    // Lowering the limit wakes the task long before its period ends.
    db.set_soft_file_limit(1).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while db.cache_usage().unwrap().files > 1 {
        assert!(Instant::now() < deadline, "gc did not run");
        thread::sleep(Duration::from_millis(10));
    }

    db.whack(Duration::from_secs(10)).unwrap();
    gc.join().unwrap().unwrap();

    assert_eq!(db.read(path, 1, &mut [0; 8], 0).unwrap_err().kind(), ErrorKind::Closed);
    assert_eq!(db.whack(Duration::ZERO).unwrap_err().kind(), ErrorKind::Closed);
    assert_eq!(db.run_gc_task(Duration::from_millis(1)).unwrap_err().kind(), ErrorKind::Closed);
    assert_eq!(db.cache_usage().unwrap(), CacheUsage::default());
}

#[test_log::test]
fn test_hard_mem_limit_evicts_index_blocks() {
    let dir = tempfile::tempdir().unwrap();
    // One blob in each of five index blocks.
    let ids = (0..5u64).map(|block| block * 8192 + 1).collect::<Vec<_>>();
    create_db(dir.path(), 1, 5 * 8192, ids.clone());
    let db = TraceDbBuilder::new().with_hard_mem_limit(3 * BLOCK_FOOTPRINT).build();
    assert_eq!(db.hard_mem_limit(), 3 * BLOCK_FOOTPRINT);

    for &id in &ids {
        assert_eq!(db.read_to_vec(path_str(dir.path()), id).unwrap(), blob(id));
        assert!(db.cache_usage().unwrap().blocks <= 3);
    }
    let statistics = db.statistics();
    assert_eq!(statistics.index_loads, 5);
    assert_eq!(statistics.index_evictions, 2);
    assert_eq!(db.cache_usage().unwrap().blocks, 3);

    // The least recently used block was evicted and loads again.
    db.read_to_vec(path_str(dir.path()), ids[0]).unwrap();
    assert_eq!(db.statistics().index_loads, 6);
}

/// Opens wait while `gate` is held.
#[derive(Debug, Clone, Default)]
struct GatedFileSystem {
    gate: Arc<Mutex<()>>,
}

impl FileSystem for GatedFileSystem {
    fn open(&self, path: &Path) -> io::Result<Box<dyn BlobFile>> {
        drop(self.gate.lock());
        LocalFileSystem.open(path)
    }
}

#[test_log::test]
fn test_whack_busy_keeps_database_open() {
    let dir = tempfile::tempdir().unwrap();
    create_db(dir.path(), 1, 10, [3]);
    let fs = GatedFileSystem::default();
    let db = TraceDbBuilder::new()
        .with_timeout(Duration::from_secs(10))
        .with_file_system(fs.clone())
        .build();
    let path = path_str(dir.path()).to_string();

    let gate = fs.gate.lock();
    // The reader stalls in `open` with both cache locks held.
    let reader = {
        let db = db.clone();
        let path = path.clone();
        thread::spawn(move || db.read_to_vec(&path, 3))
    };
    thread::sleep(Duration::from_millis(100));
    // The first sweep then waits for the index cache lock.
    let gc = db.spawn_gc_task(Duration::from_millis(10)).unwrap();
    thread::sleep(Duration::from_millis(200));

    let e = db.whack(Duration::from_millis(50)).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Busy);

    drop(gate);
    assert_eq!(reader.join().unwrap().unwrap(), blob(3));
    assert_eq!(db.read_to_vec(&path, 3).unwrap(), blob(3));

    db.whack(Duration::from_secs(10)).unwrap();
    gc.join().unwrap().unwrap();
    assert_eq!(db.read(&path, 3, &mut [0; 8], 0).unwrap_err().kind(), ErrorKind::Closed);
}
