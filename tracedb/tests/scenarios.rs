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
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use common::{blob, create_db, create_sharded_db, path_str, shard, CountingFileSystem};
use itertools::Itertools;
use tracedb::{index::BLOCK_FOOTPRINT, prelude::*};

#[test_log::test]
fn test_adjacent_blocks_stay_cached() {
    let dir = tempfile::tempdir().unwrap();
    create_db(dir.path(), 1, 20000, [1, 8193, 20000]);
    let db = TraceDbBuilder::new().build();
    let path = path_str(dir.path());

    let first = db.resolve_index_block(path, 1).unwrap();
    assert_eq!(first.range(), IdRange { start: 0, stop: 8191 });
    assert_eq!(first.loaded(), IdRange { start: 1, stop: 8191 });

    assert_eq!(db.read_to_vec(path, 8193).unwrap(), blob(8193));
    let second = db.resolve_index_block(path, 8193).unwrap();
    assert_eq!(second.range(), IdRange { start: 8192, stop: 16383 });

    let again = db.resolve_index_block(path, 100).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert!(first.is_valid() && second.is_valid());

    let statistics = db.statistics();
    assert_eq!(statistics.index_loads, 2);
    assert_eq!(db.cache_usage().unwrap().blocks, 2);

    // The last block is clipped to the end of the range.
    let last = db.resolve_index_block(path, 20000).unwrap();
    assert_eq!(last.loaded(), IdRange { start: 16384, stop: 20000 });
}

#[test_log::test]
fn test_concurrent_resolve_opens_once() {
    let dir = tempfile::tempdir().unwrap();
    create_sharded_db(dir.path(), 3);
    let fs = CountingFileSystem::default();
    let db = TraceDbBuilder::new().with_file_system(fs.clone()).build();
    let path = path_str(dir.path()).to_string();

    let barrier = Arc::new(Barrier::new(2));
    let handles = (0..2)
        .map(|_| {
            let db = db.clone();
            let path = path.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                db.resolve_file(&path, 3).unwrap()
            })
        })
        .collect_vec();
    let files = handles.into_iter().map(|h| h.join().unwrap()).collect_vec();

    let shard3 = shard(dir.path(), 3);
    assert!(Arc::ptr_eq(&files[0], &files[1]));
    assert_eq!(files[0].shard(), 3);
    assert_eq!(fs.opens(&shard3), 1);

    // Evicted from the cache, but still referenced.
    db.set_soft_file_limit(0).unwrap();
    db.collect_garbage();
    assert_eq!(db.cache_usage().unwrap().files, 0);
    assert_eq!(fs.closes(&shard3), 0);

    let mut files = files;
    drop(files.pop());
    assert_eq!(fs.closes(&shard3), 0);
    drop(files.pop());
    assert_eq!(fs.closes(&shard3), 1);
}

#[test_log::test]
fn test_file_quota_blocks_until_release() {
    let dir = tempfile::tempdir().unwrap();
    create_sharded_db(dir.path(), 2);
    let fs = CountingFileSystem::default();
    let db = TraceDbBuilder::new()
        .with_hard_file_limit(1)
        .with_timeout(Duration::from_secs(10))
        .with_file_system(fs.clone())
        .build();
    let path = path_str(dir.path()).to_string();

    let x = db.resolve_file(&path, 1).unwrap();

    let waiter = {
        let db = db.clone();
        let path = path.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let y = db.resolve_file(&path, 2).unwrap();
            (y.shard(), start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(300));
    assert_eq!(fs.opens(&shard(dir.path(), 2)), 0);
    drop(x);

    let (shard_no, waited) = waiter.join().unwrap();
    assert_eq!(shard_no, 2);
    assert!(waited >= Duration::from_millis(200), "{waited:?}");
    assert!(fs.peak() <= 1);
}

#[test_log::test]
fn test_index_quota_blocks_until_release() {
    let dir = tempfile::tempdir().unwrap();
    create_db(dir.path(), 1, 2 * 8192, [1, 8193]);
    let path = path_str(dir.path()).to_string();

    let db = TraceDbBuilder::new()
        .with_hard_mem_limit(BLOCK_FOOTPRINT)
        .with_timeout(Duration::from_secs(10))
        .build();
    let held = db.resolve_index_block(&path, 1).unwrap();

    let waiter = {
        let db = db.clone();
        let path = path.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let data = db.read_to_vec(&path, 8193).unwrap();
            (data, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(300));
    assert_eq!(db.statistics().index_loads, 1);
    drop(held);

    let (data, waited) = waiter.join().unwrap();
    assert_eq!(data, blob(8193));
    assert!(waited >= Duration::from_millis(200), "{waited:?}");
    assert_eq!(db.statistics().index_loads, 2);

    // Without a release the quota wait times out.
    let impatient = TraceDbBuilder::new()
        .with_hard_mem_limit(BLOCK_FOOTPRINT)
        .with_timeout(Duration::from_millis(100))
        .build();
    let held = impatient.resolve_index_block(&path, 1).unwrap();
    let e = impatient.read(&path, 8193, &mut [0; 8], 0).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ResourceExhausted);
    drop(held);
    assert_eq!(impatient.read_to_vec(&path, 8193).unwrap(), blob(8193));
}

#[test_log::test]
fn test_id_of_other_path_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    create_db(&a, 1, 50, [1, 50]);
    create_db(&b, 1, 200, [100]);
    let db = TraceDbBuilder::new().build();

    assert_eq!(db.read_to_vec(path_str(&b), 100).unwrap(), blob(100));
    let e = db.read(path_str(&a), 100, &mut [0; 8], 0).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::NotFound);

    // Both paths still serve their own ids.
    assert_eq!(db.read_to_vec(path_str(&a), 50).unwrap(), blob(50));
    assert_eq!(db.read_to_vec(path_str(&b), 100).unwrap(), blob(100));
}
