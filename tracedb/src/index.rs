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

//! Cached slices of a path's index file.

use std::{
    cmp::Ordering,
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc,
    },
};

use tracedb_common::{
    error::{Error, Result},
    semaphore::OwnedPermit,
};
use tracedb_memory::CacheNode;

use crate::{
    fs::{read_exact_at, BlobFile},
    layout::{block_range, IdRange, IndexVersion, LocationRecord, BLOCK_ENTRIES, RECORD_SIZE},
    path::{PathEntry, PathRegistry},
};

/// Memory charged against the index memory limit for one cached block.
pub const BLOCK_FOOTPRINT: usize = BLOCK_ENTRIES as usize * RECORD_SIZE + std::mem::size_of::<CacheNode<IndexBlock>>();

/// Up to [`BLOCK_ENTRIES`] location records of one path, loaded from its index file.
pub struct IndexBlock {
    path: Arc<PathEntry>,
    range: IdRange,
    loaded: IdRange,
    version: IndexVersion,
    records: Box<[u8]>,
    valid: AtomicBool,
    _permit: OwnedPermit,
}

impl Debug for IndexBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBlock")
            .field("path", &self.path.path())
            .field("range", &self.range)
            .field("loaded", &self.loaded)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl IndexBlock {
    /// Read the block holding `id` from the index file of `path`.
    ///
    /// `path` must have its id range set and `id` must lie inside it. The block keeps `permit` until it drops.
    pub(crate) fn load(
        path: Arc<PathEntry>,
        file: &dyn BlobFile,
        version: IndexVersion,
        id: u64,
        permit: OwnedPermit,
    ) -> Result<Self> {
        let Some(header) = path.range() else {
            return Err(Error::not_found("index header not loaded").with_context("path", path.path()));
        };
        let range = block_range(id);
        let loaded = IdRange {
            start: range.start.max(header.start),
            stop: range.stop.min(header.stop),
        };

        let len = loaded.count() as usize * RECORD_SIZE;
        let pos = version.header_size() as u64 + (loaded.start - header.start) * RECORD_SIZE as u64;
        let mut records = vec![0; len].into_boxed_slice();
        let read = read_exact_at(file, &mut records, pos)?;
        if read != len {
            tracing::warn!(
                "[index]: short read from index of {:?} at {pos}, expected {len}, got {read}",
                path.path()
            );
            return Err(Error::short_read(len, read).with_context("path", path.path()));
        }

        tracing::debug!(
            "[index]: loaded ids {}..={} of {:?}",
            loaded.start,
            loaded.stop,
            path.path()
        );

        Ok(Self {
            path,
            range,
            loaded,
            version,
            records,
            valid: AtomicBool::new(true),
            _permit: permit,
        })
    }

    /// The path owning the block.
    pub fn path(&self) -> &Arc<PathEntry> {
        &self.path
    }

    /// Aligned id range the block answers for.
    pub fn range(&self) -> IdRange {
        self.range
    }

    /// Ids whose records were actually loaded.
    pub fn loaded(&self) -> IdRange {
        self.loaded
    }

    /// Location record of `id`, `None` if the block holds no record for it.
    pub fn record(&self, id: u64) -> Option<LocationRecord> {
        if !self.loaded.contains(id) {
            return None;
        }
        let at = (id - self.loaded.start) as usize * RECORD_SIZE;
        let mut raw = [0; RECORD_SIZE];
        raw.copy_from_slice(&self.records[at..at + RECORD_SIZE]);
        Some(LocationRecord::decode(self.version, &raw))
    }

    /// Returns `false` once the owning path has been replaced.
    pub fn is_valid(&self) -> bool {
        self.valid.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, AtomicOrdering::Release);
    }

    /// Compare a looked up id with a cached block. Invalid blocks never match.
    pub(crate) fn search_order(id: u64, block: &IndexBlock) -> Ordering {
        if !block.is_valid() {
            return Ordering::Greater;
        }
        if id < block.range.start {
            Ordering::Less
        } else if id > block.range.stop {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// Cache order: invalid blocks first, then by range, then by owning path.
    pub(crate) fn sort(a: &IndexBlock, b: &IndexBlock) -> Ordering {
        a.is_valid()
            .cmp(&b.is_valid())
            .then_with(|| a.range.start.cmp(&b.range.start))
            .then_with(|| a.range.stop.cmp(&b.range.stop))
            .then_with(|| Arc::as_ptr(&a.path).cmp(&Arc::as_ptr(&b.path)))
    }
}

/// State guarded by the index cache lock.
#[derive(Debug)]
pub struct IndexState {
    /// Known database directories.
    pub paths: PathRegistry,
    /// Effective cap on cached blocks.
    pub max: usize,
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tracedb_common::semaphore::Semaphore;

    use super::*;
    use crate::{
        fs::{FileSystem, LocalFileSystem},
        layout::IndexHeader,
        path::path_hash,
    };

    fn write_index(dir: &std::path::Path, range: IdRange) -> Box<dyn BlobFile> {
        let path = dir.join("idx2");
        let mut f = File::create(&path).unwrap();
        f.write_all(
            &IndexHeader {
                version: IndexVersion::V2,
                range,
            }
            .encode(),
        )
        .unwrap();
        for id in range.start..=range.stop {
            f.write_all(&LocationRecord { offset: id * 100, size: id as u32 }.encode())
                .unwrap();
        }
        LocalFileSystem.open(&path).unwrap()
    }

    fn entry(range: IdRange) -> Arc<PathEntry> {
        let entry = PathEntry::new("/db", path_hash("/db"));
        entry.set_range(range);
        entry
    }

    #[test_log::test]
    fn test_load_clips_to_path_range() {
        let dir = tempfile::tempdir().unwrap();
        let range = IdRange { start: 1, stop: 20000 };
        let file = write_index(dir.path(), range);
        let semaphore = Arc::new(Semaphore::new(4));

        let first = IndexBlock::load(
            entry(range),
            file.as_ref(),
            IndexVersion::V2,
            5,
            semaphore.try_acquire_owned().unwrap(),
        )
        .unwrap();
        assert_eq!(first.range(), IdRange { start: 0, stop: 8191 });
        assert_eq!(first.loaded(), IdRange { start: 1, stop: 8191 });
        assert_eq!(first.record(0), None);
        assert_eq!(first.record(5), Some(LocationRecord { offset: 500, size: 5 }));

        let last = IndexBlock::load(
            entry(range),
            file.as_ref(),
            IndexVersion::V2,
            19999,
            semaphore.try_acquire_owned().unwrap(),
        )
        .unwrap();
        assert_eq!(last.loaded(), IdRange { start: 16384, stop: 20000 });
        assert_eq!(
            last.record(20000),
            Some(LocationRecord {
                offset: 2_000_000,
                size: 20000
            })
        );
        assert_eq!(last.record(20001), None);

        assert_eq!(semaphore.available(), 2);
        drop((first, last));
        assert_eq!(semaphore.available(), 4);
    }

    #[test_log::test]
    fn test_truncated_index_is_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_index(dir.path(), IdRange { start: 1, stop: 10 });
        let semaphore = Arc::new(Semaphore::new(1));

        // The header claims more ids than the file holds.
        let e = IndexBlock::load(
            entry(IdRange { start: 1, stop: 100 }),
            file.as_ref(),
            IndexVersion::V2,
            3,
            semaphore.try_acquire_owned().unwrap(),
        )
        .unwrap_err();
        assert_eq!(e.kind(), tracedb_common::error::ErrorKind::ShortRead);
        assert_eq!(semaphore.available(), 1);
    }

    #[test_log::test]
    fn test_search_skips_invalid_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let range = IdRange { start: 1, stop: 100 };
        let file = write_index(dir.path(), range);
        let semaphore = Arc::new(Semaphore::new(2));
        let load = || {
            IndexBlock::load(
                entry(range),
                file.as_ref(),
                IndexVersion::V2,
                1,
                semaphore.try_acquire_owned().unwrap(),
            )
            .unwrap()
        };
        let a = load();
        let b = load();

        assert_eq!(IndexBlock::search_order(50, &a), Ordering::Equal);
        assert_eq!(IndexBlock::search_order(9000, &a), Ordering::Greater);
        assert_ne!(IndexBlock::sort(&a, &b), Ordering::Equal);

        b.invalidate();
        assert_eq!(IndexBlock::search_order(50, &b), Ordering::Greater);
        assert_eq!(IndexBlock::sort(&b, &a), Ordering::Less);
    }
}
