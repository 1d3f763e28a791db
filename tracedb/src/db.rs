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

//! The [`TraceDb`] object and its read path.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use tracedb_common::{
    error::{is_too_many_open_files, Error, ErrorKind, Result},
    semaphore::Semaphore,
};
use tracedb_memory::{Cache, CacheEntry, CacheNode, CacheWriteGuard};

use crate::{
    builder::TraceDbOptions,
    codec::{ColumnDecoder, ColumnKind},
    file::{FileState, OpenFile},
    fs::{read_exact_at, FileSystem},
    gc::GcControl,
    index::{IndexBlock, IndexState, BLOCK_FOOTPRINT},
    layout::{shard_path, BlobHeader, IdRange, IndexHeader, IndexVersion, LocationRecord, BLOB_HEADER_SIZE},
    path::{path_hash, PathEntry},
    statistics::{add, bump, Statistics, StatisticsSnapshot},
};

/// Shared reference to a cached open file.
pub type FileHandle = CacheEntry<OpenFile>;
/// Shared reference to a cached index block.
pub type IndexBlockHandle = CacheEntry<IndexBlock>;

type IndexGuard<'a> = CacheWriteGuard<'a, IndexBlock, IndexState>;

/// Location and stored header of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderInfo {
    /// Global object offset from the index, `0` if there is no blob.
    pub location: u64,
    /// Blob size from the index.
    pub size: u32,
    /// Header stored in front of the blob, `None` if there is no blob.
    pub header: Option<BlobHeader>,
}

/// Cached entry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheUsage {
    /// Open files counted against the soft file limit.
    pub files: usize,
    /// Index blocks counted against the soft memory limit.
    pub blocks: usize,
    /// Registered database directories, invalid ones included.
    pub paths: usize,
}

pub(crate) struct TraceDbInner {
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) version: IndexVersion,
    pub(crate) timeout: Duration,

    pub(crate) indices: Cache<IndexBlock, IndexState>,
    pub(crate) files: Cache<OpenFile, FileState>,

    index_quota: Arc<Semaphore>,
    file_quota: Arc<Semaphore>,
    hard_blocks: usize,
    hard_files: usize,
    pub(crate) soft_blocks: AtomicUsize,
    pub(crate) soft_files: AtomicUsize,

    pub(crate) gc: GcControl,
    pub(crate) quitting: AtomicBool,
    closed: AtomicBool,

    pub(crate) statistics: Statistics,
}

/// A sharded, cached, flat-file blob store.
///
/// Blobs are addressed by a database directory path and a numeric id. Index blocks and open files are cached under
/// hard limits that are never exceeded and soft limits that the GC task trims down to.
///
/// `TraceDb` is cheap to clone; clones share the same caches.
#[derive(Clone)]
pub struct TraceDb {
    pub(crate) inner: Arc<TraceDbInner>,
}

impl std::fmt::Debug for TraceDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceDb")
            .field("version", &self.inner.version)
            .field("hard_files", &self.inner.hard_files)
            .field("hard_blocks", &self.inner.hard_blocks)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl TraceDb {
    /// Default open file limit.
    pub const DEFAULT_FILE_LIMIT: usize = 350;
    /// Default index memory limit.
    pub const DEFAULT_MEM_LIMIT: usize = 1200 * 1024 * 1024;
    /// Default timeout for lock and quota acquisition.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

    /// Create a database with default settings. A limit of `0` selects the default.
    pub fn init(hard_file_limit: usize, hard_mem_limit: usize) -> Self {
        crate::builder::TraceDbBuilder::new()
            .with_hard_file_limit(hard_file_limit)
            .with_hard_mem_limit(hard_mem_limit)
            .build()
    }

    pub(crate) fn open(options: TraceDbOptions, fs: Arc<dyn FileSystem>) -> Self {
        let hard_files = match options.hard_file_limit {
            0 => Self::DEFAULT_FILE_LIMIT,
            limit => limit,
        };
        let hard_mem = match options.hard_mem_limit {
            0 => Self::DEFAULT_MEM_LIMIT,
            limit => limit.max(BLOCK_FOOTPRINT),
        };
        let hard_blocks = hard_mem / BLOCK_FOOTPRINT;
        let soft_files = options.soft_file_limit.unwrap_or(hard_files);
        let soft_blocks = options
            .soft_mem_limit
            .map(|bytes| bytes / BLOCK_FOOTPRINT)
            .unwrap_or(hard_blocks);

        tracing::info!(
            "[tracedb]: init, index version: {:?}, file limit: {hard_files}, index block limit: {hard_blocks}, timeout: {:?}",
            options.index_version,
            options.timeout
        );

        let inner = TraceDbInner {
            fs,
            version: options.index_version,
            timeout: options.timeout,
            indices: Cache::new(
                "index cache",
                IndexState {
                    paths: Default::default(),
                    max: hard_blocks,
                },
            ),
            files: Cache::new("file cache", FileState { max: hard_files }),
            index_quota: Arc::new(Semaphore::new(hard_blocks)),
            file_quota: Arc::new(Semaphore::new(hard_files)),
            hard_blocks,
            hard_files,
            soft_blocks: AtomicUsize::new(soft_blocks),
            soft_files: AtomicUsize::new(soft_files),
            gc: GcControl::new(),
            quitting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            statistics: Statistics::default(),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Hard cap on open files.
    pub fn hard_file_limit(&self) -> usize {
        self.inner.hard_files
    }

    /// Hard cap on index memory, rounded down to whole blocks.
    pub fn hard_mem_limit(&self) -> usize {
        self.inner.hard_blocks * BLOCK_FOOTPRINT
    }

    /// Number of cached files the GC task trims down to.
    pub fn soft_file_limit(&self) -> usize {
        self.inner.soft_files.load(Ordering::Acquire)
    }

    /// Set the soft file limit. `0` disables file caching.
    ///
    /// Lowering the limit below the cached count wakes the GC task; the cache is not flushed immediately.
    pub fn set_soft_file_limit(&self, limit: usize) -> Result<()> {
        let files = self.inner.files.write(self.inner.timeout)?;
        self.inner.soft_files.store(limit, Ordering::Release);
        if files.count() > limit {
            self.inner.gc.wake();
        }
        Ok(())
    }

    /// Index memory the GC task trims down to.
    pub fn soft_mem_limit(&self) -> usize {
        self.inner.soft_blocks.load(Ordering::Acquire) * BLOCK_FOOTPRINT
    }

    /// Set the soft index memory limit. Less than one block disables index caching.
    ///
    /// Lowering the limit below the cached total wakes the GC task; the cache is not flushed immediately.
    pub fn set_soft_mem_limit(&self, bytes: usize) -> Result<()> {
        let blocks = bytes / BLOCK_FOOTPRINT;
        let indices = self.inner.indices.write(self.inner.timeout)?;
        self.inner.soft_blocks.store(blocks, Ordering::Release);
        if indices.count() > blocks {
            self.inner.gc.wake();
        }
        Ok(())
    }

    /// Read part of a blob into `buf`, starting `offset` bytes into the blob.
    ///
    /// Returns the number of bytes read and the number of bytes left after them, so that
    /// `remaining = size - offset - read`. An `offset` at or past the end reads nothing and reports nothing remaining.
    pub fn read(&self, path: &str, id: u64, buf: &mut [u8], offset: u64) -> Result<(usize, u64)> {
        self.ensure_open()?;
        let (entry, record) = self.locate(path, id)?;
        if record.is_empty() {
            return Err(no_blob(path, id));
        }

        let size = record.size as u64;
        if offset >= size {
            return Ok((0, 0));
        }

        let file = self.inner.resolve_file(&entry, record.shard())?;
        let left = size - offset;
        let len = left.min(buf.len() as u64) as usize;
        let read = file.read_at(&mut buf[..len], record.shard_offset() + offset)?;
        if read != len {
            tracing::warn!(
                "[tracedb]: short read of blob {id} in {path:?} shard {}, expected {len}, got {read}",
                record.shard()
            );
            return Err(Error::short_read(len, read).with_context("path", path).with_context("id", id));
        }
        Ok((read, left - len as u64))
    }

    /// Read the location of a blob and the header stored in front of it.
    ///
    /// An id without a blob reports a zero location and no header.
    pub fn read_header_info(&self, path: &str, id: u64) -> Result<HeaderInfo> {
        self.ensure_open()?;
        let (entry, record) = self.locate(path, id)?;
        let mut info = HeaderInfo {
            location: record.offset,
            size: record.size,
            header: None,
        };
        if record.is_empty() {
            return Ok(info);
        }

        let Some(at) = record.shard_offset().checked_sub(BLOB_HEADER_SIZE as u64) else {
            return Err(Error::new(ErrorKind::Corruption, "blob offset leaves no room for its header")
                .with_context("path", path)
                .with_context("id", id));
        };
        let file = self.inner.resolve_file(&entry, record.shard())?;
        let mut raw = [0; BLOB_HEADER_SIZE];
        let read = file.read_at(&mut raw, at)?;
        if read != raw.len() {
            return Err(Error::short_read(raw.len(), read).with_context("path", path).with_context("id", id));
        }
        info.header = Some(BlobHeader::decode(self.inner.version, &raw));
        Ok(info)
    }

    /// Size of a blob according to the index.
    pub fn blob_size(&self, path: &str, id: u64) -> Result<u32> {
        self.ensure_open()?;
        let (_, record) = self.locate(path, id)?;
        if record.is_empty() {
            return Err(no_blob(path, id));
        }
        Ok(record.size)
    }

    /// Read a whole blob.
    pub fn read_to_vec(&self, path: &str, id: u64) -> Result<Vec<u8>> {
        let size = self.blob_size(path, id)?;
        let mut buf = vec![0; size as usize];
        let (read, _) = self.read(path, id, &mut buf, 0)?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Check a blob against its stored header: id, size and CRC-32C must all agree.
    pub fn verify(&self, path: &str, id: u64) -> Result<bool> {
        let info = self.read_header_info(path, id)?;
        let Some(header) = info.header else {
            return Err(no_blob(path, id));
        };
        if header.id != id || header.size != info.size {
            tracing::debug!("[tracedb]: blob {id} in {path:?} has mismatched header {header:?}");
            return Ok(false);
        }
        let data = self.read_to_vec(path, id)?;
        Ok(crc32c::crc32c(&data) == header.crc)
    }

    /// Read a blob and decode it as one column into `dst`. Returns the number of decoded bytes.
    pub fn read_column(
        &self,
        path: &str,
        id: u64,
        kind: ColumnKind,
        decoder: &dyn ColumnDecoder,
        dst: &mut [u8],
    ) -> Result<usize> {
        let src = self.read_to_vec(path, id)?;
        decoder
            .decompress_column(kind, &src, dst)
            .map_err(|e| e.with_context("path", path).with_context("id", id))
    }

    /// Get the open file of `shard` under `path`. Shard `0` is the index file.
    pub fn resolve_file(&self, path: &str, shard: u32) -> Result<FileHandle> {
        self.ensure_open()?;
        check_path(path)?;
        let hash = path_hash(path);

        let indices = self.inner.indices.read(self.inner.timeout)?;
        let known = indices.state().paths.find(hash, path);
        if let Some(entry) = known {
            drop(indices);
            return self.inner.resolve_file(&entry, shard);
        }
        let mut indices = indices.upgrade(self.inner.timeout)?;
        let (entry, index) = self.inner.locate_path(&mut indices, hash, path)?;
        if shard == 0 {
            return Ok(index);
        }
        drop(index);
        self.inner.resolve_file(&entry, shard)
    }

    /// Get the cached index block holding `id` under `path`, loading it on a miss.
    pub fn resolve_index_block(&self, path: &str, id: u64) -> Result<IndexBlockHandle> {
        self.ensure_open()?;
        check_path(path)?;
        self.inner.resolve_index_block(path, id)
    }

    /// Live counters.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.statistics.snapshot()
    }

    /// Count cached entries.
    pub fn cache_usage(&self) -> Result<CacheUsage> {
        let indices = self.inner.indices.read(self.inner.timeout)?;
        let files = self.inner.files.read(self.inner.timeout)?;
        Ok(CacheUsage {
            files: files.count(),
            blocks: indices.count(),
            paths: indices.state().paths.len(),
        })
    }

    /// Shut the database down.
    ///
    /// Stops the GC task, waiting up to `gc_timeout` for it to exit, then drops every cached entry. Entries still
    /// referenced by callers are released when those references drop. Every later operation fails with
    /// [`ErrorKind::Closed`].
    ///
    /// If the GC task does not exit in time, this fails with [`ErrorKind::Busy`] and the database stays open.
    pub fn whack(&self, gc_timeout: Duration) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(closed());
        }
        self.inner.quitting.store(true, Ordering::Release);
        self.inner.gc.wake();

        if self.inner.gc.gate.acquire(gc_timeout).is_err() {
            self.inner.quitting.store(false, Ordering::Release);
            tracing::warn!("[tracedb]: gc task did not stop within {gc_timeout:?}");
            return Err(Error::new(ErrorKind::Busy, "gc task still running")
                .with_context("timeout", format!("{gc_timeout:?}")));
        }
        // The gate stays taken, so no GC task can start any more.

        let mut indices = self.inner.indices.write(self.inner.timeout)?;
        let mut files = self.inner.files.write(self.inner.timeout)?;
        let (blocks, handles) = (indices.count(), files.count());
        files.clear();
        indices.clear();
        indices.state_mut().paths.clear();
        self.inner.closed.store(true, Ordering::Release);

        tracing::info!("[tracedb]: shut down, dropped {blocks} index blocks and {handles} open files");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.quitting.load(Ordering::Acquire) {
            return Err(closed());
        }
        Ok(())
    }

    fn locate(&self, path: &str, id: u64) -> Result<(Arc<PathEntry>, LocationRecord)> {
        check_path(path)?;
        let block = self.inner.resolve_index_block(path, id)?;
        let record = block.record(id).ok_or_else(|| no_blob(path, id))?;
        Ok((block.path().clone(), record))
    }
}

impl TraceDbInner {
    /// Look up `(path, shard)` in the file cache and open the file on a miss.
    pub(crate) fn resolve_file(&self, path: &Arc<PathEntry>, shard: u32) -> Result<FileHandle> {
        let files = self.files.read(self.timeout)?;
        if let Some(file) = files.find(|file| OpenFile::search_order(shard, path, file)) {
            bump(&self.statistics.file_hits);
            return Ok(file);
        }

        let mut files = files.upgrade(self.timeout)?;
        if let Some(file) = files.find(|file| OpenFile::search_order(shard, path, file)) {
            bump(&self.statistics.file_hits);
            return Ok(file);
        }
        bump(&self.statistics.file_misses);

        let location = shard_path(Path::new(path.path()), shard, self.version);
        let file = loop {
            let max = files.state().max;
            let mut evicted = 0;
            while files.count() > 0 && files.count() >= max {
                if files.evict_lru().is_none() {
                    break;
                }
                evicted += 1;
            }
            add(&self.statistics.file_evictions, evicted);

            let permit = self.file_quota.acquire_owned(self.timeout)?;
            match self.fs.open(&location) {
                Ok(file) => break OpenFile::new(path.clone(), shard, file, permit),
                Err(e) if is_too_many_open_files(&e) && files.count() > 0 => {
                    drop(permit);
                    let count = files.count();
                    tracing::warn!("[tracedb]: out of file descriptors, lowering file limit from {max} to {count}");
                    files.state_mut().max = count;
                    bump(&self.statistics.file_limit_adaptations);
                }
                Err(e) => {
                    return Err(Error::from(e).with_context("file", location.display()));
                }
            }
        };
        bump(&self.statistics.file_opens);
        tracing::debug!("[tracedb]: opened {}", location.display());

        let file = CacheNode::new(file);
        let soft = self.soft_files.load(Ordering::Acquire);
        if soft > 0 && files.insert(&file, OpenFile::sort) {
            files.increment_count();
            if files.count() > soft {
                self.gc.wake();
            }
        }
        Ok(file)
    }

    /// Look up the block holding `id` and check it belongs to `path`, replacing it if another path owns it.
    pub(crate) fn resolve_index_block(&self, path: &str, id: u64) -> Result<IndexBlockHandle> {
        let hash = path_hash(path);

        let indices = self.indices.read(self.timeout)?;
        if let Some(block) = indices.find(|block| IndexBlock::search_order(id, block)) {
            if block.path().matches(hash, path) {
                bump(&self.statistics.index_hits);
                return Ok(block);
            }
        }

        let mut indices = indices.upgrade(self.timeout)?;
        match indices.find(|block| IndexBlock::search_order(id, block)) {
            Some(block) if block.path().matches(hash, path) => {
                bump(&self.statistics.index_hits);
                return Ok(block);
            }
            Some(stale) => self.invalidate(&mut indices, &stale, path),
            None => {}
        }
        bump(&self.statistics.index_misses);

        let (entry, index) = self.locate_path(&mut indices, hash, path)?;
        let range = entry.range().unwrap_or(IdRange::EMPTY);
        if !range.contains(id) {
            return Err(Error::not_found("id out of range")
                .with_context("path", path)
                .with_context("id", id)
                .with_context("start", range.start)
                .with_context("stop", range.stop));
        }

        let max = indices.state().max;
        let mut evicted = 0;
        while indices.count() > 0 && indices.count() >= max {
            if indices.evict_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        add(&self.statistics.index_evictions, evicted);

        let permit = self.index_quota.acquire_owned(self.timeout)?;
        let block = IndexBlock::load(entry, index.blob_file(), self.version, id, permit)?;
        bump(&self.statistics.index_loads);

        let block = CacheNode::new(block);
        let soft = self.soft_blocks.load(Ordering::Acquire);
        if soft > 0 && indices.insert(&block, IndexBlock::sort) {
            indices.increment_count();
            if indices.count() > soft {
                self.gc.wake();
            }
        }
        Ok(block)
    }

    /// Mark a block and its path invalid. Both move to the front of their trees, where the GC task frees them.
    fn invalidate(&self, indices: &mut IndexGuard<'_>, stale: &IndexBlockHandle, path: &str) {
        tracing::debug!(
            "[tracedb]: invalidating path {:?} for ids {}..={}, new path {path:?}",
            stale.path().path(),
            stale.range().start,
            stale.range().stop
        );

        let linked = indices.unlink(stale);
        stale.invalidate();
        if linked && indices.insert(stale, IndexBlock::sort) {
            indices.increment_count();
        }
        indices.state_mut().paths.invalidate(stale.path());
        bump(&self.statistics.index_invalidations);
    }

    /// Find or register `path`, returning its entry and its open index file.
    ///
    /// A new path has its index header read before it is registered. An unusable index is reported as not found.
    #[tracing::instrument(level = "debug", skip(self, indices))]
    pub(crate) fn locate_path(
        &self,
        indices: &mut IndexGuard<'_>,
        hash: u32,
        path: &str,
    ) -> Result<(Arc<PathEntry>, FileHandle)> {
        if let Some(entry) = indices.state().paths.find(hash, path) {
            let index = self.resolve_file(&entry, 0)?;
            return Ok((entry, index));
        }

        let entry = PathEntry::new(path, hash);
        let index = self.resolve_file(&entry, 0)?;
        let header = match self.read_index_header(&index) {
            Ok(header) => header,
            Err(e) => {
                self.files.write(self.timeout)?.unlink(&index);
                if e.kind() != ErrorKind::Corruption {
                    return Err(e.with_context("path", path));
                }
                tracing::warn!("[tracedb]: ignoring index file of {path:?}: {e}");
                return Err(Error::not_found("unusable index file")
                    .with_context("path", path)
                    .with_source(e));
            }
        };

        entry.set_range(header.range);
        tracing::debug!(
            "[tracedb]: registered path {path:?} with ids {}..={}",
            header.range.start,
            header.range.stop
        );
        let entry = match indices.state_mut().paths.insert(entry.clone()) {
            Ok(()) => entry,
            Err(existing) => existing,
        };
        Ok((entry, index))
    }

    fn read_index_header(&self, index: &OpenFile) -> Result<IndexHeader> {
        let mut buf = [0; 24];
        let buf = &mut buf[..self.version.header_size()];
        let read = read_exact_at(index.blob_file(), buf, 0)?;
        let len = index.size()?;
        IndexHeader::decode(self.version, &buf[..read], len)
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::new(ErrorKind::InvalidArgument, "empty database path"));
    }
    Ok(())
}

fn no_blob(path: &str, id: u64) -> Error {
    Error::not_found("no blob with this id")
        .with_context("path", path)
        .with_context("id", id)
}

fn closed() -> Error {
    Error::new(ErrorKind::Closed, "database is shut down")
}
