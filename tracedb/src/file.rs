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

//! Cached open files.

use std::{cmp::Ordering, fmt::Debug, sync::Arc};

use tracedb_common::{error::Result, semaphore::OwnedPermit};

use crate::{
    fs::{read_exact_at, BlobFile},
    path::PathEntry,
};

/// An open index file (shard 0) or data shard of one path.
pub struct OpenFile {
    path: Arc<PathEntry>,
    shard: u32,
    file: Box<dyn BlobFile>,
    _permit: OwnedPermit,
}

impl Debug for OpenFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFile")
            .field("path", &self.path.path())
            .field("shard", &self.shard)
            .finish()
    }
}

impl OpenFile {
    pub(crate) fn new(path: Arc<PathEntry>, shard: u32, file: Box<dyn BlobFile>, permit: OwnedPermit) -> Self {
        Self {
            path,
            shard,
            file,
            _permit: permit,
        }
    }

    /// The path the file belongs to.
    pub fn path(&self) -> &Arc<PathEntry> {
        &self.path
    }

    /// Shard number, `0` for the index file.
    pub fn shard(&self) -> u32 {
        self.shard
    }

    /// Read until `buf` is full or the end of file is reached.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Ok(read_exact_at(self.file.as_ref(), buf, offset)?)
    }

    /// Current size of the file.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.size()?)
    }

    pub(crate) fn blob_file(&self) -> &dyn BlobFile {
        self.file.as_ref()
    }

    /// Compare a `(shard, path)` key with a cached file. Paths compare by identity.
    pub(crate) fn search_order(shard: u32, path: &Arc<PathEntry>, file: &OpenFile) -> Ordering {
        shard
            .cmp(&file.shard)
            .then_with(|| Arc::as_ptr(path).cmp(&Arc::as_ptr(&file.path)))
    }

    pub(crate) fn sort(a: &OpenFile, b: &OpenFile) -> Ordering {
        Self::search_order(a.shard, &a.path, b)
    }
}

/// State guarded by the file cache lock.
#[derive(Debug)]
pub struct FileState {
    /// Effective cap on cached files, lowered when the process runs out of descriptors.
    pub max: usize,
}
