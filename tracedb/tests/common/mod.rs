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

#![expect(dead_code)]

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracedb::{
    fs::{BlobFile, FileSystem, LocalFileSystem},
    layout::{shard_path, IndexVersion, SHARD_SIZE},
    loader::Loader,
};

#[derive(Debug, Default)]
struct Counters {
    opens: Mutex<HashMap<PathBuf, usize>>,
    closes: Mutex<HashMap<PathBuf, usize>>,
    open_now: AtomicUsize,
    peak: AtomicUsize,
    fd_limit: AtomicUsize,
}

/// Local file system that counts opens and closes per path and can run out of descriptors.
#[derive(Debug, Clone)]
pub struct CountingFileSystem {
    counters: Arc<Counters>,
}

impl Default for CountingFileSystem {
    fn default() -> Self {
        let counters = Counters::default();
        counters.fd_limit.store(usize::MAX, Ordering::Relaxed);
        Self {
            counters: Arc::new(counters),
        }
    }
}

impl CountingFileSystem {
    /// Fail opens with `EMFILE` while `limit` files are open.
    pub fn set_fd_limit(&self, limit: usize) {
        self.counters.fd_limit.store(limit, Ordering::Relaxed);
    }

    pub fn opens(&self, path: &Path) -> usize {
        self.counters.opens.lock().get(path).copied().unwrap_or(0)
    }

    pub fn closes(&self, path: &Path) -> usize {
        self.counters.closes.lock().get(path).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.counters.opens.lock().values().sum()
    }

    pub fn open_now(&self) -> usize {
        self.counters.open_now.load(Ordering::Relaxed)
    }

    /// Most files open at the same time.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Relaxed)
    }
}

impl FileSystem for CountingFileSystem {
    fn open(&self, path: &Path) -> io::Result<Box<dyn BlobFile>> {
        let counters = &self.counters;
        if counters.open_now.load(Ordering::Relaxed) >= counters.fd_limit.load(Ordering::Relaxed) {
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        }
        let file = LocalFileSystem.open(path)?;
        *counters.opens.lock().entry(path.to_path_buf()).or_default() += 1;
        let now = counters.open_now.fetch_add(1, Ordering::Relaxed) + 1;
        counters.peak.fetch_max(now, Ordering::Relaxed);
        Ok(Box::new(CountingFile {
            file,
            path: path.to_path_buf(),
            counters: self.counters.clone(),
        }))
    }
}

#[derive(Debug)]
struct CountingFile {
    file: Box<dyn BlobFile>,
    path: PathBuf,
    counters: Arc<Counters>,
}

impl BlobFile for CountingFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        self.file.size()
    }
}

impl Drop for CountingFile {
    fn drop(&mut self) {
        *self.counters.closes.lock().entry(self.path.clone()).or_default() += 1;
        self.counters.open_now.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Deterministic content of blob `id`, 1 to 4096 bytes long.
pub fn blob(id: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(id);
    let len: usize = rng.random_range(1..=4096);
    (0..len).map(|_| rng.random()).collect()
}

/// Database at `dir` for ids `start..=stop` holding [`blob`] for each of `ids`.
pub fn create_db(dir: &Path, start: u64, stop: u64, ids: impl IntoIterator<Item = u64>) {
    let mut loader = Loader::create(dir, start, stop).unwrap();
    for id in ids {
        loader.append(id, &blob(id)).unwrap();
    }
    loader.finish().unwrap();
}

/// Database at `dir` for ids `1..=shards` with blob `n` stored as the first blob of shard `n`.
pub fn create_sharded_db(dir: &Path, shards: u32) {
    let mut loader = Loader::create(dir, 1, shards as u64).unwrap();
    for n in 1..=shards {
        loader.seek((n as u64 - 1) * SHARD_SIZE).unwrap();
        loader.append(n as u64, &blob(n as u64)).unwrap();
    }
    loader.finish().unwrap();
}

pub fn shard(dir: &Path, n: u32) -> PathBuf {
    shard_path(dir, n, IndexVersion::V2)
}

pub fn path_str(dir: &Path) -> &str {
    dir.to_str().unwrap()
}
