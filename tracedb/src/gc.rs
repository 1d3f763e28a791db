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

//! Background trimming of the index and file caches.
//!
//! The GC task sleeps on a condition variable for one period or until woken by an insert that pushed a cache over
//! its soft limit. Each sweep frees invalidated index blocks and paths, then evicts least recently used entries until
//! both caches are back within their soft limits.

use std::{
    sync::{atomic::Ordering, Arc},
    thread::JoinHandle,
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracedb_common::{
    error::{Error, ErrorKind, Result},
    semaphore::Semaphore,
};

use crate::{
    db::{TraceDb, TraceDbInner},
    statistics::{add, bump},
};

pub(crate) struct GcControl {
    /// One permit: held by the running GC task, and for good by a completed shutdown.
    pub(crate) gate: Arc<Semaphore>,
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl GcControl {
    pub(crate) fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
            woken: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn wake(&self) {
        *self.woken.lock() = true;
        self.condvar.notify_one();
    }

    /// Sleep up to `period` unless a wake-up is already pending.
    fn sleep(&self, period: Duration) {
        let mut woken = self.woken.lock();
        if !*woken {
            self.condvar.wait_for(&mut woken, period);
        }
        *woken = false;
    }
}

impl TraceDb {
    /// Run the GC loop on the calling thread until [`TraceDb::whack`] is called.
    ///
    /// Only one GC task runs per database; a second call returns immediately.
    pub fn run_gc_task(&self, period: Duration) -> Result<()> {
        let inner = &self.inner;
        if inner.quitting.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Closed, "database is shut down"));
        }
        let Some(_gate) = inner.gc.gate.try_acquire_owned() else {
            tracing::debug!("[gc]: another gc task is running");
            return Ok(());
        };

        tracing::info!("[gc]: started, period: {period:?}");
        while !inner.quitting.load(Ordering::Acquire) {
            inner.gc.sleep(period);
            if inner.quitting.load(Ordering::Acquire) {
                break;
            }
            inner.sweep();
        }
        tracing::info!("[gc]: stopped");
        Ok(())
    }

    /// Run [`TraceDb::run_gc_task`] on a new thread named `tracedb-gc`.
    pub fn spawn_gc_task(&self, period: Duration) -> Result<JoinHandle<Result<()>>> {
        let db = self.clone();
        let handle = std::thread::Builder::new()
            .name("tracedb-gc".to_string())
            .spawn(move || db.run_gc_task(period))?;
        Ok(handle)
    }

    /// Run one GC sweep on the calling thread.
    pub fn collect_garbage(&self) {
        self.inner.sweep();
    }
}

impl TraceDbInner {
    pub(crate) fn sweep(&self) {
        match self.indices.write(self.timeout) {
            Ok(mut indices) => {
                let mut invalid = 0;
                while let Some(block) = indices.first() {
                    if block.is_valid() {
                        break;
                    }
                    tracing::debug!(
                        "[gc]: freeing index block {}..={} of {:?}",
                        block.range().start,
                        block.range().stop,
                        block.path().path()
                    );
                    indices.unlink(&block);
                    invalid += 1;
                }

                while let Some(path) = indices.state_mut().paths.pop_invalid() {
                    tracing::debug!("[gc]: freeing invalid path {:?}", path.path());
                }

                let soft = self.soft_blocks.load(Ordering::Acquire);
                let mut evicted = 0;
                while indices.count() > soft && indices.evict_lru().is_some() {
                    evicted += 1;
                }
                add(&self.statistics.index_evictions, evicted);

                if invalid + evicted > 0 {
                    tracing::debug!(
                        "[gc]: freed {invalid} invalid and {evicted} excess index blocks, {} left",
                        indices.count()
                    );
                }
            }
            Err(e) => tracing::warn!("[gc]: skipping index cache sweep: {e}"),
        }

        match self.files.write(self.timeout) {
            Ok(mut files) => {
                let soft = self.soft_files.load(Ordering::Acquire);
                let mut evicted = 0;
                while files.count() > soft && files.evict_lru().is_some() {
                    evicted += 1;
                }
                add(&self.statistics.file_evictions, evicted);

                if evicted > 0 {
                    tracing::debug!("[gc]: closed {evicted} excess files, {} left", files.count());
                }
            }
            Err(e) => tracing::warn!("[gc]: skipping file cache sweep: {e}"),
        }

        bump(&self.statistics.gc_sweeps);
    }
}
