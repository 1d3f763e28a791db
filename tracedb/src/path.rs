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

//! Registry of database directories.

use std::{
    cmp::Ordering,
    fmt::Debug,
    sync::{
        atomic::{AtomicU32, Ordering as AtomicOrdering},
        Arc, OnceLock,
    },
};

use tracedb_intrusive::{
    avltree::{AvlLink, AvlTree},
    intrusive_adapter,
};
use twox_hash::XxHash64;

use crate::layout::IdRange;

/// Hash of a database path, never `0`.
pub fn path_hash(path: &str) -> u32 {
    let h = XxHash64::oneshot(0, path.as_bytes());
    match (h ^ (h >> 32)) as u32 {
        0 => 1,
        h => h,
    }
}

/// A database directory known to a [`TraceDb`](crate::TraceDb).
///
/// The only mutation after registration is invalidation, which forces the hash to `0` so the entry sorts before
/// every valid one.
pub struct PathEntry {
    link: AvlLink,
    hash: AtomicU32,
    path: Box<str>,
    range: OnceLock<IdRange>,
}

impl Debug for PathEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathEntry")
            .field("path", &self.path)
            .field("hash", &self.hash())
            .field("range", &self.range.get())
            .finish()
    }
}

impl PathEntry {
    pub(crate) fn new(path: &str, hash: u32) -> Arc<Self> {
        Arc::new(Self {
            link: AvlLink::default(),
            hash: AtomicU32::new(hash),
            path: path.into(),
            range: OnceLock::new(),
        })
    }

    /// The directory path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Ids covered by the index, once its header has been read.
    pub fn range(&self) -> Option<IdRange> {
        self.range.get().copied()
    }

    pub(crate) fn set_range(&self, range: IdRange) {
        // Set exactly once, before the entry is published in the registry.
        let _ = self.range.set(range);
    }

    /// Returns `false` once a newer entry took over this entry's ids.
    pub fn is_valid(&self) -> bool {
        self.hash() != 0
    }

    fn hash(&self) -> u32 {
        self.hash.load(AtomicOrdering::Acquire)
    }

    /// Returns `true` if this entry names exactly `path`.
    pub fn matches(&self, hash: u32, path: &str) -> bool {
        self.hash() == hash && *self.path == *path
    }

    fn cmp_key(&self, hash: u32, path: &str) -> Ordering {
        hash.cmp(&self.hash())
            .then_with(|| path.len().cmp(&self.path.len()))
            .then_with(|| path.as_bytes().cmp(self.path.as_bytes()))
    }
}

intrusive_adapter! { PathAdapter = Arc<PathEntry>: PathEntry { link => AvlLink } }

/// Database directories ordered by `(hash, length, bytes)`; invalid entries come first.
///
/// Not synchronized by itself, it lives inside the index cache state and is guarded by the index cache lock.
#[derive(Debug, Default)]
pub struct PathRegistry {
    tree: AvlTree<PathAdapter>,
}

impl PathRegistry {
    /// Look up a valid entry.
    pub fn find(&self, hash: u32, path: &str) -> Option<Arc<PathEntry>> {
        let entry = self.tree.find(|entry| entry.cmp_key(hash, path))?;
        Some(arc_of(entry))
    }

    /// Register an entry. Returns the already registered one if the path is known.
    pub fn insert(&mut self, entry: Arc<PathEntry>) -> Result<(), Arc<PathEntry>> {
        self.tree
            .insert_unique(entry, |a, b| b.cmp_key(a.hash(), &a.path))
            .map_err(|occupied| arc_of(occupied.existing))
    }

    /// Invalidate an entry and move it to the front. Holders of the entry may keep using it.
    pub fn invalidate(&mut self, entry: &PathEntry) {
        let linked = self.tree.unlink(entry);
        entry.hash.store(0, AtomicOrdering::Release);
        if let Some(linked) = linked {
            self.tree.insert(linked, |a, b| b.cmp_key(a.hash(), &a.path));
        }
    }

    /// Unlink the first entry if it is invalid.
    pub fn pop_invalid(&mut self) -> Option<Arc<PathEntry>> {
        match self.tree.first() {
            Some(entry) if !entry.is_valid() => self.tree.pop_first(),
            _ => None,
        }
    }

    /// Number of registered entries, invalid ones included.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.tree.clear();
    }
}

fn arc_of(entry: &PathEntry) -> Arc<PathEntry> {
    let ptr = entry as *const PathEntry;
    // Registered entries are owned by `Arc`s held by the tree.
    unsafe {
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    }
}
