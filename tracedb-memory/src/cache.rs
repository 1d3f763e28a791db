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

use std::{cmp::Ordering, fmt::Debug, ops::Deref, sync::Arc, time::Duration};

use intrusive_collections::{intrusive_adapter, LinkedList, LinkedListAtomicLink};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracedb_common::{
    error::{Error, Result},
    strict_assert,
};
use tracedb_intrusive::avltree::{AvlLink, AvlTree};

/// A cached value together with the links of the tree and of the recency list.
pub struct CacheNode<T> {
    tree_link: AvlLink,
    lru_link: LinkedListAtomicLink,
    value: T,
}

/// Shared reference to a cached value.
///
/// The cache holds its own references while the value is cached. Dropping the last reference drops the value.
pub type CacheEntry<T> = Arc<CacheNode<T>>;

impl<T> CacheNode<T> {
    /// Wrap a value so it can be inserted into a [`Cache`].
    pub fn new(value: T) -> CacheEntry<T> {
        Arc::new(Self {
            tree_link: AvlLink::default(),
            lru_link: LinkedListAtomicLink::new(),
            value,
        })
    }

    /// The cached value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns `true` while the node is linked in a cache.
    pub fn is_cached(&self) -> bool {
        use tracedb_intrusive::adapter::Link;
        self.tree_link.is_linked()
    }
}

impl<T> Deref for CacheNode<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: Debug> Debug for CacheNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("value", &self.value)
            .field("cached", &self.is_cached())
            .finish()
    }
}

tracedb_intrusive::intrusive_adapter! { TreeAdapter<T> = Arc<CacheNode<T>>: CacheNode<T> { tree_link => AvlLink } where T: Send + Sync + 'static }

intrusive_adapter! { LruAdapter<T> = Arc<CacheNode<T>>: CacheNode<T> { lru_link => LinkedListAtomicLink } where T: Send + Sync + 'static }

/// Get a new reference to a node reachable from the tree or the recency list.
fn entry_of<T>(node: &CacheNode<T>) -> CacheEntry<T> {
    let ptr = node as *const CacheNode<T>;
    // Linked nodes are always owned by `Arc`s held by the containers.
    unsafe {
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    }
}

/// Traversal order for [`CacheWriteGuard::for_each`] and [`CacheWriteGuard::do_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Comparator order of the tree.
    Tree,
    /// From least to most recently used.
    Lru,
}

struct Inner<T, S>
where
    T: Send + Sync + 'static,
{
    tree: AvlTree<TreeAdapter<T>>,
    count: usize,
    state: S,
}

/// An ordered cache with least-recently-used eviction.
///
/// Lookups take the tree lock shared and record recency under a separate list lock, so concurrent readers never
/// exclude each other. Inserts and removals need the tree lock exclusively.
///
/// The logical `count` is maintained by the caller: [`CacheWriteGuard::insert`] does not increment it, while
/// [`CacheWriteGuard::unlink`] and [`CacheWriteGuard::evict_lru`] decrement it. A caller that checks its quota before
/// inserting increments the count exactly once after the insert succeeded.
///
/// `S` is extra state protected by the same lock, e.g. limits or a secondary index.
pub struct Cache<T, S = ()>
where
    T: Send + Sync + 'static,
{
    name: &'static str,
    inner: RwLock<Inner<T, S>>,
    lru: Mutex<LinkedList<LruAdapter<T>>>,
}

impl<T, S> Debug for Cache<T, S>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<T, S> Cache<T, S>
where
    T: Send + Sync + 'static,
{
    /// Create an empty cache. `name` shows up in logs and lock timeout errors.
    pub fn new(name: &'static str, state: S) -> Self {
        Self {
            name,
            inner: RwLock::new(Inner {
                tree: AvlTree::new(),
                count: 0,
                state,
            }),
            lru: Mutex::new(LinkedList::new(LruAdapter::new())),
        }
    }

    /// Take the tree lock shared, waiting at most `timeout`.
    pub fn read(&self, timeout: Duration) -> Result<CacheReadGuard<'_, T, S>> {
        let inner = self
            .inner
            .try_read_for(timeout)
            .ok_or_else(|| Error::lock_timeout(self.name, timeout))?;
        tracing::trace!("[{}]: read lock acquired", self.name);
        Ok(CacheReadGuard { cache: self, inner })
    }

    /// Take the tree lock exclusively, waiting at most `timeout`.
    pub fn write(&self, timeout: Duration) -> Result<CacheWriteGuard<'_, T, S>> {
        let inner = self
            .inner
            .try_write_for(timeout)
            .ok_or_else(|| Error::lock_timeout(self.name, timeout))?;
        tracing::trace!("[{}]: write lock acquired", self.name);
        Ok(CacheWriteGuard { cache: self, inner })
    }

    /// Take the tree lock exclusively if it is free right now.
    pub fn try_write(&self) -> Option<CacheWriteGuard<'_, T, S>> {
        let inner = self.inner.try_write()?;
        Some(CacheWriteGuard { cache: self, inner })
    }

    fn promote(&self, node: &CacheNode<T>) {
        let mut lru = self.lru.lock();
        if !node.lru_link.is_linked() {
            return;
        }
        if lru.back().get().is_some_and(|back| std::ptr::eq(back, node)) {
            return;
        }
        let entry = unsafe { lru.remove_from_ptr(node as *const _) };
        lru.push_back(entry);
    }
}

/// Shared access to a [`Cache`].
pub struct CacheReadGuard<'a, T, S>
where
    T: Send + Sync + 'static,
{
    cache: &'a Cache<T, S>,
    inner: RwLockReadGuard<'a, Inner<T, S>>,
}

impl<'a, T, S> CacheReadGuard<'a, T, S>
where
    T: Send + Sync + 'static,
{
    /// Look up a value and mark it most recently used.
    ///
    /// `f` compares the searched key with a cached value.
    pub fn find<F>(&self, mut f: F) -> Option<CacheEntry<T>>
    where
        F: FnMut(&T) -> Ordering,
    {
        let node = self.inner.tree.find(|node| f(&node.value))?;
        self.cache.promote(node);
        Some(entry_of(node))
    }

    /// Logical count maintained by the callers.
    pub fn count(&self) -> usize {
        self.inner.count
    }

    /// Number of linked values.
    pub fn len(&self) -> usize {
        self.inner.tree.len()
    }

    /// Returns `true` if no value is linked.
    pub fn is_empty(&self) -> bool {
        self.inner.tree.is_empty()
    }

    /// Extra state.
    pub fn state(&self) -> &S {
        &self.inner.state
    }

    /// Release the shared lock and take the exclusive one.
    ///
    /// The upgrade is not atomic: other writers may run in between, so anything looked up under the shared lock must
    /// be looked up again.
    pub fn upgrade(self, timeout: Duration) -> Result<CacheWriteGuard<'a, T, S>> {
        let cache = self.cache;
        drop(self);
        cache.write(timeout)
    }
}

/// Exclusive access to a [`Cache`].
pub struct CacheWriteGuard<'a, T, S>
where
    T: Send + Sync + 'static,
{
    cache: &'a Cache<T, S>,
    inner: RwLockWriteGuard<'a, Inner<T, S>>,
}

impl<T, S> CacheWriteGuard<'_, T, S>
where
    T: Send + Sync + 'static,
{
    /// Look up a value and mark it most recently used.
    pub fn find<F>(&self, mut f: F) -> Option<CacheEntry<T>>
    where
        F: FnMut(&T) -> Ordering,
    {
        let node = self.inner.tree.find(|node| f(&node.value))?;
        self.cache.promote(node);
        Some(entry_of(node))
    }

    /// Link a value as the most recently used one.
    ///
    /// Returns `false` if a value comparing equal is already cached. The logical count is left untouched.
    pub fn insert<F>(&mut self, entry: &CacheEntry<T>, mut cmp: F) -> bool
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if self
            .inner
            .tree
            .insert_unique(entry.clone(), |a, b| cmp(&a.value, &b.value))
            .is_err()
        {
            return false;
        }
        self.cache.lru.lock().push_back(entry.clone());
        true
    }

    /// Add one to the logical count.
    pub fn increment_count(&mut self) {
        self.inner.count += 1;
    }

    /// Remove a value from the cache. Returns `false` if it was not cached here.
    pub fn unlink(&mut self, entry: &CacheEntry<T>) -> bool {
        let Some(linked) = self.inner.tree.unlink(entry.as_ref()) else {
            return false;
        };
        drop(linked);
        {
            let mut lru = self.cache.lru.lock();
            if entry.lru_link.is_linked() {
                drop(unsafe { lru.remove_from_ptr(Arc::as_ptr(entry)) });
            }
        }
        self.decrement_count();
        true
    }

    /// Remove and return the least recently used value.
    pub fn evict_lru(&mut self) -> Option<CacheEntry<T>> {
        let entry = self.cache.lru.lock().pop_front()?;
        let linked = self.inner.tree.unlink(entry.as_ref());
        strict_assert!(linked.is_some());
        drop(linked);
        self.decrement_count();
        tracing::trace!("[{}]: evicted lru entry, count: {}", self.cache.name, self.inner.count);
        Some(entry)
    }

    /// The first value in tree order.
    pub fn first(&self) -> Option<CacheEntry<T>> {
        self.inner.tree.first().map(entry_of)
    }

    /// Visit every value in the given order, reversed if `reverse` is set.
    pub fn for_each<F>(&self, order: Order, reverse: bool, mut f: F)
    where
        F: FnMut(&T),
    {
        self.do_until(order, reverse, |value| {
            f(value);
            false
        });
    }

    /// Visit values in the given order until `f` returns `true`, and return the value that stopped the traversal.
    pub fn do_until<F>(&self, order: Order, reverse: bool, mut f: F) -> Option<CacheEntry<T>>
    where
        F: FnMut(&T) -> bool,
    {
        match order {
            Order::Tree => self.inner.tree.do_until(reverse, |node| f(&node.value)).map(entry_of),
            Order::Lru => {
                let lru = self.cache.lru.lock();
                let found = if reverse {
                    lru.iter().rev().find(|node| f(&node.value))
                } else {
                    lru.iter().find(|node| f(&node.value))
                };
                found.map(entry_of)
            }
        }
    }

    /// Unlink every value and reset the logical count.
    pub fn clear(&mut self) {
        self.cache.lru.lock().clear();
        self.inner.tree.clear();
        self.inner.count = 0;
    }

    /// Logical count maintained by the callers.
    pub fn count(&self) -> usize {
        self.inner.count
    }

    /// Number of linked values.
    pub fn len(&self) -> usize {
        self.inner.tree.len()
    }

    /// Returns `true` if no value is linked.
    pub fn is_empty(&self) -> bool {
        self.inner.tree.is_empty()
    }

    /// Extra state.
    pub fn state(&self) -> &S {
        &self.inner.state
    }

    /// Extra state, mutably.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.inner.state
    }

    fn decrement_count(&mut self) {
        strict_assert!(self.inner.count > 0, "[{}]: count underflow", self.cache.name);
        self.inner.count = self.inner.count.saturating_sub(1);
    }
}
