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

//! An intrusive AVL tree.
//!
//! The tree never allocates. Items embed an [`AvlLink`] and are handed to the tree as owning pointers (see
//! [`Pointer`]); the tree keeps them until they are unlinked or the tree is dropped. Ordering is defined entirely by
//! the comparators passed to each operation, so one item type can live in trees with different orders.
//!
//! The balance factor of each node is packed into the two low bits of its parent pointer.

use std::{
    cell::Cell,
    cmp::Ordering,
    fmt::Debug,
    marker::PhantomData,
    ptr::NonNull,
    sync::atomic::{self, AtomicBool},
};

use tracedb_common::{assert::OptionExt, strict_assert};

use crate::adapter::{Adapter, Link, Pointer};

const BALANCE_MASK: usize = 0b11;
const LEFT_HEAVY: usize = 0b01;
const RIGHT_HEAVY: usize = 0b10;

/// The link for the intrusive AVL tree.
#[derive(Debug, Default)]
pub struct AvlLink {
    /// Parent address with the balance factor in the low bits.
    parent: Cell<usize>,
    left: Cell<Option<NonNull<AvlLink>>>,
    right: Cell<Option<NonNull<AvlLink>>>,
    /// Written under the owner's exclusive lock; may be read without it.
    linked: AtomicBool,
}

const _: () = assert!(std::mem::align_of::<AvlLink>() > BALANCE_MASK);

unsafe impl Send for AvlLink {}
unsafe impl Sync for AvlLink {}

impl Link for AvlLink {
    fn is_linked(&self) -> bool {
        self.linked.load(atomic::Ordering::Acquire)
    }
}

impl AvlLink {
    fn parent(&self) -> Option<NonNull<AvlLink>> {
        NonNull::new((self.parent.get() & !BALANCE_MASK) as *mut AvlLink)
    }

    fn set_parent(&self, parent: Option<NonNull<AvlLink>>) {
        let addr = parent.map_or(0, |p| p.as_ptr() as usize);
        strict_assert!(addr & BALANCE_MASK == 0);
        self.parent.set(addr | (self.parent.get() & BALANCE_MASK));
    }

    /// `-1` when the left subtree is higher, `1` when the right one is.
    fn balance(&self) -> i8 {
        match self.parent.get() & BALANCE_MASK {
            LEFT_HEAVY => -1,
            RIGHT_HEAVY => 1,
            _ => 0,
        }
    }

    fn set_balance(&self, balance: i8) {
        strict_assert!((-1..=1).contains(&balance));
        let bits = match balance {
            b if b < 0 => LEFT_HEAVY,
            b if b > 0 => RIGHT_HEAVY,
            _ => 0,
        };
        self.parent.set((self.parent.get() & !BALANCE_MASK) | bits);
    }

    fn reset(&self) {
        self.parent.set(0);
        self.left.set(None);
        self.right.set(None);
        self.linked.store(false, atomic::Ordering::Release);
    }
}

/// # Safety
///
/// `link` must point to a live link.
#[inline(always)]
unsafe fn l<'a>(link: NonNull<AvlLink>) -> &'a AvlLink {
    &*link.as_ptr()
}

/// Where a new node goes.
enum Slot {
    Root,
    Child { parent: NonNull<AvlLink>, left: bool },
}

/// Returned by [`AvlTree::insert_unique`] when an equal item is already linked.
pub struct Occupied<'a, A: Adapter<Link = AvlLink>> {
    /// The pointer that was not inserted.
    pub rejected: A::Pointer,
    /// The item already in the tree.
    pub existing: &'a A::Item,
}

impl<A: Adapter<Link = AvlLink>> Debug for Occupied<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Occupied").finish_non_exhaustive()
    }
}

/// Intrusive AVL tree.
#[derive(Debug)]
pub struct AvlTree<A>
where
    A: Adapter<Link = AvlLink>,
{
    root: Option<NonNull<AvlLink>>,
    len: usize,

    adapter: A,
}

unsafe impl<A> Send for AvlTree<A>
where
    A: Adapter<Link = AvlLink>,
    A::Pointer: Send,
{
}

unsafe impl<A> Sync for AvlTree<A>
where
    A: Adapter<Link = AvlLink>,
    A::Item: Sync,
{
}

impl<A> Drop for AvlTree<A>
where
    A: Adapter<Link = AvlLink>,
{
    fn drop(&mut self) {
        self.clear();
    }
}

impl<A> Default for AvlTree<A>
where
    A: Adapter<Link = AvlLink>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> AvlTree<A>
where
    A: Adapter<Link = AvlLink>,
{
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            root: None,
            len: 0,
            adapter: A::new(),
        }
    }

    /// Number of linked items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the tree holds no item.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Height of the tree, `0` when empty.
    pub fn height(&self) -> usize {
        fn height(link: Option<NonNull<AvlLink>>) -> usize {
            match link {
                None => 0,
                Some(link) => unsafe { 1 + height(l(link).left.get()).max(height(l(link).right.get())) },
            }
        }
        height(self.root)
    }

    /// Search the tree.
    ///
    /// `f` compares the searched key with a linked item: [`Ordering::Less`] continues in the left subtree,
    /// [`Ordering::Greater`] in the right one.
    pub fn find<F>(&self, mut f: F) -> Option<&A::Item>
    where
        F: FnMut(&A::Item) -> Ordering,
    {
        let mut cur = self.root;
        while let Some(link) = cur {
            let item = unsafe { self.item(link) };
            cur = match f(item) {
                Ordering::Less => unsafe { l(link).left.get() },
                Ordering::Greater => unsafe { l(link).right.get() },
                Ordering::Equal => return Some(item),
            };
        }
        None
    }

    /// Link an item. Items comparing equal to linked ones go after them.
    ///
    /// `cmp` compares the new item with a linked one.
    pub fn insert<F>(&mut self, ptr: A::Pointer, mut cmp: F)
    where
        F: FnMut(&A::Item, &A::Item) -> Ordering,
    {
        let slot = match self.locate(unsafe { &*ptr.as_ptr() }, false, &mut cmp) {
            Ok(slot) => slot,
            Err(_) => unreachable!("non-unique insert never reports an equal item"),
        };
        self.link_at(ptr, slot);
    }

    /// Link an item unless an equal one is already linked, in which case the pointer is handed back together with
    /// the linked item.
    pub fn insert_unique<F>(&mut self, ptr: A::Pointer, mut cmp: F) -> Result<(), Occupied<'_, A>>
    where
        F: FnMut(&A::Item, &A::Item) -> Ordering,
    {
        match self.locate(unsafe { &*ptr.as_ptr() }, true, &mut cmp) {
            Ok(slot) => {
                self.link_at(ptr, slot);
                Ok(())
            }
            Err(existing) => Err(Occupied {
                rejected: ptr,
                existing: unsafe { self.item(existing) },
            }),
        }
    }

    /// Unlink an item and return the owning pointer the tree held.
    ///
    /// Returns `None` if the item is not linked in this tree.
    pub fn unlink(&mut self, item: &A::Item) -> Option<A::Pointer> {
        let link = unsafe { self.adapter.ptr2link(NonNull::from(item)) };
        if !self.contains_link(link) {
            return None;
        }
        unsafe {
            self.remove(link);
            Some(A::Pointer::from_ptr(item as *const _))
        }
    }

    /// Unlink and return the first item.
    pub fn pop_first(&mut self) -> Option<A::Pointer> {
        let link = self.root.map(|root| unsafe { leftmost(root) })?;
        unsafe {
            self.remove(link);
            Some(A::Pointer::from_ptr(self.adapter.link2ptr(link).as_ptr()))
        }
    }

    /// The first item in comparator order.
    pub fn first(&self) -> Option<&A::Item> {
        self.root.map(|root| unsafe { self.item(leftmost(root)) })
    }

    /// The last item in comparator order.
    pub fn last(&self) -> Option<&A::Item> {
        self.root.map(|root| unsafe { self.item(rightmost(root)) })
    }

    /// In-order iterator, double ended.
    pub fn iter(&self) -> Iter<'_, A> {
        Iter {
            front: self.root.map(|root| unsafe { leftmost(root) }),
            back: self.root.map(|root| unsafe { rightmost(root) }),
            remaining: self.len,
            adapter: &self.adapter,
            _marker: PhantomData,
        }
    }

    /// Visit every item, in reverse order if `reverse` is set.
    pub fn for_each<F>(&self, reverse: bool, mut f: F)
    where
        F: FnMut(&A::Item),
    {
        self.do_until(reverse, |item| {
            f(item);
            false
        });
    }

    /// Visit items until `f` returns `true`, in reverse order if `reverse` is set.
    ///
    /// Returns the item that stopped the traversal.
    pub fn do_until<F>(&self, reverse: bool, mut f: F) -> Option<&A::Item>
    where
        F: FnMut(&A::Item) -> bool,
    {
        if reverse {
            self.iter().rev().find(|item| f(item))
        } else {
            self.iter().find(|item| f(item))
        }
    }

    /// Unlink every item and drop the owning pointers.
    pub fn clear(&mut self) {
        let links = self
            .iter()
            .map(|item| unsafe { self.adapter.ptr2link(NonNull::from(item)) })
            .collect::<Vec<_>>();
        self.root = None;
        self.len = 0;
        for link in links {
            unsafe {
                l(link).reset();
                drop(A::Pointer::from_ptr(self.adapter.link2ptr(link).as_ptr()));
            }
        }
    }

    unsafe fn item<'a>(&self, link: NonNull<AvlLink>) -> &'a A::Item {
        self.adapter.link2ptr(link).as_ref()
    }

    fn contains_link(&self, link: NonNull<AvlLink>) -> bool {
        unsafe {
            if !l(link).is_linked() {
                return false;
            }
            let mut top = link;
            while let Some(parent) = l(top).parent() {
                top = parent;
            }
            self.root == Some(top)
        }
    }

    /// Find where `item` goes. With `unique`, an equal linked item is reported as `Err`.
    fn locate<F>(&self, item: &A::Item, unique: bool, cmp: &mut F) -> Result<Slot, NonNull<AvlLink>>
    where
        F: FnMut(&A::Item, &A::Item) -> Ordering,
    {
        let Some(mut cur) = self.root else {
            return Ok(Slot::Root);
        };
        loop {
            let left = match cmp(item, unsafe { self.item(cur) }) {
                Ordering::Less => true,
                Ordering::Equal if unique => return Err(cur),
                Ordering::Equal | Ordering::Greater => false,
            };
            let next = unsafe {
                if left {
                    l(cur).left.get()
                } else {
                    l(cur).right.get()
                }
            };
            match next {
                Some(next) => cur = next,
                None => return Ok(Slot::Child { parent: cur, left }),
            }
        }
    }

    fn link_at(&mut self, ptr: A::Pointer, slot: Slot) {
        unsafe {
            let item = NonNull::new_unchecked(ptr.into_ptr() as *mut A::Item);
            let link = self.adapter.ptr2link(item);
            strict_assert!(!l(link).is_linked());
            l(link).reset();
            l(link).linked.store(true, atomic::Ordering::Release);
            match slot {
                Slot::Root => {
                    strict_assert!(self.root.is_none());
                    self.root = Some(link);
                }
                Slot::Child { parent, left } => {
                    l(link).set_parent(Some(parent));
                    if left {
                        l(parent).left.set(Some(link));
                    } else {
                        l(parent).right.set(Some(link));
                    }
                    self.retrace_insert(link);
                }
            }
        }
        self.len += 1;
    }

    /// Walk up from a new leaf, fixing balance factors and rotating at the first unbalanced ancestor.
    unsafe fn retrace_insert(&mut self, mut z: NonNull<AvlLink>) {
        while let Some(x) = l(z).parent() {
            let g = l(x).parent();
            let n = if l(x).right.get() == Some(z) {
                match l(x).balance() {
                    1 if l(z).balance() < 0 => rotate_right_left(x, z),
                    1 => rotate_left(x, z),
                    -1 => {
                        l(x).set_balance(0);
                        return;
                    }
                    _ => {
                        l(x).set_balance(1);
                        z = x;
                        continue;
                    }
                }
            } else {
                match l(x).balance() {
                    -1 if l(z).balance() > 0 => rotate_left_right(x, z),
                    -1 => rotate_right(x, z),
                    1 => {
                        l(x).set_balance(0);
                        return;
                    }
                    _ => {
                        l(x).set_balance(-1);
                        z = x;
                        continue;
                    }
                }
            };
            self.replace_child(g, x, n);
            return;
        }
    }

    /// Detach a linked node, splicing in its in-order successor when it has two children.
    unsafe fn remove(&mut self, node: NonNull<AvlLink>) {
        let parent = l(node).parent();
        let left = l(node).left.get();
        let right = l(node).right.get();

        let (retrace_from, from_left) = match (left, right) {
            (Some(left), Some(right)) => {
                let successor = leftmost(right);
                let retrace = if successor == right {
                    (Some(successor), false)
                } else {
                    let sp = l(successor).parent().strict_unwrap_unchecked();
                    let sr = l(successor).right.get();
                    l(sp).left.set(sr);
                    if let Some(sr) = sr {
                        l(sr).set_parent(Some(sp));
                    }
                    l(successor).right.set(Some(right));
                    l(right).set_parent(Some(successor));
                    (Some(sp), true)
                };
                l(successor).left.set(Some(left));
                l(left).set_parent(Some(successor));
                l(successor).set_balance(l(node).balance());
                self.replace_child(parent, node, successor);
                retrace
            }
            (child, None) | (None, child) => {
                let from_left = parent.is_some_and(|p| l(p).left.get() == Some(node));
                if let Some(child) = child {
                    l(child).set_parent(parent);
                }
                match parent {
                    Some(p) if from_left => l(p).left.set(child),
                    Some(p) => l(p).right.set(child),
                    None => self.root = child,
                }
                (parent, from_left)
            }
        };

        l(node).reset();
        self.len -= 1;
        self.retrace_remove(retrace_from, from_left);
    }

    /// Walk up from the point where a subtree lost one level of height.
    unsafe fn retrace_remove(&mut self, mut x: Option<NonNull<AvlLink>>, mut from_left: bool) {
        while let Some(xn) = x {
            let g = l(xn).parent();
            let x_is_left = g.is_some_and(|g| l(g).left.get() == Some(xn));
            let (n, b) = if from_left {
                match l(xn).balance() {
                    1 => {
                        let z = l(xn).right.get().strict_unwrap_unchecked();
                        let b = l(z).balance();
                        let n = if b < 0 { rotate_right_left(xn, z) } else { rotate_left(xn, z) };
                        (n, b)
                    }
                    0 => {
                        l(xn).set_balance(1);
                        return;
                    }
                    _ => {
                        l(xn).set_balance(0);
                        x = g;
                        from_left = x_is_left;
                        continue;
                    }
                }
            } else {
                match l(xn).balance() {
                    -1 => {
                        let z = l(xn).left.get().strict_unwrap_unchecked();
                        let b = l(z).balance();
                        let n = if b > 0 { rotate_left_right(xn, z) } else { rotate_right(xn, z) };
                        (n, b)
                    }
                    0 => {
                        l(xn).set_balance(-1);
                        return;
                    }
                    _ => {
                        l(xn).set_balance(0);
                        x = g;
                        from_left = x_is_left;
                        continue;
                    }
                }
            };
            self.replace_child(g, xn, n);
            if b == 0 {
                return;
            }
            x = g;
            from_left = x_is_left;
        }
    }

    /// Point `parent`'s slot that held `old` (or the root) at `new`.
    unsafe fn replace_child(&mut self, parent: Option<NonNull<AvlLink>>, old: NonNull<AvlLink>, new: NonNull<AvlLink>) {
        if new != old {
            l(new).set_parent(parent);
        }
        match parent {
            Some(p) if l(p).left.get() == Some(old) => l(p).left.set(Some(new)),
            Some(p) => l(p).right.set(Some(new)),
            None => self.root = Some(new),
        }
    }
}

unsafe fn leftmost(mut link: NonNull<AvlLink>) -> NonNull<AvlLink> {
    while let Some(left) = l(link).left.get() {
        link = left;
    }
    link
}

unsafe fn rightmost(mut link: NonNull<AvlLink>) -> NonNull<AvlLink> {
    while let Some(right) = l(link).right.get() {
        link = right;
    }
    link
}

unsafe fn successor(link: NonNull<AvlLink>) -> Option<NonNull<AvlLink>> {
    if let Some(right) = l(link).right.get() {
        return Some(leftmost(right));
    }
    let mut cur = link;
    while let Some(parent) = l(cur).parent() {
        if l(parent).left.get() == Some(cur) {
            return Some(parent);
        }
        cur = parent;
    }
    None
}

unsafe fn predecessor(link: NonNull<AvlLink>) -> Option<NonNull<AvlLink>> {
    if let Some(left) = l(link).left.get() {
        return Some(rightmost(left));
    }
    let mut cur = link;
    while let Some(parent) = l(cur).parent() {
        if l(parent).right.get() == Some(cur) {
            return Some(parent);
        }
        cur = parent;
    }
    None
}

/// `z` is the right child of `x`. Returns the new subtree root (`z`).
unsafe fn rotate_left(x: NonNull<AvlLink>, z: NonNull<AvlLink>) -> NonNull<AvlLink> {
    let t23 = l(z).left.get();
    l(x).right.set(t23);
    if let Some(t23) = t23 {
        l(t23).set_parent(Some(x));
    }
    l(z).left.set(Some(x));
    l(x).set_parent(Some(z));
    if l(z).balance() == 0 {
        // Only reachable on removal.
        l(x).set_balance(1);
        l(z).set_balance(-1);
    } else {
        l(x).set_balance(0);
        l(z).set_balance(0);
    }
    z
}

/// `z` is the left child of `x`. Returns the new subtree root (`z`).
unsafe fn rotate_right(x: NonNull<AvlLink>, z: NonNull<AvlLink>) -> NonNull<AvlLink> {
    let t23 = l(z).right.get();
    l(x).left.set(t23);
    if let Some(t23) = t23 {
        l(t23).set_parent(Some(x));
    }
    l(z).right.set(Some(x));
    l(x).set_parent(Some(z));
    if l(z).balance() == 0 {
        l(x).set_balance(-1);
        l(z).set_balance(1);
    } else {
        l(x).set_balance(0);
        l(z).set_balance(0);
    }
    z
}

/// `z` is the left-heavy right child of `x`. Returns the new subtree root (the left child of `z`).
unsafe fn rotate_right_left(x: NonNull<AvlLink>, z: NonNull<AvlLink>) -> NonNull<AvlLink> {
    let y = l(z).left.get().strict_unwrap_unchecked();
    let t3 = l(y).right.get();
    l(z).left.set(t3);
    if let Some(t3) = t3 {
        l(t3).set_parent(Some(z));
    }
    l(y).right.set(Some(z));
    l(z).set_parent(Some(y));
    let t2 = l(y).left.get();
    l(x).right.set(t2);
    if let Some(t2) = t2 {
        l(t2).set_parent(Some(x));
    }
    l(y).left.set(Some(x));
    l(x).set_parent(Some(y));
    match l(y).balance() {
        0 => {
            l(x).set_balance(0);
            l(z).set_balance(0);
        }
        b if b > 0 => {
            l(x).set_balance(-1);
            l(z).set_balance(0);
        }
        _ => {
            l(x).set_balance(0);
            l(z).set_balance(1);
        }
    }
    l(y).set_balance(0);
    y
}

/// `z` is the right-heavy left child of `x`. Returns the new subtree root (the right child of `z`).
unsafe fn rotate_left_right(x: NonNull<AvlLink>, z: NonNull<AvlLink>) -> NonNull<AvlLink> {
    let y = l(z).right.get().strict_unwrap_unchecked();
    let t2 = l(y).left.get();
    l(z).right.set(t2);
    if let Some(t2) = t2 {
        l(t2).set_parent(Some(z));
    }
    l(y).left.set(Some(z));
    l(z).set_parent(Some(y));
    let t3 = l(y).right.get();
    l(x).left.set(t3);
    if let Some(t3) = t3 {
        l(t3).set_parent(Some(x));
    }
    l(y).right.set(Some(x));
    l(x).set_parent(Some(y));
    match l(y).balance() {
        0 => {
            l(x).set_balance(0);
            l(z).set_balance(0);
        }
        b if b < 0 => {
            l(x).set_balance(1);
            l(z).set_balance(0);
        }
        _ => {
            l(x).set_balance(0);
            l(z).set_balance(-1);
        }
    }
    l(y).set_balance(0);
    y
}

/// In-order iterator over an [`AvlTree`].
pub struct Iter<'a, A>
where
    A: Adapter<Link = AvlLink>,
{
    front: Option<NonNull<AvlLink>>,
    back: Option<NonNull<AvlLink>>,
    remaining: usize,
    adapter: &'a A,
    _marker: PhantomData<&'a A::Item>,
}

impl<'a, A> Iterator for Iter<'a, A>
where
    A: Adapter<Link = AvlLink>,
{
    type Item = &'a A::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let link = self.front?;
        self.remaining -= 1;
        unsafe {
            self.front = successor(link);
            Some(self.adapter.link2ptr(link).as_ref())
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<A> DoubleEndedIterator for Iter<'_, A>
where
    A: Adapter<Link = AvlLink>,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let link = self.back?;
        self.remaining -= 1;
        unsafe {
            self.back = predecessor(link);
            Some(self.adapter.link2ptr(link).as_ref())
        }
    }
}

impl<A> ExactSizeIterator for Iter<'_, A> where A: Adapter<Link = AvlLink> {}
