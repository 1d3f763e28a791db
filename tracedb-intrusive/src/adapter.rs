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

//! Adapters binding an item type, the link embedded in it, and the owning pointer the container stores.

use std::{fmt::Debug, ptr::NonNull, sync::Arc};

/// An owning pointer a container can turn into a raw pointer and back.
///
/// # Safety
///
/// `from_ptr` must only be called with a pointer produced by `into_ptr` of the same pointer type, and only once per
/// `into_ptr`.
pub unsafe trait Pointer {
    /// Item type for the pointer.
    type Item: ?Sized;

    /// Rebuild the owning pointer from a raw pointer.
    ///
    /// # Safety
    ///
    /// See the trait level safety section.
    unsafe fn from_ptr(item: *const Self::Item) -> Self;

    /// Consume the pointer and return the raw pointer of the item.
    fn into_ptr(self) -> *const Self::Item;

    /// Borrow the raw pointer of the item.
    fn as_ptr(&self) -> *const Self::Item;
}

unsafe impl<T: ?Sized> Pointer for Arc<T> {
    type Item = T;

    #[inline]
    unsafe fn from_ptr(raw: *const T) -> Arc<T> {
        Arc::from_raw(raw)
    }

    #[inline]
    fn into_ptr(self) -> *const T {
        Arc::into_raw(self)
    }

    #[inline]
    fn as_ptr(&self) -> *const T {
        Arc::as_ptr(self)
    }
}

/// A link embedded in an item.
pub trait Link: Send + Sync + 'static + Default + Debug {
    /// Returns `true` if the link is currently part of a container.
    fn is_linked(&self) -> bool;
}

/// Binds an item type to one of its embedded links.
///
/// # Safety
///
/// `link2ptr` and `ptr2link` must be exact inverses for the same field of the same item type.
pub unsafe trait Adapter: Send + Sync + Debug + 'static {
    /// Owning pointer stored by the container.
    type Pointer: Pointer<Item = Self::Item>;
    /// Item type.
    type Item;
    /// Link type embedded in the item.
    type Link: Link;

    /// Create the adapter.
    fn new() -> Self;

    /// Get the item pointer from its link pointer.
    ///
    /// # Safety
    ///
    /// `link` must point to the link field of a live item.
    unsafe fn link2ptr(&self, link: NonNull<Self::Link>) -> NonNull<Self::Item>;

    /// Get the link pointer from its item pointer.
    ///
    /// # Safety
    ///
    /// `item` must point to a live item.
    unsafe fn ptr2link(&self, item: NonNull<Self::Item>) -> NonNull<Self::Link>;
}

/// Declare an [`Adapter`] for an item with an embedded link.
///
/// ```
/// use std::sync::Arc;
///
/// use tracedb_intrusive::{avltree::AvlLink, intrusive_adapter};
///
/// #[derive(Debug)]
/// struct Item {
///     link: AvlLink,
///     key: u64,
/// }
///
/// intrusive_adapter! { ItemAdapter = Arc<Item>: Item { link => AvlLink } }
/// ```
///
/// Generic items name their type parameters and must spell out the bounds:
///
/// ```
/// use std::sync::Arc;
///
/// use tracedb_intrusive::{avltree::AvlLink, intrusive_adapter};
///
/// #[derive(Debug)]
/// struct Item<T> {
///     link: AvlLink,
///     value: T,
/// }
///
/// intrusive_adapter! { ItemAdapter<T> = Arc<Item<T>>: Item<T> { link => AvlLink } where T: Send + Sync + 'static }
/// ```
#[macro_export]
macro_rules! intrusive_adapter {
    (@methods $item:ty, $field:ident) => {
        unsafe fn link2ptr(&self, link: std::ptr::NonNull<Self::Link>) -> std::ptr::NonNull<Self::Item> {
            std::ptr::NonNull::new_unchecked($crate::container_of!(link.as_ptr(), $item, $field))
        }

        unsafe fn ptr2link(&self, item: std::ptr::NonNull<Self::Item>) -> std::ptr::NonNull<Self::Link> {
            std::ptr::NonNull::new_unchecked(
                (item.as_ptr() as *const u8).add(std::mem::offset_of!($item, $field)) as *mut Self::Link,
            )
        }
    };
    ($vis:vis $name:ident = $pointer:ty : $item:ty { $field:ident => $link:ty }) => {
        #[derive(Debug, Default)]
        $vis struct $name;

        unsafe impl $crate::adapter::Adapter for $name {
            type Pointer = $pointer;
            type Item = $item;
            type Link = $link;

            fn new() -> Self {
                Self
            }

            $crate::intrusive_adapter! { @methods $item, $field }
        }
    };
    ($vis:vis $name:ident<$($g:ident),+> = $pointer:ty : $item:ty { $field:ident => $link:ty } where $($bound:tt)+) => {
        $vis struct $name<$($g),+>(std::marker::PhantomData<fn() -> ($($g,)+)>);

        impl<$($g),+> std::fmt::Debug for $name<$($g),+> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(stringify!($name))
            }
        }

        unsafe impl<$($g),+> $crate::adapter::Adapter for $name<$($g),+> where $($bound)+ {
            type Pointer = $pointer;
            type Item = $item;
            type Link = $link;

            fn new() -> Self {
                Self(std::marker::PhantomData)
            }

            $crate::intrusive_adapter! { @methods $item, $field }
        }
    };
}
