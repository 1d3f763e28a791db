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

//! Invariant checks.
//!
//! The macros expand in the calling crate, so the `strict_assertions` feature is the caller's own feature, which is
//! expected to forward to `tracedb-common/strict_assertions`.

/// Checked with `debug_assert!`, or with `assert!` when feature "strict_assertions" is enabled.
#[macro_export]
macro_rules! strict_assert {
    ($($arg:tt)*) => {
        #[cfg(feature = "strict_assertions")]
        assert!($($arg)*);
        #[cfg(not(feature = "strict_assertions"))]
        debug_assert!($($arg)*);
    }
}

/// Extend functions for [`Option`].
pub trait OptionExt<T>: Sized {
    /// `unwrap_unchecked`, or `unwrap` when feature "strict_assertions" is enabled.
    ///
    /// # Safety
    ///
    /// See [`Option::unwrap_unchecked`].
    unsafe fn strict_unwrap_unchecked(self) -> T;
}

impl<T> OptionExt<T> for Option<T> {
    unsafe fn strict_unwrap_unchecked(self) -> T {
        #[cfg(feature = "strict_assertions")]
        {
            self.unwrap()
        }
        #[cfg(not(feature = "strict_assertions"))]
        {
            unsafe { self.unwrap_unchecked() }
        }
    }
}
