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

//! Counters observed by the cache and GC paths.
//!
//! Counters are updated with relaxed atomics and read as a whole through [`Statistics::snapshot`]. They are meant for
//! diagnostics and tests, not for exact accounting across concurrent operations.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! statistics {
    ($($(#[$attr:meta])* $name:ident,)*) => {
        /// Live counters of a [`TraceDb`](crate::TraceDb).
        #[derive(Debug, Default)]
        pub struct Statistics {
            $($(#[$attr])* pub $name: AtomicU64,)*
        }

        /// Point in time copy of [`Statistics`].
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub struct StatisticsSnapshot {
            $($(#[$attr])* pub $name: u64,)*
        }

        impl Statistics {
            /// Copy every counter.
            pub fn snapshot(&self) -> StatisticsSnapshot {
                StatisticsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

statistics! {
    /// Index lookups answered from the cache.
    index_hits,
    /// Index lookups that had to load a block.
    index_misses,
    /// Index blocks read from disk.
    index_loads,
    /// Index blocks invalidated because their path was replaced.
    index_invalidations,
    /// Index blocks dropped from the cache.
    index_evictions,
    /// File lookups answered from the cache.
    file_hits,
    /// File lookups that had to open a file.
    file_misses,
    /// Files opened.
    file_opens,
    /// Files dropped from the cache.
    file_evictions,
    /// Times the file limit was lowered after the OS ran out of descriptors.
    file_limit_adaptations,
    /// Completed GC sweeps.
    gc_sweeps,
}

/// Add one to a counter.
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Add `n` to a counter.
pub(crate) fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}
