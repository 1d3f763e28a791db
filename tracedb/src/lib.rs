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

//! A sharded, cached, flat-file blob store running under hard resource quotas.
//!
//! A database directory holds an index file and 1 GiB data shards (see [`layout`]). [`TraceDb`] resolves
//! `(path, id)` through a path registry, a cache of index blocks and a cache of open files. Both caches are bounded
//! by hard limits enforced with quota semaphores and trimmed to soft limits by a background GC task.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use tracedb::prelude::*;
//!
//! let db = TraceDbBuilder::new().with_hard_file_limit(64).build();
//! let gc = db.spawn_gc_task(Duration::from_secs(1)).unwrap();
//!
//! let mut buf = vec![0; 4096];
//! let (read, remaining) = db.read("/data/traces/0001", 42, &mut buf, 0).unwrap();
//! println!("read {read} bytes, {remaining} left");
//!
//! db.whack(Duration::from_secs(10)).unwrap();
//! gc.join().unwrap().unwrap();
//! ```

pub mod builder;
pub mod codec;
pub mod db;
pub mod file;
pub mod fs;
pub mod gc;
pub mod index;
pub mod layout;
pub mod loader;
pub mod path;
pub mod prelude;
pub mod statistics;

pub use builder::{TraceDbBuilder, TraceDbOptions};
pub use db::TraceDb;
