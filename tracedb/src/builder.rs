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

//! Construction and settings of a [`TraceDb`](crate::TraceDb).

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    db::TraceDb,
    fs::{FileSystem, LocalFileSystem},
    layout::IndexVersion,
};

/// Plain settings of a [`TraceDb`], e.g. loaded from a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceDbOptions {
    /// Hard cap on open files, `0` for [`TraceDb::DEFAULT_FILE_LIMIT`].
    pub hard_file_limit: usize,
    /// Hard cap on index memory in bytes, `0` for [`TraceDb::DEFAULT_MEM_LIMIT`].
    pub hard_mem_limit: usize,
    /// Soft file limit, the hard limit if unset.
    pub soft_file_limit: Option<usize>,
    /// Soft index memory limit in bytes, the hard limit if unset.
    pub soft_mem_limit: Option<usize>,
    /// Timeout for lock and quota acquisition.
    pub timeout: Duration,
    /// Index format of the databases read.
    pub index_version: IndexVersion,
}

impl Default for TraceDbOptions {
    fn default() -> Self {
        Self {
            hard_file_limit: 0,
            hard_mem_limit: 0,
            soft_file_limit: None,
            soft_mem_limit: None,
            timeout: TraceDb::DEFAULT_TIMEOUT,
            index_version: IndexVersion::default(),
        }
    }
}

/// Builder of a [`TraceDb`].
#[derive(Debug)]
pub struct TraceDbBuilder {
    options: TraceDbOptions,
    fs: Arc<dyn FileSystem>,
}

impl Default for TraceDbBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceDbBuilder {
    /// Start from the default settings on the local file system.
    pub fn new() -> Self {
        Self {
            options: TraceDbOptions::default(),
            fs: Arc::new(LocalFileSystem),
        }
    }

    /// Replace every setting.
    pub fn with_options(mut self, options: TraceDbOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the hard cap on open files. `0` selects the default of 350.
    pub fn with_hard_file_limit(mut self, limit: usize) -> Self {
        self.options.hard_file_limit = limit;
        self
    }

    /// Set the hard cap on index memory in bytes. `0` selects the default of 1200 MiB.
    ///
    /// The limit is rounded down to whole index blocks, with a minimum of one block.
    pub fn with_hard_mem_limit(mut self, bytes: usize) -> Self {
        self.options.hard_mem_limit = bytes;
        self
    }

    /// Set the initial soft file limit.
    pub fn with_soft_file_limit(mut self, limit: usize) -> Self {
        self.options.soft_file_limit = Some(limit);
        self
    }

    /// Set the initial soft index memory limit in bytes.
    pub fn with_soft_mem_limit(mut self, bytes: usize) -> Self {
        self.options.soft_mem_limit = Some(bytes);
        self
    }

    /// Set the timeout for lock and quota acquisition.
    ///
    /// The default of 3 minutes suits servers; single threaded tools may want `Duration::ZERO`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Set the index format of the databases read.
    pub fn with_index_version(mut self, version: IndexVersion) -> Self {
        self.options.index_version = version;
        self
    }

    /// Open files through `fs` instead of the local file system.
    pub fn with_file_system(mut self, fs: impl FileSystem) -> Self {
        self.fs = Arc::new(fs);
        self
    }

    /// Build the database handle.
    pub fn build(self) -> TraceDb {
        TraceDb::open(self.options, self.fs)
    }
}
