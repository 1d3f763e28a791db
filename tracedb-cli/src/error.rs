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

use std::path::PathBuf;

/// Errors of the command line front-end that are not database errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Database directory that is not valid UTF-8.
    #[error("database path is not valid utf-8: {0:?}")]
    NonUtf8Path(PathBuf),
    /// `load` without input files.
    #[error("no input files")]
    NoInput,
    /// Blobs that failed verification.
    #[error("{failed} of {total} blobs failed verification")]
    Verify {
        /// Blobs with a mismatching header or checksum, or missing.
        failed: usize,
        /// Blobs checked.
        total: usize,
    },
    /// Configuration file that cannot be parsed.
    #[error("invalid configuration file {path:?}: {source}")]
    Config {
        /// Configuration file.
        path: PathBuf,
        /// Parser error.
        source: serde_json::Error,
    },
}
