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

//! Commonly used types.

pub use tracedb_common::error::{Error, ErrorKind, Result};

pub use crate::{
    builder::{TraceDbBuilder, TraceDbOptions},
    codec::{ColumnDecoder, ColumnKind, PassthroughDecoder},
    db::{CacheUsage, FileHandle, HeaderInfo, IndexBlockHandle, TraceDb},
    file::OpenFile,
    fs::{BlobFile, FileSystem, LocalFileSystem},
    index::IndexBlock,
    layout::{BlobHeader, IdRange, IndexVersion, LocationRecord},
    loader::Loader,
    path::PathEntry,
    statistics::StatisticsSnapshot,
};
