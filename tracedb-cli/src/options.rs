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

use std::{fs::File, io::BufReader, path::PathBuf};

use bytesize::ByteSize;
use clap::Args;
use tracedb::prelude::*;

use crate::error::Error;

/// Settings shared by every command.
#[derive(Debug, Default, Args)]
pub struct DbArgs {
    /// JSON file with database options; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hard cap on open files.
    #[arg(long, global = true)]
    file_limit: Option<usize>,

    /// Hard cap on index block memory, e.g. `64MiB`.
    #[arg(long, global = true)]
    mem_limit: Option<ByteSize>,

    /// Lock and quota timeout, e.g. `30s`.
    #[arg(long, global = true)]
    timeout: Option<humantime::Duration>,
}

impl DbArgs {
    pub fn options(&self) -> anyhow::Result<TraceDbOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let reader = BufReader::new(File::open(path)?);
                serde_json::from_reader(reader).map_err(|source| Error::Config {
                    path: path.clone(),
                    source,
                })?
            }
            None => TraceDbOptions::default(),
        };
        if let Some(limit) = self.file_limit {
            options.hard_file_limit = limit;
        }
        if let Some(limit) = self.mem_limit {
            options.hard_mem_limit = limit.as_u64() as usize;
        }
        if let Some(timeout) = self.timeout {
            options.timeout = timeout.into();
        }
        Ok(options)
    }

    pub fn open(&self) -> anyhow::Result<TraceDb> {
        let options = self.options()?;
        tracing::debug!("[tracedb-cli]: options: {options:?}");
        Ok(TraceDbBuilder::new().with_options(options).build())
    }
}
