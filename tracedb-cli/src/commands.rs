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

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Args;
use tracedb::prelude::*;

use crate::{error::Error, options::DbArgs};

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Database directory.
    db: PathBuf,
    /// Blob id.
    id: u64,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Database directory.
    db: PathBuf,
    /// Blob id.
    id: u64,
    /// Bytes to skip at the start of the blob.
    #[arg(long, default_value_t = 0)]
    offset: u64,
    /// Bytes to dump, the rest of the blob if unset.
    #[arg(long)]
    len: Option<u64>,
    /// Output file, stdout if unset.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Database directory.
    db: PathBuf,
    /// Blob ids to check.
    #[arg(required = true)]
    ids: Vec<u64>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Database directory to create.
    db: PathBuf,
    /// Id of the first file; the others follow consecutively.
    #[arg(long, default_value_t = 1)]
    start: u64,
    /// Files to store, one blob each.
    files: Vec<PathBuf>,
}

fn db_path(path: &Path) -> std::result::Result<&str, Error> {
    path.to_str().ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))
}

pub fn info(db_args: &DbArgs, args: InfoArgs) -> anyhow::Result<()> {
    let db = db_args.open()?;
    let info = db.read_header_info(db_path(&args.db)?, args.id)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub fn read(db_args: &DbArgs, args: ReadArgs) -> anyhow::Result<()> {
    let db = db_args.open()?;
    let path = db_path(&args.db)?;
    let mut out: Box<dyn Write> = match &args.output {
        Some(output) => Box::new(BufWriter::new(
            File::create(output).with_context(|| format!("cannot create {}", output.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    let written = dump(&db, path, args.id, args.offset, args.len.unwrap_or(u64::MAX), &mut out)?;
    out.flush()?;
    tracing::debug!("[tracedb-cli]: dumped {written} bytes of blob {}", args.id);
    Ok(())
}

/// Copy up to `len` bytes of a blob, starting at `offset`, in bounded chunks.
fn dump(db: &TraceDb, path: &str, id: u64, mut offset: u64, len: u64, out: &mut dyn Write) -> anyhow::Result<u64> {
    let mut buf = vec![0; CHUNK];
    let mut written = 0;
    while written < len {
        let want = (len - written).min(CHUNK as u64) as usize;
        let (read, remaining) = db.read(path, id, &mut buf[..want], offset)?;
        out.write_all(&buf[..read])?;
        written += read as u64;
        offset += read as u64;
        if read == 0 || remaining == 0 {
            break;
        }
    }
    Ok(written)
}

pub fn verify(db_args: &DbArgs, args: VerifyArgs) -> anyhow::Result<()> {
    let db = db_args.open()?;
    let path = db_path(&args.db)?;
    let mut failed = 0;
    for &id in &args.ids {
        match db.verify(path, id) {
            Ok(true) => println!("{id}: ok"),
            Ok(false) => {
                println!("{id}: corrupted");
                failed += 1;
            }
            Err(e) if e.is_not_found() => {
                println!("{id}: missing");
                failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    if failed > 0 {
        return Err(Error::Verify {
            failed,
            total: args.ids.len(),
        }
        .into());
    }
    Ok(())
}

pub fn load(args: LoadArgs) -> anyhow::Result<()> {
    if args.files.is_empty() {
        return Err(Error::NoInput.into());
    }
    let stop = args.start + args.files.len() as u64 - 1;
    let mut loader = Loader::create(&args.db, args.start, stop)?;
    for (id, file) in (args.start..).zip(&args.files) {
        let data = fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
        let location = loader.append(id, &data)?;
        tracing::debug!("[tracedb-cli]: stored {} as blob {id} at {location}", file.display());
    }
    let range = loader.finish()?;
    tracing::info!(
        "[tracedb-cli]: loaded ids {}..={} into {}",
        range.start,
        range.stop,
        args.db.display()
    );
    Ok(())
}
