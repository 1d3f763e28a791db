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

//! Writer for version 2 databases.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracedb_common::error::{Error, ErrorKind, Result};

use crate::layout::{
    shard_path, BlobHeader, IdRange, IndexHeader, IndexVersion, LocationRecord, BLOB_HEADER_SIZE, MAX_BLOB_SIZE,
    MAX_OBJECT_OFFSET, SHARD_BITS, SHARD_SIZE,
};

/// Builds a database directory for a fixed id range.
///
/// Blobs are appended to 1 GiB shards; a blob never straddles two shards. The index is written by
/// [`Loader::finish`], so a database is only readable once loading completed.
#[derive(Debug)]
pub struct Loader {
    dir: PathBuf,
    range: IdRange,
    records: Vec<LocationRecord>,
    /// Global offset of the next blob header.
    offset: u64,
    shard: Option<(u32, File)>,
}

impl Loader {
    /// Start a database at `dir` holding ids `start..=stop`.
    pub fn create(dir: impl AsRef<Path>, start: u64, stop: u64) -> Result<Self> {
        if start == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument, "ids start at 1"));
        }
        let range = IdRange { start, stop };
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        tracing::debug!("[loader]: creating {} for ids {start}..={stop}", dir.display());
        Ok(Self {
            dir,
            records: vec![LocationRecord::default(); range.count() as usize],
            range,
            offset: 0,
            shard: None,
        })
    }

    /// Ids the database holds.
    pub fn range(&self) -> IdRange {
        self.range
    }

    /// Global offset the next blob header will be written at, unless it has to move to the next shard.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Skip ahead to a global offset. The skipped bytes are left as holes.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset < self.offset {
            return Err(Error::new(ErrorKind::InvalidArgument, "cannot seek backwards")
                .with_context("offset", offset)
                .with_context("current", self.offset));
        }
        self.offset = offset;
        Ok(())
    }

    /// Store a blob under `id` and return its global location.
    pub fn append(&mut self, id: u64, data: &[u8]) -> Result<u64> {
        if !self.range.contains(id) {
            return Err(Error::new(ErrorKind::InvalidArgument, "id outside of the database range")
                .with_context("id", id)
                .with_context("start", self.range.start)
                .with_context("stop", self.range.stop));
        }
        if data.len() > MAX_BLOB_SIZE as usize {
            return Err(Error::new(ErrorKind::InvalidArgument, "blob too large")
                .with_context("size", data.len())
                .with_context("max", MAX_BLOB_SIZE));
        }
        let slot = (id - self.range.start) as usize;
        if !self.records[slot].is_empty() {
            return Err(Error::new(ErrorKind::AlreadyExists, "id already stored").with_context("id", id));
        }

        let total = (BLOB_HEADER_SIZE + data.len()) as u64;
        if (self.offset & (SHARD_SIZE - 1)) + total > SHARD_SIZE {
            self.offset = (self.offset | (SHARD_SIZE - 1)) + 1;
        }
        let location = self.offset + BLOB_HEADER_SIZE as u64;
        if location > MAX_OBJECT_OFFSET {
            return Err(Error::new(ErrorKind::ResourceExhausted, "database is full").with_context("offset", location));
        }

        let header = BlobHeader {
            id,
            size: data.len() as u32,
            crc: crc32c::crc32c(data),
        };
        let within = self.offset & (SHARD_SIZE - 1);
        let file = self.shard_file((self.offset >> SHARD_BITS) as u32 + 1)?;
        file.seek(SeekFrom::Start(within))?;
        file.write_all(&header.encode())?;
        file.write_all(data)?;

        self.records[slot] = LocationRecord {
            offset: location,
            size: data.len() as u32,
        };
        self.offset += total;
        Ok(location)
    }

    /// Write the index and flush every shard.
    pub fn finish(mut self) -> Result<IdRange> {
        if let Some((_, file)) = self.shard.take() {
            file.sync_all()?;
        }

        let path = shard_path(&self.dir, 0, IndexVersion::V2);
        let mut index = BufWriter::new(File::create(&path)?);
        index.write_all(
            &IndexHeader {
                version: IndexVersion::V2,
                range: self.range,
            }
            .encode(),
        )?;
        for record in &self.records {
            index.write_all(&record.encode())?;
        }
        index.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        let stored = self.records.iter().filter(|r| !r.is_empty()).count();
        tracing::info!(
            "[loader]: wrote {} with {stored} blobs over {} bytes",
            self.dir.display(),
            self.offset
        );
        Ok(self.range)
    }

    fn shard_file(&mut self, shard: u32) -> Result<&mut File> {
        let file = match self.shard.take() {
            Some((current, file)) if current == shard => file,
            previous => {
                if let Some((_, file)) = previous {
                    file.sync_all()?;
                }
                let path = shard_path(&self.dir, shard, IndexVersion::V2);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                tracing::debug!("[loader]: writing shard {shard} at {}", path.display());
                OpenOptions::new().create(true).truncate(false).write(true).open(&path)?
            }
        };
        let (_, file) = self.shard.insert((shard, file));
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test_log::test]
    fn test_blobs_never_straddle_shards() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = Loader::create(dir.path(), 1, 3).unwrap();

        assert_eq!(loader.append(1, b"first").unwrap(), 12);
        loader.seek(SHARD_SIZE - 20).unwrap();
        // 12 + 16 bytes do not fit in the 20 left, so the blob starts the next shard.
        assert_eq!(loader.append(2, &[7; 16]).unwrap(), SHARD_SIZE + 12);
        assert_eq!(loader.append(3, b"x").unwrap(), SHARD_SIZE + 12 + 16 + 12);

        assert_eq!(loader.finish().unwrap(), IdRange { start: 1, stop: 3 });

        let first = shard_path(dir.path(), 1, IndexVersion::V2);
        let second = shard_path(dir.path(), 2, IndexVersion::V2);
        assert_eq!(fs::metadata(&first).unwrap().len(), 17);
        let mut buf = vec![];
        File::open(&second).unwrap().read_to_end(&mut buf).unwrap();
        let mut raw = [0; BLOB_HEADER_SIZE];
        raw.copy_from_slice(&buf[..BLOB_HEADER_SIZE]);
        let header = BlobHeader::decode(IndexVersion::V2, &raw);
        assert_eq!(header.id, 2);
        assert_eq!(header.size, 16);
        assert_eq!(header.crc, crc32c::crc32c(&[7; 16]));
    }

    #[test_log::test]
    fn test_rejects_bad_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = Loader::create(dir.path(), 10, 20).unwrap();
        assert_eq!(loader.append(9, b"a").unwrap_err().kind(), ErrorKind::InvalidArgument);
        loader.append(10, b"a").unwrap();
        assert_eq!(loader.append(10, b"b").unwrap_err().kind(), ErrorKind::AlreadyExists);
        assert_eq!(loader.seek(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(Loader::create(dir.path(), 0, 5).is_err());
    }

    #[test_log::test]
    fn test_index_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = Loader::create(dir.path(), 5, 8).unwrap();
        loader.append(6, b"blob").unwrap();
        loader.finish().unwrap();

        let index = fs::read(shard_path(dir.path(), 0, IndexVersion::V2)).unwrap();
        assert_eq!(index.len(), 24 + 4 * 8);
        let header = IndexHeader::decode(IndexVersion::V2, &index, index.len() as u64).unwrap();
        assert_eq!(header.range, IdRange { start: 5, stop: 8 });

        let mut raw = [0; 8];
        raw.copy_from_slice(&index[32..40]);
        assert_eq!(
            LocationRecord::decode(IndexVersion::V2, &raw),
            LocationRecord { offset: 12, size: 4 }
        );
        raw.copy_from_slice(&index[24..32]);
        assert!(LocationRecord::decode(IndexVersion::V2, &raw).is_empty());
    }
}
