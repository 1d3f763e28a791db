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

//! On-disk layout of a tracedb database directory.
//!
//! A database directory holds one index file and any number of 1 GiB data shards:
//!
//! ```plain
//! <db>/idx2                 index: header + one location record per id
//! <db>/00000/0000000        shard 1
//! <db>/00000/0000001        shard 2
//! <db>/00000/0000010        shard 33
//! <db>/00001/0000100        shard 1025
//! ```
//!
//! Every blob in a shard is preceded by a 12 byte [`BlobHeader`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracedb_common::error::{Error, ErrorKind, Result};

/// Tag written first in every index file.
pub const ENDIAN_TAG: u32 = 0x0503_1988;
/// [`ENDIAN_TAG`] as seen from the opposite byte order.
pub const REVERSED_ENDIAN_TAG: u32 = 0x8819_0305;

/// Bits addressing a byte within one shard.
pub const SHARD_BITS: u32 = 30;
/// Size of one data shard.
pub const SHARD_SIZE: u64 = 1 << SHARD_BITS;
const SHARD_MASK: u64 = SHARD_SIZE - 1;

/// Bits addressing a record within one index block.
pub const BLOCK_BITS: u32 = 13;
/// Location records per index block.
pub const BLOCK_ENTRIES: u64 = 1 << BLOCK_BITS;

/// Size of one encoded [`LocationRecord`].
pub const RECORD_SIZE: usize = 8;
/// Size of one encoded [`BlobHeader`].
pub const BLOB_HEADER_SIZE: usize = 12;

/// Largest blob a location record can describe.
pub const MAX_BLOB_SIZE: u32 = (1 << 24) - 1;
/// Largest object offset a location record can hold.
pub const MAX_OBJECT_OFFSET: u64 = (1 << 40) - 1;

const BASE32: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
const SHARD_NAME_DIGITS: usize = 7;
const SHARD_DIR_DIGITS: usize = 5;

/// Index file format version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexVersion {
    /// 16 byte header without `id_stop`, big-endian blob headers.
    V1,
    /// 24 byte little-endian header.
    #[default]
    V2,
}

impl IndexVersion {
    /// Name of the index file inside a database directory.
    pub fn file_name(self) -> &'static str {
        match self {
            IndexVersion::V1 => "idx",
            IndexVersion::V2 => "idx2",
        }
    }

    /// Size of the index header.
    pub fn header_size(self) -> usize {
        match self {
            IndexVersion::V1 => 16,
            IndexVersion::V2 => 24,
        }
    }

    fn number(self) -> u32 {
        match self {
            IndexVersion::V1 => 1,
            IndexVersion::V2 => 2,
        }
    }
}

/// An inclusive range of blob ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    /// First id.
    pub start: u64,
    /// Last id. Smaller than `start` for an empty range.
    pub stop: u64,
}

impl IdRange {
    /// A range holding no ids.
    pub const EMPTY: IdRange = IdRange { start: 1, stop: 0 };

    /// Returns `true` if `id` lies in the range.
    pub fn contains(&self, id: u64) -> bool {
        self.start <= id && id <= self.stop
    }

    /// Number of ids in the range.
    pub fn count(&self) -> u64 {
        if self.stop < self.start {
            0
        } else {
            self.stop - self.start + 1
        }
    }
}

/// Header of an index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Format version.
    pub version: IndexVersion,
    /// Ids the index holds records for.
    pub range: IdRange,
}

impl IndexHeader {
    /// Decode a header read from an index file of `file_len` bytes.
    ///
    /// Version 1 headers carry no `id_stop`; it is inferred from the file length.
    pub fn decode(version: IndexVersion, buf: &[u8], file_len: u64) -> Result<Self> {
        let header_size = version.header_size();
        if buf.len() < header_size {
            return Err(Error::new(ErrorKind::Corruption, "index header truncated")
                .with_context("expected", header_size)
                .with_context("actual", buf.len()));
        }

        match u32::from_le_bytes(le4(&buf[0..4])) {
            ENDIAN_TAG => {}
            REVERSED_ENDIAN_TAG => {
                return Err(Error::new(ErrorKind::Corruption, "index written with reversed byte order"));
            }
            tag => {
                return Err(
                    Error::new(ErrorKind::Corruption, "bad index endian tag").with_context("tag", format!("{tag:#x}"))
                );
            }
        }

        let number = u32::from_le_bytes(le4(&buf[4..8]));
        if number != version.number() {
            return Err(Error::new(ErrorKind::Corruption, "unexpected index version")
                .with_context("expected", version.number())
                .with_context("actual", number));
        }

        let start = u64::from_le_bytes(le8(&buf[8..16]));
        let stop = match version {
            IndexVersion::V2 => u64::from_le_bytes(le8(&buf[16..24])),
            IndexVersion::V1 => {
                let records = file_len.saturating_sub(header_size as u64) / RECORD_SIZE as u64;
                if records == 0 {
                    return Ok(Self {
                        version,
                        range: IdRange::EMPTY,
                    });
                }
                start.checked_add(records - 1).ok_or_else(|| {
                    Error::new(ErrorKind::Corruption, "index id range overflows")
                        .with_context("start", start)
                        .with_context("records", records)
                })?
            }
        };

        Ok(Self {
            version,
            range: IdRange { start, stop },
        })
    }

    /// Encode a version 2 header.
    pub fn encode(&self) -> [u8; 24] {
        let mut buf = [0; 24];
        buf[0..4].copy_from_slice(&ENDIAN_TAG.to_le_bytes());
        buf[4..8].copy_from_slice(&IndexVersion::V2.number().to_le_bytes());
        buf[8..16].copy_from_slice(&self.range.start.to_le_bytes());
        buf[16..24].copy_from_slice(&self.range.stop.to_le_bytes());
        buf
    }
}

/// Where a blob lives: its object offset and its size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocationRecord {
    /// Global offset of the blob bytes, `0` if there is no blob.
    pub offset: u64,
    /// Size of the blob in bytes.
    pub size: u32,
}

impl LocationRecord {
    /// Decode one record.
    pub fn decode(version: IndexVersion, buf: &[u8; RECORD_SIZE]) -> Self {
        match version {
            IndexVersion::V2 => {
                let v = u64::from_le_bytes(*buf);
                Self {
                    offset: v >> 24,
                    size: (v & MAX_BLOB_SIZE as u64) as u32,
                }
            }
            IndexVersion::V1 => {
                let hi = u32::from_le_bytes(le4(&buf[0..4])) as u64;
                let packed = u32::from_le_bytes(le4(&buf[4..8]));
                let raw = (hi << 8) | (packed >> 24) as u64;
                Self {
                    // Version 1 offsets are stored 1-based.
                    offset: raw.saturating_sub(1),
                    size: packed & MAX_BLOB_SIZE,
                }
            }
        }
    }

    /// Encode a version 2 record.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        ((self.offset << 24) | (self.size & MAX_BLOB_SIZE) as u64).to_le_bytes()
    }

    /// Returns `true` if no blob exists for the id.
    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    /// Shard number holding the blob, starting from 1.
    pub fn shard(&self) -> u32 {
        (self.offset >> SHARD_BITS) as u32 + 1
    }

    /// Offset of the blob within its shard.
    pub fn shard_offset(&self) -> u64 {
        self.offset & SHARD_MASK
    }
}

/// Header preceding every blob in a shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlobHeader {
    /// Id the blob was stored under.
    pub id: u64,
    /// Size of the blob in bytes.
    pub size: u32,
    /// CRC-32C of the blob bytes.
    pub crc: u32,
}

impl BlobHeader {
    /// Decode a blob header.
    pub fn decode(version: IndexVersion, buf: &[u8; BLOB_HEADER_SIZE]) -> Self {
        match version {
            IndexVersion::V2 => {
                let v = u64::from_le_bytes(le8(&buf[0..8]));
                Self {
                    id: v >> 24,
                    size: (v & MAX_BLOB_SIZE as u64) as u32,
                    crc: u32::from_le_bytes(le4(&buf[8..12])),
                }
            }
            IndexVersion::V1 => {
                let low = buf[0] as u64;
                let size = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);
                let high = u32::from_be_bytes(le4(&buf[4..8])) as u64;
                Self {
                    id: (high << 8) | low,
                    size,
                    crc: u32::from_be_bytes(le4(&buf[8..12])),
                }
            }
        }
    }

    /// Encode a version 2 blob header.
    pub fn encode(&self) -> [u8; BLOB_HEADER_SIZE] {
        let mut buf = [0; BLOB_HEADER_SIZE];
        let v = (self.id << 24) | (self.size & MAX_BLOB_SIZE) as u64;
        buf[0..8].copy_from_slice(&v.to_le_bytes());
        buf[8..12].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }
}

/// Range of the index block holding `id`. Blocks are aligned to [`BLOCK_ENTRIES`] in id space.
pub fn block_range(id: u64) -> IdRange {
    let start = id & !(BLOCK_ENTRIES - 1);
    IdRange {
        start,
        stop: start + (BLOCK_ENTRIES - 1),
    }
}

/// Path of a shard of the database at `dir`. Shard 0 is the index file.
pub fn shard_path(dir: &Path, shard: u32, version: IndexVersion) -> PathBuf {
    if shard == 0 {
        return dir.join(version.file_name());
    }
    let name = shard_name(shard);
    dir.join(&name[..SHARD_DIR_DIGITS]).join(&name)
}

/// `shard - 1` as base-32 digits, most significant first.
fn shard_name(shard: u32) -> String {
    let mut n = shard - 1;
    let mut digits = [0u8; SHARD_NAME_DIGITS];
    for digit in digits.iter_mut().rev() {
        *digit = BASE32[(n & 31) as usize];
        n >>= 5;
    }
    digits.iter().map(|&d| d as char).collect()
}

fn le4(buf: &[u8]) -> [u8; 4] {
    let mut a = [0; 4];
    a.copy_from_slice(&buf[..4]);
    a
}

fn le8(buf: &[u8]) -> [u8; 8] {
    let mut a = [0; 8];
    a.copy_from_slice(&buf[..8]);
    a
}
