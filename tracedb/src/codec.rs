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

//! Column decoding hook.
//!
//! Blobs hold compressed trace columns. Decoding is left to the caller through [`ColumnDecoder`];
//! [`PassthroughDecoder`] handles blobs stored uncompressed.

use serde::{Deserialize, Serialize};
use tracedb_common::error::{Error, ErrorKind, Result};

/// Kinds of trace column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Base calls.
    Basecall,
    /// Per base quality scores.
    QualityScore,
    /// Peak indices into the signal.
    PeakIndex,
    /// Free text comments.
    Comment,
    /// Extended data.
    Extended,
}

/// Decompresses one column read from a blob.
pub trait ColumnDecoder: Send + Sync {
    /// Decode `src` into `dst`, returning the number of bytes written.
    ///
    /// Fails with [`ErrorKind::BufferSizeLimit`] if `dst` is too small; the caller may retry with a larger buffer.
    fn decompress_column(&self, kind: ColumnKind, src: &[u8], dst: &mut [u8]) -> Result<usize>;
}

/// Copies columns verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl ColumnDecoder for PassthroughDecoder {
    fn decompress_column(&self, kind: ColumnKind, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        if dst.len() < src.len() {
            return Err(Error::new(ErrorKind::BufferSizeLimit, "destination too small")
                .with_context("kind", format!("{kind:?}"))
                .with_context("required", src.len())
                .with_context("available", dst.len()));
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }
}

impl<F> ColumnDecoder for F
where
    F: Fn(ColumnKind, &[u8], &mut [u8]) -> Result<usize> + Send + Sync,
{
    fn decompress_column(&self, kind: ColumnKind, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        self(kind, src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_passthrough() {
        let mut dst = [0; 8];
        assert_eq!(
            PassthroughDecoder
                .decompress_column(ColumnKind::Basecall, b"ACGT", &mut dst)
                .unwrap(),
            4
        );
        assert_eq!(&dst[..4], b"ACGT");

        let e = PassthroughDecoder
            .decompress_column(ColumnKind::Comment, b"too long for dst", &mut dst)
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::BufferSizeLimit);
    }

    #[test_log::test]
    fn test_closure_decoder() {
        let upper = |_: ColumnKind, src: &[u8], dst: &mut [u8]| -> Result<usize> {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = s.to_ascii_uppercase();
            }
            Ok(src.len().min(dst.len()))
        };
        let mut dst = [0; 4];
        assert_eq!(upper.decompress_column(ColumnKind::Basecall, b"acgt", &mut dst).unwrap(), 4);
        assert_eq!(&dst, b"ACGT");
    }
}
