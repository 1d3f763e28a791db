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

//! File access used by the read path.

use std::{fmt::Debug, fs::File, io, path::Path};

/// A file opened for positioned reads.
pub trait BlobFile: Send + Sync + Debug + 'static {
    /// Read up to `buf.len()` bytes at `offset`. Returns the number of bytes read, `0` at end of file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Current size of the file in bytes.
    fn size(&self) -> io::Result<u64>;
}

/// Opens files for [`TraceDb`](crate::TraceDb).
///
/// Files are closed when the returned handle is dropped.
pub trait FileSystem: Send + Sync + Debug + 'static {
    /// Open an existing file read-only.
    fn open(&self, path: &Path) -> io::Result<Box<dyn BlobFile>>;
}

/// [`FileSystem`] backed by the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn open(&self, path: &Path) -> io::Result<Box<dyn BlobFile>> {
        let file = File::open(path)?;
        Ok(Box::new(file))
    }
}

impl BlobFile for File {
    #[cfg(target_family = "unix")]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        FileExt::read_at(self, buf, offset)
    }

    #[cfg(target_family = "windows")]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        FileExt::seek_read(self, buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// Read until `buf` is full or the end of file is reached. Returns the number of bytes read.
pub fn read_exact_at(file: &dyn BlobFile, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match file.read_at(&mut buf[read..], offset + read as u64) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}
