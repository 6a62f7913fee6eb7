// Copyright 2024 Kevin Ludwig
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
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::Path,
};

use bfs_ds::{DataStorage, Error, IoError, Result};
use log::error;

/// A block device backed by a regular file, sized to exactly
/// `num_blocks * block_size` bytes.
pub struct DataStorageServer {
    file: File,
    block_size: u32,
    num_blocks: u64,
}

impl DataStorageServer {
    /// Open (or create) `path` as a volume of `num_blocks` sectors of
    /// `block_size` bytes each, growing/truncating the backing file to the
    /// exact volume size.
    pub fn create<P: AsRef<Path>>(path: P, num_blocks: u64, block_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| Error::Io(IoError::Backend(e.to_string())))?;
        file.set_len(num_blocks * block_size as u64)
            .map_err(|e| Error::Io(IoError::Backend(e.to_string())))?;
        Ok(Self {
            file,
            block_size,
            num_blocks,
        })
    }

    /// Open an existing volume file without resizing it.
    pub fn open<P: AsRef<Path>>(path: P, block_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Io(IoError::Backend(e.to_string())))?;
        let len = file
            .metadata()
            .map_err(|e| Error::Io(IoError::Backend(e.to_string())))?
            .len();
        Ok(Self {
            file,
            block_size,
            num_blocks: len / block_size as u64,
        })
    }
}

impl DataStorage for DataStorageServer {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn lba_read(&self, buffer: &mut [u8], count: u64, start: u64) -> Result<u64> {
        let len = (count * self.block_size as u64) as usize;
        let offset = start * self.block_size as u64;
        if let Err(e) = self.file.read_exact_at(&mut buffer[..len], offset) {
            error!("LBAread failed at block {start} (count {count}): {e}");
            return Err(Error::Io(IoError::Backend(e.to_string())));
        }
        Ok(count)
    }

    fn lba_write(&self, buffer: &[u8], count: u64, start: u64) -> Result<u64> {
        let len = (count * self.block_size as u64) as usize;
        let offset = start * self.block_size as u64;
        if let Err(e) = self.file.write_all_at(&buffer[..len], offset) {
            error!("LBAwrite failed at block {start} (count {count}): {e}");
            return Err(Error::Io(IoError::Backend(e.to_string())));
        }
        Ok(count)
    }
}
