//! The buffered I/O engine: open file descriptors, each backed by one
//! block-sized buffer, reading and writing through it the way the directory
//! engine reads and writes through the FAT chain it straddles.

use bfs_ds::DataStorage;
use bfs_err::{FsError, Result};
use log::warn;

use crate::directory::{self, DirectoryEntry, EntryType};
use crate::filesystem::{now_unix, Filesystem};
use crate::path::ResolvedIndex;
use crate::{DEFAULT_FILE_BLOCKS, MAXFCBS};

/// A file descriptor, indexing into the filesystem's FCB table.
pub type Fd = usize;

bitflags::bitflags! {
    /// Mirrors the handful of POSIX `open()` flags this filesystem
    /// understands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        const READ     = 0b0001;
        const WRITE    = 0b0010;
        const CREATE   = 0b0100;
        const TRUNCATE = 0b1000;
    }
}

/// Where a [`Filesystem::seek`] offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

pub(crate) struct Fcb {
    pub(crate) entry: DirectoryEntry,
    pub(crate) parent_start_block: u32,
    pub(crate) parent_index: usize,
    pub(crate) buffer: Vec<u8>,
    pub(crate) buffer_offset: usize,
    pub(crate) buffer_len: usize,
    pub(crate) block_index: u64,
    pub(crate) current_block: u32,
    pub(crate) flags: OpenFlags,
    pub(crate) dirty: bool,
}

impl<DS: DataStorage> Filesystem<DS> {
    /// Opens `path`, creating it first if it's missing and `flags` includes
    /// [`OpenFlags::CREATE`].
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<Fd> {
        let resolved = self.resolve(path)?;
        let parent_start_block = resolved.parent_start_block;
        let mut parent = resolved.parent;

        let (entry, parent_index) = match resolved.index {
            ResolvedIndex::Root => return Err(FsError::IsADirectory.into()),
            ResolvedIndex::Existing(idx) => {
                if parent[idx].is_dir == EntryType::Directory {
                    return Err(FsError::IsADirectory.into());
                }
                (parent[idx].clone(), idx)
            }
            ResolvedIndex::Missing(name) => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(FsError::NotFound.into());
                }
                let idx = directory::first_free_slot(&parent).ok_or(FsError::Inconsistent)?;
                let start_block = self.fat.allocate(&mut self.vcb, &self.ds, DEFAULT_FILE_BLOCKS)?;
                let now = now_unix();
                parent[idx] = DirectoryEntry {
                    name,
                    size: 0,
                    start_block,
                    is_dir: EntryType::Regular,
                    creation_time: now,
                    modification_time: now,
                    access_time: now,
                };
                directory::write_dir(&parent, &self.fat, &self.vcb, &self.ds)?;
                self.sync_parent(parent_start_block, parent.clone());
                (parent[idx].clone(), idx)
            }
        };

        let fd = self.fcbs.iter().position(|f| f.is_none()).ok_or_else(|| {
            warn!("all {MAXFCBS} file control blocks are in use");
            FsError::NoFcb
        })?;

        let mut entry = entry;
        if flags.contains(OpenFlags::TRUNCATE) {
            entry.size = 0;
        }
        let block_size = self.vcb.size_of_blocks as usize;
        let current_block = entry.start_block;

        self.fcbs[fd] = Some(Fcb {
            entry,
            parent_start_block,
            parent_index,
            buffer: vec![0u8; block_size],
            buffer_offset: 0,
            buffer_len: 0,
            block_index: 0,
            current_block,
            flags,
            dirty: false,
        });

        Ok(fd)
    }

    /// Reads up to `buffer.len()` bytes, never past the file's current size.
    pub fn read(&mut self, fd: Fd, buffer: &mut [u8]) -> Result<usize> {
        let block_size = self.vcb.size_of_blocks as usize;
        let (flags, mut current_block, mut block_index, mut buffer_offset, mut buffer_len, file_size, mut local_buf) = {
            let fcb = self.fcb(fd)?;
            (
                fcb.flags,
                fcb.current_block,
                fcb.block_index,
                fcb.buffer_offset,
                fcb.buffer_len,
                fcb.entry.size,
                fcb.buffer.clone(),
            )
        };
        if !flags.contains(OpenFlags::READ) {
            return Err(FsError::NotReadable.into());
        }

        // A seek that landed mid-block leaves the buffer empty but
        // `buffer_offset` pointing into it; load the block it actually
        // refers to before the usual part1/part2/part3 split, which assumes
        // the buffer already holds `current_block`'s predecessor.
        if buffer_len == 0 && buffer_offset != 0 {
            self.ds.lba_read(&mut local_buf, 1, current_block as u64)?;
            current_block = self.fat.next(&mut self.vcb, &self.ds, current_block, file_size)?;
            block_index += 1;
            buffer_len = block_size;
        }

        let remaining_in_buf = buffer_len.saturating_sub(buffer_offset);
        let delivered = block_index as usize * block_size - remaining_in_buf;
        let mut count = buffer.len();
        if delivered as u64 + count as u64 > file_size {
            count = file_size.saturating_sub(delivered as u64) as usize;
        }
        if count == 0 {
            return Ok(0);
        }

        let (part1, part2_blocks, part3) = if remaining_in_buf >= count {
            (count, 0, 0)
        } else {
            let rest = count - remaining_in_buf;
            let part2_blocks = rest / block_size;
            (remaining_in_buf, part2_blocks, rest - part2_blocks * block_size)
        };

        let mut written = 0;
        if part1 > 0 {
            buffer[..part1].copy_from_slice(&local_buf[buffer_offset..buffer_offset + part1]);
            buffer_offset += part1;
            written += part1;
        }

        let mut new_buffer_len = buffer_len;
        for _ in 0..part2_blocks {
            self.ds
                .lba_read(&mut buffer[written..written + block_size], 1, current_block as u64)?;
            current_block = self.fat.next(&mut self.vcb, &self.ds, current_block, file_size)?;
            block_index += 1;
            written += block_size;
        }

        if part3 > 0 {
            self.ds.lba_read(&mut local_buf, 1, current_block as u64)?;
            current_block = self.fat.next(&mut self.vcb, &self.ds, current_block, file_size)?;
            block_index += 1;
            buffer_offset = 0;
            let take = part3.min(block_size);
            buffer[written..written + take].copy_from_slice(&local_buf[..take]);
            buffer_offset += take;
            written += take;
            new_buffer_len = block_size;
        }

        let fcb = self.fcb_mut(fd)?;
        fcb.current_block = current_block;
        fcb.block_index = block_index;
        fcb.buffer_offset = buffer_offset;
        fcb.buffer_len = new_buffer_len;
        fcb.buffer = local_buf;
        fcb.entry.access_time = now_unix();
        Ok(written)
    }

    /// Writes `buffer` at the file's current position, growing its chain
    /// with [`crate::FAT_EXTEND_BLOCKS`] blocks whenever it runs past its
    /// current end.
    pub fn write(&mut self, fd: Fd, buffer: &[u8]) -> Result<usize> {
        let block_size = self.vcb.size_of_blocks as usize;
        let (flags, mut current_block, mut block_index, mut buffer_offset, mut local_buf, mut file_size) = {
            let fcb = self.fcb(fd)?;
            (
                fcb.flags,
                fcb.current_block,
                fcb.block_index,
                fcb.buffer_offset,
                fcb.buffer.clone(),
                fcb.entry.size,
            )
        };
        if !flags.contains(OpenFlags::WRITE) {
            return Err(FsError::NotWritable.into());
        }

        let mut caller_offset = 0usize;
        let mut written = 0usize;
        let mut remaining = buffer.len();

        while remaining > 0 {
            if buffer_offset == 0 && remaining >= block_size {
                self.ds
                    .lba_write(&buffer[caller_offset..caller_offset + block_size], 1, current_block as u64)?;
                current_block = self.fat.next(&mut self.vcb, &self.ds, current_block, file_size)?;
                block_index += 1;
                caller_offset += block_size;
                written += block_size;
                remaining -= block_size;
            } else {
                if buffer_offset == 0 {
                    self.ds.lba_read(&mut local_buf, 1, current_block as u64)?;
                }
                let space = block_size - buffer_offset;
                let moved = remaining.min(space);
                local_buf[buffer_offset..buffer_offset + moved]
                    .copy_from_slice(&buffer[caller_offset..caller_offset + moved]);
                buffer_offset += moved;
                if buffer_offset == block_size {
                    self.ds.lba_write(&local_buf, 1, current_block as u64)?;
                    buffer_offset = 0;
                    current_block = self.fat.next(&mut self.vcb, &self.ds, current_block, file_size)?;
                    block_index += 1;
                }
                caller_offset += moved;
                written += moved;
                remaining -= moved;
            }
        }

        let last_position = block_index * block_size as u64 + buffer_offset as u64;
        if last_position > file_size {
            file_size = last_position;
        }

        let now = now_unix();
        let fcb = self.fcb_mut(fd)?;
        fcb.current_block = current_block;
        fcb.block_index = block_index;
        fcb.buffer_offset = buffer_offset;
        fcb.buffer = local_buf;
        fcb.dirty = buffer_offset != 0;
        fcb.entry.size = file_size;
        fcb.entry.access_time = now;
        fcb.entry.modification_time = now;
        Ok(written)
    }

    /// Repositions the file's read/write pointer.
    pub fn seek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let block_size = self.vcb.size_of_blocks as u64;
        let (mut current_block, mut block_index, mut buffer_offset, mut buffer_len, start_block, file_size, dirty, local_buf) = {
            let fcb = self.fcb(fd)?;
            (
                fcb.current_block,
                fcb.block_index,
                fcb.buffer_offset,
                fcb.buffer_len,
                fcb.entry.start_block,
                fcb.entry.size,
                fcb.dirty,
                fcb.buffer.clone(),
            )
        };

        let current_pointer = block_index * block_size + buffer_offset as u64;
        let new_pointer = match whence {
            Whence::Start => offset,
            Whence::Current => current_pointer as i64 + offset,
            Whence::End => file_size as i64 + offset,
        };
        if new_pointer < 0 {
            return Err(FsError::NegativeSeek.into());
        }
        let new_pointer = new_pointer as u64;

        if dirty {
            self.ds.lba_write(&local_buf, 1, current_block as u64)?;
        }

        let new_block_index = new_pointer / block_size;
        let new_buffer_offset = (new_pointer % block_size) as usize;

        if new_block_index != block_index {
            let (mut walk_block, blocks_to_move) = if new_block_index < block_index {
                (start_block, new_block_index)
            } else {
                (current_block, new_block_index - block_index)
            };
            for _ in 0..blocks_to_move {
                walk_block = self.fat.next(&mut self.vcb, &self.ds, walk_block, file_size)?;
            }
            current_block = walk_block;
            block_index = new_block_index;
            buffer_len = 0;
        }
        buffer_offset = new_buffer_offset;

        let fcb = self.fcb_mut(fd)?;
        fcb.current_block = current_block;
        fcb.block_index = block_index;
        fcb.buffer_offset = buffer_offset;
        fcb.buffer_len = buffer_len;
        fcb.dirty = false;
        Ok(new_pointer)
    }

    /// Flushes any dirty buffer, persists the entry's final metadata to its
    /// parent directory, and frees the descriptor.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let (entry, parent_start_block, parent_index, dirty, current_block, local_buf) = {
            let fcb = self.fcb(fd)?;
            (
                fcb.entry.clone(),
                fcb.parent_start_block,
                fcb.parent_index,
                fcb.dirty,
                fcb.current_block,
                fcb.buffer.clone(),
            )
        };

        if dirty {
            self.ds.lba_write(&local_buf, 1, current_block as u64)?;
        }

        let mut parent = if parent_start_block == self.root_start_block {
            self.root.clone()
        } else if parent_start_block == self.cwd_start_block {
            self.cwd.clone()
        } else {
            directory::load_dir_by_start_block(parent_start_block, &self.fat, &self.vcb, &self.ds)?
        };
        parent[parent_index] = entry;
        directory::write_dir(&parent, &self.fat, &self.vcb, &self.ds)?;
        self.sync_parent(parent_start_block, parent);

        self.fcbs[fd] = None;
        Ok(())
    }

    pub(crate) fn fcb(&self, fd: Fd) -> Result<&Fcb> {
        if fd >= MAXFCBS {
            return Err(FsError::BadFd.into());
        }
        self.fcbs[fd].as_ref().ok_or_else(|| FsError::BadFd.into())
    }

    pub(crate) fn fcb_mut(&mut self, fd: Fd) -> Result<&mut Fcb> {
        if fd >= MAXFCBS {
            return Err(FsError::BadFd.into());
        }
        self.fcbs[fd].as_mut().ok_or_else(|| FsError::BadFd.into())
    }
}
