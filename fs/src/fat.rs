//! The free-space table: a flat array of 16-bit next-block pointers, one
//! entry per block on the volume.
//!
//! A chain is a singly linked list through the table: entry `i` holds the
//! index of the next block in the chain it belongs to, or `i` itself if it's
//! the last block. A zero entry means the block is free. Block 0 (the VCB)
//! and the FAT's own blocks are permanently marked used and never appear in
//! any chain.

use bfs_ds::DataStorage;
use bfs_err::{FsError, Result};
use log::debug;

use crate::vcb::Vcb;
use crate::{FAT_EXTEND_BLOCKS, MAX_FILE_SIZE};

/// Number of FAT entries a block of `block_size` bytes holds.
fn entries_per_block(block_size: u32) -> Result<u64> {
    let n = block_size as u64 / 2;
    if n == 0 {
        return Err(FsError::Inconsistent.into());
    }
    Ok(n)
}

/// How many blocks the FAT itself needs to cover a volume of `num_blocks`
/// blocks.
pub fn blocks_needed(num_blocks: u64, block_size: u32) -> Result<u64> {
    let per_block = entries_per_block(block_size)?;
    Ok(num_blocks.div_ceil(per_block))
}

pub struct Fat {
    entries: Vec<u16>,
}

impl Fat {
    /// Builds a fresh table for a volume described by `vcb`, with the VCB
    /// block and the FAT's own blocks marked reserved.
    pub fn format(vcb: &Vcb) -> Result<Self> {
        let per_block = entries_per_block(vcb.size_of_blocks)?;
        let mut entries = vec![0u16; (vcb.num_of_freespace_blocks * per_block) as usize];
        for entry in entries
            .iter_mut()
            .take(vcb.num_of_freespace_blocks as usize + 1)
        {
            *entry = 1;
        }
        Ok(Self { entries })
    }

    /// Reads the FAT's blocks (starting right after the VCB) into memory.
    pub fn load<DS: DataStorage>(ds: &DS, vcb: &Vcb) -> Result<Self> {
        let block_size = vcb.size_of_blocks as usize;
        let mut buffer = vec![0u8; vcb.num_of_freespace_blocks as usize * block_size];
        ds.lba_read(&mut buffer, vcb.num_of_freespace_blocks, vcb.freespace_start as u64)?;
        let entries = buffer
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        Ok(Self { entries })
    }

    /// Writes the whole table back to its reserved blocks.
    pub fn flush<DS: DataStorage>(&self, ds: &DS, vcb: &Vcb) -> Result<()> {
        let mut buffer = Vec::with_capacity(self.entries.len() * 2);
        for entry in &self.entries {
            buffer.extend_from_slice(&entry.to_le_bytes());
        }
        ds.lba_write(&buffer, vcb.num_of_freespace_blocks, vcb.freespace_start as u64)?;
        Ok(())
    }

    /// Returns this block's table entry without following or extending the
    /// chain. Used by the directory engine, which only ever walks chains that
    /// already exist.
    pub fn peek(&self, block: u32) -> u32 {
        self.entries[block as usize] as u32
    }

    /// True if `block` is the last block of the chain it belongs to.
    pub fn is_chain_end(&self, block: u32) -> bool {
        self.peek(block) == block
    }

    /// Links `count` free blocks into a new chain and returns its first
    /// block. Persists the updated table before returning.
    pub fn allocate<DS: DataStorage>(&mut self, vcb: &mut Vcb, ds: &DS, count: u64) -> Result<u32> {
        if count < 1 {
            return Err(FsError::Inconsistent.into());
        }
        if vcb.num_of_available_freespace_blocks < count {
            return Err(FsError::NoSpace.into());
        }
        if count * vcb.size_of_blocks as u64 > MAX_FILE_SIZE {
            return Err(FsError::NoSpace.into());
        }

        let mut fs_index = vcb.first_free_block_in_freespace_map as u64;
        let mut prev: Option<u32> = None;
        let mut start_block: Option<u32> = None;
        let mut remaining = count;
        vcb.num_of_available_freespace_blocks -= count;

        while fs_index < vcb.num_blocks && remaining > 0 {
            if self.entries[fs_index as usize] == 0 {
                let here = fs_index as u32;
                if start_block.is_none() {
                    start_block = Some(here);
                }
                if let Some(prev_index) = prev {
                    self.entries[prev_index as usize] = here as u16;
                }
                self.entries[here as usize] = here as u16;
                prev = Some(here);
                remaining -= 1;
            }
            fs_index += 1;
        }

        if remaining > 0 {
            return Err(FsError::Inconsistent.into());
        }

        while fs_index < vcb.num_blocks {
            if self.entries[fs_index as usize] == 0 {
                vcb.first_free_block_in_freespace_map = fs_index as u32;
                break;
            }
            fs_index += 1;
        }

        self.flush(ds, vcb)?;
        Ok(start_block.expect("remaining reached zero without a start block"))
    }

    /// Releases the chain starting at `start`, crediting every freed block
    /// back to the volume's free count.
    pub fn free<DS: DataStorage>(&mut self, vcb: &mut Vcb, ds: &DS, start: u32) -> Result<()> {
        if start as u64 <= vcb.num_of_freespace_blocks {
            return Err(FsError::Inconsistent.into());
        }
        if start < vcb.first_free_block_in_freespace_map {
            vcb.first_free_block_in_freespace_map = start;
        }

        let mut current = start;
        let mut freed = 0u64;
        loop {
            let next = self.entries[current as usize];
            if next == 0 {
                break;
            }
            let is_last = next as u32 == current;
            self.entries[current as usize] = 0;
            freed += 1;
            if is_last {
                break;
            }
            current = next as u32;
        }

        vcb.num_of_available_freespace_blocks += freed;
        self.flush(ds, vcb)?;
        Ok(())
    }

    /// Appends `FAT_EXTEND_BLOCKS` fresh blocks to the chain containing
    /// `chain_member`.
    fn extend<DS: DataStorage>(
        &mut self,
        vcb: &mut Vcb,
        ds: &DS,
        chain_member: u32,
        current_size: u64,
    ) -> Result<()> {
        if current_size >= MAX_FILE_SIZE {
            return Err(FsError::NoSpace.into());
        }
        let mut tail = chain_member;
        while !self.is_chain_end(tail) {
            tail = self.peek(tail);
        }
        let next_start = self.allocate(vcb, ds, FAT_EXTEND_BLOCKS)?;
        debug!("extending chain at block {tail} with {FAT_EXTEND_BLOCKS} blocks starting at {next_start}");
        self.entries[tail as usize] = next_start as u16;
        self.flush(ds, vcb)?;
        Ok(())
    }

    /// Returns the block following `current_block`, extending the chain with
    /// `FAT_EXTEND_BLOCKS` fresh blocks first if `current_block` was the
    /// chain's tail.
    pub fn next<DS: DataStorage>(
        &mut self,
        vcb: &mut Vcb,
        ds: &DS,
        current_block: u32,
        current_size: u64,
    ) -> Result<u32> {
        let mut next_block = self.peek(current_block);
        if next_block == current_block {
            self.extend(vcb, ds, current_block, current_size)?;
            next_block = self.peek(current_block);
        }
        Ok(next_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_ds_mem::DataStorageServer;

    fn fresh(num_blocks: u64, block_size: u32) -> (Vcb, Fat) {
        let vcb = Vcb::format(num_blocks, block_size).unwrap();
        let fat = Fat::format(&vcb).unwrap();
        (vcb, fat)
    }

    #[test]
    fn allocate_links_a_chain_with_a_self_terminator() {
        let (mut vcb, mut fat) = fresh(64, 512);
        let ds = DataStorageServer::new(64, 512);
        let start = fat.allocate(&mut vcb, &ds, 3).unwrap();
        let second = fat.peek(start);
        let third = fat.peek(second);
        assert!(fat.is_chain_end(third));
        assert_ne!(start, second);
        assert_ne!(second, third);
    }

    #[test]
    fn free_credits_every_block_back() {
        let (mut vcb, mut fat) = fresh(64, 512);
        let ds = DataStorageServer::new(64, 512);
        let before = vcb.num_of_available_freespace_blocks;
        let start = fat.allocate(&mut vcb, &ds, 4).unwrap();
        assert_eq!(vcb.num_of_available_freespace_blocks, before - 4);
        fat.free(&mut vcb, &ds, start).unwrap();
        assert_eq!(vcb.num_of_available_freespace_blocks, before);
        assert_eq!(fat.peek(start), 0);
    }

    #[test]
    fn allocating_past_capacity_fails() {
        let (mut vcb, mut fat) = fresh(16, 512);
        let ds = DataStorageServer::new(16, 512);
        let available = vcb.num_of_available_freespace_blocks;
        let err = fat.allocate(&mut vcb, &ds, available + 1).unwrap_err();
        assert!(matches!(err, bfs_err::Error::Fs(FsError::NoSpace)));
    }

    #[test]
    fn next_extends_a_chain_at_its_tail() {
        let (mut vcb, mut fat) = fresh(256, 512);
        let ds = DataStorageServer::new(256, 512);
        let start = fat.allocate(&mut vcb, &ds, 1).unwrap();
        assert!(fat.is_chain_end(start));
        let grown = fat.next(&mut vcb, &ds, start, 512).unwrap();
        assert_ne!(grown, start);
        assert!(!fat.is_chain_end(start));
    }

    #[test]
    fn round_trips_through_a_device() {
        let (mut vcb, mut fat) = fresh(64, 512);
        let ds = DataStorageServer::new(64, 512);
        let start = fat.allocate(&mut vcb, &ds, 2).unwrap();
        fat.flush(&ds, &vcb).unwrap();

        let reloaded = Fat::load(&ds, &vcb).unwrap();
        assert_eq!(reloaded.peek(start), fat.peek(start));
    }
}
