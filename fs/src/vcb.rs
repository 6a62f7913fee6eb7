//! Volume control block: the filesystem's superblock, living in block 0.

use bfs_ds::DataStorage;
use bfs_err::{FsError, Result};
use zerocopy::{little_endian::U32, little_endian::U64, FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{fat, MAGIC_NUMBER, MAX_DIR_ENTRIES};

const VOLUME_NAME_SIZE: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct VcbRaw {
    volume_name: [u8; VOLUME_NAME_SIZE],
    signature: U64,
    num_blocks: U64,
    size_of_blocks: U32,
    freespace_start: U32,
    first_free_block_in_freespace_map: U32,
    num_of_available_freespace_blocks: U32,
    num_of_freespace_blocks: U32,
    location_of_rootdir: U32,
    root_blocks: U32,
}

/// In-memory view of the volume control block.
///
/// `first_free_block_in_freespace_map` and `num_of_available_freespace_blocks`
/// are mutated by [`fat`] as blocks are allocated and freed; the rest is
/// fixed once the volume is formatted.
#[derive(Debug, Clone)]
pub struct Vcb {
    pub volume_name: String,
    pub signature: u64,
    pub num_blocks: u64,
    pub size_of_blocks: u32,
    pub freespace_start: u32,
    pub first_free_block_in_freespace_map: u32,
    pub num_of_available_freespace_blocks: u64,
    pub num_of_freespace_blocks: u64,
    pub location_of_rootdir: u32,
    pub root_blocks: u32,
}

impl Vcb {
    /// Formats a brand-new volume: reserves block 0 for the VCB and the
    /// blocks immediately after it for the FAT, leaving the rest free. The
    /// root directory has not been created yet; `location_of_rootdir` and
    /// `root_blocks` are filled in once it is.
    pub fn format(num_blocks: u64, block_size: u32) -> Result<Self> {
        let num_of_freespace_blocks = fat::blocks_needed(num_blocks, block_size)?;
        let reserved = num_of_freespace_blocks + 1;
        if num_blocks <= reserved {
            return Err(FsError::Inconsistent.into());
        }
        Ok(Self {
            volume_name: String::from("untitled volume"),
            signature: MAGIC_NUMBER,
            num_blocks,
            size_of_blocks: block_size,
            freespace_start: 1,
            first_free_block_in_freespace_map: reserved as u32,
            num_of_available_freespace_blocks: num_blocks - reserved,
            num_of_freespace_blocks,
            location_of_rootdir: 0,
            root_blocks: 0,
        })
    }

    /// Reads block 0 and interprets it as a VCB. Returns `Ok(None)` when the
    /// signature doesn't match, meaning the volume needs formatting.
    pub fn load<DS: DataStorage>(ds: &DS) -> Result<Option<Self>> {
        let block_size = ds.block_size();
        let mut buffer = vec![0u8; block_size as usize];
        ds.lba_read(&mut buffer, 1, 0)?;
        let raw = VcbRaw::ref_from_bytes(&buffer[..std::mem::size_of::<VcbRaw>()])
            .map_err(|_| FsError::Inconsistent)?;
        if raw.signature.get() != MAGIC_NUMBER {
            return Ok(None);
        }
        let name_len = raw
            .volume_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VOLUME_NAME_SIZE);
        Ok(Some(Self {
            volume_name: String::from_utf8_lossy(&raw.volume_name[..name_len]).into_owned(),
            signature: raw.signature.get(),
            num_blocks: raw.num_blocks.get(),
            size_of_blocks: raw.size_of_blocks.get(),
            freespace_start: raw.freespace_start.get(),
            first_free_block_in_freespace_map: raw.first_free_block_in_freespace_map.get(),
            num_of_available_freespace_blocks: raw.num_of_available_freespace_blocks.get() as u64,
            num_of_freespace_blocks: raw.num_of_freespace_blocks.get() as u64,
            location_of_rootdir: raw.location_of_rootdir.get(),
            root_blocks: raw.root_blocks.get(),
        }))
    }

    /// Writes the VCB back to block 0.
    pub fn flush<DS: DataStorage>(&self, ds: &DS) -> Result<()> {
        let block_size = ds.block_size() as usize;
        if block_size < std::mem::size_of::<VcbRaw>() {
            return Err(FsError::Inconsistent.into());
        }
        let mut volume_name = [0u8; VOLUME_NAME_SIZE];
        let name_bytes = self.volume_name.as_bytes();
        let copy_len = name_bytes.len().min(VOLUME_NAME_SIZE - 1);
        volume_name[..copy_len].copy_from_slice(&name_bytes[..copy_len]);

        let raw = VcbRaw {
            volume_name,
            signature: U64::new(self.signature),
            num_blocks: U64::new(self.num_blocks),
            size_of_blocks: U32::new(self.size_of_blocks),
            freespace_start: U32::new(self.freespace_start),
            first_free_block_in_freespace_map: U32::new(self.first_free_block_in_freespace_map),
            num_of_available_freespace_blocks: U32::new(
                self.num_of_available_freespace_blocks as u32,
            ),
            num_of_freespace_blocks: U32::new(self.num_of_freespace_blocks as u32),
            location_of_rootdir: U32::new(self.location_of_rootdir),
            root_blocks: U32::new(self.root_blocks),
        };

        let mut buffer = vec![0u8; block_size];
        buffer[..std::mem::size_of::<VcbRaw>()].copy_from_slice(raw.as_bytes());
        ds.lba_write(&buffer, 1, 0)?;
        Ok(())
    }

    /// Capacity in entries a freshly created directory should request, i.e.
    /// the default used for the root and for every directory made through
    /// `mkdir`.
    pub fn default_dir_entries(&self) -> usize {
        MAX_DIR_ENTRIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_ds_mem::DataStorageServer;

    #[test]
    fn formats_reserve_the_fat_and_vcb() {
        let vcb = Vcb::format(256, 512).unwrap();
        assert_eq!(vcb.freespace_start, 1);
        assert_eq!(vcb.num_of_freespace_blocks, 1);
        assert_eq!(vcb.first_free_block_in_freespace_map, 2);
        assert_eq!(vcb.num_of_available_freespace_blocks, 254);
    }

    #[test]
    fn round_trips_through_a_device() {
        let ds = DataStorageServer::new(64, 512);
        assert!(Vcb::load(&ds).unwrap().is_none());

        let mut vcb = Vcb::format(64, 512).unwrap();
        vcb.volume_name = "scratch".to_string();
        vcb.location_of_rootdir = 5;
        vcb.root_blocks = 1;
        vcb.flush(&ds).unwrap();

        let loaded = Vcb::load(&ds).unwrap().unwrap();
        assert_eq!(loaded.volume_name, "scratch");
        assert_eq!(loaded.num_blocks, 64);
        assert_eq!(loaded.location_of_rootdir, 5);
        assert_eq!(loaded.root_blocks, 1);
    }
}
