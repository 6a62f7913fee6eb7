//! The directory engine: directories are arrays of fixed-size entries,
//! serialized as a flat byte stream across whatever FAT chain backs them.
//! An entry's on-disk form is 54 bytes and a block is (almost always) not a
//! multiple of that, so entries routinely straddle block boundaries; this
//! module treats a directory's storage as one contiguous byte stream and
//! lets the chain-following I/O take care of the rest.

use bfs_ds::DataStorage;
use bfs_err::{FsError, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::fat::Fat;
use crate::vcb::Vcb;
use crate::MAX_NAME_SIZE;

const NAME_FIELD_SIZE: usize = MAX_NAME_SIZE + 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct DirectoryEntryRaw {
    name: [u8; NAME_FIELD_SIZE],
    size: U64,
    start_block: U32,
    is_dir: u8,
    creation_time: U64,
    modification_time: U64,
    access_time: U64,
}

const RAW_SIZE: usize = std::mem::size_of::<DirectoryEntryRaw>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    Directory,
}

/// One slot in a directory. An empty `name` marks the slot as free.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub size: u64,
    pub start_block: u32,
    pub is_dir: EntryType,
    pub creation_time: u64,
    pub modification_time: u64,
    pub access_time: u64,
}

impl DirectoryEntry {
    fn to_raw(&self) -> Result<DirectoryEntryRaw> {
        let name_bytes = self.name.as_bytes();
        if name_bytes.len() > MAX_NAME_SIZE {
            return Err(FsError::NameTooLong.into());
        }
        let mut name = [0u8; NAME_FIELD_SIZE];
        name[..name_bytes.len()].copy_from_slice(name_bytes);
        Ok(DirectoryEntryRaw {
            name,
            size: U64::new(self.size),
            start_block: U32::new(self.start_block),
            is_dir: matches!(self.is_dir, EntryType::Directory) as u8,
            creation_time: U64::new(self.creation_time),
            modification_time: U64::new(self.modification_time),
            access_time: U64::new(self.access_time),
        })
    }

    fn from_raw(raw: &DirectoryEntryRaw) -> Self {
        let name_len = raw.name.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_SIZE);
        Self {
            name: String::from_utf8_lossy(&raw.name[..name_len]).into_owned(),
            size: raw.size.get(),
            start_block: raw.start_block.get(),
            is_dir: if raw.is_dir != 0 {
                EntryType::Directory
            } else {
                EntryType::Regular
            },
            creation_time: raw.creation_time.get(),
            modification_time: raw.modification_time.get(),
            access_time: raw.access_time.get(),
        }
    }

    /// An empty, unused slot.
    pub fn free() -> Self {
        Self {
            name: String::new(),
            size: 0,
            start_block: 0,
            is_dir: EntryType::Regular,
            creation_time: 0,
            modification_time: 0,
            access_time: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.name.is_empty()
    }
}

/// Space a directory of `requested_entries` entries actually needs once
/// rounded up to whole blocks.
pub struct Layout {
    pub block_needed: u64,
    pub actual_de_num: usize,
}

pub fn layout_for(requested_entries: usize, block_size: u32) -> Layout {
    let space_needed = RAW_SIZE * requested_entries;
    let block_needed = (space_needed as u64).div_ceil(block_size as u64);
    let space_allocated = block_needed as usize * block_size as usize;
    Layout {
        block_needed,
        actual_de_num: space_allocated / RAW_SIZE,
    }
}

fn read_chain_bytes<DS: DataStorage>(
    start_block: u32,
    num_blocks: u64,
    fat: &Fat,
    ds: &DS,
    block_size: u32,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(num_blocks as usize * block_size as usize);
    let mut block = start_block;
    let mut buf = vec![0u8; block_size as usize];
    for i in 0..num_blocks {
        ds.lba_read(&mut buf, 1, block as u64)?;
        out.extend_from_slice(&buf);
        if i + 1 < num_blocks {
            block = fat.peek(block);
        }
    }
    Ok(out)
}

fn write_chain_bytes<DS: DataStorage>(
    start_block: u32,
    bytes: &[u8],
    fat: &Fat,
    ds: &DS,
    block_size: u32,
) -> Result<()> {
    let mut block = start_block;
    let mut buf = vec![0u8; block_size as usize];
    for chunk in bytes.chunks(block_size as usize) {
        buf.iter_mut().for_each(|b| *b = 0);
        buf[..chunk.len()].copy_from_slice(chunk);
        ds.lba_write(&buf, 1, block as u64)?;
        if !fat.is_chain_end(block) {
            block = fat.peek(block);
        }
    }
    Ok(())
}

/// Creates a new directory, allocating its storage and writing it out.
/// `parent` is `None` only for the root, which is its own parent.
pub fn create_directory<DS: DataStorage>(
    parent: Option<&[DirectoryEntry]>,
    fat: &mut Fat,
    vcb: &mut Vcb,
    ds: &DS,
    num_entries: usize,
    now: u64,
) -> Result<Vec<DirectoryEntry>> {
    let layout = layout_for(num_entries, vcb.size_of_blocks);
    let start_block = fat.allocate(vcb, ds, layout.block_needed)?;

    let mut entries: Vec<DirectoryEntry> = (0..layout.actual_de_num)
        .map(|_| DirectoryEntry::free())
        .collect();

    entries[0] = DirectoryEntry {
        name: ".".to_string(),
        size: (layout.actual_de_num * RAW_SIZE) as u64,
        start_block,
        is_dir: EntryType::Directory,
        creation_time: now,
        modification_time: now,
        access_time: now,
    };

    let parent_dot = parent.map(|p| p[0].clone()).unwrap_or_else(|| entries[0].clone());
    entries[1] = DirectoryEntry {
        name: "..".to_string(),
        size: parent_dot.size,
        start_block: parent_dot.start_block,
        is_dir: parent_dot.is_dir,
        creation_time: parent_dot.creation_time,
        modification_time: parent_dot.modification_time,
        access_time: parent_dot.access_time,
    };

    write_dir(&entries, fat, vcb, ds)?;
    Ok(entries)
}

/// Serializes `dir` across its FAT chain.
pub fn write_dir<DS: DataStorage>(
    dir: &[DirectoryEntry],
    fat: &Fat,
    vcb: &Vcb,
    ds: &DS,
) -> Result<()> {
    let mut bytes = Vec::with_capacity(dir.len() * RAW_SIZE);
    for entry in dir {
        bytes.extend_from_slice(entry.to_raw()?.as_bytes());
    }
    write_chain_bytes(dir[0].start_block, &bytes, fat, ds, vcb.size_of_blocks)
}

/// Loads the directory described by `entry` from its FAT chain.
pub fn load_dir<DS: DataStorage>(
    entry: &DirectoryEntry,
    fat: &Fat,
    vcb: &Vcb,
    ds: &DS,
) -> Result<Vec<DirectoryEntry>> {
    let dir_blocks = entry.size.div_ceil(vcb.size_of_blocks as u64).max(1);
    load_dir_blocks(entry.start_block, dir_blocks, fat, vcb, ds)
}

/// Number of blocks in the chain starting at `start_block`.
pub fn chain_block_count(start_block: u32, fat: &Fat) -> u64 {
    let mut count = 1;
    let mut block = start_block;
    while !fat.is_chain_end(block) {
        block = fat.peek(block);
        count += 1;
    }
    count
}

/// Loads a directory knowing only its start block, by walking its chain to
/// find its length first. Used to reload a directory that isn't kept
/// resident (neither the root nor the current directory) so a change to one
/// of its entries can be persisted.
pub fn load_dir_by_start_block<DS: DataStorage>(
    start_block: u32,
    fat: &Fat,
    vcb: &Vcb,
    ds: &DS,
) -> Result<Vec<DirectoryEntry>> {
    let dir_blocks = chain_block_count(start_block, fat);
    load_dir_blocks(start_block, dir_blocks, fat, vcb, ds)
}

fn load_dir_blocks<DS: DataStorage>(
    start_block: u32,
    dir_blocks: u64,
    fat: &Fat,
    vcb: &Vcb,
    ds: &DS,
) -> Result<Vec<DirectoryEntry>> {
    let actual_de_num = (dir_blocks * vcb.size_of_blocks as u64) as usize / RAW_SIZE;
    let bytes = read_chain_bytes(start_block, dir_blocks, fat, ds, vcb.size_of_blocks)?;

    let mut entries = Vec::with_capacity(actual_de_num);
    for chunk in bytes.chunks_exact(RAW_SIZE).take(actual_de_num) {
        let raw = DirectoryEntryRaw::ref_from_bytes(chunk).map_err(|_| FsError::Inconsistent)?;
        entries.push(DirectoryEntry::from_raw(raw));
    }
    Ok(entries)
}

/// Index of the entry named `name`, if any.
pub fn index_of(dir: &[DirectoryEntry], name: &str) -> Option<usize> {
    dir.iter().position(|e| e.name == name)
}

/// Index of the first free slot, skipping the reserved `.`/`..` entries.
pub fn first_free_slot(dir: &[DirectoryEntry]) -> Option<usize> {
    dir.iter().skip(2).position(|e| e.is_free()).map(|i| i + 2)
}

/// True if any entry (other than `.`/`..`) is named `name`.
pub fn name_exists(dir: &[DirectoryEntry], name: &str) -> bool {
    dir.iter().skip(2).any(|e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_ds_mem::DataStorageServer;
    use crate::MAX_DIR_ENTRIES;

    fn new_volume() -> (Vcb, Fat, DataStorageServer) {
        let vcb = Vcb::format(512, 512).unwrap();
        let fat = Fat::format(&vcb).unwrap();
        let ds = DataStorageServer::new(512, 512);
        (vcb, fat, ds)
    }

    #[test]
    fn root_is_its_own_parent() {
        let (mut vcb, mut fat, ds) = new_volume();
        let root = create_directory(None, &mut fat, &mut vcb, &ds, MAX_DIR_ENTRIES, 1).unwrap();
        assert_eq!(root[0].name, ".");
        assert_eq!(root[1].name, "..");
        assert_eq!(root[1].start_block, root[0].start_block);
    }

    #[test]
    fn round_trips_through_the_chain() {
        let (mut vcb, mut fat, ds) = new_volume();
        let mut root = create_directory(None, &mut fat, &mut vcb, &ds, MAX_DIR_ENTRIES, 1).unwrap();
        let slot = first_free_slot(&root).unwrap();
        root[slot] = DirectoryEntry {
            name: "hello.txt".to_string(),
            size: 42,
            start_block: 99,
            is_dir: EntryType::Regular,
            creation_time: 2,
            modification_time: 2,
            access_time: 2,
        };
        write_dir(&root, &fat, &vcb, &ds).unwrap();

        let loaded = load_dir(&root[0], &fat, &vcb, &ds).unwrap();
        let found = &loaded[index_of(&loaded, "hello.txt").unwrap()];
        assert_eq!(found.size, 42);
        assert_eq!(found.start_block, 99);
    }

    #[test]
    fn name_too_long_is_rejected_on_write() {
        let (mut vcb, mut fat, ds) = new_volume();
        let mut root = create_directory(None, &mut fat, &mut vcb, &ds, MAX_DIR_ENTRIES, 1).unwrap();
        let slot = first_free_slot(&root).unwrap();
        root[slot].name = "a".repeat(MAX_NAME_SIZE + 1);
        let err = write_dir(&root, &fat, &vcb, &ds).unwrap_err();
        assert!(matches!(err, bfs_err::Error::Fs(FsError::NameTooLong)));
    }
}
