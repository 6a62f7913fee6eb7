//! Ties the VCB, FAT, directory engine and buffered I/O together into the
//! crate's single public entry point.

use bfs_ds::DataStorage;
use bfs_err::Result;
use log::debug;

use crate::directory::DirectoryEntry;
use crate::fat::Fat;
use crate::io::Fcb;
use crate::path::{self, Resolved};
use crate::vcb::Vcb;
use crate::MAXFCBS;

pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A mounted volume.
///
/// Generic over [`DataStorage`] so the same logic runs against an
/// in-memory test device, a file-backed one, or any other medium that
/// implements the trait.
pub struct Filesystem<DS: DataStorage> {
    pub(crate) ds: DS,
    pub(crate) vcb: Vcb,
    pub(crate) fat: Fat,
    pub(crate) root: Vec<DirectoryEntry>,
    pub(crate) root_start_block: u32,
    pub(crate) cwd: Vec<DirectoryEntry>,
    pub(crate) cwd_start_block: u32,
    pub(crate) cwd_path: String,
    pub(crate) fcbs: Vec<Option<Fcb>>,
}

impl<DS: DataStorage> Filesystem<DS> {
    /// Mounts `ds`, formatting it first if it doesn't already hold a
    /// recognized volume (detected by the VCB's magic signature).
    pub fn mount(ds: DS) -> Result<Self> {
        let now = now_unix();

        let (vcb, fat, root, root_start_block) = match Vcb::load(&ds)? {
            Some(vcb) => {
                let fat = Fat::load(&ds, &vcb)?;
                let root = crate::directory::load_dir_by_start_block(
                    vcb.location_of_rootdir,
                    &fat,
                    &vcb,
                    &ds,
                )?;
                let root_start_block = vcb.location_of_rootdir;
                debug!("loaded existing volume, root at block {root_start_block}");
                (vcb, fat, root, root_start_block)
            }
            None => {
                debug!("no recognized volume signature, formatting");
                let mut vcb = Vcb::format(ds.num_blocks(), ds.block_size())?;
                let mut fat = Fat::format(&vcb)?;
                let num_entries = vcb.default_dir_entries();
                let root = crate::directory::create_directory(
                    None,
                    &mut fat,
                    &mut vcb,
                    &ds,
                    num_entries,
                    now,
                )?;
                let root_start_block = root[0].start_block;
                vcb.location_of_rootdir = root_start_block;
                vcb.root_blocks = crate::directory::chain_block_count(root_start_block, &fat) as u32;
                vcb.flush(&ds)?;
                (vcb, fat, root, root_start_block)
            }
        };

        let cwd = root.clone();
        let cwd_start_block = root_start_block;

        Ok(Self {
            ds,
            vcb,
            fat,
            root,
            root_start_block,
            cwd,
            cwd_start_block,
            cwd_path: "/".to_string(),
            fcbs: (0..MAXFCBS).map(|_| None).collect(),
        })
    }

    /// Flushes the VCB and FAT, then returns the underlying device.
    pub fn into_data_storage(self) -> Result<DS> {
        self.vcb.flush(&self.ds)?;
        self.fat.flush(&self.ds, &self.vcb)?;
        Ok(self.ds)
    }

    pub(crate) fn resolve(&self, path: &str) -> Result<Resolved> {
        path::resolve(
            path,
            &self.root,
            self.root_start_block,
            &self.cwd,
            self.cwd_start_block,
            &self.fat,
            &self.vcb,
            &self.ds,
        )
    }

    /// Writes `parent` back into whichever of `root`/`cwd` it is (if
    /// either), keeping the filesystem's resident directories consistent
    /// with what was just persisted to disk.
    pub(crate) fn sync_parent(&mut self, parent_start_block: u32, parent: Vec<DirectoryEntry>) {
        let is_root = parent_start_block == self.root_start_block;
        let is_cwd = parent_start_block == self.cwd_start_block;
        if is_root && is_cwd {
            self.root = parent.clone();
            self.cwd = parent;
        } else if is_root {
            self.root = parent;
        } else if is_cwd {
            self.cwd = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::OpenFlags;
    use bfs_ds_mem::DataStorageServer;

    #[test]
    fn mounting_a_blank_device_formats_it() {
        let ds = DataStorageServer::new(512, 512);
        let fs = Filesystem::mount(ds).unwrap();
        assert_eq!(fs.root[0].name, ".");
        assert_eq!(fs.root[1].name, "..");
    }

    #[test]
    fn remounting_loads_the_same_root() {
        let ds = DataStorageServer::new(512, 512);
        let mut fs = Filesystem::mount(ds).unwrap();
        let fd = fs.open("/hello.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        fs.write(fd, b"hi").unwrap();
        fs.close(fd).unwrap();
        let ds = fs.into_data_storage().unwrap();

        let fs2 = Filesystem::mount(ds).unwrap();
        assert!(crate::directory::index_of(&fs2.root, "hello.txt").is_some());
    }
}
