//! Naming operations: directory creation/removal, delete, move, stat, the
//! current-directory pair, and directory iteration. These sit on top of the
//! path resolver and the directory engine; none of them touch the FCB table
//! except indirectly through the files they remove.

use bfs_ds::DataStorage;
use bfs_err::{FsError, Result};

use crate::directory::{self, DirectoryEntry, EntryType};
use crate::filesystem::{now_unix, Filesystem};
use crate::path::ResolvedIndex;

/// A snapshot of an entry's metadata, returned by [`Filesystem::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub size: u64,
    pub block_size: u32,
    pub blocks: u64,
    pub creation_time: u64,
    pub modification_time: u64,
    pub access_time: u64,
}

/// One entry yielded by [`Filesystem::readdir`].
#[derive(Debug, Clone)]
pub struct DirItem {
    pub name: String,
    pub is_dir: bool,
}

/// An open directory iterator, returned by [`Filesystem::opendir`].
pub struct DirHandle {
    entries: Vec<DirectoryEntry>,
    position: usize,
}

fn simplify_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for token in path.split('/') {
        match token {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    }
}

impl<DS: DataStorage> Filesystem<DS> {
    /// Creates an empty directory at `path`.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let name = match resolved.index {
            ResolvedIndex::Root | ResolvedIndex::Existing(_) => {
                return Err(FsError::AlreadyExists.into())
            }
            ResolvedIndex::Missing(name) => name,
        };

        let parent_start_block = resolved.parent_start_block;
        let mut parent = resolved.parent;
        let idx = directory::first_free_slot(&parent).ok_or(FsError::NoSpace)?;

        let now = now_unix();
        let num_entries = self.vcb.default_dir_entries();
        let new_dir = directory::create_directory(
            Some(&parent),
            &mut self.fat,
            &mut self.vcb,
            &self.ds,
            num_entries,
            now,
        )?;

        parent[idx] = DirectoryEntry {
            name,
            size: new_dir[0].size,
            start_block: new_dir[0].start_block,
            is_dir: EntryType::Directory,
            creation_time: now,
            modification_time: now,
            access_time: now,
        };
        parent[0].modification_time = now;
        parent[0].access_time = now;
        directory::write_dir(&parent, &self.fat, &self.vcb, &self.ds)?;
        self.sync_parent(parent_start_block, parent);
        Ok(())
    }

    /// Recursively frees a directory's chain and everything reachable from
    /// it, but not the directory's own entry in its parent — the caller
    /// clears that.
    fn free_attached(&mut self, start_block: u32) -> Result<()> {
        let dir = directory::load_dir_by_start_block(start_block, &self.fat, &self.vcb, &self.ds)?;
        for entry in dir.iter().skip(2) {
            if entry.is_free() {
                continue;
            }
            if entry.is_dir == EntryType::Directory {
                self.free_attached(entry.start_block)?;
            } else {
                self.fat.free(&mut self.vcb, &self.ds, entry.start_block)?;
            }
        }
        self.fat.free(&mut self.vcb, &self.ds, start_block)?;
        Ok(())
    }

    /// Removes the directory at `path`, along with everything inside it.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let idx = match resolved.index {
            ResolvedIndex::Root => return Err(FsError::InvalidPath.into()),
            ResolvedIndex::Missing(_) => return Err(FsError::NotFound.into()),
            ResolvedIndex::Existing(idx) => idx,
        };

        let parent_start_block = resolved.parent_start_block;
        let mut parent = resolved.parent;
        if parent[idx].is_dir != EntryType::Directory {
            return Err(FsError::NotADirectory.into());
        }

        let target_start = parent[idx].start_block;
        self.free_attached(target_start)?;

        let now = now_unix();
        parent[idx] = DirectoryEntry::free();
        parent[0].modification_time = now;
        parent[0].access_time = now;
        directory::write_dir(&parent, &self.fat, &self.vcb, &self.ds)?;
        self.sync_parent(parent_start_block, parent);
        Ok(())
    }

    /// Removes the file at `path`. Rejects directories.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let idx = match resolved.index {
            ResolvedIndex::Existing(idx) => idx,
            _ => return Err(FsError::NotFound.into()),
        };

        let parent_start_block = resolved.parent_start_block;
        let mut parent = resolved.parent;
        if parent[idx].is_dir == EntryType::Directory {
            return Err(FsError::IsADirectory.into());
        }

        self.fat.free(&mut self.vcb, &self.ds, parent[idx].start_block)?;

        let now = now_unix();
        parent[idx] = DirectoryEntry::free();
        parent[0].modification_time = now;
        parent[0].access_time = now;
        directory::write_dir(&parent, &self.fat, &self.vcb, &self.ds)?;
        self.sync_parent(parent_start_block, parent);
        Ok(())
    }

    /// Moves or renames the file at `source` to `destination`. The moved
    /// entry keeps its own metadata (size, timestamps, content); only its
    /// name and containing directory change. Directories can't be moved.
    pub fn move_entry(&mut self, source: &str, destination: &str) -> Result<()> {
        let src_resolved = self.resolve(source)?;
        let src_idx = match src_resolved.index {
            ResolvedIndex::Existing(idx) => idx,
            _ => return Err(FsError::NotFound.into()),
        };
        let src_parent_start = src_resolved.parent_start_block;
        let mut src_parent = src_resolved.parent;
        if src_parent[src_idx].is_dir == EntryType::Directory {
            return Err(FsError::InvalidPath.into());
        }
        let source_entry = src_parent[src_idx].clone();

        let dest_resolved = self.resolve(destination)?;
        let dest_parent_start = dest_resolved.parent_start_block;
        let dest_parent = dest_resolved.parent;

        let (dest_start_block, final_name) = match &dest_resolved.index {
            ResolvedIndex::Root => (self.root_start_block, source_entry.name.clone()),
            ResolvedIndex::Existing(idx) => {
                if dest_parent[*idx].is_dir != EntryType::Directory {
                    return Err(FsError::AlreadyExists.into());
                }
                (dest_parent[*idx].start_block, source_entry.name.clone())
            }
            ResolvedIndex::Missing(name) => (dest_parent_start, name.clone()),
        };

        let now = now_unix();

        if dest_start_block == src_parent_start {
            if final_name != source_entry.name && directory::name_exists(&src_parent, &final_name) {
                return Err(FsError::AlreadyExists.into());
            }
            src_parent[src_idx].name = final_name;
            src_parent[src_idx].modification_time = now;
            src_parent[0].modification_time = now;
            src_parent[0].access_time = now;
            directory::write_dir(&src_parent, &self.fat, &self.vcb, &self.ds)?;
            self.sync_parent(src_parent_start, src_parent);
            return Ok(());
        }

        let mut dest_dir = if dest_start_block == self.root_start_block {
            self.root.clone()
        } else if dest_start_block == self.cwd_start_block {
            self.cwd.clone()
        } else {
            directory::load_dir_by_start_block(dest_start_block, &self.fat, &self.vcb, &self.ds)?
        };
        if directory::name_exists(&dest_dir, &final_name) {
            return Err(FsError::AlreadyExists.into());
        }
        let dest_idx = directory::first_free_slot(&dest_dir).ok_or(FsError::NoSpace)?;
        dest_dir[dest_idx] = DirectoryEntry {
            name: final_name,
            size: source_entry.size,
            start_block: source_entry.start_block,
            is_dir: source_entry.is_dir,
            creation_time: source_entry.creation_time,
            modification_time: now,
            access_time: now,
        };
        dest_dir[0].modification_time = now;
        dest_dir[0].access_time = now;
        directory::write_dir(&dest_dir, &self.fat, &self.vcb, &self.ds)?;
        self.sync_parent(dest_start_block, dest_dir);

        src_parent[src_idx] = DirectoryEntry::free();
        src_parent[0].modification_time = now;
        src_parent[0].access_time = now;
        directory::write_dir(&src_parent, &self.fat, &self.vcb, &self.ds)?;
        self.sync_parent(src_parent_start, src_parent);

        Ok(())
    }

    /// Metadata for the entry at `path`.
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let resolved = self.resolve(path)?;
        let entry = match resolved.index {
            ResolvedIndex::Root => self.root[0].clone(),
            ResolvedIndex::Existing(idx) => resolved.parent[idx].clone(),
            ResolvedIndex::Missing(_) => return Err(FsError::NotFound.into()),
        };
        Ok(Stat {
            size: entry.size,
            block_size: self.vcb.size_of_blocks,
            blocks: entry.size.div_ceil(self.vcb.size_of_blocks as u64).max(1),
            creation_time: entry.creation_time,
            modification_time: entry.modification_time,
            access_time: entry.access_time,
        })
    }

    /// True if `path` names a regular file.
    pub fn is_file(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path)?;
        match resolved.index {
            ResolvedIndex::Root => Ok(false),
            ResolvedIndex::Existing(idx) => Ok(resolved.parent[idx].is_dir == EntryType::Regular),
            ResolvedIndex::Missing(_) => Err(FsError::NotFound.into()),
        }
    }

    /// True if `path` names a directory.
    pub fn is_dir(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path)?;
        match resolved.index {
            ResolvedIndex::Root => Ok(true),
            ResolvedIndex::Existing(idx) => Ok(resolved.parent[idx].is_dir == EntryType::Directory),
            ResolvedIndex::Missing(_) => Err(FsError::NotFound.into()),
        }
    }

    /// The absolute path of the current directory.
    pub fn getcwd(&self) -> String {
        self.cwd_path.clone()
    }

    /// Changes the current directory to `path`.
    pub fn setcwd(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let (new_cwd, new_start) = match resolved.index {
            ResolvedIndex::Root => (self.root.clone(), self.root_start_block),
            ResolvedIndex::Existing(idx) => {
                if resolved.parent[idx].is_dir != EntryType::Directory {
                    return Err(FsError::NotADirectory.into());
                }
                let target = &resolved.parent[idx];
                let loaded = directory::load_dir(target, &self.fat, &self.vcb, &self.ds)?;
                (loaded, target.start_block)
            }
            ResolvedIndex::Missing(_) => return Err(FsError::NotFound.into()),
        };

        let combined = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.cwd_path, path)
        };
        self.cwd_path = simplify_path(&combined);
        self.cwd = new_cwd;
        self.cwd_start_block = new_start;
        Ok(())
    }

    /// Opens `path` for iteration.
    pub fn opendir(&self, path: &str) -> Result<DirHandle> {
        let resolved = self.resolve(path)?;
        let entries = match resolved.index {
            ResolvedIndex::Root => self.root.clone(),
            ResolvedIndex::Existing(idx) => {
                if resolved.parent[idx].is_dir != EntryType::Directory {
                    return Err(FsError::NotADirectory.into());
                }
                directory::load_dir(&resolved.parent[idx], &self.fat, &self.vcb, &self.ds)?
            }
            ResolvedIndex::Missing(_) => return Err(FsError::NotFound.into()),
        };
        Ok(DirHandle { entries, position: 0 })
    }

    /// Returns the next live entry in `handle`, skipping free slots.
    pub fn readdir(&self, handle: &mut DirHandle) -> Option<DirItem> {
        while handle.position < handle.entries.len() {
            let entry = &handle.entries[handle.position];
            handle.position += 1;
            if !entry.is_free() {
                return Some(DirItem {
                    name: entry.name.clone(),
                    is_dir: entry.is_dir == EntryType::Directory,
                });
            }
        }
        None
    }

    /// Closes a directory iterator. Since `DirHandle` owns everything it
    /// needs, this just drops it; kept as an explicit call for symmetry with
    /// `opendir`.
    pub fn closedir(&self, handle: DirHandle) -> Result<()> {
        drop(handle);
        Ok(())
    }
}
