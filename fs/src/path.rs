//! Path resolution: walks a `/`-separated path starting from either the
//! root or the current directory, loading intermediate directories as it
//! goes.

use bfs_ds::DataStorage;
use bfs_err::{FsError, Result};

use crate::directory::{index_of, load_dir, DirectoryEntry, EntryType};
use crate::fat::Fat;
use crate::vcb::Vcb;
use crate::MAX_NAME_SIZE;

/// What the final path component resolved to.
#[derive(Debug)]
pub enum ResolvedIndex {
    /// The path was empty, `.` or `/`: it names the starting directory
    /// itself, not one of its entries.
    Root,
    /// The final component names an existing entry at this index.
    Existing(usize),
    /// The final component doesn't exist in `parent`; holds its name so a
    /// caller that wants to create it doesn't have to re-tokenize the path.
    Missing(String),
}

/// The result of resolving a path: the (possibly freshly loaded) directory
/// that holds the final component, and what that component resolved to.
#[derive(Debug)]
pub struct Resolved {
    pub parent: Vec<DirectoryEntry>,
    pub parent_start_block: u32,
    pub index: ResolvedIndex,
}

/// Resolves `path` against `root` (for absolute paths) or `cwd` (for
/// relative ones). Intermediate directories are loaded transiently; only
/// the final parent directory is returned.
pub fn resolve<DS: DataStorage>(
    path: &str,
    root: &[DirectoryEntry],
    root_start_block: u32,
    cwd: &[DirectoryEntry],
    cwd_start_block: u32,
    fat: &Fat,
    vcb: &Vcb,
    ds: &DS,
) -> Result<Resolved> {
    // An empty path and "/" both name the starting directory itself.
    let absolute = path.is_empty() || path.starts_with('/');
    let mut parent: Vec<DirectoryEntry> = if absolute { root.to_vec() } else { cwd.to_vec() };
    let mut parent_start_block = if absolute { root_start_block } else { cwd_start_block };

    let tokens: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if tokens.is_empty() {
        return Ok(Resolved {
            parent,
            parent_start_block,
            index: ResolvedIndex::Root,
        });
    }

    let last = tokens.len() - 1;
    for (i, token) in tokens.into_iter().enumerate() {
        if token.len() > MAX_NAME_SIZE {
            return Err(FsError::NameTooLong.into());
        }
        match index_of(&parent, token) {
            None => {
                if i == last {
                    return Ok(Resolved {
                        parent,
                        parent_start_block,
                        index: ResolvedIndex::Missing(token.to_string()),
                    });
                }
                return Err(FsError::InvalidPath.into());
            }
            Some(idx) => {
                if i == last {
                    return Ok(Resolved {
                        parent,
                        parent_start_block,
                        index: ResolvedIndex::Existing(idx),
                    });
                }
                if parent[idx].is_dir != EntryType::Directory {
                    return Err(FsError::NotADirectory.into());
                }
                parent_start_block = parent[idx].start_block;
                parent = load_dir(&parent[idx], fat, vcb, ds)?;
            }
        }
    }

    unreachable!("the loop above returns on its last iteration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::create_directory;
    use crate::MAX_DIR_ENTRIES;
    use bfs_ds_mem::DataStorageServer;

    fn new_volume() -> (Vcb, Fat, DataStorageServer) {
        let vcb = Vcb::format(512, 512).unwrap();
        let fat = Fat::format(&vcb).unwrap();
        let ds = DataStorageServer::new(512, 512);
        (vcb, fat, ds)
    }

    #[test]
    fn root_path_resolves_to_root_marker() {
        let (mut vcb, mut fat, ds) = new_volume();
        let root = create_directory(None, &mut fat, &mut vcb, &ds, MAX_DIR_ENTRIES, 1).unwrap();
        let start = root[0].start_block;
        let resolved = resolve("/", &root, start, &root, start, &fat, &vcb, &ds).unwrap();
        assert!(matches!(resolved.index, ResolvedIndex::Root));
    }

    #[test]
    fn empty_path_resolves_the_same_as_root() {
        let (mut vcb, mut fat, ds) = new_volume();
        let root = create_directory(None, &mut fat, &mut vcb, &ds, MAX_DIR_ENTRIES, 1).unwrap();
        let start = root[0].start_block;
        let resolved = resolve("", &root, start, &root, start, &fat, &vcb, &ds).unwrap();
        assert!(matches!(resolved.index, ResolvedIndex::Root));
        assert_eq!(resolved.parent_start_block, start);
    }

    #[test]
    fn missing_leaf_is_reported_with_its_name() {
        let (mut vcb, mut fat, ds) = new_volume();
        let root = create_directory(None, &mut fat, &mut vcb, &ds, MAX_DIR_ENTRIES, 1).unwrap();
        let start = root[0].start_block;
        let resolved = resolve("/missing.txt", &root, start, &root, start, &fat, &vcb, &ds).unwrap();
        match resolved.index {
            ResolvedIndex::Missing(name) => assert_eq!(name, "missing.txt"),
            _ => panic!("expected a missing leaf"),
        }
    }

    #[test]
    fn missing_mid_path_component_is_an_invalid_path() {
        let (mut vcb, mut fat, ds) = new_volume();
        let root = create_directory(None, &mut fat, &mut vcb, &ds, MAX_DIR_ENTRIES, 1).unwrap();
        let start = root[0].start_block;
        let err = resolve("/no/such/file", &root, start, &root, start, &fat, &vcb, &ds).unwrap_err();
        assert!(matches!(err, bfs_err::Error::Fs(FsError::InvalidPath)));
    }

    #[test]
    fn overlong_component_is_rejected() {
        let (mut vcb, mut fat, ds) = new_volume();
        let root = create_directory(None, &mut fat, &mut vcb, &ds, MAX_DIR_ENTRIES, 1).unwrap();
        let start = root[0].start_block;
        let name = "a".repeat(MAX_NAME_SIZE + 1);
        let err = resolve(&name, &root, start, &root, start, &fat, &vcb, &ds).unwrap_err();
        assert!(matches!(err, bfs_err::Error::Fs(FsError::NameTooLong)));
    }
}
