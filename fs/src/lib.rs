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

//! A user-space, block-structured filesystem built on top of a generic
//! [`DataStorage`] device.
//!
//! The on-disk layout is: one block for the volume control block (the
//! [`vcb`]), followed by a run of blocks holding the free-space table (the
//! [`fat`]), followed by the data region, which holds the root directory and
//! everything reachable from it. [`filesystem::Filesystem`] ties the pieces
//! together and is the crate's public entry point.

pub mod directory;
pub mod fat;
mod filesystem;
pub mod io;
pub mod namespace;
pub mod path;
pub mod vcb;

pub use bfs_ds::DataStorage;
pub use bfs_err::{Error, FsError, IoError, Result};

pub use directory::{DirectoryEntry, EntryType};
pub use filesystem::Filesystem;
pub use io::{Fd, OpenFlags, Whence};
pub use namespace::{DirHandle, DirItem, Stat};

/// Sectors are 512 bytes unless a caller formats a volume with a different
/// geometry; the constant is used only to size the default file allocation.
pub const BLOCK_SIZE: u32 = 512;

/// Capacity, in entries, of a freshly created directory.
pub const MAX_DIR_ENTRIES: usize = 50;

/// Longest name (in bytes, excluding the terminating NUL) a directory entry
/// can hold.
pub const MAX_NAME_SIZE: usize = 20;

/// Largest file size the allocator will grow a chain to.
pub const MAX_FILE_SIZE: u64 = 100_000;

/// Number of simultaneously open file control blocks.
pub const MAXFCBS: usize = 20;

/// Blocks given to a file the first time it's created.
pub const DEFAULT_FILE_BLOCKS: u64 = 20;

/// Blocks appended to a chain when a write runs off its end.
pub const FAT_EXTEND_BLOCKS: u64 = 5;

/// Marks a freshly formatted volume versus one already holding a filesystem.
pub const MAGIC_NUMBER: u64 = 742_891_252;
