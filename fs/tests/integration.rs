//! End-to-end scenarios exercised against an in-memory device, mirroring
//! the literal walk-throughs a reviewer would run by hand.

use bfs_ds_mem::DataStorageServer;
use bfs_fs::{Error, Filesystem, FsError, OpenFlags, Whence};

fn mounted(num_blocks: u64) -> Filesystem<DataStorageServer> {
    Filesystem::mount(DataStorageServer::new(num_blocks, 512)).unwrap()
}

#[test]
fn formatting_then_remounting_loads_rather_than_reformats() {
    let ds = DataStorageServer::new(19531, 512);
    let mut fs = Filesystem::mount(ds).unwrap();
    fs.mkdir("/marker").unwrap();
    let ds = fs.into_data_storage().unwrap();

    let fs_again = Filesystem::mount(ds).unwrap();
    assert!(fs_again.is_dir("/marker").unwrap());
}

#[test]
fn nested_mkdir_reports_directory_kind_correctly() {
    let mut fs = mounted(2048);
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    assert!(fs.is_dir("/a/b").unwrap());
    assert!(!fs.is_file("/a/b").unwrap());
}

#[test]
fn write_close_reopen_read_round_trips() {
    let mut fs = mounted(2048);
    let fd = fs.open("/f", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
    assert_eq!(fs.write(fd, b"hello").unwrap(), 5);
    fs.close(fd).unwrap();

    let fd = fs.open("/f", OpenFlags::READ).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    fs.close(fd).unwrap();
}

#[test]
fn seek_and_partial_read_land_on_the_right_bytes() {
    let mut fs = mounted(2048);
    let payload: Vec<u8> = (0..2000u32).map(|i| (i % 256) as u8).collect();
    let fd = fs.open("/f", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
    fs.write(fd, &payload).unwrap();

    fs.seek(fd, 0, Whence::Start).unwrap();
    let mut full = vec![0u8; 2000];
    assert_eq!(fs.read(fd, &mut full).unwrap(), 2000);
    assert_eq!(full, payload);

    fs.seek(fd, 1000, Whence::Start).unwrap();
    let mut mid = vec![0u8; 500];
    assert_eq!(fs.read(fd, &mut mid).unwrap(), 500);
    assert_eq!(mid, payload[1000..1500]);
    fs.close(fd).unwrap();
}

#[test]
fn delete_then_rmdir_restores_freespace() {
    let mut fs = mounted(2048);
    let before = fs.stat("/").unwrap();

    fs.mkdir("/d").unwrap();
    let fd = fs.open("/d/f", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
    fs.close(fd).unwrap();

    fs.delete("/d/f").unwrap();
    fs.rmdir("/d").unwrap();

    let after = fs.stat("/").unwrap();
    assert_eq!(before.size, after.size);
    assert!(fs.stat("/d").is_err());
}

#[test]
fn mkdir_is_idempotent_failure_and_missing_parent_is_an_invalid_path() {
    let mut fs = mounted(2048);
    fs.mkdir("/x").unwrap();
    let err = fs.mkdir("/x").unwrap_err();
    assert!(matches!(err, Error::Fs(FsError::AlreadyExists)));

    let err = fs.mkdir("/y/z").unwrap_err();
    assert!(matches!(err, Error::Fs(FsError::InvalidPath)));
}

#[test]
fn writing_past_a_block_boundary_does_not_corrupt_the_buffer() {
    let mut fs = mounted(2048);
    let fd = fs.open("/f", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
    let block = vec![7u8; 512];
    fs.write(fd, &block).unwrap();
    fs.write(fd, &block).unwrap();
    fs.close(fd).unwrap();

    let fd = fs.open("/f", OpenFlags::READ).unwrap();
    let mut buf = vec![0u8; 1024];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 1024);
    assert!(buf.iter().all(|&b| b == 7));
}

#[test]
fn truncate_on_reopen_leaves_the_chain_intact_but_shrinks_visible_size() {
    let mut fs = mounted(2048);
    let fd = fs.open("/f", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
    fs.write(fd, &vec![1u8; 1000]).unwrap();
    fs.close(fd).unwrap();

    let fd = fs
        .open("/f", OpenFlags::WRITE | OpenFlags::TRUNCATE)
        .unwrap();
    fs.write(fd, &vec![2u8; 10]).unwrap();
    fs.close(fd).unwrap();

    assert_eq!(fs.stat("/f").unwrap().size, 10);
}

#[test]
fn move_renames_and_relocates_preserving_content() {
    let mut fs = mounted(2048);
    fs.mkdir("/dest").unwrap();
    let fd = fs.open("/src.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
    fs.write(fd, b"payload").unwrap();
    fs.close(fd).unwrap();

    fs.move_entry("/src.txt", "/dest/renamed.txt").unwrap();
    assert!(fs.stat("/src.txt").is_err());

    let fd = fs.open("/dest/renamed.txt", OpenFlags::READ).unwrap();
    let mut buf = [0u8; 7];
    fs.read(fd, &mut buf).unwrap();
    assert_eq!(&buf, b"payload");
}

#[test]
fn directory_listing_reflects_mkdir_and_open() {
    let mut fs = mounted(2048);
    fs.mkdir("/docs").unwrap();
    let fd = fs.open("/readme.md", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
    fs.close(fd).unwrap();

    let mut handle = fs.opendir("/").unwrap();
    let mut names = Vec::new();
    while let Some(item) = fs.readdir(&mut handle) {
        names.push((item.name, item.is_dir));
    }
    fs.closedir(handle).unwrap();

    assert!(names.contains(&("docs".to_string(), true)));
    assert!(names.contains(&("readme.md".to_string(), false)));
}
