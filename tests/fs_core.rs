use pinafs::device::MemBlockDevice;
use pinafs::filesystem::{FileKind, Filesystem};
use pinafs::layout::{BLOCK_SIZE, MAX_FILE_SIZE, NDIRECT, NINDIRECT_PER_BLOCK};

fn fresh(blocks: u32) -> Filesystem<MemBlockDevice> {
    Filesystem::format(MemBlockDevice::new(blocks)).expect("format should succeed")
}

#[test]
fn mkdir_mknod_write_read_roundtrip() {
    let mut fs = fresh(2048);
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    fs.mknod("/a/b/c").unwrap();
    let n = fs.write("/a/b/c", 0, b"hello").unwrap();
    assert_eq!(n, 5);
    let data = fs.read("/a/b/c", 0, 5).unwrap();
    assert_eq!(&data, b"hello");
    let attr = fs.getattr("/a/b/c").unwrap();
    assert_eq!(attr.size, 5);
    assert_eq!(attr.kind, FileKind::Regular);
}

#[test]
fn write_spanning_two_direct_blocks() {
    let mut fs = fresh(2048);
    fs.mknod("/f").unwrap();
    let data = vec![7u8; BLOCK_SIZE + 4];
    fs.write("/f", 0, &data).unwrap();
    let back = fs.read("/f", 0, data.len() as u32).unwrap();
    assert_eq!(back, data);
    assert_eq!(&back[BLOCK_SIZE - 10..BLOCK_SIZE + 4], &data[BLOCK_SIZE - 10..BLOCK_SIZE + 4]);
}

#[test]
fn write_into_first_indirect_block() {
    let mut fs = fresh(3000);
    fs.mknod("/f").unwrap();
    let offset = (NDIRECT as u64) * BLOCK_SIZE as u64;
    fs.write("/f", offset, b"x").unwrap();
    let data = fs.read("/f", offset, 1).unwrap();
    assert_eq!(data, b"x");
}

#[test]
fn write_into_second_indirect_block() {
    let mut fs = fresh(4200);
    fs.mknod("/f").unwrap();
    let offset = (NDIRECT as u64 + NINDIRECT_PER_BLOCK as u64) * BLOCK_SIZE as u64;
    fs.write("/f", offset, b"y").unwrap();
    let data = fs.read("/f", offset, 1).unwrap();
    assert_eq!(data, b"y");
}

#[test]
fn directory_grows_to_hold_many_entries() {
    let mut fs = fresh(2048);
    fs.mkdir("/d").unwrap();
    for i in 0..13 {
        fs.mknod(&format!("/d/f{}", i)).unwrap();
    }
    let attr = fs.getattr("/d").unwrap();
    assert_eq!(attr.size, 13 * pinafs::dirent::ENTRY_SIZE as u64);
    let entries = fs.readdir("/d").unwrap();
    // "." + ".." + 13 files
    assert_eq!(entries.len(), 15);
}

#[test]
fn unlink_frees_blocks_spanning_indirect_regions() {
    let mut fs = fresh(4200);
    fs.mknod("/f").unwrap();
    let far = (NDIRECT as u64 + NINDIRECT_PER_BLOCK as u64) * BLOCK_SIZE as u64;
    fs.write("/f", far, b"z").unwrap();
    let before = fs.statfs().unwrap();
    fs.unlink("/f").unwrap();
    let after = fs.statfs().unwrap();
    assert!(after.free_blocks > before.free_blocks);
    assert_eq!(after.free_inodes, before.free_inodes + 1);
}

#[test]
fn rmdir_rejects_non_empty_directory() {
    let mut fs = fresh(2048);
    fs.mkdir("/a").unwrap();
    fs.mknod("/a/f").unwrap();
    assert!(fs.rmdir("/a").is_err());
}

#[test]
fn rmdir_accepts_logically_empty_directory() {
    let mut fs = fresh(2048);
    fs.mkdir("/a").unwrap();
    fs.rmdir("/a").unwrap();
    assert!(fs.getattr("/a").is_err());
}

#[test]
fn rename_onto_existing_empty_directory_replaces_it() {
    let mut fs = fresh(2048);
    fs.mkdir("/a").unwrap();
    fs.mkdir("/b").unwrap();
    fs.rename("/a", "/b").unwrap();
    assert!(fs.getattr("/a").is_err());
    assert_eq!(fs.getattr("/b").unwrap().kind, FileKind::Directory);
}

#[test]
fn rename_is_reversible() {
    let mut fs = fresh(2048);
    fs.mknod("/a").unwrap();
    fs.write("/a", 0, b"data").unwrap();
    fs.rename("/a", "/b").unwrap();
    assert!(fs.getattr("/a").is_err());
    assert_eq!(fs.read("/b", 0, 4).unwrap(), b"data");
    fs.rename("/b", "/a").unwrap();
    assert_eq!(fs.read("/a", 0, 4).unwrap(), b"data");
}

#[test]
fn rename_onto_existing_file_replaces_it() {
    let mut fs = fresh(2048);
    fs.mknod("/a").unwrap();
    fs.mknod("/b").unwrap();
    fs.write("/b", 0, b"old").unwrap();
    fs.rename("/a", "/b").unwrap();
    assert!(fs.getattr("/a").is_err());
    let attr = fs.getattr("/b").unwrap();
    assert_eq!(attr.size, 0);
}

#[test]
fn truncate_shrinks_and_grows() {
    let mut fs = fresh(2048);
    fs.mknod("/f").unwrap();
    fs.write("/f", 0, &vec![1u8; 100]).unwrap();
    fs.truncate("/f", 10).unwrap();
    assert_eq!(fs.getattr("/f").unwrap().size, 10);
    fs.truncate("/f", 50).unwrap();
    assert_eq!(fs.getattr("/f").unwrap().size, 50);
    let data = fs.read("/f", 10, 10).unwrap();
    assert!(data.iter().all(|b| *b == 0));
}

#[test]
fn write_failure_rolls_back_freshly_allocated_blocks() {
    // Leave room for only 3 data blocks past the fixed metadata layout, so a
    // 4-block write runs out of space partway through.
    let first_data_block = pinafs::layout::INODE_TABLE_START
        + pinafs::layout::inode_table_blocks(pinafs::inode::INODE_RECORD_SIZE);
    let mut fs = fresh(first_data_block + 3);
    fs.mknod("/f").unwrap();

    let before = fs.statfs().unwrap();
    assert_eq!(before.free_blocks, 3);

    let data = vec![9u8; BLOCK_SIZE * 4];
    let err = fs.write("/f", 0, &data).unwrap_err();
    matches!(err, pinafs::error::Error::NoSpace);

    let after = fs.statfs().unwrap();
    assert_eq!(after.free_blocks, before.free_blocks);
    assert_eq!(fs.getattr("/f").unwrap().size, 0);
}

#[test]
fn write_beyond_max_file_size_fails() {
    let mut fs = fresh(70000);
    fs.mknod("/f").unwrap();
    let err = fs.write("/f", MAX_FILE_SIZE, b"x").unwrap_err();
    matches!(err, pinafs::error::Error::FileTooLarge);
}

#[test]
fn read_past_eof_returns_empty() {
    let mut fs = fresh(2048);
    fs.mknod("/f").unwrap();
    fs.write("/f", 0, b"abc").unwrap();
    let data = fs.read("/f", 100, 10).unwrap();
    assert!(data.is_empty());
}

#[test]
fn name_length_boundary() {
    let mut fs = fresh(2048);
    let ok_name = "a".repeat(pinafs::dirent::NAME_MAX);
    fs.mknod(&format!("/{}", ok_name)).unwrap();

    let too_long = "a".repeat(pinafs::dirent::NAME_MAX + 1);
    assert!(fs.mknod(&format!("/{}", too_long)).is_err());
}

#[test]
fn mount_after_format_preserves_state_on_disk() {
    use pinafs::device::FileBlockDevice;

    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("image.bin");

    {
        let device = FileBlockDevice::create(&image, 8 * 1024 * 1024).unwrap();
        let mut fs = Filesystem::format(device).unwrap();
        fs.mkdir("/persisted").unwrap();
        fs.mknod("/persisted/note").unwrap();
        fs.write("/persisted/note", 0, b"on disk").unwrap();
    }

    let device = FileBlockDevice::open(&image).unwrap();
    let mut fs = Filesystem::mount(device).unwrap();
    let attr = fs.getattr("/persisted").unwrap();
    assert_eq!(attr.kind, FileKind::Directory);
    let data = fs.read("/persisted/note", 0, 7).unwrap();
    assert_eq!(&data, b"on disk");
}
