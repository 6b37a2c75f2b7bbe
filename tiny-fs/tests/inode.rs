use std::sync::Arc;

use block_dev::RamDisk;
use spin::Mutex;
use tiny_fs::{
    BLOCK_SIZE, DiskInode, Error, FormatOptions, InodeId, InodeKind, InodeStatus,
    MAX_ACTIVE_INODES, Permission, TinyFileSystem,
};

fn volume() -> Arc<Mutex<TinyFileSystem>> {
    let disk = Arc::new(RamDisk::new(128 * BLOCK_SIZE));
    TinyFileSystem::format(
        disk,
        FormatOptions {
            total_blocks: 128,
            inodes: 64,
            ..FormatOptions::default()
        },
    )
    .unwrap()
}

#[test]
fn root_is_a_directory_after_format() {
    let tfs = volume();
    let mut tfs = tfs.lock();

    let root = tfs.iget(InodeId::ROOT).unwrap();
    let disk = *tfs.disk_inode(&root);
    assert_eq!(disk.kind, InodeKind::Directory);
    assert_eq!(disk.links, 1);
    assert_eq!(disk.size, 2 * tiny_fs::DirEntry::SIZE as u64);
    tfs.iput(root).unwrap();

    assert_eq!(tfs.active_inodes().count(), 0);
}

#[test]
fn release_writes_back_and_deactivates() {
    let tfs = volume();
    let mut tfs = tfs.lock();

    let inode = tfs.ialloc().unwrap();
    let id = inode.id();
    *tfs.disk_inode_mut(&inode) = DiskInode::new(InodeKind::File, Permission::from_mode(0o640));
    tfs.disk_inode_mut(&inode).size = 7;
    let (status, refs) = tfs.inode_status(id).unwrap();
    assert!(status.contains(InodeStatus::Active | InodeStatus::Locked | InodeStatus::Modified));
    assert_eq!(refs, 1);

    tfs.iput(inode).unwrap();
    assert_eq!(tfs.inode_status(id), None);

    let inode = tfs.iget(id).unwrap();
    let disk = tfs.disk_inode(&inode);
    assert_eq!(disk.kind, InodeKind::File);
    assert_eq!(disk.size, 7);
    assert_eq!(disk.permission, Permission::from_mode(0o640));
    let (status, _) = tfs.inode_status(id).unwrap();
    assert!(!status.contains(InodeStatus::Modified));
    tfs.iput(inode).unwrap();
}

#[test]
fn zero_links_delete_on_release() {
    let tfs = volume();
    let mut tfs = tfs.lock();
    let free_inodes = tfs.statfs().unwrap().free_inodes;

    let inode = tfs.ialloc().unwrap();
    let id = inode.id();
    *tfs.disk_inode_mut(&inode) = DiskInode::new(InodeKind::File, Permission::from_mode(0o644));
    tfs.iput(inode).unwrap();
    assert_eq!(tfs.statfs().unwrap().free_inodes, free_inodes - 1);

    let inode = tfs.iget(id).unwrap();
    tfs.disk_inode_mut(&inode).links = 0;
    tfs.iput(inode).unwrap();
    assert_eq!(tfs.inode_status(id), None);
    assert_eq!(tfs.statfs().unwrap().free_inodes, free_inodes);

    // 再次载入得到未使用的记录
    let inode = tfs.iget(id).unwrap();
    let disk = tfs.disk_inode(&inode);
    assert!(disk.is_unused());
    assert_eq!((disk.size, disk.links, disk.size_on_disk), (0, 0, 0));
    tfs.iput(inode).unwrap();
    assert_eq!(tfs.statfs().unwrap().free_inodes, free_inodes);

    let again = tfs.ialloc().unwrap();
    assert_eq!(again.id(), id);
    *tfs.disk_inode_mut(&again) = DiskInode::new(InodeKind::File, Permission::from_mode(0o644));
    tfs.iput(again).unwrap();
}

#[test]
fn locked_inode_cannot_be_taken_twice() {
    let tfs = volume();
    let mut tfs = tfs.lock();

    let root = tfs.iget(InodeId::ROOT).unwrap();
    assert_eq!(tfs.iget(InodeId::ROOT), Err(Error::AlreadyLocked));

    tfs.unlock(&root);
    let shared = tfs.iget(InodeId::ROOT).unwrap();
    assert_eq!(tfs.inode_status(InodeId::ROOT).unwrap().1, 2);

    tfs.iput(shared).unwrap();
    let (status, refs) = tfs.inode_status(InodeId::ROOT).unwrap();
    assert!(!status.contains(InodeStatus::Locked));
    assert_eq!(refs, 1);

    tfs.lock(&root).unwrap();
    assert_eq!(tfs.lock(&root), Err(Error::AlreadyLocked));
    tfs.iput(root).unwrap();
    assert_eq!(tfs.inode_status(InodeId::ROOT), None);
}

#[test]
fn out_of_range_numbers_are_rejected() {
    let tfs = volume();
    let mut tfs = tfs.lock();

    assert_eq!(tfs.iget(InodeId::new(0)).map(|h| h.id()), Err(Error::OutOfRange));
    assert_eq!(tfs.iget(InodeId::new(65)).map(|h| h.id()), Err(Error::OutOfRange));
}

#[test]
fn active_table_fills_up() {
    let tfs = volume();
    let mut tfs = tfs.lock();

    let mut held = Vec::new();
    for id in 1..=MAX_ACTIVE_INODES as u32 {
        held.push(tfs.iget(InodeId::new(id)).unwrap());
    }
    assert_eq!(
        tfs.iget(InodeId::new(MAX_ACTIVE_INODES as u32 + 1)).map(|h| h.id()),
        Err(Error::NoSpace)
    );
    assert_eq!(tfs.active_inodes().count(), MAX_ACTIVE_INODES);

    // 已在表中的 inode 仍可共享
    tfs.unlock(&held[3]);
    let extra = tfs.iget(InodeId::new(4)).unwrap();
    tfs.iput(extra).unwrap();

    for inode in held {
        tfs.iput(inode).unwrap();
    }
    assert_eq!(tfs.active_inodes().count(), 0);
}
