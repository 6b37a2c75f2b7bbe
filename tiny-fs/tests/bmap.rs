use std::sync::Arc;

use block_dev::RamDisk;
use spin::Mutex;
use tiny_fs::{
    BLOCK_SIZE, Error, FileKey, FormatOptions, INDEX_SIZE, OpenFlag, Permission, SlotEncoder,
    TierLayout, TinyFileSystem, Whence, XorFold,
};

fn volume(layout: TierLayout) -> (Arc<RamDisk>, Arc<Mutex<TinyFileSystem>>) {
    let disk = Arc::new(RamDisk::new(256 * BLOCK_SIZE));
    let tfs = TinyFileSystem::format(
        disk.clone(),
        FormatOptions {
            total_blocks: 256,
            inodes: 64,
            layout,
        },
    )
    .unwrap();
    (disk, tfs)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn free_blocks(tfs: &mut TinyFileSystem) -> u64 {
    tfs.statfs().unwrap().free_blocks
}

#[test]
fn forty_thousand_bytes_take_ten_blocks_and_one_index() {
    let (_, tfs) = volume(TierLayout::default());
    let mut tfs = tfs.lock();
    let before = free_blocks(&mut tfs);

    let data = pattern(40_000);
    let fd = tfs
        .open_file(
            "/big",
            OpenFlag::Read | OpenFlag::Write | OpenFlag::Create,
            Permission::from_mode(0o644),
        )
        .unwrap();
    assert_eq!(tfs.write(fd, &data).unwrap(), data.len());

    let stat = tfs.fstat(fd).unwrap();
    assert_eq!(stat.size, 40_000);
    assert_eq!(stat.blocks, 10);
    assert_eq!(before - free_blocks(&mut tfs), 11);

    tfs.seek(fd, 0, Whence::Set).unwrap();
    let mut buf = vec![0; 50_000];
    assert_eq!(tfs.read(fd, &mut buf).unwrap(), 40_000);
    assert_eq!(&buf[..40_000], &data[..]);
    assert_eq!(tfs.read(fd, &mut buf).unwrap(), 0);
    tfs.close(fd).unwrap();

    // 删除后块全部回到空闲链表
    tfs.unlink("/big").unwrap();
    assert_eq!(free_blocks(&mut tfs), before);
}

#[test]
fn deeper_tiers_grow_index_chains() {
    let (_, tfs) = volume(TierLayout::new([1, 1, 1, 1]).unwrap());
    let mut tfs = tfs.lock();
    let layout = tfs.layout();
    let before = free_blocks(&mut tfs);

    let fd = tfs
        .open_file(
            "/sparse",
            OpenFlag::Read | OpenFlag::Write | OpenFlag::Create,
            Permission::from_mode(0o600),
        )
        .unwrap();

    let double = layout.capacity(0) + layout.capacity(1);
    tfs.seek(fd, double as i64 + 5, Whence::Set).unwrap();
    assert_eq!(tfs.write(fd, b"two levels").unwrap(), 10);
    assert_eq!(before - free_blocks(&mut tfs), 3);

    let triple = double + layout.capacity(2);
    tfs.seek(fd, triple as i64, Whence::Set).unwrap();
    assert_eq!(tfs.write(fd, b"three").unwrap(), 5);
    assert_eq!(before - free_blocks(&mut tfs), 7);
    assert_eq!(tfs.fstat(fd).unwrap().size, triple + 5);
    assert_eq!(tfs.fstat(fd).unwrap().blocks, 2);

    let mut buf = [0xff; 10];
    tfs.seek(fd, double as i64 + 5, Whence::Set).unwrap();
    assert_eq!(tfs.read(fd, &mut buf).unwrap(), 10);
    assert_eq!(&buf, b"two levels");

    // 空洞读出全零
    tfs.seek(fd, 100, Whence::Set).unwrap();
    assert_eq!(tfs.read(fd, &mut buf).unwrap(), 10);
    assert_eq!(buf, [0; 10]);

    tfs.close(fd).unwrap();
    tfs.unlink("/sparse").unwrap();
    assert_eq!(free_blocks(&mut tfs), before);
}

#[test]
fn writes_stop_at_the_largest_file() {
    let (_, tfs) = volume(TierLayout::new([1, 0, 0, 0]).unwrap());
    let mut tfs = tfs.lock();
    assert_eq!(tfs.layout().max_file_size(), BLOCK_SIZE as u64);

    let fd = tfs
        .open_file(
            "/small",
            OpenFlag::Write | OpenFlag::Create,
            Permission::from_mode(0o644),
        )
        .unwrap();
    assert_eq!(tfs.write(fd, &pattern(5000)).unwrap(), BLOCK_SIZE);
    assert_eq!(tfs.write(fd, b"more"), Err(Error::NoSpace));

    assert_eq!(tfs.seek(fd, 0, Whence::End).unwrap(), BLOCK_SIZE as u64);
    assert_eq!(tfs.seek(fd, 1, Whence::End), Err(Error::InvalidOffset));
    tfs.close(fd).unwrap();
}

#[test]
fn keyed_files_scatter_their_index_slots() {
    let (disk, tfs) = volume(TierLayout::default());
    let mut tfs = tfs.lock();
    let key = FileKey::from_passphrase("swordfish");
    let data = pattern(3 * BLOCK_SIZE);

    let fd = tfs
        .open_with_key(
            "/secret",
            OpenFlag::Write | OpenFlag::Create,
            Permission::from_mode(0o600),
            key,
        )
        .unwrap();
    assert_eq!(tfs.write(fd, &data).unwrap(), data.len());
    tfs.close(fd).unwrap();

    let inode = tfs.namei("/secret").unwrap();
    let index_block = tfs.disk_inode(&inode).index[0];
    tfs.iput(inode).unwrap();
    tfs.sync().unwrap();

    let slots: Vec<u32> = disk.with_raw(|raw| {
        raw[index_block as usize * BLOCK_SIZE..][..BLOCK_SIZE]
            .chunks_exact(4)
            .map(|bytes| u32::from_le_bytes(bytes.try_into().unwrap()))
            .collect()
    });
    assert_eq!(slots.len(), INDEX_SIZE);
    for logical in 0..3 {
        let slot = XorFold.encode(logical, &key);
        assert_ne!(slot, logical);
        assert_ne!(slots[slot], 0);
        assert_eq!(slots[logical], 0);
    }

    // 不带密钥只能看到空洞
    let fd = tfs
        .open_file("/secret", OpenFlag::Read.into(), Permission::from_mode(0))
        .unwrap();
    let mut buf = vec![0xff; data.len()];
    assert_eq!(tfs.read(fd, &mut buf).unwrap(), data.len());
    assert!(buf.iter().all(|&b| b == 0));
    tfs.close(fd).unwrap();

    let fd = tfs
        .open_with_key("/secret", OpenFlag::Read.into(), Permission::from_mode(0), key)
        .unwrap();
    assert_eq!(tfs.read(fd, &mut buf).unwrap(), data.len());
    assert_eq!(buf, data);
    tfs.close(fd).unwrap();
}

#[test]
fn overwriting_reuses_mapped_blocks() {
    let (_, tfs) = volume(TierLayout::default());
    let mut tfs = tfs.lock();

    let fd = tfs
        .open_file(
            "/log",
            OpenFlag::Read | OpenFlag::Write | OpenFlag::Create,
            Permission::from_mode(0o644),
        )
        .unwrap();
    tfs.write(fd, &pattern(2 * BLOCK_SIZE)).unwrap();
    let used = free_blocks(&mut tfs);

    tfs.seek(fd, 10, Whence::Set).unwrap();
    tfs.write(fd, b"patched").unwrap();
    assert_eq!(free_blocks(&mut tfs), used);
    assert_eq!(tfs.fstat(fd).unwrap().size, 2 * BLOCK_SIZE as u64);

    let mut buf = [0; 9];
    tfs.seek(fd, 9, Whence::Set).unwrap();
    tfs.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[1..8], b"patched");
    assert_eq!(buf[0], 9);
    tfs.close(fd).unwrap();
}

#[test]
fn teardown_clears_every_reference() {
    let (_, tfs) = volume(TierLayout::new([2, 2, 2, 0]).unwrap());
    let mut tfs = tfs.lock();
    let layout = tfs.layout();
    let before = free_blocks(&mut tfs);

    let inode = tfs.ialloc().unwrap();
    *tfs.disk_inode_mut(&inode) =
        tiny_fs::DiskInode::new(tiny_fs::InodeKind::File, Permission::from_mode(0o644));
    let block_size = BLOCK_SIZE as u64;
    let logicals = [
        0,
        1,
        layout.capacity(0) / block_size,
        (layout.capacity(0) + layout.capacity(1)) / block_size + 7,
    ];
    for logical in logicals {
        let block = tfs.balloc().unwrap();
        tfs.add_physical_block(&inode, logical, block, false).unwrap();
    }
    // 2 个直接块，1 个一级索引 + 数据，2 个二级索引 + 数据
    assert_eq!(before - free_blocks(&mut tfs), 7);
    assert_eq!(tfs.disk_inode(&inode).size_on_disk, 4 * BLOCK_SIZE as u32);

    tfs.free_all_blocks(&inode).unwrap();
    assert_eq!(tfs.disk_inode(&inode).index, [0; 8]);
    assert_eq!(tfs.disk_inode(&inode).size_on_disk, 0);
    assert_eq!(free_blocks(&mut tfs), before);

    // 再回收一次不会重复释放
    tfs.free_all_blocks(&inode).unwrap();
    assert_eq!(free_blocks(&mut tfs), before);

    tfs.disk_inode_mut(&inode).links = 0;
    tfs.iput(inode).unwrap();
}
