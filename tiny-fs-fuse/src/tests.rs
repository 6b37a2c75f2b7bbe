use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use block_dev::{BlockDevice, DeviceError};
use tiny_fs::{BLOCK_SIZE, FormatOptions, MountOptions, OpenFlag, Permission, TinyFileSystem};

use crate::BlockFile;

fn image(name: &str) -> PathBuf {
    env::temp_dir().join(format!("tiny-fs-{}-{name}.img", process::id()))
}

#[test]
fn blocks_persist_in_the_host_file() {
    let path = image("blocks");
    let file = BlockFile::create(&path, 4).unwrap();

    file.write_block(2, &[0x5a; BLOCK_SIZE]).unwrap();
    let mut buf = [0; BLOCK_SIZE];
    file.read_block(2, &mut buf).unwrap();
    assert_eq!(buf, [0x5a; BLOCK_SIZE]);

    assert_eq!(
        file.write_block(4, &buf),
        Err(DeviceError::OutOfBounds)
    );
    assert_eq!(
        file.read_block(9, &mut buf),
        Err(DeviceError::ShortTransfer)
    );

    let raw = fs::read(&path).unwrap();
    assert_eq!(raw.len(), 4 * BLOCK_SIZE);
    assert!(raw[2 * BLOCK_SIZE..3 * BLOCK_SIZE].iter().all(|&b| b == 0x5a));

    fs::remove_file(path).unwrap();
}

#[test]
fn volume_survives_reopening_the_image() {
    let path = image("volume");
    let options = FormatOptions {
        total_blocks: 128,
        inodes: 64,
        ..FormatOptions::default()
    };

    {
        let device = Arc::new(BlockFile::create(&path, options.total_blocks).unwrap());
        let tfs = TinyFileSystem::format(device, options).unwrap();
        let mut tfs = tfs.lock();
        let fd = tfs
            .open_file(
                "/hello.txt",
                OpenFlag::Write | OpenFlag::Create,
                Permission::from_mode(0o644),
            )
            .unwrap();
        assert_eq!(tfs.write(fd, b"hello, tiny-fs").unwrap(), 14);
        tfs.unmount().unwrap();
    }

    let device = Arc::new(BlockFile::open(&path).unwrap());
    let tfs = TinyFileSystem::open(device, MountOptions::default()).unwrap();
    let mut tfs = tfs.lock();
    let fd = tfs
        .open_file("/hello.txt", OpenFlag::Read.into(), Permission::from_mode(0))
        .unwrap();
    let mut buf = [0; 32];
    let read = tfs.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..read], b"hello, tiny-fs");
    tfs.close(fd).unwrap();
    drop(tfs);

    fs::remove_file(path).unwrap();
}
