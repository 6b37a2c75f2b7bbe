use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use block_dev::{BlockDevice, DeviceError};
use tiny_fs::BLOCK_SIZE;

/// 把宿主机上的普通文件当作块设备
#[derive(Debug)]
pub struct BlockFile {
    inner: Mutex<File>,
}

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self {
            inner: Mutex::new(fd),
        }
    }

    /// 新建（或截断）镜像文件，大小为 `blocks` 个块
    pub fn create(path: impl AsRef<Path>, blocks: u32) -> io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len(blocks as u64 * BLOCK_SIZE as u64)?;

        Ok(Self::new(fd))
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::new(fd))
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        let mut file = self.inner.lock().map_err(|_| DeviceError::Media)?;
        file.seek(SeekFrom::Start((block_id * buf.len()) as u64))
            .map_err(device_error)?;
        file.read_exact(buf).map_err(device_error)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError> {
        let mut file = self.inner.lock().map_err(|_| DeviceError::Media)?;
        let end = ((block_id + 1) * buf.len()) as u64;
        if end > file.metadata().map_err(device_error)?.len() {
            return Err(DeviceError::OutOfBounds);
        }
        file.seek(SeekFrom::Start((block_id * buf.len()) as u64))
            .map_err(device_error)?;
        file.write_all(buf).map_err(device_error)
    }
}

fn device_error(err: io::Error) -> DeviceError {
    log::error!("block file: {err}");
    match err.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::WriteZero => DeviceError::ShortTransfer,
        _ => DeviceError::Media,
    }
}
