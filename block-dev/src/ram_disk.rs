use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{BlockDevice, DeviceError};

/// 内存盘：用一段连续内存模拟块设备，并统计读写次数
#[derive(Debug)]
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    pub fn new(bytes: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; bytes]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 设备被读取的块数
    #[inline]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 设备被写入的块数
    #[inline]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕开块接口直接访问原始字节，用于检查或篡改盘上内容
    pub fn with_raw<V>(&self, f: impl FnOnce(&mut [u8]) -> V) -> V {
        f(&mut self.data.lock())
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        let data = self.data.lock();
        let start = block_id * buf.len();
        let src = data
            .get(start..start + buf.len())
            .ok_or(DeviceError::OutOfBounds)?;
        buf.copy_from_slice(src);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError> {
        let mut data = self.data.lock();
        let start = block_id * buf.len();
        let dest = data
            .get_mut(start..start + buf.len())
            .ok_or(DeviceError::OutOfBounds)?;
        dest.copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
