//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 块的大小由使用者决定：第 `block_id` 块位于字节偏移 `block_id * buf.len()` 处。

#![no_std]

extern crate alloc;

mod ram_disk;

use core::any::Any;
use core::fmt;

pub use self::ram_disk::RamDisk;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError>;
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// 访问超出设备末尾
    OutOfBounds,
    /// 读写了不完整的块
    ShortTransfer,
    /// 底层介质报告的其它错误
    Media,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DeviceError::OutOfBounds => "block beyond end of device",
            DeviceError::ShortTransfer => "incomplete block transfer",
            DeviceError::Media => "device media error",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for DeviceError {}
