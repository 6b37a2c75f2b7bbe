//! # 磁盘数据结构层
//!
//! tiny-fs 的磁盘布局：
//! 超级块 | 索引节点区域 | 数据块区域
//!
//! 空闲的数据块与空闲的索引节点各自串成一条空闲链表，
//! 链表结点就是空闲单元本身，不单独占用区域。
//!
//! 所有磁盘结构都以小端序逐字段编解码，不依赖内存布局。

mod super_block;
pub use super_block::SuperBlock;

mod inode;
pub use inode::{DiskInode, InodeId, InodeKind, Permission};

mod free_list;
pub use free_list::{FreeList, FreeListNode, Gift, Taken};

mod tier;
pub use tier::{TierLayout, TierPosition};

/// 文件项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::{DirEntry, NAME_MAX_LEN};

use crate::BLOCK_NO_SIZE;

#[inline]
pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    let mut raw = [0; 2];
    raw.copy_from_slice(&bytes[at..at + 2]);
    u16::from_le_bytes(raw)
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[inline]
pub(crate) fn write_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u64(bytes: &mut [u8], at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// 索引块的第 `slot` 个块编号
#[inline]
pub(crate) fn index_slot(block: &[u8], slot: usize) -> u32 {
    read_u32(block, slot * BLOCK_NO_SIZE)
}

#[inline]
pub(crate) fn set_index_slot(block: &mut [u8], slot: usize, block_id: u32) {
    write_u32(block, slot * BLOCK_NO_SIZE, block_id);
}
