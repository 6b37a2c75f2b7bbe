//! # 磁盘块分配层
//!
//! 空闲数据块串成空闲链表，结点就是空闲块本身，
//! 每个结点最多记录 [`INDEX_SIZE`] 个单元（含结点自己）。
//! 游标只在落盘成功后才写回超级块。

use crate::TinyFileSystem;
use crate::layout::{FreeListNode, Gift, index_slot, set_index_slot};
use crate::{Error, INDEX_SIZE, Result};

impl TinyFileSystem {
    /// 分配一个数据块，交出的块内容全为 0
    pub fn balloc(&mut self) -> Result<u32> {
        let mut cursor = self.super_block.block_free;
        if cursor.is_exhausted() {
            log::warn!("no free block");
            return Err(Error::NoSpace);
        }
        if !self.super_block.is_data_block(cursor.head) {
            log::error!("block free list points to {}", cursor.head);
            return Err(Error::CorruptFreeList);
        }

        let node = self
            .cache
            .map(cursor.head, |block| FreeListNode::<INDEX_SIZE>::decode(block))?;
        let block_id = cursor.take(&node)?.unit();
        if !self.super_block.is_data_block(block_id) {
            log::error!("block free list hands out {block_id}");
            return Err(Error::CorruptFreeList);
        }

        self.cache.overwrite(block_id, |_| ())?;
        self.super_block.block_free = cursor;
        log::trace!("balloc {block_id}, {} left in head", cursor.count);

        Ok(block_id)
    }

    /// 把数据块挂回空闲链表
    pub fn bfree(&mut self, block_id: u32) -> Result<()> {
        if !self.super_block.is_data_block(block_id) {
            log::warn!("cannot free block {block_id}");
            return Err(Error::OutOfRange);
        }

        let mut cursor = self.super_block.block_free;
        match cursor.give(block_id) {
            Gift::NewHead { next } => self.cache.overwrite(block_id, |block| {
                set_index_slot(block, INDEX_SIZE - 1, next);
            })?,
            Gift::Slot(slot) => self.cache.map_mut(cursor.head, |block| {
                set_index_slot(block, slot, block_id);
            })?,
        }

        self.super_block.block_free = cursor;
        log::trace!("bfree {block_id}");

        Ok(())
    }

    /// 头结点末槽位记录的下一个结点
    pub(crate) fn next_free_node(&mut self, node: u32) -> Result<u32> {
        self.cache.map(node, |block| index_slot(block, INDEX_SIZE - 1))
    }
}
