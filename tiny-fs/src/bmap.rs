//! # 块映射层
//!
//! 逻辑偏移到物理块的翻译，以及索引树的生长与回收。
//!
//! 第一级引用按 [`TierLayout`] 分级。`d` 级引用下挂 `d` 层索引块，
//! 每下降一层，用剩余偏移除以下一层单个编号的可寻址字节数，得到本层的逻辑槽位。
//! 普通文件的逻辑槽位经 [`SlotEncoder`](crate::SlotEncoder) 变换后才是物理槽位，
//! 目录直接使用逻辑槽位。
//!
//! 任何一层的编号为 0 都表示空洞。

use alloc::vec::Vec;

use crate::TinyFileSystem;
use crate::inode_table::InodeHandle;
use crate::layout::{TierLayout, index_slot, set_index_slot};
use crate::{BLOCK_SIZE, Error, INDEX_SIZE, Result};

/// 一次翻译的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMap {
    /// 物理块号，0 表示空洞
    pub block: u32,
    /// 块内字节偏移
    pub offset: usize,
    /// 从 `offset` 起到块尾或文件尾（取较近者）的字节数
    pub live: usize,
}

impl TinyFileSystem {
    /// 翻译逻辑偏移。
    ///
    /// 偏移在文件尾之后时 `live` 为 0：若与最后一个字节同块，给出该块，
    /// 否则给出 0。
    pub fn bmap(&mut self, handle: &InodeHandle, offset: u64) -> Result<BlockMap> {
        if offset >= self.super_block.layout.max_file_size() {
            log::warn!("offset {offset} is beyond the largest file");
            return Err(Error::InvalidOffset);
        }

        let size = self.disk_inode(handle).size;
        let block_size = BLOCK_SIZE as u64;
        let in_block = (offset % block_size) as usize;

        if offset >= size {
            let block = if size > 0 && (size - 1) / block_size == offset / block_size {
                self.bmap(handle, size - 1)?.block
            } else {
                0
            };
            return Ok(BlockMap {
                block,
                offset: in_block,
                live: 0,
            });
        }

        let block = self.resolve(handle, offset)?;
        let block_end = (offset / block_size + 1) * block_size;

        Ok(BlockMap {
            block,
            offset: in_block,
            live: (block_end.min(size) - offset) as usize,
        })
    }

    /// 把第 `logical` 个逻辑块映射到物理块 `physical`。
    ///
    /// 沿途缺失的索引块当场分配并写入上一层。
    /// 目标槽位已有映射时，`replace` 为真则替换并释放旧块，否则报错且不做任何修改。
    /// `size_on_disk` 已无法再计入一个块时报 [`Error::NoSpace`]，槽位保持为空。
    pub fn add_physical_block(
        &mut self,
        handle: &InodeHandle,
        logical: u64,
        physical: u32,
        replace: bool,
    ) -> Result<()> {
        let position = self
            .super_block
            .layout
            .locate(logical * BLOCK_SIZE as u64)
            .ok_or(Error::InvalidOffset)?;

        let size_on_disk = self.disk_inode(handle).size_on_disk;
        let (old, grown) = if position.degree == 0 {
            let old = self.disk_inode(handle).index[position.slot];
            let grown = claim_slot(logical, old, replace, size_on_disk)?;
            self.disk_inode_mut(handle).index[position.slot] = physical;
            (old, grown)
        } else {
            let mut parent = self.disk_inode(handle).index[position.slot];
            if parent == 0 {
                parent = self.balloc()?;
                self.disk_inode_mut(handle).index[position.slot] = parent;
                log::trace!("index block {parent} at inode slot {}", position.slot);
            }

            let mut inner = position.inner;
            for level in (2..=position.degree).rev() {
                let slot = self.descend(handle, &mut inner, level)?;
                let child = self.cache.map(parent, |block| index_slot(block, slot))?;
                parent = if child != 0 {
                    child
                } else {
                    let fresh = self.balloc()?;
                    if let Err(err) = self
                        .cache
                        .map_mut(parent, |block| set_index_slot(block, slot, fresh))
                    {
                        self.bfree(fresh)?;
                        return Err(err);
                    }
                    log::trace!("index block {fresh} at level {level}");
                    fresh
                };
            }

            let slot = self.descend(handle, &mut inner, 1)?;
            let old = self.cache.map(parent, |block| index_slot(block, slot))?;
            let grown = claim_slot(logical, old, replace, size_on_disk)?;
            self.cache
                .map_mut(parent, |block| set_index_slot(block, slot, physical))?;
            (old, grown)
        };

        match grown {
            Some(size_on_disk) => self.disk_inode_mut(handle).size_on_disk = size_on_disk,
            None => {
                log::debug!("replace block {old} with {physical} in inode {}", handle.id());
                self.bfree(old)?;
            }
        }

        Ok(())
    }

    /// 自下而上回收整棵索引树，每回收一棵子树就清零指向它的编号
    pub fn free_all_blocks(&mut self, handle: &InodeHandle) -> Result<()> {
        let layout = self.super_block.layout;

        for (slot, degree) in layout.slots() {
            let block = self.disk_inode(handle).index[slot];
            if block == 0 {
                continue;
            }
            self.free_tree(block, degree)?;
            self.disk_inode_mut(handle).index[slot] = 0;
        }
        self.disk_inode_mut(handle).size_on_disk = 0;
        log::debug!("freed all blocks of inode {}", handle.id());

        Ok(())
    }
}

impl TinyFileSystem {
    /// 沿索引树找到 `offset` 所在的数据块
    fn resolve(&mut self, handle: &InodeHandle, offset: u64) -> Result<u32> {
        let position = self
            .super_block
            .layout
            .locate(offset)
            .ok_or(Error::InvalidOffset)?;

        let mut block = self.disk_inode(handle).index[position.slot];
        let mut inner = position.inner;
        for level in (1..=position.degree).rev() {
            if block == 0 {
                break;
            }
            let slot = self.descend(handle, &mut inner, level)?;
            block = self.cache.map(block, |data| index_slot(data, slot))?;
        }

        Ok(block)
    }

    /// 在第 `level` 层索引块中取物理槽位，并把 `inner` 缩小到该槽位的范围内
    fn descend(&self, handle: &InodeHandle, inner: &mut u64, level: usize) -> Result<usize> {
        let unit = TierLayout::unit(level - 1);
        let local = (*inner / unit) as usize;
        *inner %= unit;
        self.physical_slot(handle, local)
    }

    fn physical_slot(&self, handle: &InodeHandle, local: usize) -> Result<usize> {
        let inode = self.inodes.get(handle);
        if !inode.disk.is_file() {
            return Ok(local);
        }

        let slot = self.encoder.encode(local, &inode.key);
        if slot >= INDEX_SIZE {
            log::error!("slot {local} of inode {} encodes to {slot}", handle.id());
            return Err(Error::OutOfRange);
        }
        Ok(slot)
    }

    fn free_tree(&mut self, block: u32, degree: usize) -> Result<()> {
        if degree > 0 {
            let children: Vec<(usize, u32)> = self.cache.map(block, |data| {
                (0..INDEX_SIZE)
                    .map(|slot| (slot, index_slot(data, slot)))
                    .filter(|&(_, child)| child != 0)
                    .collect()
            })?;

            for (slot, child) in children {
                self.free_tree(child, degree - 1)?;
                self.cache
                    .map_mut(block, |data| set_index_slot(data, slot, 0))?;
            }
        }

        self.bfree(block)
    }
}

/// 检查目标槽位能否写入。槽位为空时返回计入新块后的 `size_on_disk`，
/// 替换已有映射时返回 `None`。
fn claim_slot(logical: u64, old: u32, replace: bool, size_on_disk: u32) -> Result<Option<u32>> {
    if old != 0 {
        if replace {
            return Ok(None);
        }
        log::warn!("logical block {logical} is already mapped to {old}");
        return Err(Error::AlreadyMapped);
    }

    size_on_disk
        .checked_add(BLOCK_SIZE as u32)
        .map(Some)
        .ok_or_else(|| {
            log::warn!("size on disk cannot account for logical block {logical}");
            Error::NoSpace
        })
}
