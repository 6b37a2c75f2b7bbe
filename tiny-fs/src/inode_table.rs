//! # 索引节点层
//!
//! 活跃 inode 表缓存正在使用的 inode，以 inode 号开放寻址、线性探测。
//! 表项的三种状态：
//! - [`InodeStatus::Active`]：表项在用；
//! - [`InodeStatus::Locked`]：正被某条调用链独占；
//! - [`InodeStatus::Modified`]：内存副本比磁盘新，最后一次释放时写回。
//!
//! 锁只是防重入的标记，拿不到就直接报错，不会等待。
//!
//! 空闲的 inode 记录串成空闲链表，链表结点存放在记录的索引数组里，
//! 算法与块空闲链表一致。

use core::array;

use enumflags2::{BitFlags, bitflags};

use crate::TinyFileSystem;
use crate::encode::FileKey;
use crate::layout::{DiskInode, FreeListNode, Gift, InodeId};
use crate::{Error, INODE_INDEX_COUNT, MAX_ACTIVE_INODES, Result};

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeStatus {
    Active = 0b001,
    Locked = 0b010,
    Modified = 0b100,
}

/// 活跃 inode 的凭据，必须交还给 [`TinyFileSystem::iput`]
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct InodeHandle {
    pub(crate) slot: usize,
    pub(crate) id: InodeId,
}

impl InodeHandle {
    #[inline]
    pub fn id(&self) -> InodeId {
        self.id
    }
}

#[derive(Debug, Default)]
pub(crate) struct InodeTable {
    slots: [InCoreInode; MAX_ACTIVE_INODES],
}

#[derive(Debug, Default)]
pub(crate) struct InCoreInode {
    /// 不活跃时为 0
    id: u32,
    status: BitFlags<InodeStatus>,
    refs: u16,
    pub(crate) key: FileKey,
    pub(crate) disk: DiskInode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Found(usize),
    Locked,
    Missing,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| InCoreInode::default()),
        }
    }

    #[inline]
    pub fn get(&self, handle: &InodeHandle) -> &InCoreInode {
        &self.slots[handle.slot]
    }

    #[inline]
    pub fn get_mut(&mut self, handle: &InodeHandle) -> &mut InCoreInode {
        &mut self.slots[handle.slot]
    }

    /// 从 `id % 表长` 开始线性探测整张表
    fn lookup_active(&self, id: InodeId) -> Lookup {
        let start = id.get() as usize % MAX_ACTIVE_INODES;
        (0..MAX_ACTIVE_INODES)
            .map(|step| (start + step) % MAX_ACTIVE_INODES)
            .find(|&slot| {
                let inode = &self.slots[slot];
                inode.status.contains(InodeStatus::Active) && inode.id == id.get()
            })
            .map_or(Lookup::Missing, |slot| {
                if self.slots[slot].status.contains(InodeStatus::Locked) {
                    Lookup::Locked
                } else {
                    Lookup::Found(slot)
                }
            })
    }

    fn has_vacancy(&self) -> bool {
        self.slots
            .iter()
            .any(|inode| !inode.status.contains(InodeStatus::Active))
    }

    /// 占用第一个不活跃的表项
    fn reserve_free_slot(&mut self, id: InodeId, disk: DiskInode) -> Result<usize> {
        let start = id.get() as usize % MAX_ACTIVE_INODES;
        let slot = (0..MAX_ACTIVE_INODES)
            .map(|step| (start + step) % MAX_ACTIVE_INODES)
            .find(|&slot| !self.slots[slot].status.contains(InodeStatus::Active))
            .ok_or(Error::NoSpace)?;

        self.slots[slot] = InCoreInode {
            id: id.get(),
            status: InodeStatus::Active | InodeStatus::Locked,
            refs: 1,
            key: FileKey::ZERO,
            disk,
        };

        Ok(slot)
    }

    fn reset(&mut self, slot: usize) {
        self.slots[slot] = InCoreInode::default();
    }

    fn find(&self, id: InodeId) -> Option<&InCoreInode> {
        self.slots
            .iter()
            .find(|inode| inode.status.contains(InodeStatus::Active) && inode.id == id.get())
    }

    fn ids(&self) -> impl Iterator<Item = InodeId> + '_ {
        self.slots
            .iter()
            .filter(|inode| inode.status.contains(InodeStatus::Active))
            .map(|inode| InodeId::new(inode.id))
    }
}

impl TinyFileSystem {
    /// 取得 inode 并上锁，不在表中时从磁盘载入
    pub fn iget(&mut self, id: InodeId) -> Result<InodeHandle> {
        if !self.super_block.is_valid_inode(id) {
            log::warn!("inode {id} is out of range");
            return Err(Error::OutOfRange);
        }

        match self.inodes.lookup_active(id) {
            Lookup::Found(slot) => {
                let inode = &mut self.inodes.slots[slot];
                inode.refs += 1;
                inode.status.insert(InodeStatus::Locked);
                log::trace!("iget {id}: refs {}", inode.refs);
                return Ok(InodeHandle { slot, id });
            }
            Lookup::Locked => {
                log::warn!("inode {id} is locked");
                return Err(Error::AlreadyLocked);
            }
            Lookup::Missing => {}
        }

        if !self.inodes.has_vacancy() {
            log::warn!("inode table is full");
            return Err(Error::NoSpace);
        }

        let disk = self.read_disk_inode(id)?;
        let slot = self.inodes.reserve_free_slot(id, disk)?;
        log::debug!("load inode {id} into slot {slot}");

        Ok(InodeHandle { slot, id })
    }

    /// 释放 inode。
    ///
    /// 最后一个持有者释放时：链接数为 0 则删除文件，否则写回修改。
    /// 删除或写回失败时表项保持原样，只解锁。
    pub fn iput(&mut self, handle: InodeHandle) -> Result<()> {
        let inode = self.inodes.get(&handle);

        if inode.refs > 1 {
            let inode = self.inodes.get_mut(&handle);
            inode.refs -= 1;
            inode.status.remove(InodeStatus::Locked);
            log::trace!("iput {}: refs {}", handle.id, inode.refs);
            return Ok(());
        }

        // 空闲记录已在空闲链表上，既不删除也不写回
        let result = if inode.disk.is_unused() {
            Ok(())
        } else if inode.disk.links == 0 {
            self.delete_inode(&handle)
        } else if inode.status.contains(InodeStatus::Modified) {
            let disk = inode.disk;
            self.write_disk_inode(handle.id, &disk)
        } else {
            Ok(())
        };

        match result {
            Ok(()) => {
                log::debug!("evict inode {} from slot {}", handle.id, handle.slot);
                self.inodes.reset(handle.slot);
                Ok(())
            }
            Err(err) => {
                log::error!("failed to release inode {}: {err}", handle.id);
                self.inodes
                    .get_mut(&handle)
                    .status
                    .remove(InodeStatus::Locked);
                Err(err)
            }
        }
    }

    /// 从空闲链表取出一个 inode，返回内容为“未使用”记录的句柄。
    ///
    /// 调用者须在释放前设置类型，否则该 inode 既不在空闲链表上也无人使用。
    pub fn ialloc(&mut self) -> Result<InodeHandle> {
        let mut cursor = self.super_block.inode_free;
        if cursor.is_exhausted() {
            log::warn!("no free inode");
            return Err(Error::NoSpace);
        }

        let head = InodeId::new(cursor.head);
        if !self.super_block.is_valid_inode(head) {
            log::error!("inode free list points to {head}");
            return Err(Error::CorruptFreeList);
        }
        let node = FreeListNode {
            slots: self.read_disk_inode(head)?.index,
        };

        let id = InodeId::new(cursor.take(&node)?.unit());
        if !self.super_block.is_valid_inode(id)
            || self.inodes.find(id).is_some_and(|inode| !inode.disk.is_unused())
        {
            log::error!("inode free list hands out {id}");
            return Err(Error::CorruptFreeList);
        }

        // 已被载入的空闲记录与持有者共享表项，被锁住时游标不动
        let handle = self.iget(id)?;
        if !self.disk_inode(&handle).is_unused() {
            log::error!("free inode {id} is in use");
            self.inodes.reset(handle.slot);
            return Err(Error::CorruptFreeList);
        }

        self.super_block.inode_free = cursor;
        *self.disk_inode_mut(&handle) = DiskInode::UNUSED;
        log::debug!("ialloc {id}");

        Ok(handle)
    }

    /// 把 inode 记录重置为“未使用”并挂回空闲链表
    pub fn ifree(&mut self, id: InodeId) -> Result<()> {
        if !self.super_block.is_valid_inode(id) || id == self.super_block.root {
            log::warn!("cannot free inode {id}");
            return Err(Error::OutOfRange);
        }

        let mut cursor = self.super_block.inode_free;
        match cursor.give(id.get()) {
            Gift::NewHead { next } => {
                let record = DiskInode {
                    index: FreeListNode::<INODE_INDEX_COUNT>::linking(next).slots,
                    ..DiskInode::UNUSED
                };
                self.write_disk_inode(id, &record)?;
            }
            Gift::Slot(slot) => {
                self.write_disk_inode(id, &DiskInode::UNUSED)?;
                let head = InodeId::new(cursor.head);
                let mut record = self.read_disk_inode(head)?;
                record.index[slot] = id.get();
                self.write_disk_inode(head, &record)?;
            }
        }

        self.super_block.inode_free = cursor;
        log::debug!("ifree {id}");

        Ok(())
    }

    #[inline]
    pub fn disk_inode(&self, handle: &InodeHandle) -> &DiskInode {
        &self.inodes.get(handle).disk
    }

    /// 可变访问即视为修改
    #[inline]
    pub fn disk_inode_mut(&mut self, handle: &InodeHandle) -> &mut DiskInode {
        let inode = self.inodes.get_mut(handle);
        inode.status.insert(InodeStatus::Modified);
        &mut inode.disk
    }

    #[inline]
    pub fn mark_modified(&mut self, handle: &InodeHandle) {
        self.inodes
            .get_mut(handle)
            .status
            .insert(InodeStatus::Modified);
    }

    /// 重新获得已持有 inode 的独占权
    pub fn lock(&mut self, handle: &InodeHandle) -> Result<()> {
        let inode = self.inodes.get_mut(handle);
        if inode.status.contains(InodeStatus::Locked) {
            log::warn!("inode {} is locked", handle.id);
            return Err(Error::AlreadyLocked);
        }
        inode.status.insert(InodeStatus::Locked);
        Ok(())
    }

    #[inline]
    pub fn unlock(&mut self, handle: &InodeHandle) {
        self.inodes
            .get_mut(handle)
            .status
            .remove(InodeStatus::Locked);
    }

    #[inline]
    pub fn key(&self, handle: &InodeHandle) -> &FileKey {
        &self.inodes.get(handle).key
    }

    #[inline]
    pub fn set_key(&mut self, handle: &InodeHandle, key: FileKey) {
        self.inodes.get_mut(handle).key = key;
    }

    /// 活跃 inode 的状态与引用计数，不活跃时为 `None`
    pub fn inode_status(&self, id: InodeId) -> Option<(BitFlags<InodeStatus>, u16)> {
        self.inodes
            .find(id)
            .map(|inode| (inode.status, inode.refs))
    }

    /// 当前活跃的全部 inode 号
    pub fn active_inodes(&self) -> impl Iterator<Item = InodeId> + '_ {
        self.inodes.ids()
    }
}

impl TinyFileSystem {
    pub(crate) fn read_disk_inode(&mut self, id: InodeId) -> Result<DiskInode> {
        let (block_id, offset) = self.super_block.inode_position(id);
        self.cache.map(block_id, |block| {
            DiskInode::decode(&block[offset..offset + DiskInode::SIZE])
        })?
    }

    pub(crate) fn write_disk_inode(&mut self, id: InodeId, disk: &DiskInode) -> Result<()> {
        let (block_id, offset) = self.super_block.inode_position(id);
        self.cache.map_mut(block_id, |block| {
            disk.encode(&mut block[offset..offset + DiskInode::SIZE])
        })
    }

    /// 链接数归零后的删除：回收全部块，记录挂回空闲链表
    fn delete_inode(&mut self, handle: &InodeHandle) -> Result<()> {
        log::debug!("delete inode {}", handle.id);
        self.free_all_blocks(handle)?;
        self.ifree(handle.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupy(table: &mut InodeTable, id: u32) -> usize {
        table
            .reserve_free_slot(InodeId::new(id), DiskInode::UNUSED)
            .unwrap()
    }

    #[test]
    fn probing_starts_at_the_hash() {
        let mut table = InodeTable::new();
        assert_eq!(occupy(&mut table, 3), 3);
        // 与 3 冲突，顺延到下一个空位
        assert_eq!(occupy(&mut table, 3 + MAX_ACTIVE_INODES as u32), 4);
        assert_eq!(occupy(&mut table, 4), 5);
    }

    #[test]
    fn locked_is_distinct_from_missing() {
        let mut table = InodeTable::new();
        let slot = occupy(&mut table, 7);
        assert_eq!(table.lookup_active(InodeId::new(7)), Lookup::Locked);
        assert_eq!(table.lookup_active(InodeId::new(8)), Lookup::Missing);

        table.slots[slot].status.remove(InodeStatus::Locked);
        assert_eq!(table.lookup_active(InodeId::new(7)), Lookup::Found(slot));
    }

    #[test]
    fn full_table_has_no_space() {
        let mut table = InodeTable::new();
        for id in 1..=MAX_ACTIVE_INODES as u32 {
            occupy(&mut table, id);
        }
        assert!(!table.has_vacancy());
        assert_eq!(
            table.reserve_free_slot(InodeId::new(99), DiskInode::UNUSED),
            Err(Error::NoSpace)
        );

        table.reset(0);
        assert!(table.has_vacancy());
        assert_eq!(table.lookup_active(InodeId::new(16)), Lookup::Missing);
    }
}
