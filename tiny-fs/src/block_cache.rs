//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的块复制到内存中，提高对块设备的操作效率。
//!
//! 缓冲区是内存与块设备之间唯一的通道，每个槽位带有三种状态：
//! - [`BufferStatus::Occupied`]：已被某个调用者取走，其他人不得再取；
//! - [`BufferStatus::Valid`]：内容已经载入，与磁盘一致或比磁盘更新；
//! - [`BufferStatus::Modified`]：内容与磁盘不一致，换出前必须写回。
//!
//! 写回是惰性的：[`BlockCache::release`] 只归还槽位，不写盘，
//! 直到槽位被换给别的块、或显式同步时才写回。
//!
//! 槽位个数在创建时确定，换出时挑选最久未用的空闲槽位。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use block_dev::BlockDevice;
use enumflags2::{BitFlags, bitflags};

use crate::{BLOCK_SIZE, DataBlock, Error, Result};

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    Modified = 0b001,
    Occupied = 0b010,
    Valid = 0b100,
}

/// 取出的缓冲区凭据，必须交还给 [`BlockCache::release`]
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct Buffer {
    slot: usize,
    block_id: u32,
}

impl Buffer {
    #[inline]
    pub fn block_id(&self) -> u32 {
        self.block_id
    }
}

pub struct BlockCache {
    block_device: Arc<dyn BlockDevice>,
    /// 卷的总块数，越界访问直接拒绝
    total_blocks: u32,
    slots: Vec<Slot>,
    /// 逻辑时钟，用于挑选最久未用的槽位
    clock: u64,
}

struct Slot {
    /// 空槽位不对应任何块
    block_id: Option<u32>,
    status: BitFlags<BufferStatus>,
    last_use: u64,
    data: Box<DataBlock>,
}

impl BlockCache {
    pub fn new(block_device: Arc<dyn BlockDevice>, total_blocks: u32, capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Slot::empty()).collect();

        Self {
            block_device,
            total_blocks,
            slots,
            clock: 0,
        }
    }

    #[inline]
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 取得一个可用于存放 `block_id` 的缓冲区，不保证内容已载入。
    ///
    /// 若该块已被取走，或全部槽位都被占用，返回 [`Error::AlreadyOccupied`]，
    /// 且不产生任何副作用。
    pub fn acquire(&mut self, block_id: u32) -> Result<Buffer> {
        self.check(block_id)?;

        let slot = match self
            .slots
            .iter()
            .position(|slot| slot.block_id == Some(block_id))
        {
            Some(index) if self.slots[index].status.contains(BufferStatus::Occupied) => {
                log::warn!("block {block_id} is already checked out");
                return Err(Error::AlreadyOccupied);
            }
            Some(index) => index,
            None => {
                let victim = self
                    .slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| !slot.status.contains(BufferStatus::Occupied))
                    .min_by_key(|(_, slot)| slot.last_use)
                    .map(|(index, _)| index)
                    .ok_or_else(|| {
                        log::warn!("no free buffer for block {block_id}");
                        Error::AlreadyOccupied
                    })?;

                // 槽位挪作他用之前先保存旧内容
                self.write_back(victim)?;
                let slot = &mut self.slots[victim];
                log::trace!("buffer {victim}: {:?} -> {block_id}", slot.block_id);
                slot.block_id = Some(block_id);
                slot.status = BitFlags::empty();
                victim
            }
        };

        self.clock += 1;
        let entry = &mut self.slots[slot];
        entry.status.insert(BufferStatus::Occupied);
        entry.last_use = self.clock;

        Ok(Buffer { slot, block_id })
    }

    /// 取得存放 `block_id` 的缓冲区并保证内容已从磁盘载入
    pub fn read(&mut self, block_id: u32) -> Result<Buffer> {
        let buffer = self.acquire(block_id)?;

        let slot = &mut self.slots[buffer.slot];
        if slot.status.contains(BufferStatus::Valid) {
            return Ok(buffer);
        }

        match self
            .block_device
            .read_block(block_id as usize, &mut slot.data[..])
        {
            Ok(()) => {
                slot.status.insert(BufferStatus::Valid);
                slot.status.remove(BufferStatus::Modified);
                Ok(buffer)
            }
            Err(err) => {
                log::error!("failed to read block {block_id}: {err}");
                self.release(buffer);
                Err(Error::Io)
            }
        }
    }

    /// 内容有效且被修改过才写盘；无论是否写盘，都清除修改标记
    pub fn write(&mut self, buffer: &Buffer) -> Result<()> {
        self.write_back(buffer.slot)
    }

    /// 归还缓冲区，不写盘
    pub fn release(&mut self, buffer: Buffer) {
        self.slots[buffer.slot]
            .status
            .remove(BufferStatus::Occupied);
    }

    #[inline]
    pub fn status(&self, buffer: &Buffer) -> BitFlags<BufferStatus> {
        self.slots[buffer.slot].status
    }

    #[inline]
    pub fn data(&self, buffer: &Buffer) -> &DataBlock {
        &self.slots[buffer.slot].data
    }

    /// 可变访问即视为修改
    #[inline]
    pub fn data_mut(&mut self, buffer: &Buffer) -> &mut DataBlock {
        let slot = &mut self.slots[buffer.slot];
        slot.status.insert(BufferStatus::Modified);
        &mut slot.data
    }

    /// 载入块、读取、归还
    pub fn map<V>(&mut self, block_id: u32, f: impl FnOnce(&DataBlock) -> V) -> Result<V> {
        let buffer = self.read(block_id)?;
        let value = f(self.data(&buffer));
        self.release(buffer);
        Ok(value)
    }

    /// 载入块、修改、归还
    pub fn map_mut<V>(&mut self, block_id: u32, f: impl FnOnce(&mut DataBlock) -> V) -> Result<V> {
        let buffer = self.read(block_id)?;
        let value = f(self.data_mut(&buffer));
        self.release(buffer);
        Ok(value)
    }

    /// 整块覆写：不读盘，从全零内容开始修改
    pub fn overwrite<V>(
        &mut self,
        block_id: u32,
        f: impl FnOnce(&mut DataBlock) -> V,
    ) -> Result<V> {
        let buffer = self.acquire(block_id)?;
        let slot = &mut self.slots[buffer.slot];
        slot.data.fill(0);
        slot.status.insert(BufferStatus::Valid | BufferStatus::Modified);
        let value = f(&mut *slot.data);
        self.release(buffer);
        Ok(value)
    }

    /// 写回全部脏块，缓存内容保持不变
    pub fn sync_all(&mut self) -> Result<()> {
        (0..self.slots.len()).try_for_each(|slot| self.write_back(slot))
    }

    /// 写回全部脏块并清空所有槽位，仅在卸载时使用
    pub fn flush_and_reset(&mut self) -> Result<()> {
        for index in 0..self.slots.len() {
            if self.slots[index].status.contains(BufferStatus::Occupied) {
                log::warn!("buffer {index} is still checked out on reset");
            }
            self.write_back(index)?;
            self.slots[index] = Slot::empty();
        }
        self.clock = 0;
        Ok(())
    }
}

impl BlockCache {
    fn check(&self, block_id: u32) -> Result<()> {
        if block_id < self.total_blocks {
            Ok(())
        } else {
            log::warn!("block {block_id} is out of range");
            Err(Error::OutOfRange)
        }
    }

    fn write_back(&mut self, index: usize) -> Result<()> {
        let slot = &mut self.slots[index];

        if let Some(block_id) = slot.block_id {
            if slot
                .status
                .contains(BufferStatus::Modified | BufferStatus::Valid)
            {
                self.block_device
                    .write_block(block_id as usize, &slot.data[..])
                    .map_err(|err| {
                        log::error!("failed to write block {block_id}: {err}");
                        Error::Io
                    })?;
                log::trace!("write back block {block_id}");
            }
        }
        slot.status.remove(BufferStatus::Modified);

        Ok(())
    }
}

impl Slot {
    fn empty() -> Self {
        Self {
            block_id: None,
            status: BitFlags::empty(),
            last_use: 0,
            data: Box::new([0; BLOCK_SIZE]),
        }
    }
}

impl fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("total_blocks", &self.total_blocks)
            .field(
                "slots",
                &self
                    .slots
                    .iter()
                    .map(|slot| (slot.block_id, slot.status))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use block_dev::{BlockDevice, RamDisk};

    use super::*;

    fn cache(blocks: u32, capacity: usize) -> (Arc<RamDisk>, BlockCache) {
        let disk = Arc::new(RamDisk::new(blocks as usize * BLOCK_SIZE));
        let cache = BlockCache::new(disk.clone(), blocks, capacity);
        (disk, cache)
    }

    #[test]
    fn resident_block_is_not_read_twice() {
        let (disk, mut cache) = cache(8, 1);

        let buffer = cache.read(3).unwrap();
        assert!(cache.status(&buffer).contains(BufferStatus::Valid));
        cache.release(buffer);
        let buffer = cache.read(3).unwrap();
        cache.release(buffer);

        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn occupied_buffer_cannot_be_acquired() {
        let (disk, mut cache) = cache(8, 1);

        let held = cache.read(3).unwrap();
        cache.data_mut(&held)[0] = 1;
        assert_eq!(cache.acquire(4), Err(Error::AlreadyOccupied));
        assert_eq!(cache.acquire(3), Err(Error::AlreadyOccupied));
        assert_eq!(disk.writes(), 0);
        assert!(cache.status(&held).contains(BufferStatus::Modified));

        cache.release(held);
        let other = cache.acquire(4).unwrap();
        assert_eq!(other.block_id(), 4);
        cache.release(other);
        // 换出时写回了块3
        assert_eq!(disk.writes(), 1);
    }

    #[test]
    fn clean_or_unloaded_buffer_is_not_written() {
        let (disk, mut cache) = cache(8, 2);

        let clean = cache.read(5).unwrap();
        cache.write(&clean).unwrap();
        cache.release(clean);

        // 未载入的内容即使被改过也不写
        let unloaded = cache.acquire(6).unwrap();
        cache.data_mut(&unloaded)[0] = 0xff;
        cache.write(&unloaded).unwrap();
        assert!(!cache.status(&unloaded).contains(BufferStatus::Modified));
        cache.release(unloaded);

        assert_eq!(disk.writes(), 0);
    }

    #[test]
    fn dirty_block_is_written_back_on_eviction() {
        let (disk, mut cache) = cache(8, 1);

        cache.map_mut(2, |data| data.fill(9)).unwrap();
        assert_eq!(disk.writes(), 0);
        cache.map(3, |_| ()).unwrap();
        assert_eq!(disk.writes(), 1);
        disk.with_raw(|raw| assert!(raw[2 * BLOCK_SIZE..3 * BLOCK_SIZE].iter().all(|&b| b == 9)));
    }

    #[test]
    fn least_recently_used_slot_is_evicted() {
        let (disk, mut cache) = cache(8, 2);

        cache.map(1, |_| ()).unwrap();
        cache.map(2, |_| ()).unwrap();
        cache.map(1, |_| ()).unwrap();
        cache.map(3, |_| ()).unwrap();
        assert_eq!(disk.reads(), 3);

        // 块1仍然驻留，块2已被换出
        cache.map(1, |_| ()).unwrap();
        assert_eq!(disk.reads(), 3);
        cache.map(2, |_| ()).unwrap();
        assert_eq!(disk.reads(), 4);
    }

    #[test]
    fn block_beyond_volume_is_rejected() {
        let (_, mut cache) = cache(8, 1);
        assert_eq!(cache.read(8), Err(Error::OutOfRange));
        assert_eq!(cache.acquire(100), Err(Error::OutOfRange));
    }

    #[test]
    fn overwrite_skips_the_device_read() {
        let (disk, mut cache) = cache(8, 1);
        disk.write_block(4, &[0xaa; BLOCK_SIZE]).unwrap();

        cache.overwrite(4, |data| data[..2].copy_from_slice(&[1, 2])).unwrap();
        let head = cache.map(4, |data| [data[0], data[1], data[2]]).unwrap();

        assert_eq!(head, [1, 2, 0]);
        assert_eq!(disk.reads(), 0);
    }

    #[test]
    fn flush_and_reset_empties_every_slot() {
        let (disk, mut cache) = cache(8, 2);

        cache.map_mut(1, |data| data[0] = 1).unwrap();
        cache.map_mut(2, |data| data[0] = 2).unwrap();
        cache.flush_and_reset().unwrap();
        assert_eq!(disk.writes(), 2);

        // 清空后需要重新读盘
        assert_eq!(cache.map(1, |data| data[0]).unwrap(), 1);
        assert_eq!(disk.reads(), 1);
    }
}
