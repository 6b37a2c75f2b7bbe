//! # 目录层
//!
//! 目录的内容是定长目录项的数组，inode 号为 0 的项是空位。
//! 查找与删除都是线性扫描；新增时优先复用第一个空位，否则追加到末尾。

use alloc::vec::Vec;

use crate::TinyFileSystem;
use crate::inode_table::InodeHandle;
use crate::layout::{DirEntry, NAME_MAX_LEN};
use crate::{BLOCK_SIZE, Error, Result};

impl TinyFileSystem {
    /// 按名字查找，返回目录项及其在目录中的字节偏移
    pub fn dir_lookup(
        &mut self,
        dir: &InodeHandle,
        name: &str,
    ) -> Result<Option<(DirEntry, u64)>> {
        Ok(self
            .scan_dir(dir)?
            .into_iter()
            .find(|(_, entry)| !entry.is_free() && entry.name() == name)
            .map(|(offset, entry)| (entry, offset)))
    }

    pub fn add_dir_entry(&mut self, dir: &InodeHandle, entry: &DirEntry) -> Result<()> {
        let slots = self.scan_dir(dir)?;
        if slots
            .iter()
            .any(|(_, existing)| !existing.is_free() && existing.name() == entry.name())
        {
            log::warn!("{} already exists in directory {}", entry.name(), dir.id());
            return Err(Error::AlreadyExists);
        }

        let size = self.disk_inode(dir).size;
        let offset = match slots.iter().find(|(_, existing)| existing.is_free()) {
            Some(&(offset, _)) => offset,
            None => size,
        };
        let end = offset + DirEntry::SIZE as u64;
        if end > self.super_block.layout.max_file_size() {
            log::warn!("directory {} is full", dir.id());
            return Err(Error::NoSpace);
        }

        let map = self.bmap(dir, offset)?;
        let block = if map.block != 0 {
            map.block
        } else {
            let fresh = self.balloc()?;
            if let Err(err) =
                self.add_physical_block(dir, offset / BLOCK_SIZE as u64, fresh, false)
            {
                self.bfree(fresh)?;
                return Err(err);
            }
            fresh
        };

        self.cache.map_mut(block, |data| {
            entry.encode(&mut data[map.offset..map.offset + DirEntry::SIZE]);
        })?;
        if end > size {
            self.disk_inode_mut(dir).size = end;
        }
        log::debug!(
            "add {} -> {} to directory {}",
            entry.name(),
            entry.inode(),
            dir.id()
        );

        Ok(())
    }

    /// 清空 `offset` 处的目录项
    pub fn rem_dir_entry(&mut self, dir: &InodeHandle, offset: u64) -> Result<()> {
        self.ensure_dir(dir)?;

        let map = self.bmap(dir, offset)?;
        if map.block == 0 || map.live < DirEntry::SIZE {
            log::warn!("no entry at {offset} of directory {}", dir.id());
            return Err(Error::NotFound);
        }

        self.cache.map_mut(map.block, |data| {
            data[map.offset..map.offset + DirEntry::SIZE].fill(0);
        })?;
        log::debug!("remove entry at {offset} of directory {}", dir.id());

        Ok(())
    }

    /// 目录中全部在用的目录项
    pub fn dir_entries(&mut self, dir: &InodeHandle) -> Result<Vec<DirEntry>> {
        Ok(self
            .scan_dir(dir)?
            .into_iter()
            .filter_map(|(_, entry)| (!entry.is_free()).then_some(entry))
            .collect())
    }

    /// 解析绝对路径，返回已上锁的 inode
    pub fn namei(&mut self, path: &str) -> Result<InodeHandle> {
        if !path.starts_with('/') {
            log::warn!("{path} is not an absolute path");
            return Err(Error::InvalidPath);
        }

        let mut current = self.iget(self.super_block.root)?;
        for name in path.split('/').filter(|name| !name.is_empty() && *name != ".") {
            let next = if name.len() > NAME_MAX_LEN {
                Err(Error::NameTooLong)
            } else {
                self.dir_lookup(&current, name).and_then(|found| {
                    found
                        .map(|(entry, _)| entry.inode())
                        .ok_or(Error::NotFound)
                })
            };
            // 先放下当前目录再取下一级，`..` 才不会撞上自己的锁
            self.iput(current)?;
            current = self.iget(next?)?;
        }

        Ok(current)
    }
}

impl TinyFileSystem {
    pub(crate) fn ensure_dir(&self, dir: &InodeHandle) -> Result<()> {
        if self.disk_inode(dir).is_dir() {
            Ok(())
        } else {
            Err(Error::NotADirectory)
        }
    }

    /// 每个已映射的目录项槽位及其偏移，包括空位
    pub(crate) fn scan_dir(&mut self, dir: &InodeHandle) -> Result<Vec<(u64, DirEntry)>> {
        self.ensure_dir(dir)?;

        let size = self.disk_inode(dir).size;
        let mut slots = Vec::new();
        let mut offset = 0;
        while offset < size {
            let map = self.bmap(dir, offset)?;
            if map.block != 0 {
                self.cache.map(map.block, |data| {
                    for at in (map.offset..map.offset + map.live).step_by(DirEntry::SIZE) {
                        if at + DirEntry::SIZE <= BLOCK_SIZE {
                            let entry = DirEntry::decode(&data[at..at + DirEntry::SIZE]);
                            slots.push((offset + (at - map.offset) as u64, entry));
                        }
                    }
                })?;
            }
            offset += map.live as u64;
        }

        Ok(slots)
    }
}

/// 把路径拆成父目录与最后一个名字
pub(crate) fn split_parent(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath);
    }

    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/').ok_or(Error::InvalidPath)?;
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidPath);
    }
    if name.len() > NAME_MAX_LEN {
        return Err(Error::NameTooLong);
    }

    Ok((if parent.is_empty() { "/" } else { parent }, name))
}
