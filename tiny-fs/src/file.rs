//! # 文件层
//!
//! 面向调用者的接口：以路径操作命名空间，以文件描述符读写文件。
//!
//! 打开的文件持有 inode 的一份引用，但不持锁；
//! 每次读写期间临时上锁，结束即解锁。
//! 文件被删除后仍可通过已打开的描述符访问，最后一次关闭时才真正回收。

use alloc::string::String;
use alloc::vec::Vec;

use enumflags2::{BitFlags, bitflags};
use vfs::{DirEntryType, Stat};

use crate::TinyFileSystem;
use crate::dir::split_parent;
use crate::encode::FileKey;
use crate::inode_table::InodeHandle;
use crate::layout::{DirEntry, DiskInode, InodeKind, Permission};
use crate::{BLOCK_SIZE, Error, MAX_OPEN_FILES, Result};

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    Read = 0b00001,
    Write = 0b00010,
    /// 每次写之前先移到文件尾
    Append = 0b00100,
    /// 打开时清空文件，需同时可写
    Truncate = 0b01000,
    /// 不存在时创建
    Create = 0b10000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

#[derive(Debug)]
pub(crate) struct OpenFile {
    inode: InodeHandle,
    offset: u64,
    flags: BitFlags<OpenFlag>,
}

impl TinyFileSystem {
    /// 打开文件，返回文件描述符
    pub fn open_file(
        &mut self,
        path: &str,
        flags: BitFlags<OpenFlag>,
        permission: BitFlags<Permission>,
    ) -> Result<usize> {
        if flags.contains(OpenFlag::Truncate) && !flags.contains(OpenFlag::Write) {
            log::warn!("{flags:?} truncates without writing");
            return Err(Error::PermissionDenied);
        }

        let fd = self
            .files
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| {
                log::warn!("all {MAX_OPEN_FILES} descriptors are in use");
                Error::TooManyOpenFiles
            })?;

        let inode = match self.namei(path) {
            Ok(inode) => inode,
            Err(Error::NotFound) if flags.contains(OpenFlag::Create) => {
                // 新文件的权限先于创建检查，拒绝时不留下名字
                check_access(permission, flags)?;
                self.create_node(path, InodeKind::File, permission)?
            }
            Err(err) => return Err(err),
        };

        if let Err(err) = self.prepare_open(&inode, flags) {
            self.iput(inode)?;
            return Err(err);
        }

        self.unlock(&inode);
        log::debug!("open {path} as fd {fd} with {flags:?}");
        self.files[fd] = Some(OpenFile {
            inode,
            offset: 0,
            flags,
        });

        Ok(fd)
    }

    /// 打开文件并设置密钥，此后该文件索引块内的槽位按密钥编码
    pub fn open_with_key(
        &mut self,
        path: &str,
        flags: BitFlags<OpenFlag>,
        permission: BitFlags<Permission>,
        key: FileKey,
    ) -> Result<usize> {
        let fd = self.open_file(path, flags, permission)?;
        if let Some(file) = &self.files[fd] {
            self.inodes.get_mut(&file.inode).key = key;
        }
        Ok(fd)
    }

    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.take_file(fd)?;
        let result = self.read_file(&mut file, buf);
        self.files[fd] = Some(file);
        result
    }

    /// 尽力写入；中途失败时返回已写入的字节数
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize> {
        let mut file = self.take_file(fd)?;
        let result = self.write_file(&mut file, buf);
        self.files[fd] = Some(file);
        result
    }

    pub fn seek(&mut self, fd: usize, offset: i64, whence: Whence) -> Result<u64> {
        let max = self.super_block.layout.max_file_size();
        let file = self
            .files
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(Error::BadDescriptor)?;

        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => file.offset,
            Whence::End => self.disk_inode(&file.inode).size,
        };
        let target = base
            .checked_add_signed(offset)
            .filter(|&target| target <= max)
            .ok_or_else(|| {
                log::warn!("seek to {base} + {offset} on fd {fd}");
                Error::InvalidOffset
            })?;

        if let Some(file) = self.files[fd].as_mut() {
            file.offset = target;
        }
        Ok(target)
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        let file = self.take_file(fd)?;
        if let Err(err) = self.lock(&file.inode) {
            self.files[fd] = Some(file);
            return Err(err);
        }
        log::debug!("close fd {fd}");
        self.iput(file.inode)
    }

    pub fn create(&mut self, path: &str, permission: BitFlags<Permission>) -> Result<()> {
        let inode = self.create_node(path, InodeKind::File, permission)?;
        self.iput(inode)
    }

    pub fn mkdir(&mut self, path: &str, permission: BitFlags<Permission>) -> Result<()> {
        let inode = self.create_node(path, InodeKind::Directory, permission)?;
        self.iput(inode)
    }

    /// 删除空目录
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.namei(parent_path)?;
        let result = self.rmdir_in(&parent, name);
        self.iput(parent)?;
        result
    }

    /// 为普通文件 `existing` 增加一个名字 `new`
    pub fn link(&mut self, existing: &str, new: &str) -> Result<()> {
        let (parent_path, name) = split_parent(new)?;
        let target = self.namei(existing)?;

        let result = if self.disk_inode(&target).is_dir() {
            Err(Error::IsADirectory)
        } else {
            self.link_into(&target, parent_path, name)
        };
        self.iput(target)?;
        result
    }

    /// 删除一个名字；最后一个名字消失且无人打开时回收文件
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.namei(parent_path)?;
        let result = self.unlink_in(&parent, name);
        self.iput(parent)?;
        result
    }

    pub fn stat(&mut self, path: &str) -> Result<Stat> {
        let inode = self.namei(path)?;
        let stat = self.stat_inode(&inode);
        self.iput(inode)?;
        Ok(stat)
    }

    /// 通过文件描述符获取元信息
    pub fn fstat(&self, fd: usize) -> Result<Stat> {
        let file = self
            .files
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(Error::BadDescriptor)?;
        Ok(self.stat_inode(&file.inode))
    }

    pub fn read_dir(&mut self, path: &str) -> Result<Vec<vfs::DirEntry>> {
        let dir = self.namei(path)?;
        let entries = self.dir_entries(&dir);
        self.iput(dir)?;

        Ok(entries?
            .into_iter()
            .map(|entry| vfs::DirEntry {
                inode: entry.inode().get() as u64,
                ty: match entry.kind() {
                    InodeKind::Directory => DirEntryType::Directory,
                    _ => DirEntryType::Regular,
                },
                name: String::from(entry.name()),
            })
            .collect())
    }
}

impl TinyFileSystem {
    fn take_file(&mut self, fd: usize) -> Result<OpenFile> {
        self.files
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or_else(|| {
                log::warn!("fd {fd} is not open");
                Error::BadDescriptor
            })
    }

    /// 在 `path` 处新建 inode，返回已上锁的句柄
    fn create_node(
        &mut self,
        path: &str,
        kind: InodeKind,
        permission: BitFlags<Permission>,
    ) -> Result<InodeHandle> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.namei(parent_path)?;
        let result = self.create_in(&parent, name, kind, permission);

        if let Err(err) = self.iput(parent) {
            if let Ok(child) = result {
                self.iput(child)?;
            }
            return Err(err);
        }
        result
    }

    fn create_in(
        &mut self,
        parent: &InodeHandle,
        name: &str,
        kind: InodeKind,
        permission: BitFlags<Permission>,
    ) -> Result<InodeHandle> {
        self.ensure_dir(parent)?;
        if self.dir_lookup(parent, name)?.is_some() {
            log::warn!("{name} already exists");
            return Err(Error::AlreadyExists);
        }

        let child = self.ialloc()?;
        *self.disk_inode_mut(&child) = DiskInode::new(kind, permission);

        match self.populate(parent, &child, name, kind) {
            Ok(()) => {
                log::debug!("create {name} as inode {}", child.id());
                Ok(child)
            }
            Err(err) => {
                // 链接数归零，释放时整个回收
                self.disk_inode_mut(&child).links = 0;
                self.iput(child)?;
                Err(err)
            }
        }
    }

    fn populate(
        &mut self,
        parent: &InodeHandle,
        child: &InodeHandle,
        name: &str,
        kind: InodeKind,
    ) -> Result<()> {
        let entry = DirEntry::new(name, child.id(), kind)?;
        if kind == InodeKind::Directory {
            self.add_dir_entry(child, &DirEntry::new(".", child.id(), kind)?)?;
            self.add_dir_entry(child, &DirEntry::new("..", parent.id(), kind)?)?;
        }
        self.add_dir_entry(parent, &entry)
    }

    fn prepare_open(&mut self, inode: &InodeHandle, flags: BitFlags<OpenFlag>) -> Result<()> {
        let disk = self.disk_inode(inode);
        if disk.is_dir() && flags.intersects(OpenFlag::Write | OpenFlag::Append | OpenFlag::Truncate)
        {
            return Err(Error::IsADirectory);
        }
        check_access(disk.permission, flags)?;

        if flags.contains(OpenFlag::Truncate) {
            self.free_all_blocks(inode)?;
            self.disk_inode_mut(inode).size = 0;
        }
        Ok(())
    }

    fn read_file(&mut self, file: &mut OpenFile, buf: &mut [u8]) -> Result<usize> {
        if !file.flags.contains(OpenFlag::Read) {
            return Err(Error::PermissionDenied);
        }

        self.lock(&file.inode)?;
        let result = self.copy_out(&file.inode, file.offset, buf);
        self.unlock(&file.inode);

        let read = result?;
        file.offset += read as u64;
        Ok(read)
    }

    fn copy_out(&mut self, inode: &InodeHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.disk_inode(inode).size;
        let mut done = 0;

        while done < buf.len() {
            let position = offset + done as u64;
            if position >= size {
                break;
            }
            let map = match self.bmap(inode, position) {
                Ok(map) => map,
                Err(err) if done > 0 => {
                    log::warn!("read stops after {done} bytes: {err}");
                    break;
                }
                Err(err) => return Err(err),
            };

            let len = map.live.min(buf.len() - done);
            let dest = &mut buf[done..done + len];
            if map.block == 0 {
                dest.fill(0);
            } else {
                let copied = self.cache.map(map.block, |data| {
                    dest.copy_from_slice(&data[map.offset..map.offset + len]);
                });
                if let Err(err) = copied {
                    if done == 0 {
                        return Err(err);
                    }
                    log::warn!("read stops after {done} bytes: {err}");
                    break;
                }
            }
            done += len;
        }

        Ok(done)
    }

    fn write_file(&mut self, file: &mut OpenFile, buf: &[u8]) -> Result<usize> {
        if !file.flags.contains(OpenFlag::Write) {
            return Err(Error::PermissionDenied);
        }

        self.lock(&file.inode)?;
        if file.flags.contains(OpenFlag::Append) {
            file.offset = self.disk_inode(&file.inode).size;
        }
        let result = self.copy_in(&file.inode, file.offset, buf);
        self.unlock(&file.inode);

        let written = result?;
        file.offset += written as u64;
        Ok(written)
    }

    fn copy_in(&mut self, inode: &InodeHandle, offset: u64, buf: &[u8]) -> Result<usize> {
        let max = self.super_block.layout.max_file_size();
        if offset >= max && !buf.is_empty() {
            return Err(Error::NoSpace);
        }
        let len = buf.len().min((max - offset.min(max)) as usize);
        let mut done = 0;

        while done < len {
            match self.write_block_at(inode, offset + done as u64, &buf[done..len]) {
                Ok(written) => done += written,
                Err(err) if done > 0 => {
                    log::warn!("write stops after {done} bytes: {err}");
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(done)
    }

    /// 写入 `position` 所在的块，返回写入的字节数
    fn write_block_at(&mut self, inode: &InodeHandle, position: u64, data: &[u8]) -> Result<usize> {
        let map = self.bmap(inode, position)?;
        let len = (BLOCK_SIZE - map.offset).min(data.len());

        let block = if map.block != 0 {
            map.block
        } else {
            let fresh = self.balloc()?;
            let logical = position / BLOCK_SIZE as u64;
            if let Err(err) = self.add_physical_block(inode, logical, fresh, false) {
                self.bfree(fresh)?;
                return Err(err);
            }
            fresh
        };

        self.cache.map_mut(block, |dest| {
            dest[map.offset..map.offset + len].copy_from_slice(&data[..len]);
        })?;

        let end = position + len as u64;
        if end > self.disk_inode(inode).size {
            self.disk_inode_mut(inode).size = end;
        }

        Ok(len)
    }

    fn rmdir_in(&mut self, parent: &InodeHandle, name: &str) -> Result<()> {
        let (entry, offset) = self.dir_lookup(parent, name)?.ok_or(Error::NotFound)?;
        if entry.inode() == self.super_block.root {
            return Err(Error::InvalidPath);
        }

        let dir = self.iget(entry.inode())?;
        let result = self.ensure_dir(&dir).and_then(|()| {
            let occupied = self
                .dir_entries(&dir)?
                .iter()
                .any(|entry| entry.name() != "." && entry.name() != "..");
            if occupied {
                Err(Error::DirectoryNotEmpty)
            } else {
                Ok(())
            }
        });
        let result = result.and_then(|()| self.rem_dir_entry(parent, offset));

        if result.is_ok() {
            self.disk_inode_mut(&dir).links = 0;
            log::debug!("rmdir {name}");
        }
        self.iput(dir)?;
        result
    }

    fn link_into(&mut self, target: &InodeHandle, parent_path: &str, name: &str) -> Result<()> {
        if self.disk_inode(target).links == u16::MAX {
            return Err(Error::NoSpace);
        }

        let parent = self.namei(parent_path)?;
        let result = DirEntry::new(name, target.id(), InodeKind::File)
            .and_then(|entry| self.add_dir_entry(&parent, &entry));
        self.iput(parent)?;
        result?;

        self.disk_inode_mut(target).links += 1;
        log::debug!("link {name} -> inode {}", target.id());
        Ok(())
    }

    fn unlink_in(&mut self, parent: &InodeHandle, name: &str) -> Result<()> {
        let (entry, offset) = self.dir_lookup(parent, name)?.ok_or(Error::NotFound)?;
        let child = self.iget(entry.inode())?;

        let result = if self.disk_inode(&child).is_dir() {
            Err(Error::IsADirectory)
        } else {
            self.rem_dir_entry(parent, offset)
        };
        if result.is_ok() {
            let disk = self.disk_inode_mut(&child);
            disk.links = disk.links.saturating_sub(1);
            log::debug!("unlink {name}, {} links left", disk.links);
        }
        self.iput(child)?;
        result
    }

    fn stat_inode(&self, inode: &InodeHandle) -> Stat {
        let disk = self.disk_inode(inode);
        Stat {
            inode: inode.id().get() as u64,
            mode: if disk.is_dir() {
                DirEntryType::Directory
            } else {
                DirEntryType::Regular
            },
            permission: disk.permission.bits(),
            links: disk.links as u32,
            block_size: BLOCK_SIZE as u64,
            blocks: (disk.size_on_disk as usize / BLOCK_SIZE) as u64,
            size: disk.size,
        }
    }
}

/// 只检查属主位
fn check_access(permission: BitFlags<Permission>, flags: BitFlags<OpenFlag>) -> Result<()> {
    if (flags.contains(OpenFlag::Read) && !permission.contains(Permission::OwnerRead))
        || (flags.contains(OpenFlag::Write) && !permission.contains(Permission::OwnerWrite))
    {
        log::warn!("permission {:o} denies {flags:?}", permission.bits());
        return Err(Error::PermissionDenied);
    }
    Ok(())
}
