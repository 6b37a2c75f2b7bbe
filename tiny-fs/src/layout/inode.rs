//! 磁盘上的索引节点
//!
//! 每条记录 64 字节，一个块存放 64 条，依次排在超级块之后。
//! 记录的 `index` 数组有两种用途：
//! - 在用时，按 [`TierLayout`](super::TierLayout) 存放第一级块引用；
//! - 空闲时，作为索引节点空闲链表的结点。
//!
//! 全零的记录就是规范的“未使用”记录。

use core::fmt;

use derive_more::{From, Into};
use enumflags2::{BitFlags, bitflags};

use super::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use crate::{Error, INODE_INDEX_COUNT, ROOT_INODE, Result};

/// inode 号，从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct InodeId(u32);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InodeKind {
    #[default]
    Unused = 0,
    Directory = 1,
    File = 2,
}

/// 权限位，与 Unix 的 0o777 布局一致
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    OtherExec = 0o001,
    OtherWrite = 0o002,
    OtherRead = 0o004,
    GroupExec = 0o010,
    GroupWrite = 0o020,
    GroupRead = 0o040,
    OwnerExec = 0o100,
    OwnerWrite = 0o200,
    OwnerRead = 0o400,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiskInode {
    /// 文件的逻辑大小
    pub size: u64,
    /// 已分配的数据块占据的字节数
    pub size_on_disk: u32,
    /// 第一级块引用
    pub index: [u32; INODE_INDEX_COUNT],
    /// 硬链接个数
    pub links: u16,
    pub kind: InodeKind,
    pub permission: BitFlags<Permission>,
    /// 保留给上层的保护位，本层只负责存取
    pub protection: u16,
}

impl InodeId {
    pub const ROOT: Self = Self(ROOT_INODE);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl InodeKind {
    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Unused),
            1 => Some(Self::Directory),
            2 => Some(Self::File),
            _ => None,
        }
    }
}

impl Permission {
    /// 从 `0o644` 这样的模式数中取出权限位
    #[inline]
    pub fn from_mode(mode: u16) -> BitFlags<Permission> {
        BitFlags::from_bits_truncate(mode)
    }
}

impl DiskInode {
    /// 磁盘记录大小
    pub const SIZE: usize = 64;

    pub const UNUSED: Self = Self {
        size: 0,
        size_on_disk: 0,
        index: [0; INODE_INDEX_COUNT],
        links: 0,
        kind: InodeKind::Unused,
        permission: BitFlags::EMPTY,
        protection: 0,
    };

    const SIZE_ON_DISK: usize = 8;
    const INDEX: usize = 12;
    const LINKS: usize = Self::INDEX + INODE_INDEX_COUNT * 4;
    const KIND: usize = Self::LINKS + 2;
    const PERMISSION: usize = Self::KIND + 2;
    const PROTECTION: usize = Self::PERMISSION + 2;

    pub fn new(kind: InodeKind, permission: BitFlags<Permission>) -> Self {
        Self {
            kind,
            permission,
            links: 1,
            ..Self::UNUSED
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == InodeKind::File
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.kind == InodeKind::Unused
    }

    /// 从记录所在的 64 字节解码，类型标记无法识别时视为卷损坏
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw_kind = read_u16(bytes, Self::KIND);
        let kind = InodeKind::from_raw(raw_kind).ok_or_else(|| {
            log::error!("inode record has unknown kind {raw_kind}");
            Error::InvalidVolume
        })?;

        let mut index = [0; INODE_INDEX_COUNT];
        for (slot, value) in index.iter_mut().enumerate() {
            *value = read_u32(bytes, Self::INDEX + slot * 4);
        }

        Ok(Self {
            size: read_u64(bytes, 0),
            size_on_disk: read_u32(bytes, Self::SIZE_ON_DISK),
            index,
            links: read_u16(bytes, Self::LINKS),
            kind,
            permission: Permission::from_mode(read_u16(bytes, Self::PERMISSION)),
            protection: read_u16(bytes, Self::PROTECTION),
        })
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        bytes[..Self::SIZE].fill(0);
        write_u64(bytes, 0, self.size);
        write_u32(bytes, Self::SIZE_ON_DISK, self.size_on_disk);
        for (slot, &value) in self.index.iter().enumerate() {
            write_u32(bytes, Self::INDEX + slot * 4, value);
        }
        write_u16(bytes, Self::LINKS, self.links);
        write_u16(bytes, Self::KIND, self.kind as u16);
        write_u16(bytes, Self::PERMISSION, self.permission.bits());
        write_u16(bytes, Self::PROTECTION, self.protection);
    }
}
