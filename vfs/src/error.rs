use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 块号或 inode 号超出卷的范围
    OutOfRange,
    /// 空闲链表耗尽，或活跃 inode 表已满
    NoSpace,
    /// inode 已被当前调用链锁住
    AlreadyLocked,
    /// 缓冲区已被占用
    AlreadyOccupied,
    /// 偏移为负或超出最大文件大小
    InvalidOffset,
    /// 空闲链表不一致，不可重试
    CorruptFreeList,
    /// 索引槽位已映射到一个有效块
    AlreadyMapped,
    /// 块设备读写失败
    Io,
    /// 超级块无效或卷的几何参数不合法
    InvalidVolume,
    AlreadyExists,
    NotFound,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    NameTooLong,
    InvalidPath,
    BadDescriptor,
    PermissionDenied,
    TooManyOpenFiles,
}

impl Error {
    /// 致命错误意味着盘上的空闲空间记录已经损坏
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CorruptFreeList)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::OutOfRange => "block or inode number out of range",
            Error::NoSpace => "no space left",
            Error::AlreadyLocked => "inode is locked",
            Error::AlreadyOccupied => "buffer is occupied",
            Error::InvalidOffset => "invalid file offset",
            Error::CorruptFreeList => "free list is corrupted",
            Error::AlreadyMapped => "index slot already mapped",
            Error::Io => "device I/O error",
            Error::InvalidVolume => "invalid volume",
            Error::AlreadyExists => "already exists",
            Error::NotFound => "not found",
            Error::IsADirectory => "is a directory",
            Error::NotADirectory => "not a directory",
            Error::DirectoryNotEmpty => "directory not empty",
            Error::NameTooLong => "name too long",
            Error::InvalidPath => "invalid path",
            Error::BadDescriptor => "bad file descriptor",
            Error::PermissionDenied => "permission denied",
            Error::TooManyOpenFiles => "too many open files",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}
