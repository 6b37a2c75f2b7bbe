use crate::DirEntryType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Inode number
    pub inode: u64,
    pub mode: DirEntryType,
    /// Permission bits, `0o777` style
    pub permission: u16,
    /// Hard links
    pub links: u32,
    /// Optimal I/O block size
    pub block_size: u64,
    /// Occupying data blocks
    pub blocks: u64,
    /// File size
    pub size: u64,
}

/// 卷的使用情况
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
}
