#![no_std]

extern crate alloc;

/* tiny-fs 的整体架构，自上而下 */

// 文件层：路径解析、文件描述符表、读写与命名空间操作
mod file;
pub use file::{OpenFlag, Whence};

// 目录层：目录项的查找、增删
mod dir;

// 块映射层：逻辑偏移到物理块的翻译，索引树的生长与回收
mod bmap;
pub use bmap::BlockMap;

// 索引节点层：活跃 inode 表与 inode 空闲链表
mod inode_table;
pub use inode_table::{InodeHandle, InodeStatus};

// 磁盘块分配层：块空闲链表
mod balloc;

// 文件系统会话：持有超级块、缓冲区、inode 表
mod tfs;
pub use tfs::{FormatOptions, MountOptions, TinyFileSystem};

// 槽位编码：普通文件索引块内的槽位混淆
mod encode;
pub use encode::{FileKey, Identity, KEY_SIZE, SlotEncoder, XorFold};

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;
pub use layout::{
    DirEntry, DiskInode, FreeList, InodeId, InodeKind, NAME_MAX_LEN, Permission, SuperBlock,
    TierLayout, TierPosition,
};

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;
pub use block_cache::{BlockCache, Buffer, BufferStatus};

pub use block_dev::BlockDevice;
pub use vfs::{Error, Stat, StatFs};

pub type Result<T> = core::result::Result<T, Error>;

pub const MAGIC: u32 = 0x7469_6e79;
pub const BLOCK_SIZE: usize = 4096;
/// 块编号的字节数
pub const BLOCK_NO_SIZE: usize = 4;
/// 一个索引块可容纳的块编号个数
pub const INDEX_SIZE: usize = BLOCK_SIZE / BLOCK_NO_SIZE;
/// 超级块占据的块数
pub const NUM_SUPER_BLOCKS: u32 = 1;
/// 每个 inode 内第一级块引用的个数
pub const INODE_INDEX_COUNT: usize = 8;
/// 活跃 inode 表的容量
pub const MAX_ACTIVE_INODES: usize = 16;
/// 同时打开的文件数上限
pub const MAX_OPEN_FILES: usize = 10;
/// 根目录的 inode 号
pub const ROOT_INODE: u32 = 1;

pub type DataBlock = [u8; BLOCK_SIZE];
