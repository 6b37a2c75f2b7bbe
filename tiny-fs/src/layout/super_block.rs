use super::{DiskInode, FreeList, InodeId, TierLayout, read_u32, write_u32};
use crate::{
    BLOCK_SIZE, DataBlock, Error, INDEX_SIZE, INODE_INDEX_COUNT, MAGIC, NUM_SUPER_BLOCKS,
    Result,
};

/// 每个块存放的 inode 记录数
pub(crate) const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / DiskInode::SIZE) as u32;

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位其它区域；
/// - 记录两条空闲链表的游标，是空闲空间的唯一账本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    /// 文件系统占据块数
    pub num_blocks: u32,
    pub num_inodes: u32,
    pub root: InodeId,
    pub inode_free: FreeList<INODE_INDEX_COUNT>,
    pub block_free: FreeList<INDEX_SIZE>,
    pub layout: TierLayout,
}

impl SuperBlock {
    const NUM_BLOCKS: usize = 4;
    const NUM_INODES: usize = 8;
    const ROOT: usize = 12;
    const INODE_FREE_PTR: usize = 16;
    const INODE_FREE_COUNT: usize = 20;
    const BLOCK_FREE_PTR: usize = 24;
    const BLOCK_FREE_COUNT: usize = 28;
    const LAYOUT: usize = 32;

    /// 两条空闲链表都为空的新超级块
    pub fn new(num_blocks: u32, num_inodes: u32, layout: TierLayout) -> Self {
        Self {
            num_blocks,
            num_inodes,
            root: InodeId::ROOT,
            inode_free: FreeList::EXHAUSTED,
            block_free: FreeList::EXHAUSTED,
            layout,
        }
    }

    /// inode 区域占据的块数
    #[inline]
    pub fn inode_blocks(&self) -> u32 {
        self.num_inodes.div_ceil(INODES_PER_BLOCK)
    }

    /// 第一个数据块的编号
    #[inline]
    pub fn first_data_block(&self) -> u32 {
        NUM_SUPER_BLOCKS + self.inode_blocks()
    }

    #[inline]
    pub fn is_data_block(&self, block_id: u32) -> bool {
        (self.first_data_block()..self.num_blocks).contains(&block_id)
    }

    #[inline]
    pub fn is_valid_inode(&self, id: InodeId) -> bool {
        (1..=self.num_inodes).contains(&id.get())
    }

    /// inode 记录所在的块号与块内字节偏移
    #[inline]
    pub fn inode_position(&self, id: InodeId) -> (u32, usize) {
        let index = id.get() - 1;
        (
            NUM_SUPER_BLOCKS + index / INODES_PER_BLOCK,
            (index % INODES_PER_BLOCK) as usize * DiskInode::SIZE,
        )
    }

    pub fn decode(block: &DataBlock) -> Result<Self> {
        let magic = read_u32(block, 0);
        if magic != MAGIC {
            log::warn!("bad magic {magic:#x}");
            return Err(Error::InvalidVolume);
        }

        let mut counts = [0; TierLayout::DEGREES];
        counts.copy_from_slice(&block[Self::LAYOUT..Self::LAYOUT + TierLayout::DEGREES]);

        let super_block = Self {
            num_blocks: read_u32(block, Self::NUM_BLOCKS),
            num_inodes: read_u32(block, Self::NUM_INODES),
            root: InodeId::new(read_u32(block, Self::ROOT)),
            inode_free: FreeList {
                head: read_u32(block, Self::INODE_FREE_PTR),
                count: read_u32(block, Self::INODE_FREE_COUNT),
            },
            block_free: FreeList {
                head: read_u32(block, Self::BLOCK_FREE_PTR),
                count: read_u32(block, Self::BLOCK_FREE_COUNT),
            },
            layout: TierLayout::new(counts)?,
        };

        if super_block.first_data_block() >= super_block.num_blocks
            || !super_block.is_valid_inode(super_block.root)
        {
            log::warn!("inconsistent geometry: {super_block:?}");
            return Err(Error::InvalidVolume);
        }

        Ok(super_block)
    }

    pub fn encode(&self, block: &mut DataBlock) {
        block.fill(0);
        write_u32(block, 0, MAGIC);
        write_u32(block, Self::NUM_BLOCKS, self.num_blocks);
        write_u32(block, Self::NUM_INODES, self.num_inodes);
        write_u32(block, Self::ROOT, self.root.get());
        write_u32(block, Self::INODE_FREE_PTR, self.inode_free.head);
        write_u32(block, Self::INODE_FREE_COUNT, self.inode_free.count);
        write_u32(block, Self::BLOCK_FREE_PTR, self.block_free.head);
        write_u32(block, Self::BLOCK_FREE_COUNT, self.block_free.count);
        block[Self::LAYOUT..Self::LAYOUT + TierLayout::DEGREES]
            .copy_from_slice(&self.layout.counts());
    }
}
