//! # 文件系统会话层
//!
//! 构建出磁盘的布局并使用。
//!
//! [`TinyFileSystem`] 持有超级块、缓冲区、活跃 inode 表与文件描述符表，
//! 其余各层都以它的方法的形式实现。一个卷同一时刻只应有一个会话，
//! 会话本身由 [`spin::Mutex`] 保护。

use alloc::sync::Arc;

use block_dev::BlockDevice;
use spin::Mutex;
use vfs::StatFs;

use crate::block_cache::BlockCache;
use crate::encode::{SlotEncoder, XorFold};
use crate::file::OpenFile;
use crate::inode_table::{InodeHandle, InodeTable};
use crate::layout::{
    DirEntry, DiskInode, FreeList, InodeId, InodeKind, Permission, SuperBlock, TierLayout,
};
use crate::{BLOCK_SIZE, Error, INDEX_SIZE, INODE_INDEX_COUNT, MAX_OPEN_FILES, Result};

/// 格式化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// 卷的总块数，包括超级块与 inode 区域
    pub total_blocks: u32,
    /// inode 个数
    pub inodes: u32,
    pub layout: TierLayout,
}

/// 挂载参数
#[derive(Clone)]
pub struct MountOptions {
    /// 缓冲区槽位数
    pub cache_slots: usize,
    pub encoder: Arc<dyn SlotEncoder>,
}

pub struct TinyFileSystem {
    pub(crate) cache: BlockCache,
    pub(crate) super_block: SuperBlock,
    pub(crate) inodes: InodeTable,
    pub(crate) files: [Option<OpenFile>; MAX_OPEN_FILES],
    pub(crate) encoder: Arc<dyn SlotEncoder>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            total_blocks: 4096,
            inodes: 256,
            layout: TierLayout::default(),
        }
    }
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            cache_slots: 1,
            encoder: Arc::new(XorFold),
        }
    }
}

impl TinyFileSystem {
    pub fn format(
        block_device: Arc<dyn BlockDevice>,
        options: FormatOptions,
    ) -> Result<Arc<Mutex<Self>>> {
        Self::format_with(block_device, options, MountOptions::default())
    }

    /// 在设备上建立空卷：只有根目录，其余块与 inode 全在空闲链表上
    pub fn format_with(
        block_device: Arc<dyn BlockDevice>,
        options: FormatOptions,
        mount: MountOptions,
    ) -> Result<Arc<Mutex<Self>>> {
        let FormatOptions {
            total_blocks,
            inodes,
            layout,
        } = options;

        let super_block = SuperBlock::new(total_blocks, inodes, layout);
        if inodes == 0 || super_block.first_data_block() >= total_blocks {
            log::warn!("cannot format {total_blocks} blocks with {inodes} inodes");
            return Err(Error::InvalidVolume);
        }

        let first_data_block = super_block.first_data_block();
        let mut tfs = Self::new(block_device, super_block, mount);

        for block_id in 1..first_data_block {
            tfs.cache.overwrite(block_id, |_| ())?;
        }
        // 倒序释放，分配时从小号开始
        for block_id in (first_data_block..total_blocks).rev() {
            tfs.bfree(block_id)?;
        }
        for id in (2..=inodes).rev() {
            tfs.ifree(InodeId::new(id))?;
        }

        let root = tfs.iget(InodeId::ROOT)?;
        let result = tfs.init_root(&root);
        tfs.iput(root)?;
        result?;
        tfs.sync()?;

        log::info!(
            "formatted {total_blocks} blocks, {inodes} inodes, layout {:?}",
            layout.counts()
        );

        Ok(Arc::new(Mutex::new(tfs)))
    }

    pub fn open(
        block_device: Arc<dyn BlockDevice>,
        mount: MountOptions,
    ) -> Result<Arc<Mutex<Self>>> {
        let mut block = [0; BLOCK_SIZE];
        block_device.read_block(0, &mut block).map_err(|err| {
            log::error!("failed to read super block: {err}");
            Error::Io
        })?;
        let super_block = SuperBlock::decode(&block)?;
        log::info!(
            "mounted {} blocks, {} inodes",
            super_block.num_blocks,
            super_block.num_inodes
        );

        Ok(Arc::new(Mutex::new(Self::new(
            block_device,
            super_block,
            mount,
        ))))
    }

    /// 超级块写入 0 号块，并写回全部脏块
    pub fn sync(&mut self) -> Result<()> {
        let super_block = &self.super_block;
        self.cache
            .overwrite(0, |block| super_block.encode(block))?;
        self.cache.sync_all()
    }

    /// 关闭全部文件并把一切写回磁盘
    pub fn unmount(&mut self) -> Result<()> {
        for fd in 0..MAX_OPEN_FILES {
            if self.files[fd].is_some() {
                self.close(fd)?;
            }
        }
        self.sync()?;
        self.cache.flush_and_reset()
    }

    /// 空闲数由遍历两条空闲链表得出
    pub fn statfs(&mut self) -> Result<StatFs> {
        let free_blocks = self.count_free_blocks()?;
        let free_inodes = self.count_free_inodes()?;

        Ok(StatFs {
            block_size: BLOCK_SIZE as u64,
            total_blocks: self.super_block.num_blocks as u64,
            free_blocks,
            total_inodes: self.super_block.num_inodes as u64,
            free_inodes,
        })
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    #[inline]
    pub fn layout(&self) -> TierLayout {
        self.super_block.layout
    }

    #[inline]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }
}

impl TinyFileSystem {
    fn new(
        block_device: Arc<dyn BlockDevice>,
        super_block: SuperBlock,
        mount: MountOptions,
    ) -> Self {
        Self {
            cache: BlockCache::new(block_device, super_block.num_blocks, mount.cache_slots),
            super_block,
            inodes: InodeTable::new(),
            files: Default::default(),
            encoder: mount.encoder,
        }
    }

    fn init_root(&mut self, root: &InodeHandle) -> Result<()> {
        *self.disk_inode_mut(root) =
            DiskInode::new(InodeKind::Directory, Permission::from_mode(0o755));
        let id = root.id();
        self.add_dir_entry(root, &DirEntry::new(".", id, InodeKind::Directory)?)?;
        self.add_dir_entry(root, &DirEntry::new("..", id, InodeKind::Directory)?)
    }

    fn count_free_blocks(&mut self) -> Result<u64> {
        let FreeList { head, count } = self.super_block.block_free;
        let mut total = 0;
        let mut node = head;
        let mut units = count as u64;

        while node != 0 {
            if !self.super_block.is_data_block(node) || total >= self.super_block.num_blocks as u64
            {
                log::error!("block free list runs into {node}");
                return Err(Error::CorruptFreeList);
            }
            total += units;
            node = self.next_free_node(node)?;
            units = INDEX_SIZE as u64;
        }

        Ok(total)
    }

    fn count_free_inodes(&mut self) -> Result<u64> {
        let FreeList { head, count } = self.super_block.inode_free;
        let mut total = 0;
        let mut node = head;
        let mut units = count as u64;

        while node != 0 {
            let id = InodeId::new(node);
            if !self.super_block.is_valid_inode(id) || total >= self.super_block.num_inodes as u64 {
                log::error!("inode free list runs into {id}");
                return Err(Error::CorruptFreeList);
            }
            total += units;
            node = self.read_disk_inode(id)?.index[INODE_INDEX_COUNT - 1];
            units = INODE_INDEX_COUNT as u64;
        }

        Ok(total)
    }
}

impl Drop for TinyFileSystem {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            log::error!("failed to sync on drop: {err}");
        }
    }
}
