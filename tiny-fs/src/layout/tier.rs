//! 索引的分级
//!
//! inode 的 [`INODE_INDEX_COUNT`] 个第一级引用按顺序分给四个级别：
//! - 直接：引用直接指向数据块
//! - 一级：引用指向一个索引块，索引块的每个编号指向数据块
//! - 二级：引用指向一个索引块，其每个编号指向一个一级索引块
//! - 三级：同理
//!
//! `d` 级的单个引用可寻址 `INDEX_SIZE^d * BLOCK_SIZE` 字节。

use core::str::FromStr;

use crate::{BLOCK_SIZE, Error, INDEX_SIZE, INODE_INDEX_COUNT, Result};

/// 四个级别各占多少个第一级引用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLayout {
    counts: [u8; TierLayout::DEGREES],
}

/// 偏移量在索引树中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPosition {
    /// 间接的级数
    pub degree: usize,
    /// 第一级引用在 inode 索引数组中的下标
    pub slot: usize,
    /// 该引用所辖范围内的字节偏移
    pub inner: u64,
}

impl Default for TierLayout {
    fn default() -> Self {
        Self {
            counts: [0, INODE_INDEX_COUNT as u8, 0, 0],
        }
    }
}

impl TierLayout {
    pub const DEGREES: usize = 4;

    pub fn new(counts: [u8; Self::DEGREES]) -> Result<Self> {
        let total: usize = counts.iter().map(|&count| count as usize).sum();
        if total == 0 || total > INODE_INDEX_COUNT {
            log::warn!("tier layout {counts:?} does not fit {INODE_INDEX_COUNT} references");
            return Err(Error::InvalidVolume);
        }
        Ok(Self { counts })
    }

    #[inline]
    pub fn counts(&self) -> [u8; Self::DEGREES] {
        self.counts
    }

    /// `degree` 级的单个引用可寻址的字节数
    #[inline]
    pub const fn unit(degree: usize) -> u64 {
        (INDEX_SIZE as u64).pow(degree as u32) * BLOCK_SIZE as u64
    }

    /// `degree` 级全部引用可寻址的字节数
    #[inline]
    pub fn capacity(&self, degree: usize) -> u64 {
        self.counts[degree] as u64 * Self::unit(degree)
    }

    pub fn max_file_size(&self) -> u64 {
        (0..Self::DEGREES).map(|degree| self.capacity(degree)).sum()
    }

    /// `degree` 级的第一个引用在索引数组中的下标
    pub fn first_slot(&self, degree: usize) -> usize {
        self.counts[..degree]
            .iter()
            .map(|&count| count as usize)
            .sum()
    }

    /// 每个在用的第一级引用及其级数
    pub fn slots(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..Self::DEGREES).flat_map(move |degree| {
            let first = self.first_slot(degree);
            (first..first + self.counts[degree] as usize).map(move |slot| (slot, degree))
        })
    }

    /// 逐级扣除容量，定位偏移量；超出最大文件大小时返回 `None`
    pub fn locate(&self, offset: u64) -> Option<TierPosition> {
        let mut rest = offset;
        for degree in 0..Self::DEGREES {
            let capacity = self.capacity(degree);
            if rest < capacity {
                let unit = Self::unit(degree);
                return Some(TierPosition {
                    degree,
                    slot: self.first_slot(degree) + (rest / unit) as usize,
                    inner: rest % unit,
                });
            }
            rest -= capacity;
        }
        None
    }
}

/// 形如 `0,8,0,0` 的四个计数
impl FromStr for TierLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut counts = [0; Self::DEGREES];
        let mut parts = s.split(',');
        for count in &mut counts {
            *count = parts
                .next()
                .and_then(|part| part.trim().parse().ok())
                .ok_or(Error::InvalidVolume)?;
        }
        if parts.next().is_some() {
            return Err(Error::InvalidVolume);
        }
        Self::new(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_single_indirect() {
        let layout = TierLayout::default();
        assert_eq!(layout.max_file_size(), 8 * 1024 * 4096);
        assert_eq!(
            layout.locate(40000),
            Some(TierPosition {
                degree: 1,
                slot: 0,
                inner: 40000
            })
        );
        assert_eq!(layout.locate(layout.max_file_size()), None);
    }

    #[test]
    fn offsets_walk_through_the_tiers() {
        let layout = TierLayout::new([2, 1, 1, 0]).unwrap();
        let direct = 2 * 4096;
        let single = 1024 * 4096;

        assert_eq!(layout.locate(4096).map(|pos| (pos.degree, pos.slot)), Some((0, 1)));
        assert_eq!(
            layout.locate(direct + 5),
            Some(TierPosition {
                degree: 1,
                slot: 2,
                inner: 5
            })
        );
        assert_eq!(
            layout.locate(direct + single),
            Some(TierPosition {
                degree: 2,
                slot: 3,
                inner: 0
            })
        );
        assert_eq!(
            layout.slots().collect::<alloc::vec::Vec<_>>(),
            [(0, 0), (1, 0), (2, 1), (3, 2)]
        );
    }

    #[test]
    fn layout_must_fit_the_inode() {
        assert_eq!(TierLayout::new([4, 4, 1, 0]), Err(Error::InvalidVolume));
        assert_eq!(TierLayout::new([0; 4]), Err(Error::InvalidVolume));
        assert_eq!("1,2,3,2".parse::<TierLayout>(), TierLayout::new([1, 2, 3, 2]));
        assert!("1,2,3".parse::<TierLayout>().is_err());
    }
}
