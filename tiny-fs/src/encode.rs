//! # 槽位编码
//!
//! 普通文件的索引块中，逻辑上第 `i` 个编号并不存放在第 `i` 个槽位，
//! 而是存放在 `encode(i, key)` 号槽位，`key` 是打开文件时给出的密钥。
//! 目录不做编码。
//!
//! 编码必须是 `0..INDEX_SIZE` 上的单射，否则不同的逻辑块会争用同一槽位。

use core::fmt;

use crate::INDEX_SIZE;

/// 密钥字节数
pub const KEY_SIZE: usize = 20;

/// 文件的密钥，全零表示未设置
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FileKey([u8; KEY_SIZE]);

/// 逻辑槽位到物理槽位的映射
pub trait SlotEncoder: Send + Sync {
    fn encode(&self, index: usize, key: &FileKey) -> usize;
}

/// 不做任何变换
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

/// 与折叠到槽位宽度的密钥做异或
#[derive(Debug, Clone, Copy, Default)]
pub struct XorFold;

impl FileKey {
    pub const ZERO: Self = Self([0; KEY_SIZE]);

    #[inline]
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// 取口令的前 [`KEY_SIZE`] 个字节，不足补零
    pub fn from_passphrase(passphrase: &str) -> Self {
        let bytes = passphrase.as_bytes();
        let len = bytes.len().min(KEY_SIZE);
        let mut key = [0; KEY_SIZE];
        key[..len].copy_from_slice(&bytes[..len]);
        Self(key)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

// 密钥不进日志
impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            f.write_str("FileKey(none)")
        } else {
            f.write_str("FileKey(..)")
        }
    }
}

impl SlotEncoder for Identity {
    #[inline]
    fn encode(&self, index: usize, _key: &FileKey) -> usize {
        index
    }
}

impl XorFold {
    fn fold(key: &FileKey) -> usize {
        key.0
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &byte)| acc ^ ((byte as usize) << (i % 3)))
            & (INDEX_SIZE - 1)
    }
}

impl SlotEncoder for XorFold {
    #[inline]
    fn encode(&self, index: usize, key: &FileKey) -> usize {
        index ^ Self::fold(key)
    }
}
