use super::{InodeId, InodeKind, read_u16, read_u32, write_u16, write_u32};
use crate::{Error, Result};

/// 名字最长字节数，不足时以 0 填充
pub const NAME_MAX_LEN: usize = 26;

/// 目录项：名字到 inode 号的映射
///
/// inode 号为 0 的目录项是空位，可被复用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    inode: InodeId,
    kind: InodeKind,
    name: [u8; NAME_MAX_LEN],
}

impl DirEntry {
    /// 目录项大小恒为32字节
    pub const SIZE: usize = 32;

    const KIND: usize = 4;
    const NAME: usize = 6;

    pub fn new(name: &str, inode: InodeId, kind: InodeKind) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.contains(&b'/') || bytes.contains(&0) {
            return Err(Error::InvalidPath);
        }
        if bytes.len() > NAME_MAX_LEN {
            return Err(Error::NameTooLong);
        }

        let mut raw = [0; NAME_MAX_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);

        Ok(Self {
            inode,
            kind,
            name: raw,
        })
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_MAX_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn inode(&self) -> InodeId {
        self.inode
    }

    #[inline]
    pub fn kind(&self) -> InodeKind {
        self.kind
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.inode.get() == 0
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut name = [0; NAME_MAX_LEN];
        name.copy_from_slice(&bytes[Self::NAME..Self::SIZE]);

        let kind = match read_u16(bytes, Self::KIND) {
            1 => InodeKind::Directory,
            2 => InodeKind::File,
            _ => InodeKind::Unused,
        };

        Self {
            inode: InodeId::new(read_u32(bytes, 0)),
            kind,
            name,
        }
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.inode.get());
        write_u16(bytes, Self::KIND, self.kind as u16);
        bytes[Self::NAME..Self::SIZE].copy_from_slice(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_fills_exactly_one_slot() {
        let entry = DirEntry::new("notes.txt", InodeId::new(5), InodeKind::File).unwrap();
        let mut bytes = [0xee; DirEntry::SIZE];
        entry.encode(&mut bytes);

        assert_eq!(bytes[..4], [5, 0, 0, 0]);
        assert_eq!(bytes[4..6], [2, 0]);
        assert_eq!(&bytes[6..15], b"notes.txt");
        assert!(bytes[15..].iter().all(|&b| b == 0));

        let decoded = DirEntry::decode(&bytes);
        assert_eq!(decoded.name(), "notes.txt");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn names_are_checked() {
        let id = InodeId::new(2);
        let longest = "a".repeat(NAME_MAX_LEN);
        assert!(DirEntry::new(&longest, id, InodeKind::File).is_ok());
        assert_eq!(
            DirEntry::new(&"a".repeat(NAME_MAX_LEN + 1), id, InodeKind::File),
            Err(Error::NameTooLong)
        );
        assert_eq!(DirEntry::new("", id, InodeKind::File), Err(Error::InvalidPath));
        assert_eq!(DirEntry::new("a/b", id, InodeKind::File), Err(Error::InvalidPath));
    }

    #[test]
    fn zeroed_slot_is_free() {
        assert!(DirEntry::decode(&[0; DirEntry::SIZE]).is_free());
    }
}
