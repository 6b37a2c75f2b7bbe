//! 空闲链表
//!
//! 链表结点叠加在空闲单元上：空闲块的整个块，或空闲索引节点的索引数组。
//! 一个结点有 `N` 个槽位，最后一个槽位指向下一个结点，
//! 其余槽位自高向低存放其它空闲单元的编号。
//!
//! 超级块只记录头结点位置与头结点的计数 `count`：
//! 计数为 `c` 时，`N-c..N-1` 号槽位有效。
//! 计数为 1 时头结点已无负载，下一次分配交出的就是头结点自己。

use crate::Error;
use crate::Result;

use super::{index_slot, set_index_slot};

/// 超级块里的空闲链表游标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList<const N: usize> {
    /// 头结点的编号，0 表示链表已耗尽
    pub head: u32,
    /// 头结点的计数
    pub count: u32,
}

/// 一次分配取出的单元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taken {
    /// 头结点本身被分配出去
    Head(u32),
    /// 取出了头结点 `slot` 号槽位记录的单元
    Payload { unit: u32, slot: usize },
}

/// 一次释放应当如何落盘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gift {
    /// 被释放的单元成为新的头结点，其末槽位指向 `next`
    NewHead { next: u32 },
    /// 被释放的单元编号写入头结点的该槽位
    Slot(usize),
}

/// 解码后的链表结点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeListNode<const N: usize> {
    pub slots: [u32; N],
}

impl<const N: usize> FreeList<N> {
    pub const EXHAUSTED: Self = Self {
        head: 0,
        count: N as u32,
    };

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.head == 0
    }

    /// 从头结点取出一个单元。
    ///
    /// 只修改游标本身；调用者应在副本上操作，落盘成功后再提交。
    pub fn take(&mut self, node: &FreeListNode<N>) -> Result<Taken> {
        if self.head == 0 {
            return Err(Error::NoSpace);
        }

        match self.count as usize {
            1 => {
                let unit = self.head;
                self.head = node.next();
                self.count = N as u32;
                Ok(Taken::Head(unit))
            }
            count if count == 0 || count > N => {
                log::error!("free list headed by {} has count {count}", self.head);
                Err(Error::CorruptFreeList)
            }
            count => {
                let slot = N - count;
                let unit = node.slots[slot];
                if unit == 0 {
                    log::error!("free list headed by {} has an empty slot {slot}", self.head);
                    return Err(Error::CorruptFreeList);
                }
                self.count -= 1;
                Ok(Taken::Payload { unit, slot })
            }
        }
    }

    /// 把 `unit` 挂回链表
    pub fn give(&mut self, unit: u32) -> Gift {
        if self.head == 0 || self.count as usize >= N {
            let next = self.head;
            self.head = unit;
            self.count = 1;
            Gift::NewHead { next }
        } else {
            self.count += 1;
            Gift::Slot(N - self.count as usize)
        }
    }
}

impl Taken {
    #[inline]
    pub fn unit(&self) -> u32 {
        match *self {
            Taken::Head(unit) => unit,
            Taken::Payload { unit, .. } => unit,
        }
    }
}

impl<const N: usize> FreeListNode<N> {
    /// 只含链接的新头结点
    pub fn linking(next: u32) -> Self {
        let mut slots = [0; N];
        slots[N - 1] = next;
        Self { slots }
    }

    #[inline]
    pub fn next(&self) -> u32 {
        self.slots[N - 1]
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut slots = [0; N];
        for (slot, value) in slots.iter_mut().enumerate() {
            *value = index_slot(bytes, slot);
        }
        Self { slots }
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        for (slot, &value) in self.slots.iter().enumerate() {
            set_index_slot(bytes, slot, value);
        }
    }
}
