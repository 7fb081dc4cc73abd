//! 预分配的有序结果槽。
//!
//! 每个槽只能写一次；不同线程写不同下标，整体无需加锁。

use std::sync::OnceLock;

pub(crate) struct ResultBuffer {
    slots: Box<[OnceLock<Vec<u8>>]>,
}

impl ResultBuffer {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    /// 写入第 `index` 槽；越界或重复写入返回 false。
    pub(crate) fn fill(&self, index: usize, bytes: Vec<u8>) -> bool {
        match self.slots.get(index) {
            Some(slot) => slot.set(bytes).is_ok(),
            None => false,
        }
    }

    /// 按下标顺序取出全部结果；有空槽时返回 None。
    pub(crate) fn into_ordered(self) -> Option<Vec<Vec<u8>>> {
        self.slots
            .into_vec()
            .into_iter()
            .map(OnceLock::into_inner)
            .collect()
    }
}
