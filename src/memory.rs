//! Bus-addressable backing store for link items.

use spin::Mutex;

use crate::lli::LinkItem;
use crate::lli::LINK_ITEM_LEN;

/// Memory the controller can fetch link items from.
///
/// Implementations hand out fixed [`LINK_ITEM_LEN`] slots identified by their
/// bus address. `alloc_slot` is called with the channel lock held, so it must
/// not block; returning `None` makes the caller report
/// [`Error::OutOfResources`](crate::Error::OutOfResources).
pub trait LinkMemory: Send + Sync {
    fn alloc_slot(&self) -> Option<u32>;

    fn free_slot(&self, addr: u32);

    fn write_link(&self, addr: u32, item: &LinkItem);

    /// Stores a single word at the start of a slot. Used for fill patterns.
    fn write_word(&self, addr: u32, value: u32);
}

/// Slot bookkeeping over a contiguous bus range.
#[derive(Debug)]
pub(crate) struct SlotAllocator {
    base: u32,
    used: Vec<bool>,
    recycled: Vec<usize>,
    fresh: usize,
}

impl SlotAllocator {
    pub(crate) fn new(base: u32, len: usize) -> SlotAllocator {
        SlotAllocator {
            base,
            used: vec![false; len / LINK_ITEM_LEN],
            recycled: Vec::new(),
            fresh: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.used.len()
    }

    pub(crate) fn in_use(&self) -> usize {
        self.used.iter().filter(|u| **u).count()
    }

    pub(crate) fn alloc(&mut self) -> Option<u32> {
        let idx = match self.recycled.pop() {
            Some(idx) => idx,
            None if self.fresh < self.used.len() => {
                self.fresh += 1;
                self.fresh - 1
            }
            None => return None,
        };
        self.used[idx] = true;
        Some(self.base + (idx * LINK_ITEM_LEN) as u32)
    }

    pub(crate) fn free(&mut self, addr: u32) {
        if let Some(idx) = self.index(addr) {
            if self.used[idx] {
                self.used[idx] = false;
                self.recycled.push(idx);
                return;
            }
        }
        log::error!("freeing unknown link slot {:#010x}", addr);
    }

    /// Byte offset of `addr` from the start of the range.
    pub(crate) fn offset(&self, addr: u32) -> Option<usize> {
        self.index(addr).map(|idx| idx * LINK_ITEM_LEN)
    }

    fn index(&self, addr: u32) -> Option<usize> {
        let off = addr.checked_sub(self.base)? as usize;
        if off % LINK_ITEM_LEN != 0 || off / LINK_ITEM_LEN >= self.used.len() {
            return None;
        }
        Some(off / LINK_ITEM_LEN)
    }
}

/// Link memory backed by ordinary heap memory with a synthetic bus base.
///
/// Used for hosted operation against simulated controllers and in tests; the
/// stored items can be read back to follow chains the way hardware would.
#[derive(Debug)]
pub struct HeapLinkMemory {
    inner: Mutex<HeapInner>,
}

#[derive(Debug)]
struct HeapInner {
    slots: SlotAllocator,
    words: Vec<u32>,
}

impl HeapLinkMemory {
    pub fn new(base: u32, slots: usize) -> HeapLinkMemory {
        let len = slots * LINK_ITEM_LEN;
        HeapLinkMemory {
            inner: Mutex::new(HeapInner {
                slots: SlotAllocator::new(base, len),
                words: vec![0; len / 4],
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.capacity()
    }

    pub fn in_use(&self) -> usize {
        self.inner.lock().slots.in_use()
    }

    pub fn read_link(&self, addr: u32) -> Option<LinkItem> {
        let inner = self.inner.lock();
        let w = inner.slots.offset(addr)? / 4;
        let words = &inner.words[w..w + 5];
        Some(LinkItem {
            saddr: words[0],
            daddr: words[1],
            ctrla: words[2],
            ctrlb: words[3],
            dscr: words[4],
        })
    }

    pub fn read_word(&self, addr: u32) -> Option<u32> {
        let inner = self.inner.lock();
        let w = inner.slots.offset(addr)? / 4;
        Some(inner.words[w])
    }
}

impl LinkMemory for HeapLinkMemory {
    fn alloc_slot(&self) -> Option<u32> {
        self.inner.lock().slots.alloc()
    }

    fn free_slot(&self, addr: u32) {
        self.inner.lock().slots.free(addr)
    }

    fn write_link(&self, addr: u32, item: &LinkItem) {
        let mut inner = self.inner.lock();
        if let Some(off) = inner.slots.offset(addr) {
            inner.words[off / 4..off / 4 + 5].copy_from_slice(&item.to_words());
        }
    }

    fn write_word(&self, addr: u32, value: u32) {
        let mut inner = self.inner.lock();
        if let Some(off) = inner.slots.offset(addr) {
            inner.words[off / 4] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_aligned_and_bounded() {
        let mem = HeapLinkMemory::new(0x2000_0000, 3);
        let a = mem.alloc_slot().unwrap();
        let b = mem.alloc_slot().unwrap();
        let c = mem.alloc_slot().unwrap();
        assert_eq!(a, 0x2000_0000);
        assert_eq!(b - a, LINK_ITEM_LEN as u32);
        assert_eq!(c - b, LINK_ITEM_LEN as u32);
        assert!(mem.alloc_slot().is_none());
        assert_eq!(mem.in_use(), 3);

        mem.free_slot(b);
        assert_eq!(mem.in_use(), 2);
        assert_eq!(mem.alloc_slot(), Some(b));
    }

    #[test]
    fn stored_items_read_back() {
        let mem = HeapLinkMemory::new(0x1000, 2);
        let a = mem.alloc_slot().unwrap();
        let item = LinkItem {
            saddr: 1,
            daddr: 2,
            ctrla: 3,
            ctrlb: 4,
            dscr: 5,
        };
        mem.write_link(a, &item);
        assert_eq!(mem.read_link(a), Some(item));
        assert_eq!(mem.read_link(a + 4), None);
    }
}
