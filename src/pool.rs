//! Per-channel descriptor arena.
//!
//! Descriptors live in a `Vec` and are referred to by [`SlotIndex`]. A
//! descriptor is on exactly one of the channel's lists (free, queued,
//! active) or owned by the children list of a chain head; [`DescState`]
//! records which, so list bugs show up as assertion failures in tests.

use std::collections::VecDeque;
use std::sync::Arc;

use bitflags::bitflags;

use crate::lli::LinkItem;
use crate::lli::Stride;
use crate::notify::NotifyHandle;
use crate::Cookie;
use crate::Error;
use crate::LinkMemory;

bitflags! {
    /// Client flags carried by the first descriptor of a chain.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TxFlags: u32 {
        /// Ask for a completion interrupt.
        const PREP_INTERRUPT = 1 << 0;
        /// The client gives up the descriptor once it completes. Without it,
        /// the retired chain head is not reused until [`Channel::ack`](crate::Channel::ack).
        const CTRL_ACK = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SlotIndex(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DescState {
    Free,
    /// Filled by a chain builder; either a chain head or a child.
    Prepared,
    Queued,
    Active,
}

#[derive(Debug)]
pub(crate) struct Descriptor {
    pub(crate) lli: LinkItem,
    /// Bus address of this descriptor's link item.
    pub(crate) phys: u32,
    pub(crate) len: usize,
    /// Whole-transaction length; chain heads only.
    pub(crate) total_len: usize,
    pub(crate) cookie: Cookie,
    pub(crate) flags: TxFlags,
    pub(crate) stride: Stride,
    /// Children in chain order; chain heads only.
    pub(crate) children: Vec<SlotIndex>,
    /// Slot holding a fill pattern, released with the descriptor.
    pub(crate) fill: Option<u32>,
    pub(crate) notify: Option<NotifyHandle>,
    pub(crate) state: DescState,
    /// Chain head of a looping (cyclic) chain.
    pub(crate) cyclic: bool,
    /// Chain head the hardware was actually started on.
    pub(crate) armed: bool,
}

impl Descriptor {
    fn new(phys: u32) -> Descriptor {
        Descriptor {
            lli: LinkItem::default(),
            phys,
            len: 0,
            total_len: 0,
            cookie: Cookie::NONE,
            // acked at creation so fresh descriptors are usable at once
            flags: TxFlags::CTRL_ACK,
            stride: Stride::default(),
            children: Vec::new(),
            fill: None,
            notify: None,
            state: DescState::Free,
            cyclic: false,
            armed: false,
        }
    }

    fn reset(&mut self) {
        let phys = self.phys;
        *self = Descriptor::new(phys);
    }
}

pub(crate) struct DescriptorPool {
    slots: Vec<Descriptor>,
    free: VecDeque<SlotIndex>,
    memory: Arc<dyn LinkMemory>,
}

impl DescriptorPool {
    pub(crate) fn new(memory: Arc<dyn LinkMemory>) -> DescriptorPool {
        DescriptorPool {
            slots: Vec::new(),
            free: VecDeque::new(),
            memory,
        }
    }

    pub(crate) fn memory(&self) -> &Arc<dyn LinkMemory> {
        &self.memory
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn get(&self, idx: SlotIndex) -> &Descriptor {
        &self.slots[idx.0]
    }

    pub(crate) fn get_mut(&mut self, idx: SlotIndex) -> &mut Descriptor {
        &mut self.slots[idx.0]
    }

    fn grow(&mut self) -> Option<SlotIndex> {
        let phys = self.memory.alloc_slot()?;
        self.slots.push(Descriptor::new(phys));
        Some(SlotIndex(self.slots.len() - 1))
    }

    /// Adds up to `count` descriptors to the free list; returns how many
    /// could be allocated.
    pub(crate) fn populate(&mut self, count: usize) -> usize {
        for i in 0..count {
            match self.grow() {
                Some(idx) => self.free.push_back(idx),
                None => return i,
            }
        }
        count
    }

    /// Takes the first acknowledged descriptor off the free list, growing the
    /// pool when none is available.
    pub(crate) fn acquire(&mut self) -> Result<SlotIndex, Error> {
        let mut scanned = 0;
        let mut found = None;
        for (pos, idx) in self.free.iter().enumerate() {
            scanned += 1;
            if self.slots[idx.0].flags.contains(TxFlags::CTRL_ACK) {
                found = Some(pos);
                break;
            }
            log::trace!("desc {:#010x} not ACKed", self.slots[idx.0].phys);
        }
        log::trace!("scanned {} descriptors on freelist", scanned);

        let idx = match found.and_then(|pos| self.free.remove(pos)) {
            Some(idx) => idx,
            None => self.grow().ok_or(Error::OutOfResources)?,
        };
        let desc = &mut self.slots[idx.0];
        desc.reset();
        desc.state = DescState::Prepared;
        Ok(idx)
    }

    /// Returns a chain head and all its children to the free list.
    pub(crate) fn release(&mut self, head: SlotIndex) {
        let children = std::mem::take(&mut self.slots[head.0].children);
        for &child in children.iter().rev() {
            log::trace!("moving child desc {:#010x} to freelist", self.slots[child.0].phys);
            self.retire(child);
        }
        log::trace!("moving desc {:#010x} to freelist", self.slots[head.0].phys);
        self.retire(head);
    }

    fn retire(&mut self, idx: SlotIndex) {
        let desc = &mut self.slots[idx.0];
        debug_assert_ne!(desc.state, DescState::Free, "double release");
        if let Some(fill) = desc.fill.take() {
            self.memory.free_slot(fill);
        }
        desc.notify = None;
        desc.state = DescState::Free;
        self.free.push_front(idx);
    }

    /// Marks a retired chain head as reusable.
    pub(crate) fn ack(&mut self, cookie: Cookie) -> bool {
        for idx in &self.free {
            let desc = &mut self.slots[idx.0];
            if desc.cookie == cookie {
                desc.flags |= TxFlags::CTRL_ACK;
                return true;
            }
        }
        false
    }

    /// Publishes the link items of a chain to link memory.
    pub(crate) fn write_chain(&self, head: SlotIndex) {
        let desc = &self.slots[head.0];
        self.memory.write_link(desc.phys, &desc.lli);
        for child in &desc.children {
            let child = &self.slots[child.0];
            self.memory.write_link(child.phys, &child.lli);
        }
    }

    /// Head followed by its children.
    pub(crate) fn chain(&self, head: SlotIndex) -> impl Iterator<Item = &Descriptor> + '_ {
        std::iter::once(head)
            .chain(self.slots[head.0].children.iter().copied())
            .map(move |idx| &self.slots[idx.0])
    }

    /// Gives every slot back to link memory. All descriptors must be free.
    pub(crate) fn destroy(&mut self) {
        debug_assert_eq!(self.free.len(), self.slots.len());
        for desc in self.slots.drain(..) {
            log::trace!("freeing descriptor {:#010x}", desc.phys);
            if let Some(fill) = desc.fill {
                self.memory.free_slot(fill);
            }
            self.memory.free_slot(desc.phys);
        }
        self.free.clear();
    }
}
