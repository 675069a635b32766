//! Register capabilities the engine is written against.
//!
//! [`RegisterIo`] is raw 32-bit access to a mapped register window.
//! [`DmaRegisters`] gives those registers channel-level meaning for one
//! controller model; the engine never touches an offset directly.

use std::fmt;
use std::sync::Arc;

use crate::lli;
use crate::lli::Stride;

pub trait RegisterIo: Send + Sync {
    fn read_register(&self, offset: usize) -> u32;
    fn write_register(&self, offset: usize, value: u32);
}

impl<T: RegisterIo + ?Sized> RegisterIo for Arc<T> {
    fn read_register(&self, offset: usize) -> u32 {
        (**self).read_register(offset)
    }

    fn write_register(&self, offset: usize, value: u32) {
        (**self).write_register(offset, value)
    }
}

/// Interrupt sources pending on a controller, one bit per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingIrqs {
    pub done: u32,
    pub error: u32,
}

impl PendingIrqs {
    pub fn is_empty(&self) -> bool {
        self.done == 0 && self.error == 0
    }

    pub fn touches(&self, ch: usize) -> bool {
        (self.done | self.error) & (1 << ch) != 0
    }

    pub fn is_error(&self, ch: usize) -> bool {
        self.error & (1 << ch) != 0
    }
}

/// Channel registers captured for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub saddr: u32,
    pub daddr: u32,
    pub ctrla: u32,
    pub ctrlb: u32,
    pub dscr: u32,
}

impl fmt::Display for ChannelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "s{:#010x} d{:#010x} ctrl{:#010x}:{:#010x} l{:#010x}",
            self.saddr, self.daddr, self.ctrla, self.ctrlb, self.dscr
        )
    }
}

/// Channel-level view of one controller model.
///
/// Writes are only issued by the context holding the affected channel's
/// lock. [`pending_irqs`](Self::pending_irqs) is the exception: the interrupt
/// top half calls it without any lock.
pub trait DmaRegisters: Send + Sync {
    fn channel_count(&self) -> usize;

    /// Largest transfer count one link item can carry.
    fn max_xfer_count(&self) -> u32 {
        lli::BTSIZE_MAX
    }

    fn controller_on(&self);

    fn controller_off(&self);

    fn any_channel_enabled(&self) -> bool;

    fn irq_mask(&self) -> u32;

    fn set_irq_mask(&self, mask: u32);

    fn unmask_channel_irqs(&self, ch: usize);

    fn mask_all_irqs(&self);

    /// Reads (and thereby acknowledges) the interrupt status, filtered by
    /// the current mask.
    fn pending_irqs(&self) -> PendingIrqs;

    /// Raw status read; used to drain stale interrupts on resume.
    fn raw_irq_status(&self) -> u32;

    fn is_enabled(&self, ch: usize) -> bool;

    fn enable(&self, ch: usize);

    /// Disables the channel and also clears any suspend state.
    fn disable(&self, ch: usize);

    fn suspend(&self, ch: usize);

    fn unsuspend(&self, ch: usize);

    /// Seeds the channel with the head of a chain. The channel must be
    /// disabled; the caller enables it afterwards.
    fn load_chain(&self, ch: usize, first: u32, stride: Stride);

    /// Bus address of the link item the engine will fetch next.
    fn link_pointer(&self, ch: usize) -> u32;

    fn control_word(&self, ch: usize) -> u32;

    /// Bytes moved so far for a control word returned by
    /// [`control_word`](Self::control_word).
    fn transferred_bytes(&self, ctrl: u32) -> usize {
        lli::transferred_bytes(ctrl)
    }

    fn config(&self, ch: usize) -> u32;

    fn set_config(&self, ch: usize, cfg: u32);

    /// Configuration register value for a channel, optionally bound to a
    /// peripheral request line.
    fn channel_config(&self, request_line: Option<u8>) -> u32;

    fn snapshot(&self, ch: usize) -> ChannelSnapshot;
}
