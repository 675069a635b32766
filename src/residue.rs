//! Bytes-remaining computation.
//!
//! The link pointer and the control word cannot be read as one unit, and the
//! engine may fetch the next link item between the two reads. A sample is
//! only trusted when the link pointer reads the same before and after the
//! control word.

use crate::channel::ChannelState;
use crate::dmb;
use crate::regs::DmaRegisters;
use crate::Cookie;
use crate::Error;

/// Result of a residue query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residue {
    Bytes(usize),
    /// The cookie is neither active nor queued on the channel.
    Stale,
}

/// Reads a consistent (link pointer, control word) pair.
pub(crate) fn sample(regs: &dyn DmaRegisters, ch: usize, max_trials: u32) -> Result<(u32, u32), Error> {
    let mut dscr = regs.link_pointer(ch);
    dmb();
    let mut ctrla = regs.control_word(ch);
    for _ in 0..max_trials {
        dmb();
        let new_dscr = regs.link_pointer(ch);
        // the engine did not fetch a new link item between the reads, so
        // the control word belongs to the item `dscr` follows
        if new_dscr == dscr {
            return Ok((dscr, ctrla));
        }
        dscr = new_dscr;
        dmb();
        ctrla = regs.control_word(ch);
    }
    Err(Error::Timeout)
}

pub(crate) fn bytes_left(
    regs: &dyn DmaRegisters,
    ch: usize,
    st: &ChannelState,
    cookie: Cookie,
    max_trials: u32,
) -> Result<Residue, Error> {
    let Some(&first) = st.active.front() else {
        return Ok(Residue::Stale);
    };
    let found = st
        .active
        .iter()
        .chain(st.queue.iter())
        .find(|&&idx| st.pool.get(idx).cookie == cookie);
    let head = match found {
        Some(&idx) if idx == first => st.pool.get(first),
        // not started yet
        Some(&idx) => return Ok(Residue::Bytes(st.pool.get(idx).total_len)),
        None => return Ok(Residue::Stale),
    };

    if head.children.is_empty() && head.lli.next_descriptor() == 0 {
        // single link item
        let ctrla = regs.control_word(ch);
        let done = regs.transferred_bytes(ctrla);
        return Ok(Residue::Bytes(head.total_len.saturating_sub(done)));
    }

    let (dscr, ctrla) = sample(regs, ch, max_trials)?;

    // the in-flight item is the one whose successor the engine points at
    let mut retired = 0;
    for desc in st.pool.chain(first) {
        if desc.lli.next_descriptor() == dscr {
            let left = head.total_len.saturating_sub(retired);
            return Ok(Residue::Bytes(left.saturating_sub(regs.transferred_bytes(ctrla))));
        }
        retired += desc.len;
    }

    // nothing fetched yet: the link pointer still holds the head
    Ok(Residue::Bytes(head.total_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lli::Stride;
    use crate::regs::ChannelSnapshot;
    use crate::regs::PendingIrqs;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use spin::Mutex;

    /// Link pointer reads come from a script; the control word always
    /// reports `count` source-width transfers.
    struct Scripted {
        dscr: Mutex<VecDeque<u32>>,
        count: AtomicU32,
    }

    impl Scripted {
        fn new(dscr: &[u32], count: u32) -> Scripted {
            Scripted {
                dscr: Mutex::new(dscr.iter().copied().collect()),
                count: AtomicU32::new(count),
            }
        }
    }

    impl DmaRegisters for Scripted {
        fn channel_count(&self) -> usize {
            1
        }
        fn controller_on(&self) {}
        fn controller_off(&self) {}
        fn any_channel_enabled(&self) -> bool {
            false
        }
        fn irq_mask(&self) -> u32 {
            0
        }
        fn set_irq_mask(&self, _: u32) {}
        fn unmask_channel_irqs(&self, _: usize) {}
        fn mask_all_irqs(&self) {}
        fn pending_irqs(&self) -> PendingIrqs {
            PendingIrqs::default()
        }
        fn raw_irq_status(&self) -> u32 {
            0
        }
        fn is_enabled(&self, _: usize) -> bool {
            true
        }
        fn enable(&self, _: usize) {}
        fn disable(&self, _: usize) {}
        fn suspend(&self, _: usize) {}
        fn unsuspend(&self, _: usize) {}
        fn load_chain(&self, _: usize, _: u32, _: Stride) {}
        fn link_pointer(&self, _: usize) -> u32 {
            let mut script = self.dscr.lock();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script[0]
            }
        }
        fn control_word(&self, _: usize) -> u32 {
            // byte-wide source
            self.count.load(Ordering::SeqCst)
        }
        fn config(&self, _: usize) -> u32 {
            0
        }
        fn set_config(&self, _: usize, _: u32) {}
        fn channel_config(&self, _: Option<u8>) -> u32 {
            0
        }
        fn snapshot(&self, _: usize) -> ChannelSnapshot {
            ChannelSnapshot::default()
        }
    }

    #[test]
    fn stable_sample_on_first_reread() {
        let regs = Scripted::new(&[0x100], 12);
        assert_eq!(sample(&regs, 0, 10).unwrap(), (0x100, 12));
    }

    #[test]
    fn moving_pointer_discards_control_word() {
        let regs = Scripted::new(&[0x100, 0x120, 0x140, 0x140], 3);
        let (dscr, _) = sample(&regs, 0, 10).unwrap();
        assert_eq!(dscr, 0x140);
    }

    #[test]
    fn unstable_pointer_times_out() {
        let script: Vec<u32> = (0..64).map(|i| 0x100 + i * 0x20).collect();
        let regs = Scripted::new(&script, 0);
        assert!(matches!(sample(&regs, 0, 10), Err(Error::Timeout)));
    }

    #[test]
    fn retry_bound_is_respected() {
        // settles after exactly ten changes
        let mut script: Vec<u32> = (0..11).map(|i| 0x100 + i * 0x20).collect();
        script.push(*script.last().unwrap());
        let regs = Scripted::new(&script, 0);
        assert!(matches!(sample(&regs, 0, 10), Err(Error::Timeout)));
        let regs = Scripted::new(&script, 0);
        assert!(sample(&regs, 0, 11).is_ok());
    }
}
