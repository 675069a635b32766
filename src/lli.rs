//! Hardware link item ("LLI") format shared by the AHB controller family.
//!
//! A link item is five 32-bit words read by the engine on its own: source,
//! destination, two control words and the bus address of the next item.
//! Software keeps a mirror of every item in its descriptor and pushes it to
//! [`LinkMemory`](crate::LinkMemory) once the chain is complete.

/// Slot size reserved for one link item. Items must be word aligned; the
/// extra room keeps consecutive items on separate bus bursts.
pub const LINK_ITEM_LEN: usize = 8 * 4;

/// Largest value of the transfer-count field in [`LinkItem::ctrla`].
pub const BTSIZE_MAX: u32 = 0xffff;

const CTRLA_BTSIZE: u32 = 0xffff;
const CTRLA_SCSIZE_SHIFT: u32 = 16;
const CTRLA_DCSIZE_SHIFT: u32 = 20;
const CTRLA_SRC_WIDTH_SHIFT: u32 = 24;
const CTRLA_DST_WIDTH_SHIFT: u32 = 28;
const CTRLA_DONE: u32 = 1 << 31;

const CTRLB_SIF_SHIFT: u32 = 0;
const CTRLB_DIF_SHIFT: u32 = 4;
const CTRLB_SRC_PIP: u32 = 1 << 8;
const CTRLB_DST_PIP: u32 = 1 << 12;
const CTRLB_SRC_DSCR_DIS: u32 = 1 << 16;
const CTRLB_DST_DSCR_DIS: u32 = 1 << 20;
const CTRLB_FC_SHIFT: u32 = 21;
const CTRLB_SRC_ADDR_MODE_SHIFT: u32 = 24;
const CTRLB_DST_ADDR_MODE_SHIFT: u32 = 28;
const CTRLB_BTC_IRQ_MASK: u32 = 1 << 30;

/// How the engine walks an address while transferring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Increment = 0,
    Decrement = 1,
    Fixed = 2,
}

/// Who paces the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    MemToMem = 0,
    MemToPer = 1,
    PerToMem = 2,
}

/// Hole-skipping parameters for 2-D (interleaved) transfers, programmed into
/// the channel's picture-in-picture registers at start time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stride {
    /// Contiguous transfers between two holes.
    pub boundary: u16,
    /// Source address increment after a boundary, in transfer units.
    pub src_hole: u16,
    /// Destination address increment after a boundary, in transfer units.
    pub dst_hole: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkItem {
    pub saddr: u32,
    pub daddr: u32,
    pub ctrla: u32,
    pub ctrlb: u32,
    pub dscr: u32,
}

impl LinkItem {
    pub fn to_words(&self) -> [u32; 5] {
        [self.saddr, self.daddr, self.ctrla, self.ctrlb, self.dscr]
    }

    pub fn next_descriptor(&self) -> u32 {
        self.dscr
    }

    pub fn set_next_descriptor(&mut self, addr: u32) {
        debug_assert_eq!(addr & 0x3, 0, "link items must be word aligned");
        self.dscr = addr;
    }

    pub fn xfer_count(&self) -> u32 {
        self.ctrla & CTRLA_BTSIZE
    }

    pub fn set_xfer_count(&mut self, count: u32) {
        debug_assert!(count <= BTSIZE_MAX);
        self.ctrla = (self.ctrla & !CTRLA_BTSIZE) | (count & CTRLA_BTSIZE);
    }

    pub fn src_width(&self) -> u32 {
        (self.ctrla >> CTRLA_SRC_WIDTH_SHIFT) & 0x3
    }

    pub fn dst_width(&self) -> u32 {
        (self.ctrla >> CTRLA_DST_WIDTH_SHIFT) & 0x3
    }

    /// Widths are log2 of the bus access size in bytes.
    pub fn set_widths(&mut self, src: u32, dst: u32) {
        self.ctrla &= !((0x3 << CTRLA_SRC_WIDTH_SHIFT) | (0x3 << CTRLA_DST_WIDTH_SHIFT));
        self.ctrla |= (src & 0x3) << CTRLA_SRC_WIDTH_SHIFT | (dst & 0x3) << CTRLA_DST_WIDTH_SHIFT;
    }

    /// Encoded burst sizes, see [`SlaveConfig`](crate::SlaveConfig).
    pub fn set_chunk_sizes(&mut self, src: u32, dst: u32) {
        self.ctrla &= !((0x7 << CTRLA_SCSIZE_SHIFT) | (0x7 << CTRLA_DCSIZE_SHIFT));
        self.ctrla |= (src & 0x7) << CTRLA_SCSIZE_SHIFT | (dst & 0x7) << CTRLA_DCSIZE_SHIFT;
    }

    pub fn done(&self) -> bool {
        self.ctrla & CTRLA_DONE != 0
    }

    pub fn set_interfaces(&mut self, src: u32, dst: u32) {
        self.ctrlb &= !((0x3 << CTRLB_SIF_SHIFT) | (0x3 << CTRLB_DIF_SHIFT));
        self.ctrlb |= (src & 0x3) << CTRLB_SIF_SHIFT | (dst & 0x3) << CTRLB_DIF_SHIFT;
    }

    pub fn set_flow_control(&mut self, fc: FlowControl) {
        self.ctrlb = (self.ctrlb & !(0x7 << CTRLB_FC_SHIFT)) | (fc as u32) << CTRLB_FC_SHIFT;
    }

    pub fn flow_control(&self) -> FlowControl {
        match (self.ctrlb >> CTRLB_FC_SHIFT) & 0x7 {
            1 => FlowControl::MemToPer,
            2 => FlowControl::PerToMem,
            _ => FlowControl::MemToMem,
        }
    }

    pub fn set_addr_modes(&mut self, src: AddrMode, dst: AddrMode) {
        self.ctrlb &= !((0x3 << CTRLB_SRC_ADDR_MODE_SHIFT) | (0x3 << CTRLB_DST_ADDR_MODE_SHIFT));
        self.ctrlb |=
            (src as u32) << CTRLB_SRC_ADDR_MODE_SHIFT | (dst as u32) << CTRLB_DST_ADDR_MODE_SHIFT;
    }

    pub fn src_addr_mode(&self) -> AddrMode {
        decode_addr_mode(self.ctrlb >> CTRLB_SRC_ADDR_MODE_SHIFT)
    }

    pub fn dst_addr_mode(&self) -> AddrMode {
        decode_addr_mode(self.ctrlb >> CTRLB_DST_ADDR_MODE_SHIFT)
    }

    pub fn set_picture_in_picture(&mut self, enable: bool) {
        if enable {
            self.ctrlb |= CTRLB_SRC_PIP | CTRLB_DST_PIP;
        } else {
            self.ctrlb &= !(CTRLB_SRC_PIP | CTRLB_DST_PIP);
        }
    }

    /// Suppresses the buffer-complete interrupt for this item.
    pub fn set_btc_irq_masked(&mut self, masked: bool) {
        if masked {
            self.ctrlb |= CTRLB_BTC_IRQ_MASK;
        } else {
            self.ctrlb &= !CTRLB_BTC_IRQ_MASK;
        }
    }

    pub fn btc_irq_masked(&self) -> bool {
        self.ctrlb & CTRLB_BTC_IRQ_MASK != 0
    }

    /// Marks this item as the end of the chain: the next pointer is cleared
    /// and descriptor fetch is disabled on both interfaces.
    pub fn set_eol(&mut self) {
        self.ctrlb |= CTRLB_SRC_DSCR_DIS | CTRLB_DST_DSCR_DIS;
        self.dscr = 0;
    }

    pub fn eol(&self) -> bool {
        self.ctrlb & (CTRLB_SRC_DSCR_DIS | CTRLB_DST_DSCR_DIS)
            == (CTRLB_SRC_DSCR_DIS | CTRLB_DST_DSCR_DIS)
    }
}

fn decode_addr_mode(bits: u32) -> AddrMode {
    match bits & 0x3 {
        1 => AddrMode::Decrement,
        2 => AddrMode::Fixed,
        _ => AddrMode::Increment,
    }
}

/// Widest access (log2 bytes, at most 4 bytes) that keeps source,
/// destination and length aligned.
pub fn xfer_width(src: u32, dst: u32, len: usize) -> u32 {
    let bits = src as usize | dst as usize | len;
    if bits & 3 == 0 {
        2
    } else if bits & 1 == 0 {
        1
    } else {
        0
    }
}

/// Bytes the engine has moved for a control word sampled from hardware. The
/// count field counts source-width transfers.
pub fn transferred_bytes(ctrla: u32) -> usize {
    let btsize = (ctrla & CTRLA_BTSIZE) as usize;
    let src_width = (ctrla >> CTRLA_SRC_WIDTH_SHIFT) & 0x3;
    btsize << src_width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eol_clears_next_pointer() {
        let mut lli = LinkItem::default();
        lli.set_next_descriptor(0x1000);
        assert!(!lli.eol());
        lli.set_eol();
        assert!(lli.eol());
        assert_eq!(lli.next_descriptor(), 0);
    }

    #[test]
    fn fields_do_not_overlap() {
        let mut lli = LinkItem::default();
        lli.set_xfer_count(BTSIZE_MAX);
        lli.set_widths(2, 1);
        lli.set_chunk_sizes(3, 5);
        assert_eq!(lli.xfer_count(), BTSIZE_MAX);
        assert_eq!(lli.src_width(), 2);
        assert_eq!(lli.dst_width(), 1);

        lli.set_addr_modes(AddrMode::Fixed, AddrMode::Increment);
        lli.set_flow_control(FlowControl::PerToMem);
        lli.set_interfaces(1, 0);
        lli.set_btc_irq_masked(true);
        assert_eq!(lli.src_addr_mode(), AddrMode::Fixed);
        assert_eq!(lli.dst_addr_mode(), AddrMode::Increment);
        assert_eq!(lli.flow_control(), FlowControl::PerToMem);
        assert!(lli.btc_irq_masked());
        assert!(!lli.eol());
    }

    #[test]
    fn width_follows_alignment() {
        assert_eq!(xfer_width(0x1000, 0x2000, 64), 2);
        assert_eq!(xfer_width(0x1002, 0x2000, 64), 1);
        assert_eq!(xfer_width(0x1000, 0x2000, 63), 0);
    }

    #[test]
    fn progress_is_scaled_by_source_width() {
        let mut lli = LinkItem::default();
        lli.set_xfer_count(10);
        lli.set_widths(2, 2);
        assert_eq!(transferred_bytes(lli.ctrla), 40);
        lli.set_widths(0, 2);
        assert_eq!(transferred_bytes(lli.ctrla), 10);
    }
}
