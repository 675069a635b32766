use std::fmt;

use crate::dmb;
use crate::lli;
use crate::lli::Stride;
use crate::regs::ChannelSnapshot;
use crate::regs::DmaRegisters;
use crate::regs::PendingIrqs;
use crate::regs::RegisterIo;

pub const EN: usize = 0x04;
pub const EBCIER: usize = 0x18;
pub const EBCIDR: usize = 0x1C;
pub const EBCIMR: usize = 0x20;
pub const EBCISR: usize = 0x24;
pub const CHER: usize = 0x28;
pub const CHDR: usize = 0x2C;
pub const CHSR: usize = 0x30;

pub const CH_REGS_BASE: usize = 0x3C;
pub const CH_REGS_LEN: usize = 0x28;

pub const SADDR: usize = 0x00;
pub const DADDR: usize = 0x04;
pub const DSCR: usize = 0x08;
pub const CTRLA: usize = 0x0C;
pub const CTRLB: usize = 0x10;
pub const CFG: usize = 0x14;
pub const SPIP: usize = 0x18;
pub const DPIP: usize = 0x1C;

pub const EN_ENABLE: u32 = 1;

/// Channel bit helpers for CHER/CHDR/CHSR.
pub const fn ch_ena(ch: usize) -> u32 {
    1 << ch
}
pub const fn ch_susp(ch: usize) -> u32 {
    1 << (ch + 8)
}

/// Interrupt bit helpers for EBCI*.
pub const fn irq_btc(ch: usize) -> u32 {
    1 << ch
}
pub const fn irq_cbtc(ch: usize) -> u32 {
    1 << (8 + ch)
}
pub const fn irq_err(ch: usize) -> u32 {
    1 << (16 + ch)
}

const CFG_SRC_H2SEL: u32 = 1 << 9;
const CFG_DST_H2SEL: u32 = 1 << 13;
const CFG_FIFOCFG_HALFFIFO: u32 = 1 << 28;

const PIP_HOLE_MASK: u32 = 0xffff;
const PIP_BOUNDARY_SHIFT: u32 = 16;
const PIP_BOUNDARY_MASK: u32 = 0x3ff;

/// Atmel-style AHB DMA controller ("HDMAC") register model.
pub struct AhbDmac<R: RegisterIo> {
    io: R,
    nr_channels: usize,
    all_chan_mask: u32,
    max_xfer_count: u32,
}

impl<R: RegisterIo> fmt::Debug for AhbDmac<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AhbDmac")?;
        writeln!(f, "  channels: {}", self.nr_channels)?;
        write!(f, "  status: {:#010x}", self.io.read_register(CHSR))
    }
}

impl<R: RegisterIo> AhbDmac<R> {
    pub fn new(io: R, nr_channels: usize) -> AhbDmac<R> {
        debug_assert!(nr_channels <= 8);
        AhbDmac {
            io,
            nr_channels,
            all_chan_mask: (1u32 << nr_channels) - 1,
            max_xfer_count: lli::BTSIZE_MAX,
        }
    }

    /// Caps the count field of a link item below the 16-bit hardware limit.
    pub fn with_max_xfer_count(mut self, count: u32) -> AhbDmac<R> {
        self.max_xfer_count = count.clamp(1, lli::BTSIZE_MAX);
        self
    }

    pub fn io(&self) -> &R {
        &self.io
    }

    fn ch_read(&self, ch: usize, reg: usize) -> u32 {
        self.io.read_register(CH_REGS_BASE + ch * CH_REGS_LEN + reg)
    }

    fn ch_write(&self, ch: usize, reg: usize, value: u32) {
        self.io.write_register(CH_REGS_BASE + ch * CH_REGS_LEN + reg, value)
    }
}

impl<R: RegisterIo> DmaRegisters for AhbDmac<R> {
    fn channel_count(&self) -> usize {
        self.nr_channels
    }

    fn max_xfer_count(&self) -> u32 {
        self.max_xfer_count
    }

    fn controller_on(&self) {
        self.io.write_register(EN, EN_ENABLE);
    }

    fn controller_off(&self) {
        self.io.write_register(EN, 0);
        self.io.write_register(EBCIDR, u32::MAX);
    }

    fn any_channel_enabled(&self) -> bool {
        self.io.read_register(CHSR) & self.all_chan_mask != 0
    }

    fn irq_mask(&self) -> u32 {
        self.io.read_register(EBCIMR)
    }

    fn set_irq_mask(&self, mask: u32) {
        self.io.write_register(EBCIER, mask);
    }

    fn unmask_channel_irqs(&self, ch: usize) {
        self.io.write_register(EBCIER, irq_btc(ch) | irq_err(ch));
    }

    fn mask_all_irqs(&self) {
        self.io.write_register(EBCIDR, u32::MAX);
    }

    fn pending_irqs(&self) -> PendingIrqs {
        let imr = self.io.read_register(EBCIMR);
        let status = self.io.read_register(EBCISR);
        let pending = status & imr;
        if pending != 0 {
            log::trace!(
                "interrupt: status = {:#010x}, {:#010x}, {:#010x}",
                status,
                imr,
                pending
            );
        }
        PendingIrqs {
            done: (pending | pending >> 8) & self.all_chan_mask,
            error: (pending >> 16) & self.all_chan_mask,
        }
    }

    fn raw_irq_status(&self) -> u32 {
        self.io.read_register(EBCISR)
    }

    fn is_enabled(&self, ch: usize) -> bool {
        self.io.read_register(CHSR) & ch_ena(ch) != 0
    }

    fn enable(&self, ch: usize) {
        // link items and buffers must be visible before the engine fetches
        dmb();
        self.io.write_register(CHER, ch_ena(ch));
    }

    fn disable(&self, ch: usize) {
        self.io.write_register(CHDR, ch_susp(ch) | ch_ena(ch));
    }

    fn suspend(&self, ch: usize) {
        self.io.write_register(CHER, ch_susp(ch));
    }

    fn unsuspend(&self, ch: usize) {
        self.io.write_register(CHDR, ch_susp(ch));
    }

    fn load_chain(&self, ch: usize, first: u32, stride: Stride) {
        self.ch_write(ch, SADDR, 0);
        self.ch_write(ch, DADDR, 0);
        self.ch_write(ch, CTRLA, 0);
        self.ch_write(ch, CTRLB, 0);
        self.ch_write(ch, DSCR, first);
        let boundary = (u32::from(stride.boundary) & PIP_BOUNDARY_MASK) << PIP_BOUNDARY_SHIFT;
        self.ch_write(
            ch,
            SPIP,
            (u32::from(stride.src_hole) & PIP_HOLE_MASK) | boundary,
        );
        self.ch_write(
            ch,
            DPIP,
            (u32::from(stride.dst_hole) & PIP_HOLE_MASK) | boundary,
        );
    }

    fn link_pointer(&self, ch: usize) -> u32 {
        self.ch_read(ch, DSCR)
    }

    fn control_word(&self, ch: usize) -> u32 {
        self.ch_read(ch, CTRLA)
    }

    fn config(&self, ch: usize) -> u32 {
        self.ch_read(ch, CFG)
    }

    fn set_config(&self, ch: usize, cfg: u32) {
        self.ch_write(ch, CFG, cfg)
    }

    fn channel_config(&self, request_line: Option<u8>) -> u32 {
        match request_line {
            None => CFG_FIFOCFG_HALFFIFO,
            Some(line) => {
                let line = u32::from(line);
                // per-field LSBs in [3:0]/[7:4], MSBs in [11:10]/[15:14]
                let per = (line & 0xf) | (line & 0xf) << 4 | (line >> 4 & 0x3) << 10 | (line >> 4 & 0x3) << 14;
                per | CFG_SRC_H2SEL | CFG_DST_H2SEL | CFG_FIFOCFG_HALFFIFO
            }
        }
    }

    fn snapshot(&self, ch: usize) -> ChannelSnapshot {
        ChannelSnapshot {
            saddr: self.ch_read(ch, SADDR),
            daddr: self.ch_read(ch, DADDR),
            ctrla: self.ch_read(ch, CTRLA),
            ctrlb: self.ch_read(ch, CTRLB),
            dscr: self.ch_read(ch, DSCR),
        }
    }
}
