#![allow(dead_code)]

use std::sync::Arc;

use dma_engine::ahb::*;
use dma_engine::AhbDmac;
use dma_engine::ChannelConfig;
use dma_engine::Controller;
use dma_engine::ControllerConfig;
use dma_engine::ControllerInfo;
use dma_engine::DriverRegistry;
use dma_engine::HeapLinkMemory;
use dma_engine::RegisterIo;
use dma_engine::SlaveBinding;
use spin::Mutex;

pub const LINK_BASE: u32 = 0x2000_0000;
pub const LINK_SLOTS: usize = 256;

const CH_WORDS: usize = CH_REGS_LEN / 4;
const BTSIZE: u32 = 0xffff;

struct Regs {
    en: u32,
    imr: u32,
    isr: u32,
    chsr: u32,
    ch: [[u32; CH_WORDS]; 8],
    /// Channels that ignore disable requests.
    stuck: u32,
    /// Channels whose link pointer moves on every read.
    racing: u32,
    dscr_reads: [u32; 8],
    enables: [usize; 8],
}

/// Register file of an AHB DMA controller with the side effects the driver
/// relies on: enable/suspend bits, read-to-clear interrupt status and the
/// link item fetch when a channel is enabled.
pub struct FakeDmac {
    regs: Mutex<Regs>,
    memory: Arc<HeapLinkMemory>,
}

impl FakeDmac {
    pub fn new(memory: Arc<HeapLinkMemory>) -> FakeDmac {
        FakeDmac {
            regs: Mutex::new(Regs {
                en: 0,
                imr: 0,
                isr: 0,
                chsr: 0,
                ch: [[0; CH_WORDS]; 8],
                stuck: 0,
                racing: 0,
                dscr_reads: [0; 8],
                enables: [0; 8],
            }),
            memory,
        }
    }

    pub fn is_enabled(&self, ch: usize) -> bool {
        self.regs.lock().chsr & ch_ena(ch) != 0
    }

    pub fn is_suspended(&self, ch: usize) -> bool {
        self.regs.lock().chsr & ch_susp(ch) != 0
    }

    pub fn controller_enabled(&self) -> bool {
        self.regs.lock().en & EN_ENABLE != 0
    }

    pub fn irq_mask(&self) -> u32 {
        self.regs.lock().imr
    }

    /// How often the channel went from disabled to enabled.
    pub fn enables(&self, ch: usize) -> usize {
        self.regs.lock().enables[ch]
    }

    pub fn channel_register(&self, ch: usize, reg: usize) -> u32 {
        self.regs.lock().ch[ch][reg / 4]
    }

    /// The engine ran off the end of its chain.
    pub fn finish(&self, ch: usize) {
        let mut r = self.regs.lock();
        r.chsr &= !(ch_ena(ch) | ch_susp(ch));
        r.ch[ch][CTRLA / 4] |= 1 << 31;
        r.isr |= irq_btc(ch) | irq_cbtc(ch);
    }

    /// A cyclic period ended; the channel keeps running.
    pub fn period(&self, ch: usize) {
        self.regs.lock().isr |= irq_btc(ch);
    }

    pub fn fault(&self, ch: usize) {
        self.regs.lock().isr |= irq_err(ch);
    }

    /// Moves the engine to the link item at `item` with `count` source
    /// transfers done.
    pub fn progress(&self, ch: usize, item: u32, count: u32) {
        let mut r = self.regs.lock();
        let lli = self.memory.read_link(item).expect("no link item there");
        r.ch[ch][SADDR / 4] = lli.saddr;
        r.ch[ch][DADDR / 4] = lli.daddr;
        r.ch[ch][CTRLA / 4] = (lli.ctrla & !BTSIZE) | count;
        r.ch[ch][CTRLB / 4] = lli.ctrlb;
        r.ch[ch][DSCR / 4] = lli.dscr;
    }

    pub fn set_stuck(&self, ch: usize, stuck: bool) {
        let mut r = self.regs.lock();
        if stuck {
            r.stuck |= ch_ena(ch);
        } else {
            r.stuck &= !ch_ena(ch);
        }
    }

    /// Makes every link pointer read differ from the previous one, as if
    /// the engine fetched a new item between any two reads.
    pub fn set_racing(&self, ch: usize, racing: bool) {
        let mut r = self.regs.lock();
        if racing {
            r.racing |= ch_ena(ch);
        } else {
            r.racing &= !ch_ena(ch);
        }
    }

    fn fetch(&self, r: &mut Regs, ch: usize) {
        let first = r.ch[ch][DSCR / 4];
        if let Some(lli) = self.memory.read_link(first) {
            r.ch[ch][SADDR / 4] = lli.saddr;
            r.ch[ch][DADDR / 4] = lli.daddr;
            r.ch[ch][CTRLA / 4] = lli.ctrla & !BTSIZE;
            r.ch[ch][CTRLB / 4] = lli.ctrlb;
            r.ch[ch][DSCR / 4] = lli.dscr;
        }
    }
}

impl RegisterIo for FakeDmac {
    fn read_register(&self, offset: usize) -> u32 {
        let mut r = self.regs.lock();
        match offset {
            EN => r.en,
            EBCIMR => r.imr,
            EBCISR => std::mem::take(&mut r.isr),
            CHSR => r.chsr,
            o if o >= CH_REGS_BASE => {
                let o = o - CH_REGS_BASE;
                let (ch, reg) = (o / CH_REGS_LEN, o % CH_REGS_LEN);
                let value = r.ch[ch][reg / 4];
                if reg == DSCR && r.racing & ch_ena(ch) != 0 {
                    r.dscr_reads[ch] += 1;
                    value ^ (r.dscr_reads[ch] & 1) * 0x20
                } else {
                    value
                }
            }
            _ => 0,
        }
    }

    fn write_register(&self, offset: usize, value: u32) {
        let mut r = self.regs.lock();
        match offset {
            EN => {
                r.en = value;
                if value & EN_ENABLE == 0 {
                    // switching the controller off stops every channel
                    let keep = r.stuck;
                    r.chsr &= keep;
                }
            }
            EBCIER => r.imr |= value,
            EBCIDR => r.imr &= !value,
            CHER => {
                for ch in 0..8 {
                    if value & ch_ena(ch) != 0 && r.chsr & ch_ena(ch) == 0 {
                        r.chsr |= ch_ena(ch);
                        r.enables[ch] += 1;
                        self.fetch(&mut r, ch);
                    }
                }
                r.chsr |= value & 0xff00;
            }
            CHDR => {
                let keep = r.stuck;
                r.chsr &= !(value & 0xffff & !keep);
            }
            o if o >= CH_REGS_BASE => {
                let o = o - CH_REGS_BASE;
                r.ch[o / CH_REGS_LEN][(o % CH_REGS_LEN) / 4] = value;
            }
            _ => {}
        }
    }
}

pub struct Rig {
    pub fake: Arc<FakeDmac>,
    pub memory: Arc<HeapLinkMemory>,
    pub registry: Arc<DriverRegistry>,
    pub controller: Arc<Controller>,
}

pub fn rig(max_xfer_count: u32) -> Rig {
    rig_for(&ControllerInfo::AT91SAM9G45, max_xfer_count)
}

pub fn rig_for(info: &ControllerInfo, max_xfer_count: u32) -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();

    let memory = Arc::new(HeapLinkMemory::new(LINK_BASE, LINK_SLOTS));
    let fake = Arc::new(FakeDmac::new(memory.clone()));
    let regs = AhbDmac::new(fake.clone(), 8).with_max_xfer_count(max_xfer_count);
    let registry = Arc::new(DriverRegistry::with_builtin_variants());
    let config = ControllerConfig {
        init_descriptors_per_channel: 8,
        disable_poll_limit: 1000,
        ..Default::default()
    };
    let controller = Controller::new(
        Arc::new(regs),
        memory.clone(),
        info,
        config,
        registry.clone(),
    )
    .unwrap();

    Rig {
        fake,
        memory,
        registry,
        controller: Arc::new(controller),
    }
}

pub fn memcpy_channel() -> ChannelConfig {
    ChannelConfig::default()
}

pub fn slave_channel(request_line: u8) -> ChannelConfig {
    ChannelConfig {
        index: None,
        slave: Some(SlaveBinding {
            request_line,
            per_if: 1,
            mem_if: 0,
            cfg: None,
        }),
    }
}
