use std::fmt;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::channel::ChanStatus;
use crate::regs::DmaRegisters;
use crate::Capabilities;
use crate::Channel;
use crate::ChannelConfig;
use crate::ControllerConfig;
use crate::ControllerInfo;
use crate::DriverRegistry;
use crate::Error;
use crate::LinkMemory;

/// A DMA controller and its channels.
///
/// Interrupt handling is split in two: [`on_interrupt`](Self::on_interrupt)
/// is the top half, which only reads status and flags channels, and
/// [`run_bottom_half`](Self::run_bottom_half) does the list work for every
/// flagged channel. [`service`](Self::service) runs both.
pub struct Controller {
    regs: Arc<dyn DmaRegisters>,
    info: ControllerInfo,
    config: ControllerConfig,
    channels: Vec<Arc<Channel>>,
    scheduled: AtomicU32,
    saved_imr: AtomicU32,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Controller ({})", self.info.compatible)?;
        writeln!(f, "  id: {}", self.config.id)?;
        writeln!(f, "  channels: {}", self.channels.len())?;
        write!(f, "  scheduled: {:#x}", self.scheduled.load(Ordering::SeqCst))
    }
}

impl Controller {
    /// Resets the controller and brings up `info.nr_channels` channels
    /// whose link items live in `memory`.
    pub fn new(
        regs: Arc<dyn DmaRegisters>,
        memory: Arc<dyn LinkMemory>,
        info: &ControllerInfo,
        config: ControllerConfig,
        registry: Arc<DriverRegistry>,
    ) -> Result<Controller, Error> {
        if info.nr_channels == 0 || info.nr_channels > regs.channel_count() {
            return Err(Error::InvalidArgument("channel count"));
        }

        let controller = Controller {
            channels: (0..info.nr_channels)
                .map(|i| {
                    Arc::new(Channel::new(
                        i,
                        regs.clone(),
                        memory.clone(),
                        info.caps,
                        &config,
                        registry.clone(),
                    ))
                })
                .collect(),
            regs,
            info: *info,
            config,
            scheduled: AtomicU32::new(0),
            saved_imr: AtomicU32::new(0),
        };

        // force a clean state
        controller.off()?;
        controller.regs.controller_on();
        controller.drain_status();
        for i in 0..controller.channels.len() {
            controller.regs.unmask_channel_irqs(i);
        }

        log::info!(
            "dma{}: {} controller ( {}{}{}), {} channels",
            controller.config.id,
            info.compatible,
            if info.caps.contains(Capabilities::MEMCPY) { "cpy " } else { "" },
            if info.caps.contains(Capabilities::MEMSET) { "set " } else { "" },
            if info.caps.contains(Capabilities::SLAVE) { "slave " } else { "" },
            info.nr_channels
        );
        Ok(controller)
    }

    pub fn info(&self) -> &ControllerInfo {
        &self.info
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    /// Opens a specific channel, or the first closed one.
    pub fn open_channel(&self, config: ChannelConfig) -> Result<Arc<Channel>, Error> {
        let chan = match config.index {
            Some(i) => self
                .channels
                .get(i)
                .ok_or(Error::InvalidArgument("no such channel"))?,
            None => self
                .channels
                .iter()
                .find(|c| !c.is_open())
                .ok_or(Error::Busy)?,
        };
        chan.open(config.slave)?;
        Ok(chan.clone())
    }

    /// Interrupt top half. Returns whether any channel had a pending
    /// interrupt.
    pub fn on_interrupt(&self) -> bool {
        let mut handled = false;
        loop {
            let pending = self.regs.pending_irqs();
            if pending.is_empty() {
                break;
            }
            handled = true;

            for (i, chan) in self.channels.iter().enumerate() {
                if !pending.touches(i) {
                    continue;
                }
                if pending.is_error(i) {
                    // stop the channel on bus error
                    self.regs.disable(i);
                    chan.set_status(ChanStatus::ERROR);
                }
                self.scheduled.fetch_or(1 << i, Ordering::SeqCst);
            }
        }
        handled
    }

    /// Runs the deferred work of every channel flagged by
    /// [`on_interrupt`](Self::on_interrupt).
    pub fn run_bottom_half(&self) {
        let mut pending = self.scheduled.swap(0, Ordering::SeqCst);
        while pending != 0 {
            let i = pending.trailing_zeros() as usize;
            pending &= pending - 1;
            if let Some(chan) = self.channels.get(i) {
                chan.tasklet();
            }
        }
    }

    pub fn service(&self) -> bool {
        let handled = self.on_interrupt();
        self.run_bottom_half();
        handled
    }

    fn drain_status(&self) {
        for _ in 0..self.config.disable_poll_limit {
            if self.regs.raw_irq_status() == 0 {
                return;
            }
        }
        log::warn!("dma{}: interrupt status did not clear", self.config.id);
    }

    fn off(&self) -> Result<(), Error> {
        self.regs.controller_off();
        let mut polls = 0;
        while self.regs.any_channel_enabled() {
            polls += 1;
            if polls >= self.config.disable_poll_limit {
                log::error!("dma{}: channels did not stop", self.config.id);
                return Err(Error::Timeout);
            }
            std::hint::spin_loop();
        }
        Ok(())
    }

    /// Refuses to suspend while a non-cyclic channel is still running.
    pub fn prepare_suspend(&self) -> Result<(), Error> {
        for chan in &self.channels {
            if chan.is_busy() && !chan.streams_cyclic() {
                return Err(Error::Busy);
            }
        }
        Ok(())
    }

    /// Saves channel state and switches the controller off. Cyclic streams
    /// are parked and restarted by [`resume`](Self::resume).
    pub fn suspend(&self) -> Result<(), Error> {
        for chan in &self.channels {
            if chan.streams_cyclic() {
                chan.suspend_cyclic();
            }
            chan.save_config();
        }
        self.saved_imr.store(self.regs.irq_mask(), Ordering::SeqCst);
        self.off()
    }

    pub fn resume(&self) {
        self.regs.controller_on();
        // clear any pending interrupt
        self.drain_status();
        self.regs.set_irq_mask(self.saved_imr.load(Ordering::SeqCst));
        for chan in &self.channels {
            chan.restore();
        }
    }

    /// Terminates every channel and switches the controller off.
    pub fn shutdown(&self) -> Result<(), Error> {
        for chan in &self.channels {
            chan.terminate_all()?;
        }
        self.regs.mask_all_irqs();
        self.off()
    }
}
