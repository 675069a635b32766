//! Client-facing channel handle.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bitflags::bitflags;
use futures::channel::mpsc;
use spin::Mutex;

use crate::chain;
use crate::chain::Interleaved;
use crate::chain::SgEntry;
use crate::cookie::CookieTracker;
use crate::engine::Notifications;
use crate::notify::Completion;
use crate::notify::Event;
use crate::notify::NotifyHandle;
use crate::notify::Outcome;
use crate::pool::DescState;
use crate::pool::DescriptorPool;
use crate::pool::SlotIndex;
use crate::pool::TxFlags;
use crate::regs::DmaRegisters;
use crate::residue;
use crate::residue::Residue;
use crate::Capabilities;
use crate::ControllerConfig;
use crate::Cookie;
use crate::Direction;
use crate::DriverRegistry;
use crate::Error;
use crate::LinkMemory;
use crate::SlaveBinding;
use crate::SlaveConfig;

bitflags! {
    /// Software status bits of a channel. Hardware enable state is always
    /// read back from the controller.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct ChanStatus: u32 {
        const PAUSED = 1 << 0;
        const CYCLIC = 1 << 1;
        /// Set by the interrupt top half, consumed by the bottom half.
        const ERROR = 1 << 2;
    }
}

/// State of a transfer as seen by [`Channel::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Complete,
    InProgress { residue: usize },
    Paused { residue: usize },
    /// The transfer is not tracked by the channel, or no stable progress
    /// reading could be taken.
    Error,
}

pub(crate) struct ChannelState {
    pub(crate) pool: DescriptorPool,
    pub(crate) queue: VecDeque<SlotIndex>,
    pub(crate) active: VecDeque<SlotIndex>,
    pub(crate) cookies: CookieTracker,
    pub(crate) slave: Option<SlaveConfig>,
    pub(crate) binding: Option<SlaveBinding>,
    pub(crate) saved_cfg: u32,
    pub(crate) saved_dscr: u32,
    pub(crate) open: bool,
}

/// One hardware channel.
///
/// Every operation takes the channel lock for a short, non-blocking
/// critical section. Notifications run after the lock is released, so
/// callbacks may call back into the channel.
pub struct Channel {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) regs: Arc<dyn DmaRegisters>,
    caps: Capabilities,
    config: ControllerConfig,
    registry: Arc<DriverRegistry>,
    status: AtomicU32,
    pub(crate) state: Mutex<ChannelState>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        writeln!(f, "Channel ({})", &self.name)?;
        writeln!(f, "  status: {:?}", self.status_flags())?;
        writeln!(f, "  open: {}", st.open)?;
        writeln!(f, "  active: {}", st.active.len())?;
        writeln!(f, "  queued: {}", st.queue.len())?;
        write!(f, "  descriptors: {} ({} free)", st.pool.len(), st.pool.free_count())
    }
}

impl Channel {
    pub(crate) fn new(
        index: usize,
        regs: Arc<dyn DmaRegisters>,
        memory: Arc<dyn LinkMemory>,
        caps: Capabilities,
        config: &ControllerConfig,
        registry: Arc<DriverRegistry>,
    ) -> Channel {
        Channel {
            index,
            name: format!("dma{}chan{}", config.id, index),
            regs,
            caps,
            config: config.clone(),
            registry,
            status: AtomicU32::new(0),
            state: Mutex::new(ChannelState {
                pool: DescriptorPool::new(memory),
                queue: VecDeque::new(),
                active: VecDeque::new(),
                cookies: CookieTracker::new(),
                slave: None,
                binding: None,
                saved_cfg: 0,
                saved_dscr: 0,
                open: false,
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn status_flags(&self) -> ChanStatus {
        ChanStatus::from_bits_truncate(self.status.load(Ordering::SeqCst))
    }

    /// Sets `flag`, returning whether it was already set.
    pub(crate) fn set_status(&self, flag: ChanStatus) -> bool {
        let old = self.status.fetch_or(flag.bits(), Ordering::SeqCst);
        old & flag.bits() != 0
    }

    /// Clears `flag`, returning whether it was set.
    pub(crate) fn clear_status(&self, flag: ChanStatus) -> bool {
        let old = self.status.fetch_and(!flag.bits(), Ordering::SeqCst);
        old & flag.bits() != 0
    }

    pub fn is_paused(&self) -> bool {
        self.status_flags().contains(ChanStatus::PAUSED)
    }

    pub fn is_cyclic(&self) -> bool {
        self.status_flags().contains(ChanStatus::CYCLIC)
    }

    /// Whether the hardware channel is currently running.
    pub fn is_busy(&self) -> bool {
        self.regs.is_enabled(self.index)
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Allocates the initial descriptor pool and programs the channel
    /// configuration.
    pub(crate) fn open(&self, binding: Option<SlaveBinding>) -> Result<(), Error> {
        log::debug!("{}: alloc_chan_resources", self.name);

        if self.regs.is_enabled(self.index) {
            log::debug!("{}: DMA channel not idle ?", self.name);
            return Err(Error::Busy);
        }

        let mut st = self.state.lock();
        if st.open {
            return Err(Error::ProtocolViolation("channel already open"));
        }
        if let Some(binding) = &binding {
            if !self.caps.contains(Capabilities::SLAVE) {
                return Err(Error::NotSupported("slave transfers"));
            }
            self.registry.claim_request_line(binding.request_line)?;
        }

        let wanted = self.config.init_descriptors_per_channel;
        let allocated = st.pool.populate(wanted);
        if allocated < wanted {
            log::error!("{}: Only {} initial descriptors", self.name, allocated);
        }

        st.cookies.reset();
        let cfg = binding
            .and_then(|b| b.cfg)
            .unwrap_or_else(|| self.regs.channel_config(binding.map(|b| b.request_line)));
        self.regs.set_config(self.index, cfg);
        st.binding = binding;
        st.slave = None;
        st.open = true;

        log::debug!(
            "{}: alloc_chan_resources: allocated {} descriptors",
            self.name,
            allocated
        );
        Ok(())
    }

    /// Terminates everything and gives the descriptor pool back. Fails with
    /// [`Error::Busy`] while prepared chains are still held by the client.
    pub fn close(&self) -> Result<(), Error> {
        log::debug!("{}: free_chan_resources", self.name);
        self.terminate_all()?;

        let mut st = self.state.lock();
        if !st.open {
            return Ok(());
        }
        if st.pool.free_count() != st.pool.len() {
            log::warn!(
                "{}: {} descriptors still prepared",
                self.name,
                st.pool.len() - st.pool.free_count()
            );
            return Err(Error::Busy);
        }
        st.pool.destroy();
        if let Some(binding) = st.binding.take() {
            self.registry.release_request_line(binding.request_line);
        }
        st.slave = None;
        st.open = false;
        self.status.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Sets the peripheral side of slave transfers.
    pub fn configure_slave(&self, config: SlaveConfig) -> Result<(), Error> {
        let mut st = self.state.lock();
        if st.binding.is_none() {
            return Err(Error::InvalidArgument("channel is not bound to a peripheral"));
        }
        config.validate()?;
        st.slave = Some(config);
        Ok(())
    }

    fn prepare_with<F>(self: &Arc<Self>, cap: Capabilities, build: F) -> Result<Prepared, Error>
    where
        F: FnOnce(&mut ChannelState, u32) -> Result<SlotIndex, Error>,
    {
        if !self.caps.contains(cap) {
            return Err(Error::NotSupported("transfer type"));
        }
        let mut st = self.state.lock();
        if !st.open {
            return Err(Error::ProtocolViolation("channel not open"));
        }
        let head = build(&mut *st, self.regs.max_xfer_count())?;
        let notify = NotifyHandle::default();
        st.pool.get_mut(head).notify = Some(notify.clone());
        Ok(Prepared {
            chan: self.clone(),
            head: Some(head),
            notify,
            cyclic: false,
        })
    }

    pub fn prepare_memcpy(self: &Arc<Self>, src: u32, dst: u32, len: usize, flags: TxFlags) -> Result<Prepared, Error> {
        log::trace!(
            "{}: prep_dma_memcpy: d{:#010x} s{:#010x} l{:#x} f{:?}",
            self.name,
            dst,
            src,
            len,
            flags
        );
        self.prepare_with(Capabilities::MEMCPY, |st, max| {
            chain::memcpy(&mut st.pool, max, src, dst, len, flags)
        })
    }

    /// Fills `len` bytes at `dst` with the 32-bit `value`.
    pub fn prepare_memset(self: &Arc<Self>, dst: u32, value: u32, len: usize, flags: TxFlags) -> Result<Prepared, Error> {
        log::trace!(
            "{}: prep_dma_memset: d{:#010x} v{:#010x} l{:#x} f{:?}",
            self.name,
            dst,
            value,
            len,
            flags
        );
        self.prepare_with(Capabilities::MEMSET, |st, max| {
            chain::memset(&mut st.pool, max, dst, value, len, flags)
        })
    }

    pub fn prepare_memset_sg(
        self: &Arc<Self>,
        entries: &[SgEntry],
        value: u32,
        flags: TxFlags,
    ) -> Result<Prepared, Error> {
        log::trace!(
            "{}: prep_dma_memset_sg: v{:#010x} n{} f{:?}",
            self.name,
            value,
            entries.len(),
            flags
        );
        self.prepare_with(Capabilities::MEMSET_SG, |st, max| {
            chain::memset_sg(&mut st.pool, max, entries, value, flags)
        })
    }

    pub fn prepare_interleaved(self: &Arc<Self>, xt: &Interleaved, flags: TxFlags) -> Result<Prepared, Error> {
        self.prepare_with(Capabilities::INTERLEAVE, |st, max| {
            chain::interleaved(&mut st.pool, max, xt, flags)
        })
    }

    fn slave_params(st: &ChannelState) -> Result<(SlaveConfig, SlaveBinding), Error> {
        match (st.slave, st.binding) {
            (Some(sconfig), Some(binding)) => Ok((sconfig, binding)),
            (_, None) => Err(Error::InvalidArgument("channel is not bound to a peripheral")),
            (None, _) => Err(Error::InvalidArgument("slave transfer not configured")),
        }
    }

    pub fn prepare_slave_sg(
        self: &Arc<Self>,
        entries: &[SgEntry],
        direction: Direction,
        flags: TxFlags,
    ) -> Result<Prepared, Error> {
        self.prepare_with(Capabilities::SLAVE, |st, max| {
            let (sconfig, binding) = Self::slave_params(st)?;
            chain::slave_sg(&mut st.pool, max, &sconfig, &binding, entries, direction, flags)
        })
    }

    /// Prepares a transfer looping over `buf_len` bytes at `buf_addr`,
    /// notifying at every `period_len` boundary. Only one cyclic transfer
    /// may be prepared on a channel at a time.
    pub fn prepare_cyclic(
        self: &Arc<Self>,
        buf_addr: u32,
        buf_len: usize,
        period_len: usize,
        direction: Direction,
        flags: TxFlags,
    ) -> Result<Prepared, Error> {
        log::trace!(
            "{}: prep_dma_cyclic: {:?} buf@{:#010x} - {} ({}/{})",
            self.name,
            direction,
            buf_addr,
            buf_len / period_len.max(1),
            buf_len,
            period_len
        );
        if !self.caps.contains(Capabilities::CYCLIC) {
            return Err(Error::NotSupported("cyclic transfers"));
        }
        if self.set_status(ChanStatus::CYCLIC) {
            log::error!("{}: channel currently used", self.name);
            return Err(Error::ProtocolViolation("cyclic transfer already prepared"));
        }

        let prepared = self.prepare_with(Capabilities::CYCLIC, |st, max| {
            let (sconfig, binding) = Self::slave_params(st)?;
            chain::cyclic(
                &mut st.pool,
                max,
                &sconfig,
                &binding,
                buf_addr,
                buf_len,
                period_len,
                direction,
                flags,
            )
        });
        match prepared {
            Ok(mut prepared) => {
                prepared.cyclic = true;
                Ok(prepared)
            }
            Err(e) => {
                self.clear_status(ChanStatus::CYCLIC);
                Err(e)
            }
        }
    }

    fn submit(&self, head: SlotIndex) -> Cookie {
        let mut st = self.state.lock();
        let cookie = st.cookies.assign();
        st.pool.get_mut(head).cookie = cookie;

        if st.active.is_empty() {
            if self.dostart(&mut st, head) {
                log::debug!("{}: tx_submit: started {}", self.name, cookie);
            } else {
                log::debug!("{}: tx_submit: deferred {}", self.name, cookie);
            }
            st.pool.get_mut(head).state = DescState::Active;
            st.active.push_back(head);
        } else {
            log::debug!("{}: tx_submit: queued {}", self.name, cookie);
            st.pool.get_mut(head).state = DescState::Queued;
            st.queue.push_back(head);
        }
        cookie
    }

    /// Pushes submitted work to the hardware and retires anything finished.
    pub fn issue_pending(&self) {
        log::trace!("{}: issue_pending", self.name);
        let mut out = Notifications::new();
        {
            let mut st = self.state.lock();
            // the channel never goes idle in cyclic mode
            if self.running_cyclic(&st) {
                return;
            }
            self.advance_work(&mut st, &mut out);
        }
        out.fire();
    }

    /// Marks a retired chain whose flags lacked `CTRL_ACK` as reusable.
    pub fn ack(&self, cookie: Cookie) -> bool {
        self.state.lock().pool.ack(cookie)
    }

    pub fn bytes_remaining(&self, cookie: Cookie) -> Result<Residue, Error> {
        let st = self.state.lock();
        residue::bytes_left(
            self.regs.as_ref(),
            self.index,
            &st,
            cookie,
            self.config.max_residue_trials,
        )
    }

    pub fn status(&self, cookie: Cookie) -> TxStatus {
        let st = self.state.lock();
        if st.cookies.is_complete(cookie) {
            return TxStatus::Complete;
        }

        let residue = residue::bytes_left(
            self.regs.as_ref(),
            self.index,
            &st,
            cookie,
            self.config.max_residue_trials,
        );
        match residue {
            Ok(Residue::Bytes(residue)) if self.is_paused() => TxStatus::Paused { residue },
            Ok(Residue::Bytes(residue)) => TxStatus::InProgress { residue },
            Ok(Residue::Stale) | Err(_) => {
                log::debug!("{}: get residual bytes error", self.name);
                TxStatus::Error
            }
        }
    }

    pub fn last_cookies(&self) -> (Cookie, Cookie) {
        let st = self.state.lock();
        (st.cookies.last_completed(), st.cookies.last_used())
    }

    /// Suspends the hardware channel. Lists are left alone.
    pub fn pause(&self) {
        log::debug!("{}: pause", self.name);
        let _st = self.state.lock();
        self.regs.suspend(self.index);
        self.set_status(ChanStatus::PAUSED);
    }

    /// Undoes [`pause`](Self::pause); a no-op on a running channel.
    pub fn resume(&self) {
        log::debug!("{}: resume", self.name);
        let _st = self.state.lock();
        if !self.is_paused() {
            return;
        }
        self.regs.unsuspend(self.index);
        self.clear_status(ChanStatus::PAUSED);
    }

    /// Stops the hardware channel and completes every active and queued
    /// chain with [`Outcome::Aborted`].
    ///
    /// Fails with [`Error::Timeout`] if the channel does not report disabled
    /// within the configured number of polls; the lists are untouched then.
    pub fn terminate_all(&self) -> Result<(), Error> {
        log::debug!("{}: terminate_all", self.name);
        let mut out = Notifications::new();
        {
            let mut st = self.state.lock();
            // disabling also clears a pending suspend
            self.regs.disable(self.index);

            let mut polls = 0;
            while self.regs.is_enabled(self.index) {
                polls += 1;
                if polls >= self.config.disable_poll_limit {
                    log::error!("{}: channel did not stop", self.name);
                    return Err(Error::Timeout);
                }
                std::hint::spin_loop();
            }

            self.clear_status(ChanStatus::PAUSED | ChanStatus::CYCLIC);

            let mut doomed = std::mem::take(&mut st.active);
            doomed.append(&mut st.queue);
            for head in doomed {
                self.chain_complete(&mut st, head, Outcome::Aborted, &mut out);
            }
        }
        out.fire();
        Ok(())
    }

    /// Whether a cyclic chain is what the hardware is running.
    pub(crate) fn streams_cyclic(&self) -> bool {
        let st = self.state.lock();
        self.running_cyclic(&st)
    }

    pub(crate) fn suspend_cyclic(&self) {
        if !self.is_paused() {
            log::warn!(
                "{}: cyclic channel not paused, should be done by channel user",
                self.name
            );
            self.pause();
        }
        // the channel is suspended, so the link pointer is stable
        let mut st = self.state.lock();
        st.saved_dscr = self.regs.link_pointer(self.index);
    }

    pub(crate) fn save_config(&self) {
        let mut st = self.state.lock();
        st.saved_cfg = self.regs.config(self.index);
    }

    pub(crate) fn restore(&self) {
        let st = self.state.lock();
        self.regs.set_config(self.index, st.saved_cfg);
        if self.running_cyclic(&st) {
            // restart where the stream left off
            self.regs.load_chain(self.index, st.saved_dscr, Default::default());
            self.regs.enable(self.index);
        }
    }
}

/// A prepared, unsubmitted chain.
///
/// Dropping it without calling [`submit`](Self::submit) returns its
/// descriptors to the channel.
pub struct Prepared {
    chan: Arc<Channel>,
    head: Option<SlotIndex>,
    notify: NotifyHandle,
    cyclic: bool,
}

impl fmt::Debug for Prepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prepared")
            .field("channel", &self.chan.name)
            .field("cyclic", &self.cyclic)
            .finish()
    }
}

impl Prepared {
    /// Installs a callback for completion and period events.
    pub fn on_event<F>(self, callback: F) -> Prepared
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.notify.set_callback(Box::new(callback));
        self
    }

    /// Future resolving with the transfer's outcome.
    pub fn completion(&self) -> Completion {
        self.notify.completion()
    }

    /// Stream of period indices of a cyclic transfer.
    pub fn periods(&self) -> mpsc::UnboundedReceiver<u64> {
        self.notify.periods()
    }

    pub fn total_len(&self) -> usize {
        match self.head {
            Some(head) => self.chan.state.lock().pool.get(head).total_len,
            None => 0,
        }
    }

    pub fn descriptor_count(&self) -> usize {
        match self.head {
            Some(head) => 1 + self.chan.state.lock().pool.get(head).children.len(),
            None => 0,
        }
    }

    /// Assigns a cookie and hands the chain to the channel. An idle channel
    /// starts it at once; otherwise it is queued.
    pub fn submit(mut self) -> Cookie {
        match self.head.take() {
            Some(head) => self.chan.submit(head),
            None => Cookie::NONE,
        }
    }
}

impl Drop for Prepared {
    fn drop(&mut self) {
        if let Some(head) = self.head.take() {
            self.chan.state.lock().pool.release(head);
            if self.cyclic {
                self.chan.clear_status(ChanStatus::CYCLIC);
            }
        }
    }
}
