//! Dispatch, advance and error handling of a channel's chains.
//!
//! Everything here runs with the channel lock held. Client notifications
//! are collected into a [`Notifications`] batch and fired by the caller once
//! the lock is dropped.

use crate::channel::ChanStatus;
use crate::channel::Channel;
use crate::channel::ChannelState;
use crate::notify::NotifyHandle;
use crate::notify::Outcome;
use crate::pool::DescState;
use crate::pool::SlotIndex;
use crate::Cookie;
use crate::Error;

enum Notification {
    Period {
        cookie: Cookie,
        notify: NotifyHandle,
    },
    Complete {
        cookie: Cookie,
        outcome: Outcome,
        notify: NotifyHandle,
    },
}

/// Notifications gathered under the channel lock.
#[derive(Default)]
#[must_use = "notifications must be fired once the channel lock is released"]
pub(crate) struct Notifications(Vec<Notification>);

impl Notifications {
    pub(crate) fn new() -> Notifications {
        Notifications::default()
    }

    fn period(&mut self, cookie: Cookie, notify: Option<NotifyHandle>) {
        if let Some(notify) = notify {
            self.0.push(Notification::Period { cookie, notify });
        }
    }

    fn complete(&mut self, cookie: Cookie, outcome: Outcome, notify: Option<NotifyHandle>) {
        if let Some(notify) = notify {
            self.0.push(Notification::Complete {
                cookie,
                outcome,
                notify,
            });
        }
    }

    /// Runs client callbacks in the order they were collected.
    pub(crate) fn fire(self) {
        for n in self.0 {
            match n {
                Notification::Period { cookie, notify } => notify.period(cookie),
                Notification::Complete {
                    cookie,
                    outcome,
                    notify,
                } => notify.finish(cookie, outcome),
            }
        }
    }
}

impl Channel {
    /// Programs the head of a chain into the idle hardware channel.
    /// Returns whether the chain was armed; a chain left unarmed is started
    /// by the next [`advance_work`](Self::advance_work).
    pub(crate) fn dostart(&self, st: &mut ChannelState, head: SlotIndex) -> bool {
        if self.regs.is_enabled(self.index) {
            log::error!("{}: BUG: attempted to start non-idle channel", self.name);
            log::error!("{}:   channel: {}", self.name, self.regs.snapshot(self.index));
            self.dump_chain(st, head);
            st.pool.get_mut(head).armed = false;
            return false;
        }

        let desc = st.pool.get_mut(head);
        log::trace!(
            "{}: dostart cookie {} at {:#010x}",
            self.name,
            desc.cookie,
            desc.phys
        );
        self.regs.load_chain(self.index, desc.phys, desc.stride);
        self.regs.enable(self.index);
        desc.armed = true;
        true
    }

    /// Whether the chain at the head of `active` is a running cyclic one.
    pub(crate) fn running_cyclic(&self, st: &ChannelState) -> bool {
        self.is_cyclic()
            && st
                .active
                .front()
                .map_or(false, |&head| st.pool.get(head).cyclic)
    }

    fn dump_chain(&self, st: &ChannelState, head: SlotIndex) {
        for desc in st.pool.chain(head) {
            log::error!(
                "{}:   desc: s{:#010x} d{:#010x} ctrl{:#010x}:{:#010x} l{:#010x}",
                self.name,
                desc.lli.saddr,
                desc.lli.daddr,
                desc.lli.ctrla,
                desc.lli.ctrlb,
                desc.lli.dscr
            );
        }
    }

    /// Retires one chain: marks its cookie complete, returns it to the pool
    /// and schedules its completion notification.
    pub(crate) fn chain_complete(
        &self,
        st: &mut ChannelState,
        head: SlotIndex,
        outcome: Outcome,
        out: &mut Notifications,
    ) {
        let desc = st.pool.get(head);
        let cookie = desc.cookie;
        let notify = desc.notify.clone();
        log::debug!("{}: descriptor {} complete ({:?})", self.name, cookie, outcome);

        st.cookies.complete(cookie);
        st.pool.release(head);
        out.complete(cookie, outcome, notify);
    }

    /// Moves the queue to active, starting its first chain, then retires
    /// everything that was active before.
    pub(crate) fn complete_all(&self, st: &mut ChannelState, out: &mut Notifications) {
        log::debug!("{}: complete all", self.name);

        // start the queue first so the hardware idles as little as possible
        if let Some(&first) = st.queue.front() {
            self.dostart(st, first);
        }
        let queued = std::mem::take(&mut st.queue);
        for &idx in &queued {
            st.pool.get_mut(idx).state = DescState::Active;
        }
        let done = std::mem::replace(&mut st.active, queued);

        for head in done {
            self.chain_complete(st, head, Outcome::Success, out);
        }
    }

    /// Retires finished work once the hardware channel is idle.
    pub(crate) fn advance_work(&self, st: &mut ChannelState, out: &mut Notifications) {
        log::trace!("{}: advance_work", self.name);
        if self.regs.is_enabled(self.index) {
            return;
        }

        // a head the hardware never started is not finished
        if let Some(&head) = st.active.front() {
            if !st.pool.get(head).armed {
                log::debug!("{}: starting deferred chain {}", self.name, st.pool.get(head).cookie);
                self.dostart(st, head);
                return;
            }
        }

        if st.active.len() <= 1 {
            self.complete_all(st, out);
        } else if let Some(head) = st.active.pop_front() {
            self.chain_complete(st, head, Outcome::Success, out);
            if let Some(&next) = st.active.front() {
                self.dostart(st, next);
            }
        }
    }

    /// Drops the faulted chain and restarts the hardware on whatever
    /// follows it. The faulted chain still completes, with
    /// [`Outcome::Fault`].
    pub(crate) fn handle_error(&self, st: &mut ChannelState, out: &mut Notifications) {
        let Some(bad) = st.active.pop_front() else {
            log::warn!("{}: error interrupt with nothing active", self.name);
            return;
        };

        // the chain is gone, so a cyclic channel stops being cyclic
        if st.pool.get(bad).cyclic && self.clear_status(ChanStatus::CYCLIC) {
            log::debug!("{}: cyclic transfer aborted by error", self.name);
        }

        let queued = std::mem::take(&mut st.queue);
        for idx in queued {
            st.pool.get_mut(idx).state = DescState::Active;
            st.active.push_back(idx);
        }
        // the top half disabled the channel, so it can be restarted
        if let Some(&first) = st.active.front() {
            self.dostart(st, first);
        }

        let cookie = st.pool.get(bad).cookie;
        log::error!("{}: {}", self.name, Error::HardwareFault { cookie });
        log::error!("{}:   cookie: {}", self.name, cookie);
        self.dump_chain(st, bad);

        self.chain_complete(st, bad, Outcome::Fault, out);
    }

    /// Period boundary of a cyclic transfer; the chain stays active.
    pub(crate) fn handle_cyclic(&self, st: &ChannelState, out: &mut Notifications) {
        let Some(&head) = st.active.front() else {
            return;
        };
        let desc = st.pool.get(head);
        log::trace!("{}: new cyclic period llp {:#010x}", self.name, self.regs.link_pointer(self.index));
        out.period(desc.cookie, desc.notify.clone());
    }

    /// Bottom half for this channel.
    pub(crate) fn tasklet(&self) {
        let mut out = Notifications::new();
        {
            let mut st = self.state.lock();
            if self.clear_status(ChanStatus::ERROR) {
                self.handle_error(&mut st, &mut out);
            } else if self.running_cyclic(&st) {
                self.handle_cyclic(&st, &mut out);
            } else {
                self.advance_work(&mut st, &mut out);
            }
        }
        out.fire();
    }
}
