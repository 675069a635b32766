//! Completion delivery.
//!
//! Every prepared chain carries a notifier. The engine fires it with the
//! channel lock released, so a callback may call back into the channel (for
//! example to submit a dependent transfer).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::channel::mpsc;
use futures::channel::oneshot;
use spin::Mutex;

use crate::Cookie;

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The controller reported an error while running the chain.
    Fault,
    /// Removed by `terminate_all` or channel close.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A cyclic transfer crossed a period boundary. `index` counts periods
    /// since the transfer started.
    Period { cookie: Cookie, index: u64 },
    Complete { cookie: Cookie, outcome: Outcome },
}

pub type Callback = Box<dyn FnMut(Event) + Send>;

#[derive(Default)]
struct Notifier {
    callback: Option<Callback>,
    done: Option<oneshot::Sender<Outcome>>,
    periods: Option<mpsc::UnboundedSender<u64>>,
    period_index: u64,
    finished: bool,
}

#[derive(Clone, Default)]
pub(crate) struct NotifyHandle(Arc<Mutex<Notifier>>);

impl fmt::Debug for NotifyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0.lock();
        f.debug_struct("NotifyHandle")
            .field("callback", &n.callback.is_some())
            .field("period_index", &n.period_index)
            .field("finished", &n.finished)
            .finish()
    }
}

impl NotifyHandle {
    pub(crate) fn set_callback(&self, callback: Callback) {
        self.0.lock().callback = Some(callback);
    }

    pub(crate) fn completion(&self) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.0.lock().done = Some(tx);
        Completion(rx)
    }

    pub(crate) fn periods(&self) -> mpsc::UnboundedReceiver<u64> {
        let (tx, rx) = mpsc::unbounded();
        self.0.lock().periods = Some(tx);
        rx
    }

    pub(crate) fn period(&self, cookie: Cookie) {
        let (callback, index) = {
            let mut n = self.0.lock();
            if n.finished {
                return;
            }
            let index = n.period_index;
            n.period_index += 1;
            if let Some(tx) = &n.periods {
                // a dropped receiver just means nobody listens
                let _ = tx.unbounded_send(index);
            }
            (n.callback.take(), index)
        };

        // run without the notifier lock; the callback may terminate the
        // channel, which finishes this notifier
        if let Some(mut callback) = callback {
            callback(Event::Period { cookie, index });
            let mut n = self.0.lock();
            if !n.finished && n.callback.is_none() {
                n.callback = Some(callback);
            }
        }
    }

    pub(crate) fn finish(&self, cookie: Cookie, outcome: Outcome) {
        let (callback, done) = {
            let mut n = self.0.lock();
            if n.finished {
                return;
            }
            n.finished = true;
            n.periods = None;
            (n.callback.take(), n.done.take())
        };
        if let Some(mut callback) = callback {
            callback(Event::Complete { cookie, outcome });
        }
        if let Some(done) = done {
            let _ = done.send(outcome);
        }
    }
}

/// Resolves once the transfer finishes. A chain that is dropped without
/// being submitted resolves to [`Outcome::Aborted`].
#[derive(Debug)]
pub struct Completion(oneshot::Receiver<Outcome>);

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        match Pin::new(&mut self.0).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Outcome::Aborted),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn finish_fires_once() {
        let n = NotifyHandle::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        n.set_callback(Box::new(move |ev| {
            assert_eq!(
                ev,
                Event::Complete {
                    cookie: Cookie::MIN,
                    outcome: Outcome::Fault
                }
            );
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let done = n.completion();
        n.finish(Cookie::MIN, Outcome::Fault);
        n.finish(Cookie::MIN, Outcome::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(block_on(done), Outcome::Fault);
    }

    #[test]
    fn periods_count_up_and_stop_on_finish() {
        let n = NotifyHandle::default();
        let mut periods = n.periods();
        n.period(Cookie::MIN);
        n.period(Cookie::MIN);
        n.finish(Cookie::MIN, Outcome::Aborted);
        n.period(Cookie::MIN);
        let seen: Vec<u64> = block_on(periods.by_ref().collect());
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn dropped_notifier_aborts_completion() {
        let n = NotifyHandle::default();
        let done = n.completion();
        drop(n);
        assert_eq!(block_on(done), Outcome::Aborted);
    }
}
