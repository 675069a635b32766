mod common;

use std::sync::Arc;

use dma_engine::ahb::DSCR;
use dma_engine::ChannelConfig;
use dma_engine::Cookie;
use dma_engine::Error;
use dma_engine::Event;
use dma_engine::Outcome;
use dma_engine::Residue;
use dma_engine::TxFlags;
use dma_engine::TxStatus;
use futures::executor::block_on;
use spin::Mutex;

use common::memcpy_channel;
use common::rig;

fn recorder(log: &Arc<Mutex<Vec<(Cookie, Outcome)>>>) -> impl FnMut(Event) + Send + 'static {
    let log = log.clone();
    move |ev| {
        if let Event::Complete { cookie, outcome } = ev {
            log.lock().push((cookie, outcome));
        }
    }
}

#[test]
fn memcpy_chain_is_split_at_hardware_maximum() {
    let rig = rig(1024);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();

    let tx = chan
        .prepare_memcpy(0x8000_0000, 0x9000_0000, 10_000, TxFlags::CTRL_ACK)
        .unwrap();
    assert_eq!(tx.descriptor_count(), 3);
    assert_eq!(tx.total_len(), 10_000);
    tx.submit();

    // the engine fetched the head, so the link pointer names the second item
    let second = rig.fake.channel_register(chan.index(), DSCR);
    let second = rig.memory.read_link(second).unwrap();
    assert!(!second.eol());
    assert_eq!((second.xfer_count() as usize) << second.src_width(), 4096);

    let third = rig.memory.read_link(second.next_descriptor()).unwrap();
    assert!(third.eol());
    assert_eq!(third.next_descriptor(), 0);
    assert_eq!((third.xfer_count() as usize) << third.src_width(), 1808);
}

#[test]
fn second_transfer_waits_then_starts_from_interrupt() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = chan
        .prepare_memcpy(0x1000, 0x10_0000, 256, TxFlags::CTRL_ACK)
        .unwrap()
        .on_event(recorder(&log));
    let b = chan
        .prepare_memcpy(0x2000, 0x20_0000, 512, TxFlags::CTRL_ACK)
        .unwrap()
        .on_event(recorder(&log));

    let ca = a.submit();
    assert!(rig.fake.is_enabled(0));
    assert_eq!(rig.fake.enables(0), 1);

    let cb = b.submit();
    assert!(cb > ca);
    assert_eq!(rig.fake.enables(0), 1);
    assert_eq!(chan.status(ca), TxStatus::InProgress { residue: 256 });
    assert_eq!(chan.status(cb), TxStatus::InProgress { residue: 512 });

    rig.fake.finish(0);
    assert!(rig.controller.service());
    assert_eq!(rig.fake.enables(0), 2);
    assert!(rig.fake.is_enabled(0));
    assert_eq!(chan.status(ca), TxStatus::Complete);
    assert_eq!(chan.status(cb), TxStatus::InProgress { residue: 512 });

    rig.fake.finish(0);
    assert!(rig.controller.service());
    assert_eq!(chan.status(cb), TxStatus::Complete);
    assert!(!rig.fake.is_enabled(0));

    assert_eq!(
        *log.lock(),
        vec![(ca, Outcome::Success), (cb, Outcome::Success)]
    );
}

#[test]
fn completions_keep_submission_order() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut cookies = Vec::new();
    for i in 0..6u32 {
        let len = 4 * fastrand::usize(1..2048);
        let tx = chan
            .prepare_memcpy(0x10_0000 * (i + 1), 0x4000_0000 + 0x10_0000 * i, len, TxFlags::CTRL_ACK)
            .unwrap()
            .on_event(recorder(&log));
        cookies.push(tx.submit());
    }
    assert!(cookies.windows(2).all(|w| w[0] < w[1]));

    for _ in 0..cookies.len() {
        rig.fake.finish(0);
        rig.controller.service();
    }

    let seen: Vec<Cookie> = log.lock().iter().map(|(c, _)| *c).collect();
    assert_eq!(seen, cookies);
    for c in cookies {
        assert_eq!(chan.status(c), TxStatus::Complete);
    }
}

#[test]
fn residue_follows_the_chain() {
    let rig = rig(1024);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();

    let c = chan
        .prepare_memcpy(0x8000_0000, 0x9000_0000, 10_000, TxFlags::CTRL_ACK)
        .unwrap()
        .submit();
    assert_eq!(chan.bytes_remaining(c).unwrap(), Residue::Bytes(10_000));

    let second = rig.fake.channel_register(0, DSCR);
    let third = rig.memory.read_link(second).unwrap().next_descriptor();

    // second item in flight
    let count = fastrand::u32(0..=1024);
    rig.fake.progress(0, second, count);
    assert_eq!(
        chan.bytes_remaining(c).unwrap(),
        Residue::Bytes(10_000 - 4096 - 4 * count as usize)
    );

    // last item in flight
    rig.fake.progress(0, third, 2);
    assert_eq!(chan.bytes_remaining(c).unwrap(), Residue::Bytes(10_000 - 8192 - 8));
    assert_eq!(chan.status(c), TxStatus::InProgress { residue: 1800 });

    rig.fake.finish(0);
    rig.controller.service();
    assert_eq!(chan.bytes_remaining(c).unwrap(), Residue::Stale);
    assert_eq!(chan.status(c), TxStatus::Complete);
}

#[test]
fn queued_transfer_reports_full_residue() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();

    chan.prepare_memcpy(0x1000, 0x2000, 64, TxFlags::CTRL_ACK)
        .unwrap()
        .submit();
    let c = chan
        .prepare_memcpy(0x3000, 0x4000, 3000, TxFlags::CTRL_ACK)
        .unwrap()
        .submit();
    assert_eq!(chan.bytes_remaining(c).unwrap(), Residue::Bytes(3000));
}

#[test]
fn callback_may_submit_follow_up() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();
    let submitted = Arc::new(Mutex::new(None));

    let follow_up = chan
        .prepare_memcpy(0x5000, 0x6000, 128, TxFlags::CTRL_ACK)
        .unwrap();
    let follow_done = follow_up.completion();

    let mut pending = Some(follow_up);
    let slot = submitted.clone();
    let first = chan
        .prepare_memcpy(0x1000, 0x2000, 128, TxFlags::CTRL_ACK)
        .unwrap()
        .on_event(move |ev| {
            if let Event::Complete { .. } = ev {
                if let Some(tx) = pending.take() {
                    *slot.lock() = Some(tx.submit());
                }
            }
        });
    let first_done = first.completion();
    first.submit();

    rig.fake.finish(0);
    rig.controller.service();
    assert_eq!(block_on(first_done), Outcome::Success);

    let second = submitted.lock().expect("callback did not run");
    assert!(rig.fake.is_enabled(0));
    assert_eq!(rig.fake.enables(0), 2);

    rig.fake.finish(0);
    rig.controller.service();
    assert_eq!(block_on(follow_done), Outcome::Success);
    assert_eq!(chan.status(second), TxStatus::Complete);
}

#[test]
fn issue_pending_retires_finished_work_without_interrupt() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();

    let tx = chan.prepare_memcpy(0x1000, 0x2000, 64, TxFlags::CTRL_ACK).unwrap();
    let done = tx.completion();
    let c = tx.submit();

    chan.issue_pending();
    assert_eq!(chan.status(c), TxStatus::InProgress { residue: 64 });

    rig.fake.finish(0);
    chan.issue_pending();
    assert_eq!(chan.status(c), TxStatus::Complete);
    assert_eq!(block_on(done), Outcome::Success);
}

#[test]
fn dropped_prepared_chain_is_returned() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();

    let tx = chan.prepare_memcpy(0x1000, 0x2000, 64, TxFlags::CTRL_ACK).unwrap();
    let done = tx.completion();
    assert!(matches!(chan.close(), Err(Error::Busy)));

    drop(tx);
    assert_eq!(block_on(done), Outcome::Aborted);
    chan.close().unwrap();
    assert!(!chan.is_open());
}

#[test]
fn zero_length_is_rejected() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();
    assert!(matches!(
        chan.prepare_memcpy(0x1000, 0x2000, 0, TxFlags::CTRL_ACK),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn unacked_transfer_can_be_acked_after_completion() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();

    let c = chan
        .prepare_memcpy(0x1000, 0x2000, 64, TxFlags::PREP_INTERRUPT)
        .unwrap()
        .submit();
    rig.fake.finish(0);
    rig.controller.service();

    assert!(chan.ack(c));
    assert!(!chan.ack(Cookie::from_raw(c.raw() + 100)));
}

#[test]
fn channel_open_rules() {
    let rig = rig(0xffff);
    let config = ChannelConfig {
        index: Some(2),
        slave: None,
    };
    let chan = rig.controller.open_channel(config).unwrap();
    assert_eq!(chan.index(), 2);
    assert_eq!(chan.name(), "dma0chan2");
    assert!(matches!(
        rig.controller.open_channel(config),
        Err(Error::ProtocolViolation(_))
    ));
    assert!(matches!(
        rig.controller.open_channel(ChannelConfig {
            index: Some(9),
            slave: None
        }),
        Err(Error::InvalidArgument(_))
    ));

    chan.close().unwrap();
    assert!(matches!(
        chan.prepare_memcpy(0x1000, 0x2000, 64, TxFlags::CTRL_ACK),
        Err(Error::ProtocolViolation(_))
    ));
    rig.controller.open_channel(config).unwrap();
}

#[test]
fn unstable_progress_reading_reports_error() {
    let rig = rig(1024);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();

    let c = chan
        .prepare_memcpy(0x8000_0000, 0x9000_0000, 10_000, TxFlags::CTRL_ACK)
        .unwrap()
        .submit();

    rig.fake.set_racing(0, true);
    assert!(matches!(chan.bytes_remaining(c), Err(Error::Timeout)));
    assert_eq!(chan.status(c), TxStatus::Error);

    rig.fake.set_racing(0, false);
    assert_eq!(chan.status(c), TxStatus::InProgress { residue: 10_000 });
}

#[test]
fn unsubmitted_cookies_are_never_complete() {
    let rig = rig(0xffff);
    let chan = rig.controller.open_channel(memcpy_channel()).unwrap();
    chan.prepare_memcpy(0x1000, 0x2000, 64, TxFlags::CTRL_ACK)
        .unwrap()
        .submit();
    rig.fake.finish(0);
    rig.controller.service();

    assert_eq!(chan.status(Cookie::PENDING), TxStatus::Error);
    assert_eq!(chan.status(Cookie::NONE), TxStatus::Error);
}
