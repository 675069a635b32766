use std::sync::Arc;

use dma_engine::spawn_interrupt_thread;
use dma_engine::AhbDmac;
use dma_engine::ChannelConfig;
use dma_engine::Controller;
use dma_engine::ControllerConfig;
use dma_engine::DmaBuffer;
use dma_engine::DriverRegistry;
use dma_engine::Error;
use dma_engine::Outcome;
use dma_engine::TxFlags;
use dma_engine::UioInterrupt;
use dma_engine::UioRegisters;
use futures::executor::block_on;

fn main() -> Result<(), Error> {
    env_logger::init();

    let link_buffer = Arc::new(DmaBuffer::new("udmabuf0")?);
    let src = DmaBuffer::new("udmabuf1")?;
    let dst = DmaBuffer::new("udmabuf2")?;
    println!("{:?}", link_buffer);
    println!("{:?}", src);
    println!("{:?}", dst);

    // do not use the whole buffer
    let max_items = 4096;
    let items = std::cmp::min(max_items, src.size() / 4);
    let items = std::cmp::min(items, dst.size() / 4);

    let slice_src = &mut src.slice::<u32>()[0..items];
    let slice_dst = &mut dst.slice::<u32>()[0..items];

    for i in slice_dst.iter_mut() {
        *i = 0;
    }

    for i in slice_src.iter_mut() {
        *i = fastrand::u32(..);
    }

    let registry = Arc::new(DriverRegistry::with_builtin_variants());
    let info = *registry
        .lookup("atmel,at91sam9g45-dma")
        .ok_or(Error::NotSupported("controller variant"))?;

    let regs = AhbDmac::new(UioRegisters::new("uio0")?, info.nr_channels);
    let controller = Arc::new(Controller::new(
        Arc::new(regs),
        link_buffer,
        &info,
        ControllerConfig::default(),
        registry,
    )?);
    println!("{:?}", controller);

    let _irq = spawn_interrupt_thread(controller.clone(), UioInterrupt::new("uio0")?);

    let chan = controller.open_channel(ChannelConfig::default())?;
    let tx = chan.prepare_memcpy(src.bus_addr(), dst.bus_addr(), items * 4, TxFlags::CTRL_ACK)?;
    println!("{} descriptors, {} bytes", tx.descriptor_count(), tx.total_len());
    let done = tx.completion();
    let cookie = tx.submit();
    println!("transfer {:?} started", cookie);

    let outcome = block_on(done);
    println!("transfer {:?} done: {:?}", cookie, outcome);
    assert_eq!(outcome, Outcome::Success);

    for i in 0..items {
        assert_eq!(slice_dst[i], slice_src[i]);
    }

    chan.close()?;
    controller.shutdown()?;

    Ok(())
}
