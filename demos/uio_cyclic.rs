use std::sync::Arc;

use dma_engine::serve;
use dma_engine::AhbDmac;
use dma_engine::AsyncUioInterrupt;
use dma_engine::BusWidth;
use dma_engine::ChannelConfig;
use dma_engine::Controller;
use dma_engine::ControllerConfig;
use dma_engine::ControllerInfo;
use dma_engine::Direction;
use dma_engine::DmaBuffer;
use dma_engine::DriverRegistry;
use dma_engine::Error;
use dma_engine::SlaveBinding;
use dma_engine::SlaveConfig;
use dma_engine::TxFlags;
use dma_engine::UioRegisters;
use futures::FutureExt;
use futures::StreamExt;

const PERIODS: u64 = 64;

fn main() -> Result<(), Error> {
    env_logger::init();

    let link_buffer = Arc::new(DmaBuffer::new("udmabuf0")?);
    let ring = DmaBuffer::new("udmabuf1")?;
    println!("{:?}", link_buffer);
    println!("{:?}", ring);

    let info = ControllerInfo::AT91SAM9G45;
    let regs = AhbDmac::new(UioRegisters::new("uio0")?, info.nr_channels);
    let controller = Arc::new(Controller::new(
        Arc::new(regs),
        link_buffer,
        &info,
        ControllerConfig::default(),
        Arc::new(DriverRegistry::with_builtin_variants()),
    )?);

    // SSC receive holding register, request line 6
    let chan = controller.open_channel(ChannelConfig {
        index: None,
        slave: Some(SlaveBinding {
            request_line: 6,
            per_if: 1,
            mem_if: 0,
            cfg: None,
        }),
    })?;
    chan.configure_slave(SlaveConfig {
        src_addr: 0xf000_4020,
        src_addr_width: BusWidth::Bytes2,
        src_maxburst: 1,
        dst_maxburst: 1,
        ..Default::default()
    })?;

    let buf_len = std::cmp::min(ring.size(), 64 * 1024);
    let period_len = buf_len / 4;
    let tx = chan.prepare_cyclic(ring.bus_addr(), buf_len, period_len, Direction::DevToMem, TxFlags::empty())?;
    let mut periods = tx.periods();
    tx.submit();
    println!("cyclic transfer started, {} byte periods", period_len);

    let irq = AsyncUioInterrupt::new("uio0")?;
    async_io::block_on(async {
        let mut server = Box::pin(serve(controller.clone(), irq).fuse());
        let mut seen = 0;
        while seen < PERIODS {
            futures::select! {
                r = server => return r,
                p = periods.next() => match p {
                    Some(p) => {
                        println!("period {}", p);
                        seen += 1;
                    }
                    None => break,
                },
            }
        }
        Ok(())
    })?;

    chan.terminate_all()?;
    chan.close()?;
    controller.shutdown()?;

    Ok(())
}
