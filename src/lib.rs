pub mod ahb;
mod chain;
mod channel;
mod config;
mod controller;
mod cookie;
mod dma_buffer;
mod engine;
mod error;
pub mod lli;
mod memory;
mod notify;
mod pool;
mod registry;
pub mod regs;
mod residue;
mod uio;

#[cfg(feature = "async")]
mod uio_async;

pub use ahb::AhbDmac;
pub use chain::Chunk;
pub use chain::Interleaved;
pub use chain::SgEntry;
pub use channel::Channel;
pub use channel::Prepared;
pub use channel::TxStatus;
pub use config::BusWidth;
pub use config::Capabilities;
pub use config::ChannelConfig;
pub use config::ControllerConfig;
pub use config::ControllerInfo;
pub use config::Direction;
pub use config::SlaveBinding;
pub use config::SlaveConfig;
pub use controller::Controller;
pub use cookie::Cookie;
pub use dma_buffer::DmaBuffer;
pub use error::Error;
pub use memory::HeapLinkMemory;
pub use memory::LinkMemory;
pub use notify::Callback;
pub use notify::Completion;
pub use notify::Event;
pub use notify::Outcome;
pub use pool::TxFlags;
pub use registry::DriverRegistry;
pub use regs::DmaRegisters;
pub use regs::RegisterIo;
pub use residue::Residue;
pub use uio::spawn_interrupt_thread;
pub use uio::InterruptThread;
pub use uio::UioInterrupt;
pub use uio::UioRegisters;

#[cfg(feature = "async")]
pub use uio_async::serve;
#[cfg(feature = "async")]
pub use uio_async::AsyncUioInterrupt;

/// Orders descriptor and buffer writes before a channel is enabled.
#[inline(always)]
pub fn dmb() {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}
