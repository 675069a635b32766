use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::sync::Arc;

use async_io::Async;

use crate::uio::open_device;
use crate::Controller;
use crate::Error;

/// Interrupt line of a UIO device, awaited on the `async-io` reactor.
pub struct AsyncUioInterrupt {
    dev: String,
    dev_fd: Async<File>,
}

impl fmt::Debug for AsyncUioInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AsyncUioInterrupt ({})", &self.dev)?;
        write!(f, "  file: {:?}", &self.dev_fd)
    }
}

impl AsyncUioInterrupt {
    pub fn new(uio: &str) -> Result<AsyncUioInterrupt, Error> {
        Ok(AsyncUioInterrupt {
            dev: uio.to_string(),
            dev_fd: Async::new(open_device(uio)?)?,
        })
    }

    /// Re-arms the interrupt in the uio driver.
    pub async fn enable(&self) -> Result<(), Error> {
        self.dev_fd
            .write_with(|mut f: &File| f.write(&[1u8, 0, 0, 0]))
            .await?;
        Ok(())
    }

    /// Waits for the next interrupt; returns the interrupt count.
    pub async fn wait(&self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        self.dev_fd
            .read_with(|mut f: &File| f.read_exact(&mut buf))
            .await?;
        Ok(u32::from_ne_bytes(buf))
    }
}

/// Serves the controller's interrupt until an I/O error occurs. Drop the
/// future to stop.
pub async fn serve(controller: Arc<Controller>, irq: AsyncUioInterrupt) -> Result<(), Error> {
    irq.enable().await?;
    loop {
        let count = irq.wait().await?;
        if !controller.service() {
            log::trace!("{}: spurious interrupt ({})", irq.dev, count);
        }
        irq.enable().await?;
    }
}
