use std::fmt;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::prelude::*;
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crate::regs::RegisterIo;
use crate::Controller;
use crate::Error;

pub(crate) fn map_size(uio: &str) -> Result<usize, Error> {
    let mut size_f = File::open(format!("/sys/class/uio/{}/maps/map0/size", uio))?;
    let mut buf = String::new();
    size_f.read_to_string(&mut buf)?;
    let buf = buf.trim().trim_start_matches("0x");
    Ok(usize::from_str_radix(buf, 16)?)
}

pub(crate) fn open_device(uio: &str) -> Result<File, Error> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .open(format!("/dev/{}", uio))?)
}

/// Register window of a controller exported through a UIO device.
pub struct UioRegisters {
    dev: String,
    base: *mut u32,
    size: usize,
}

impl fmt::Debug for UioRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "UioRegisters ({})", &self.dev)?;
        writeln!(f, "  base: {:?}", &self.base)?;
        write!(f, "  size: {:#x?}", &self.size)
    }
}

impl UioRegisters {
    /// Maps the first memory region of `/dev/<uio>`.
    pub fn new(uio: &str) -> Result<UioRegisters, Error> {
        let dev_fd = open_device(uio)?;
        let size = map_size(uio)?;

        let dev;
        unsafe {
            dev = libc::mmap(
                std::ptr::null_mut::<libc::c_void>(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                dev_fd.as_raw_fd(),
                0,
            );
            if dev == libc::MAP_FAILED {
                log::error!("mapping {} registers into virtual memory failed", uio);
                return Err(Error::Mmap);
            }
        }
        log::debug!("{}: mapped {:#x} bytes of registers", uio, size);

        Ok(UioRegisters {
            dev: uio.to_string(),
            base: dev as *mut u32,
            size,
        })
    }
}

impl RegisterIo for UioRegisters {
    fn read_register(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size);
        unsafe { ptr::read_volatile(self.base.add(offset / 4)) }
    }

    fn write_register(&self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size);
        unsafe { ptr::write_volatile(self.base.add(offset / 4), value) }
    }
}

impl Drop for UioRegisters {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}

unsafe impl Send for UioRegisters {}
unsafe impl Sync for UioRegisters {}

/// Interrupt line of a UIO device.
#[derive(Debug)]
pub struct UioInterrupt {
    dev_fd: File,
}

impl UioInterrupt {
    pub fn new(uio: &str) -> Result<UioInterrupt, Error> {
        Ok(UioInterrupt {
            dev_fd: open_device(uio)?,
        })
    }

    /// Re-arms the interrupt in the uio driver.
    pub fn enable(&mut self) -> Result<(), Error> {
        self.dev_fd.write_all(&[1u8, 0, 0, 0])?;
        Ok(())
    }

    /// Blocks until the next interrupt; returns the interrupt count.
    pub fn wait(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        self.dev_fd.read_exact(&mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }
}

/// Handle of the thread started by [`spawn_interrupt_thread`].
#[derive(Debug)]
pub struct InterruptThread {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<Result<(), Error>>,
}

impl InterruptThread {
    /// Asks the thread to exit after the next interrupt and waits for it.
    pub fn stop(self) -> Result<(), Error> {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.join() {
            Ok(r) => r,
            Err(_) => Err(Error::ProtocolViolation("interrupt thread panicked")),
        }
    }
}

/// Serves the controller's interrupt from a dedicated thread: wait for the
/// line, run the top and bottom half, re-arm.
pub fn spawn_interrupt_thread(controller: Arc<Controller>, mut irq: UioInterrupt) -> InterruptThread {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let handle = thread::spawn(move || {
        irq.enable()?;
        while !flag.load(Ordering::SeqCst) {
            let count = irq.wait()?;
            if !controller.service() {
                log::trace!("spurious interrupt ({})", count);
            }
            irq.enable()?;
        }
        Ok(())
    });
    InterruptThread { stop, handle }
}
