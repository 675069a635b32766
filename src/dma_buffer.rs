use std::fmt;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::prelude::*;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::slice;

use spin::Mutex;

use crate::lli::LinkItem;
use crate::memory::SlotAllocator;
use crate::Error;
use crate::LinkMemory;

/// A physically contiguous `u-dma-buf` buffer mapped into this process.
///
/// Besides plain data buffers, a `DmaBuffer` can serve as the link memory of
/// a controller: link items are carved out of it in fixed slots.
pub struct DmaBuffer {
    name: String,
    size: usize,
    phys_addr: usize,
    buffer: *mut libc::c_void,
    sync_mode: bool,
    sync_for_cpu: File,
    sync_for_device: File,
    slots: Mutex<SlotAllocator>,
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DmaBuffer ({})", &self.name)?;
        writeln!(f, "  size: {:#x?}", &self.size)?;
        writeln!(f, "  phys_addr: {:#x?}", &self.phys_addr)?;
        writeln!(f, "  buffer: {:?}", &self.buffer)?;
        write!(f, "  sync_mode: {:?}", &self.sync_mode)
    }
}

fn read_attr(name: &str, attr: &str) -> Result<String, Error> {
    let mut f = File::open(format!("/sys/class/u-dma-buf/{}/{}", name, attr))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(buf.trim().to_string())
}

impl DmaBuffer {
    pub fn new(name: &str) -> Result<DmaBuffer, Error> {
        let phys_addr = usize::from_str_radix(read_attr(name, "phys_addr")?.trim_start_matches("0x"), 16)?;
        let size = read_attr(name, "size")?.parse::<usize>()?;
        let sync_mode = read_attr(name, "sync_mode")? != "0";

        let mut sync_open_options = OpenOptions::new();
        sync_open_options.write(true);
        let sync_for_cpu =
            sync_open_options.open(format!("/sys/class/u-dma-buf/{}/sync_for_cpu", name))?;
        let sync_for_device =
            sync_open_options.open(format!("/sys/class/u-dma-buf/{}/sync_for_device", name))?;

        // the controller only drives 32-bit bus addresses
        let bus_base = u32::try_from(phys_addr)
            .map_err(|_| Error::InvalidArgument("buffer above the 32-bit bus window"))?;

        let dev = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/{}", name))?;

        let buffer;
        unsafe {
            buffer = libc::mmap(
                std::ptr::null_mut::<libc::c_void>(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                dev.as_raw_fd(),
                0,
            );
            if buffer == libc::MAP_FAILED {
                return Err(Error::Mmap);
            }
        }

        log::debug!(
            "{}: mapped {:#x} bytes at bus address {:#010x}",
            name,
            size,
            phys_addr
        );

        Ok(DmaBuffer {
            name: name.to_string(),
            size,
            phys_addr,
            buffer,
            sync_mode,
            sync_for_cpu,
            sync_for_device,
            slots: Mutex::new(SlotAllocator::new(bus_base, size)),
        })
    }

    #[allow(clippy::mut_from_ref)]
    pub fn slice<T>(&self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.buffer as *mut T, self.size / mem::size_of::<T>()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn phys_addr(&self) -> usize {
        self.phys_addr
    }

    /// Bus address as the controller sees it.
    pub fn bus_addr(&self) -> u32 {
        self.phys_addr as u32
    }

    pub fn sync_mode(&self) -> bool {
        self.sync_mode
    }

    pub fn sync_for_cpu(&mut self) -> Result<(), Error> {
        self.sync_for_cpu.write_all(b"1")?;
        Ok(())
    }

    pub fn sync_for_device(&mut self) -> Result<(), Error> {
        self.sync_for_device.write_all(b"1")?;
        Ok(())
    }

    fn word_ptr(&self, offset: usize) -> *mut u32 {
        unsafe { (self.buffer as *mut u8).add(offset) as *mut u32 }
    }
}

// The engine only reads link items after the enable write, which is preceded
// by a barrier, so plain volatile stores are sufficient here.
impl LinkMemory for DmaBuffer {
    fn alloc_slot(&self) -> Option<u32> {
        self.slots.lock().alloc()
    }

    fn free_slot(&self, addr: u32) {
        self.slots.lock().free(addr)
    }

    fn write_link(&self, addr: u32, item: &LinkItem) {
        let offset = match self.slots.lock().offset(addr) {
            Some(offset) => offset,
            None => return,
        };
        for (i, word) in item.to_words().iter().enumerate() {
            unsafe { ptr::write_volatile(self.word_ptr(offset + i * 4), *word) };
        }
    }

    fn write_word(&self, addr: u32, value: u32) {
        if let Some(offset) = self.slots.lock().offset(addr) {
            unsafe { ptr::write_volatile(self.word_ptr(offset), value) };
        }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.buffer, self.size);
        }
    }
}

unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}
