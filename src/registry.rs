use spin::Mutex;

use crate::ControllerInfo;
use crate::Error;

/// Process-wide driver state: known controller variants and the peripheral
/// request lines already bound to a channel.
///
/// Built once at start-up and shared (usually behind an `Arc`) with every
/// [`Controller`](crate::Controller) so that two controllers never hand the
/// same request line to two channels.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    variants: Vec<ControllerInfo>,
    request_lines: Mutex<[u64; 4]>,
}

impl DriverRegistry {
    pub fn new() -> DriverRegistry {
        DriverRegistry::default()
    }

    /// Registry preloaded with the AT91 controller variants.
    pub fn with_builtin_variants() -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        registry.register(ControllerInfo::AT91SAM9RL);
        registry.register(ControllerInfo::AT91SAM9G45);
        registry
    }

    pub fn register(&mut self, info: ControllerInfo) {
        self.variants.retain(|v| v.compatible != info.compatible);
        self.variants.push(info);
    }

    pub fn lookup(&self, compatible: &str) -> Option<&ControllerInfo> {
        self.variants.iter().find(|v| v.compatible == compatible)
    }

    pub fn claim_request_line(&self, line: u8) -> Result<(), Error> {
        let mut lines = self.request_lines.lock();
        let (word, bit) = (usize::from(line) / 64, line % 64);
        if lines[word] & (1 << bit) != 0 {
            log::debug!("request line {} already claimed", line);
            return Err(Error::Busy);
        }
        lines[word] |= 1 << bit;
        Ok(())
    }

    pub fn release_request_line(&self, line: u8) {
        let mut lines = self.request_lines.lock();
        lines[usize::from(line) / 64] &= !(1 << (line % 64));
    }

    pub fn is_claimed(&self, line: u8) -> bool {
        self.request_lines.lock()[usize::from(line) / 64] & (1 << (line % 64)) != 0
    }
}
