use bitflags::bitflags;

use crate::Error;

bitflags! {
    /// Transfer types a controller variant can perform.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const MEMCPY = 1 << 0;
        const MEMSET = 1 << 1;
        const MEMSET_SG = 1 << 2;
        const INTERLEAVE = 1 << 3;
        const SLAVE = 1 << 4;
        const CYCLIC = 1 << 5;
        /// Channels are only handed out on explicit request.
        const PRIVATE = 1 << 6;
    }
}

/// Static description of a controller variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerInfo {
    pub compatible: &'static str,
    pub nr_channels: usize,
    pub caps: Capabilities,
}

impl ControllerInfo {
    pub const AT91SAM9RL: ControllerInfo = ControllerInfo {
        compatible: "atmel,at91sam9rl-dma",
        nr_channels: 2,
        caps: Capabilities::MEMCPY,
    };

    pub const AT91SAM9G45: ControllerInfo = ControllerInfo {
        compatible: "atmel,at91sam9g45-dma",
        nr_channels: 8,
        caps: Capabilities::MEMCPY
            .union(Capabilities::MEMSET)
            .union(Capabilities::MEMSET_SG)
            .union(Capabilities::INTERLEAVE)
            .union(Capabilities::SLAVE)
            .union(Capabilities::CYCLIC)
            .union(Capabilities::PRIVATE),
    };
}

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Used in log prefixes: `dma<id>chan<n>`.
    pub id: usize,
    /// Descriptors allocated when a channel is opened; the pool grows past
    /// this on demand.
    pub init_descriptors_per_channel: usize,
    /// Re-reads of the link pointer before a residue query gives up.
    pub max_residue_trials: u32,
    /// Status reads while waiting for a channel to report disabled.
    pub disable_poll_limit: u32,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            id: 0,
            init_descriptors_per_channel: 64,
            max_residue_trials: 10,
            disable_poll_limit: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    MemToMem,
    MemToDev,
    DevToMem,
}

impl Direction {
    pub fn is_slave(self) -> bool {
        matches!(self, Direction::MemToDev | Direction::DevToMem)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusWidth {
    #[default]
    Undefined,
    Bytes1,
    Bytes2,
    Bytes4,
    Bytes8,
}

impl BusWidth {
    /// log2 of the access size; undefined widths default to 4 bytes.
    pub(crate) fn encode(self) -> Result<u32, Error> {
        match self {
            BusWidth::Bytes1 => Ok(0),
            BusWidth::Bytes2 => Ok(1),
            BusWidth::Bytes4 | BusWidth::Undefined => Ok(2),
            BusWidth::Bytes8 => Err(Error::InvalidArgument("unsupported bus width")),
        }
    }
}

/// Peripheral side of slave transfers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaveConfig {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub src_addr_width: BusWidth,
    pub dst_addr_width: BusWidth,
    pub src_maxburst: u32,
    pub dst_maxburst: u32,
}

impl SlaveConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.src_addr_width.encode()?;
        self.dst_addr_width.encode()?;
        Ok(())
    }
}

/// Chunk-size field encoding of a burst length: 1 → 0, 4 → 1, 8 → 2 ...
pub(crate) fn encode_burst(maxburst: u32) -> u32 {
    if maxburst > 1 {
        (32 - maxburst.leading_zeros()).saturating_sub(2)
    } else {
        0
    }
}

/// Binding of a channel to a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveBinding {
    /// Hardware handshake line of the peripheral.
    pub request_line: u8,
    /// AHB interface the peripheral sits on.
    pub per_if: u32,
    /// AHB interface memory sits on.
    pub mem_if: u32,
    /// Raw channel configuration overriding the computed one.
    pub cfg: Option<u32>,
}

/// Arguments to [`Controller::open_channel`](crate::Controller::open_channel).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Specific hardware channel, or the first free one.
    pub index: Option<usize>,
    pub slave: Option<SlaveBinding>,
}
