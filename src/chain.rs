//! Chain builders: turn a transfer request into linked descriptors.
//!
//! Oversized requests are split for memcpy and slave scatter-gather and
//! rejected with [`Error::InvalidArgument`] for memset, memset-sg,
//! interleaved and cyclic transfers.

use crate::config::encode_burst;
use crate::lli::xfer_width;
use crate::lli::AddrMode;
use crate::lli::FlowControl;
use crate::lli::LinkItem;
use crate::lli::Stride;
use crate::pool::Descriptor;
use crate::pool::DescriptorPool;
use crate::pool::SlotIndex;
use crate::pool::TxFlags;
use crate::Cookie;
use crate::Direction;
use crate::Error;
use crate::SlaveBinding;
use crate::SlaveConfig;

/// One contiguous memory region of a scatter-gather list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    pub addr: u32,
    pub len: usize,
}

/// One chunk of an interleaved frame, followed by an inter-chunk gap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chunk {
    pub size: usize,
    pub src_icg: usize,
    pub dst_icg: usize,
}

/// 2-D transfer template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interleaved {
    pub src_start: u32,
    pub dst_start: u32,
    /// Number of frames; the controller handles exactly one.
    pub frames: usize,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainEnd {
    /// Last item terminates fetch.
    Eol,
    /// Last item points back to the head.
    Loop,
}

/// Links descriptors as they are acquired. Dropping an unfinished builder
/// returns every acquired descriptor to the pool.
struct ChainBuilder<'a> {
    pool: &'a mut DescriptorPool,
    first: Option<SlotIndex>,
    prev: Option<SlotIndex>,
}

impl<'a> ChainBuilder<'a> {
    fn new(pool: &'a mut DescriptorPool) -> ChainBuilder<'a> {
        ChainBuilder {
            pool,
            first: None,
            prev: None,
        }
    }

    fn push(&mut self, lli: LinkItem, len: usize) -> Result<&mut Descriptor, Error> {
        let idx = match self.pool.acquire() {
            Ok(idx) => idx,
            Err(e) => {
                log::error!("not enough descriptors available");
                return Err(e);
            }
        };
        let phys = self.pool.get(idx).phys;
        match (self.first, self.prev) {
            (Some(first), Some(prev)) => {
                self.pool.get_mut(prev).lli.set_next_descriptor(phys);
                self.pool.get_mut(first).children.push(idx);
            }
            _ => self.first = Some(idx),
        }
        self.prev = Some(idx);

        let desc = self.pool.get_mut(idx);
        desc.lli = lli;
        desc.len = len;
        Ok(desc)
    }

    fn head_mut(&mut self) -> Option<&mut Descriptor> {
        let first = self.first?;
        Some(self.pool.get_mut(first))
    }

    fn finish(mut self, total_len: usize, flags: TxFlags, end: ChainEnd) -> Result<SlotIndex, Error> {
        let (first, last) = match (self.first, self.prev) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::InvalidArgument("empty transfer")),
        };

        let head_phys = self.pool.get(first).phys;
        let children = self.pool.get(first).children.clone();
        // only the last item of a one-shot chain raises the completion
        // interrupt; cyclic chains interrupt on every period
        for &idx in std::iter::once(&first).chain(children.iter()) {
            let lli = &mut self.pool.get_mut(idx).lli;
            lli.set_btc_irq_masked(end == ChainEnd::Eol && idx != last);
        }
        match end {
            ChainEnd::Eol => self.pool.get_mut(last).lli.set_eol(),
            ChainEnd::Loop => self.pool.get_mut(last).lli.set_next_descriptor(head_phys),
        }

        let head = self.pool.get_mut(first);
        head.cookie = Cookie::PENDING;
        head.total_len = total_len;
        head.flags = flags;
        head.cyclic = end == ChainEnd::Loop;
        self.pool.write_chain(first);

        self.first = None;
        Ok(first)
    }
}

impl Drop for ChainBuilder<'_> {
    fn drop(&mut self) {
        if let Some(first) = self.first.take() {
            self.pool.release(first);
        }
    }
}

fn check_range(addr: u32, len: usize) -> Result<(), Error> {
    if u64::from(addr) + len as u64 > 1 << 32 {
        return Err(Error::InvalidArgument("range exceeds the 32-bit bus"));
    }
    Ok(())
}

fn fill_pattern(pool: &DescriptorPool, value: u32) -> Result<u32, Error> {
    let slot = match pool.memory().alloc_slot() {
        Some(slot) => slot,
        None => {
            log::error!("couldn't allocate fill buffer");
            return Err(Error::OutOfResources);
        }
    };
    pool.memory().write_word(slot, value);
    Ok(slot)
}

pub(crate) fn memcpy(
    pool: &mut DescriptorPool,
    max_count: u32,
    src: u32,
    dst: u32,
    len: usize,
    flags: TxFlags,
) -> Result<SlotIndex, Error> {
    if len == 0 {
        log::debug!("prep_dma_memcpy: length is zero!");
        return Err(Error::InvalidArgument("zero length"));
    }
    check_range(src, len)?;
    check_range(dst, len)?;

    let width = xfer_width(src, dst, len);
    let mut builder = ChainBuilder::new(pool);
    let mut offset = 0;
    while offset < len {
        let count = ((len - offset) >> width).min(max_count as usize) as u32;
        let mut lli = LinkItem {
            saddr: src + offset as u32,
            daddr: dst + offset as u32,
            ..Default::default()
        };
        lli.set_widths(width, width);
        lli.set_xfer_count(count);
        lli.set_addr_modes(AddrMode::Increment, AddrMode::Increment);
        lli.set_flow_control(FlowControl::MemToMem);

        let bytes = (count as usize) << width;
        builder.push(lli, bytes)?;
        offset += bytes;
    }
    builder.finish(len, flags, ChainEnd::Eol)
}

fn memset_item(fill: u32, dst: u32, len: usize, max_count: u32) -> Result<LinkItem, Error> {
    if dst & 3 != 0 || len & 3 != 0 {
        log::debug!("memset: buffer is not aligned");
        return Err(Error::InvalidArgument("buffer is not aligned"));
    }
    let count = len >> 2;
    if count > max_count as usize {
        log::error!("memset: buffer is too big");
        return Err(Error::InvalidArgument("buffer is too big"));
    }
    let mut lli = LinkItem {
        saddr: fill,
        daddr: dst,
        ..Default::default()
    };
    lli.set_widths(2, 2);
    lli.set_xfer_count(count as u32);
    lli.set_addr_modes(AddrMode::Fixed, AddrMode::Increment);
    lli.set_flow_control(FlowControl::MemToMem);
    Ok(lli)
}

pub(crate) fn memset(
    pool: &mut DescriptorPool,
    max_count: u32,
    dst: u32,
    value: u32,
    len: usize,
    flags: TxFlags,
) -> Result<SlotIndex, Error> {
    memset_sg(pool, max_count, &[SgEntry { addr: dst, len }], value, flags)
}

pub(crate) fn memset_sg(
    pool: &mut DescriptorPool,
    max_count: u32,
    entries: &[SgEntry],
    value: u32,
    flags: TxFlags,
) -> Result<SlotIndex, Error> {
    if entries.is_empty() || entries.iter().any(|e| e.len == 0) {
        log::debug!("memset: length is zero!");
        return Err(Error::InvalidArgument("zero length"));
    }
    // validate everything before taking the fill slot
    let mut total_len = 0;
    for e in entries {
        check_range(e.addr, e.len)?;
        memset_item(0, e.addr, e.len, max_count)?;
        total_len += e.len;
    }

    let memory = pool.memory().clone();
    let fill = fill_pattern(pool, value)?;
    let mut builder = ChainBuilder::new(pool);
    let mut unowned = Some(fill);
    for e in entries {
        let lli = memset_item(fill, e.addr, e.len, max_count)?;
        match builder.push(lli, e.len) {
            // the head owns the pattern so it is freed with the chain
            Ok(desc) => desc.fill = desc.fill.or(unowned.take()),
            Err(err) => {
                if let Some(fill) = unowned {
                    memory.free_slot(fill);
                }
                return Err(err);
            }
        }
    }
    builder.finish(total_len, flags, ChainEnd::Eol)
}

pub(crate) fn interleaved(
    pool: &mut DescriptorPool,
    max_count: u32,
    xt: &Interleaved,
    flags: TxFlags,
) -> Result<SlotIndex, Error> {
    let first = match xt.chunks.first() {
        Some(first) if xt.frames == 1 => *first,
        _ => return Err(Error::InvalidArgument("malformed interleaved template")),
    };
    log::debug!(
        "prep_dma_interleaved: src={:#010x}, dest={:#010x}, numf={}, frame_size={}, flags={:?}",
        xt.src_start,
        xt.dst_start,
        xt.frames,
        xt.chunks.len(),
        flags
    );

    // the controller can only skip X bytes every Y bytes
    if xt.chunks.iter().any(|c| *c != first) {
        log::error!("prep_dma_interleaved: the controller can transfer only identical chunks");
        return Err(Error::InvalidArgument("chunks differ"));
    }
    if first.size == 0 {
        return Err(Error::InvalidArgument("zero length"));
    }
    let len = first.size * xt.chunks.len();

    let width = xfer_width(xt.src_start, xt.dst_start, len);
    let count = len >> width;
    if count > max_count as usize {
        log::error!("prep_dma_interleaved: buffer is too big");
        return Err(Error::InvalidArgument("buffer is too big"));
    }
    let span = |icg: usize| len + icg * (xt.chunks.len() - 1);
    check_range(xt.src_start, span(first.src_icg))?;
    check_range(xt.dst_start, span(first.dst_icg))?;

    let mut lli = LinkItem {
        saddr: xt.src_start,
        daddr: xt.dst_start,
        ..Default::default()
    };
    lli.set_widths(width, width);
    lli.set_xfer_count(count as u32);
    lli.set_addr_modes(AddrMode::Increment, AddrMode::Increment);
    lli.set_picture_in_picture(true);
    lli.set_flow_control(FlowControl::MemToMem);

    let mut builder = ChainBuilder::new(pool);
    builder.push(lli, len)?;
    if let Some(head) = builder.head_mut() {
        head.stride = Stride {
            boundary: (first.size >> width) as u16,
            src_hole: ((first.src_icg >> width) + 1) as u16,
            dst_hole: ((first.dst_icg >> width) + 1) as u16,
        };
    }
    builder.finish(len, flags, ChainEnd::Eol)
}

/// Template item for a slave transfer in `direction`, without addresses or
/// count. Returns the item and the peripheral-side width.
fn slave_template(
    sconfig: &SlaveConfig,
    binding: &SlaveBinding,
    direction: Direction,
) -> Result<(LinkItem, u32), Error> {
    let mut lli = LinkItem::default();
    lli.set_chunk_sizes(encode_burst(sconfig.src_maxburst), encode_burst(sconfig.dst_maxburst));
    let reg_width = match direction {
        Direction::MemToDev => {
            let reg_width = sconfig.dst_addr_width.encode()?;
            lli.daddr = sconfig.dst_addr;
            lli.set_addr_modes(AddrMode::Increment, AddrMode::Fixed);
            lli.set_flow_control(FlowControl::MemToPer);
            lli.set_interfaces(binding.mem_if, binding.per_if);
            reg_width
        }
        Direction::DevToMem => {
            let reg_width = sconfig.src_addr_width.encode()?;
            lli.saddr = sconfig.src_addr;
            lli.set_addr_modes(AddrMode::Fixed, AddrMode::Increment);
            lli.set_flow_control(FlowControl::PerToMem);
            lli.set_interfaces(binding.per_if, binding.mem_if);
            reg_width
        }
        Direction::MemToMem => return Err(Error::InvalidArgument("not a slave direction")),
    };
    Ok((lli, reg_width))
}

pub(crate) fn slave_sg(
    pool: &mut DescriptorPool,
    max_count: u32,
    sconfig: &SlaveConfig,
    binding: &SlaveBinding,
    entries: &[SgEntry],
    direction: Direction,
    flags: TxFlags,
) -> Result<SlotIndex, Error> {
    log::trace!(
        "prep_slave_sg ({}): {:?} f{:?}",
        entries.len(),
        direction,
        flags
    );
    if entries.is_empty() {
        log::debug!("prep_slave_sg: sg length is zero!");
        return Err(Error::InvalidArgument("empty scatter-gather list"));
    }
    let (template, reg_width) = slave_template(sconfig, binding, direction)?;

    let mut builder = ChainBuilder::new(pool);
    let mut total_len = 0;
    for (i, e) in entries.iter().enumerate() {
        if e.len == 0 {
            log::debug!("prep_slave_sg: sg({}) data length is zero", i);
            return Err(Error::InvalidArgument("zero length entry"));
        }
        check_range(e.addr, e.len)?;
        let mem_width = if (e.addr as usize | e.len) & 3 != 0 { 0 } else { 2 };
        // the count field counts source-side transfers
        let src_width = match direction {
            Direction::MemToDev => mem_width,
            _ => reg_width,
        };
        if e.len & ((1 << src_width) - 1) != 0 {
            return Err(Error::InvalidArgument("length not a multiple of the bus width"));
        }

        let max_bytes = (max_count as usize) << src_width;
        let mut offset = 0;
        while offset < e.len {
            let bytes = (e.len - offset).min(max_bytes);
            let mem = e.addr + offset as u32;
            let mut lli = template;
            match direction {
                Direction::MemToDev => {
                    lli.saddr = mem;
                    lli.set_widths(mem_width, reg_width);
                }
                _ => {
                    lli.daddr = mem;
                    lli.set_widths(reg_width, mem_width);
                }
            }
            lli.set_xfer_count((bytes >> src_width) as u32);
            builder.push(lli, bytes)?;
            offset += bytes;
        }
        total_len += e.len;
    }
    builder.finish(total_len, flags, ChainEnd::Eol)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cyclic(
    pool: &mut DescriptorPool,
    max_count: u32,
    sconfig: &SlaveConfig,
    binding: &SlaveBinding,
    buf_addr: u32,
    buf_len: usize,
    period_len: usize,
    direction: Direction,
    flags: TxFlags,
) -> Result<SlotIndex, Error> {
    if buf_len == 0 || period_len == 0 {
        log::debug!("prep_dma_cyclic: length is zero!");
        return Err(Error::InvalidArgument("zero length"));
    }
    let (template, reg_width) = slave_template(sconfig, binding, direction)?;

    // too big or unaligned periods, unaligned buffer
    let align = (1usize << reg_width) - 1;
    if period_len > (max_count as usize) << reg_width
        || period_len & align != 0
        || buf_addr as usize & align != 0
    {
        return Err(Error::InvalidArgument("period too big or unaligned"));
    }
    let periods = buf_len / period_len;
    if periods == 0 {
        return Err(Error::InvalidArgument("buffer shorter than one period"));
    }
    check_range(buf_addr, periods * period_len)?;

    let mut builder = ChainBuilder::new(pool);
    for i in 0..periods {
        let mem = buf_addr + (period_len * i) as u32;
        let mut lli = template;
        match direction {
            Direction::MemToDev => lli.saddr = mem,
            _ => lli.daddr = mem,
        }
        lli.set_widths(reg_width, reg_width);
        lli.set_xfer_count((period_len >> reg_width) as u32);
        builder.push(lli, period_len)?;
    }
    // a trailing partial period is never transferred
    builder.finish(periods * period_len, flags, ChainEnd::Loop)
}
