//! Physical memory map.
//!
//! An ordered table of disjoint half-open ranges `[base, base + size)`, each
//! either RAM (owned byte buffer plus a page-granular dirty bitmap) or an
//! MMIO window (boxed device). Lookup is a binary search on the base
//! address. Every RAM write is appended to a store log that the machine
//! drains at instruction boundaries to kill overlapping LR/SC reservations
//! and stale fetch translations on other harts.

use crate::common::constants::{PAGE_SHIFT, PAGE_SIZE};
use crate::common::MachineError;
use crate::soc::device::MmioDevice;

/// One registered range of the physical address space.
enum MapRange {
    /// RAM backed by a host buffer.
    Ram {
        base: u64,
        mem: Vec<u8>,
        /// One bit per page, set on first write since the last clear.
        dirty: Vec<u64>,
    },
    /// MMIO window dispatching to a device.
    Mmio {
        base: u64,
        size: u64,
        dev: Box<dyn MmioDevice>,
    },
}

impl MapRange {
    fn base(&self) -> u64 {
        match self {
            MapRange::Ram { base, .. } | MapRange::Mmio { base, .. } => *base,
        }
    }

    fn size(&self) -> u64 {
        match self {
            MapRange::Ram { mem, .. } => mem.len() as u64,
            MapRange::Mmio { size, .. } => *size,
        }
    }

    fn contains(&self, paddr: u64) -> bool {
        paddr.wrapping_sub(self.base()) < self.size()
    }
}

/// The guest physical memory map.
pub struct PhysMemMap {
    /// Ranges sorted by base address; invariant: pairwise disjoint.
    ranges: Vec<MapRange>,
    /// RAM stores since the last drain: `(paddr, len)`.
    store_log: Vec<(u64, u64)>,
}

impl Default for PhysMemMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysMemMap {
    /// Creates an empty memory map.
    pub fn new() -> Self {
        Self {
            ranges: Vec::new(),
            store_log: Vec::new(),
        }
    }

    /// Registers a RAM range. Fails if it overlaps an existing range.
    pub fn register_ram(&mut self, base: u64, size: u64) -> Result<(), MachineError> {
        let pages = (size as usize).div_ceil(PAGE_SIZE as usize);
        self.insert(MapRange::Ram {
            base,
            mem: vec![0; size as usize],
            dirty: vec![0; pages.div_ceil(64)],
        })
    }

    /// Registers an MMIO window. Fails if it overlaps an existing range.
    pub fn register_device(
        &mut self,
        base: u64,
        size: u64,
        dev: Box<dyn MmioDevice>,
    ) -> Result<(), MachineError> {
        self.insert(MapRange::Mmio { base, size, dev })
    }

    fn insert(&mut self, range: MapRange) -> Result<(), MachineError> {
        let (base, size) = (range.base(), range.size());
        let overlaps = self
            .ranges
            .iter()
            .any(|r| base < r.base() + r.size() && r.base() < base + size);
        if overlaps || size == 0 {
            return Err(MachineError::RangeOverlap { base, size });
        }
        self.ranges.push(range);
        self.ranges.sort_by_key(MapRange::base);
        Ok(())
    }

    /// Index of the range containing `paddr`, if any.
    fn find(&self, paddr: u64) -> Option<usize> {
        let idx = self
            .ranges
            .partition_point(|r| r.base() <= paddr)
            .checked_sub(1)?;
        self.ranges[idx].contains(paddr).then_some(idx)
    }

    /// True when `paddr` falls inside a RAM range.
    pub fn is_ram(&self, paddr: u64) -> bool {
        matches!(
            self.find(paddr).map(|i| &self.ranges[i]),
            Some(MapRange::Ram { .. })
        )
    }

    /// True when `paddr` is backed by anything at all.
    pub fn is_mapped(&self, paddr: u64) -> bool {
        self.find(paddr).is_some()
    }

    /// Reads `1 << size_log2` bytes at `paddr` (little-endian).
    ///
    /// `Err(())` means unmapped address or a size the target device does not
    /// implement; the caller knows the access kind and raises the matching
    /// access fault.
    pub fn read(&mut self, paddr: u64, size_log2: u32) -> Result<u64, ()> {
        let idx = self.find(paddr).ok_or(())?;
        match &mut self.ranges[idx] {
            MapRange::Ram { base, mem, .. } => {
                let off = (paddr - *base) as usize;
                let n = 1usize << size_log2;
                if off + n > mem.len() {
                    return Err(());
                }
                let mut bytes = [0u8; 8];
                bytes[..n].copy_from_slice(&mem[off..off + n]);
                Ok(u64::from_le_bytes(bytes))
            }
            MapRange::Mmio { base, dev, .. } => {
                let off = paddr - *base;
                let val = dev.read(off, size_log2)?;
                tracing::trace!(dev = dev.name(), off, size_log2, val, "mmio read");
                Ok(val)
            }
        }
    }

    /// Writes `1 << size_log2` bytes at `paddr` (little-endian).
    ///
    /// RAM writes mark the page dirty and append to the store log.
    pub fn write(&mut self, paddr: u64, value: u64, size_log2: u32) -> Result<(), ()> {
        let idx = self.find(paddr).ok_or(())?;
        match &mut self.ranges[idx] {
            MapRange::Ram { base, mem, dirty } => {
                let off = (paddr - *base) as usize;
                let n = 1usize << size_log2;
                if off + n > mem.len() {
                    return Err(());
                }
                mem[off..off + n].copy_from_slice(&value.to_le_bytes()[..n]);
                let page = off as u64 >> PAGE_SHIFT;
                dirty[(page / 64) as usize] |= 1 << (page % 64);
                self.store_log.push((paddr, n as u64));
                Ok(())
            }
            MapRange::Mmio { base, dev, .. } => {
                let off = paddr - *base;
                tracing::trace!(dev = dev.name(), off, size_log2, value, "mmio write");
                dev.write(off, value, size_log2)
            }
        }
    }

    /// Atomically rewrites a 64-bit RAM word via `f`. Used by the page-table
    /// walker for hardware A/D updates; MMIO-resident page tables are
    /// rejected.
    pub fn update_ram_u64(&mut self, paddr: u64, f: impl FnOnce(u64) -> u64) -> Result<u64, ()> {
        if !self.is_ram(paddr) {
            return Err(());
        }
        let old = self.read(paddr, 3)?;
        let new = f(old);
        if new != old {
            self.write(paddr, new, 3)?;
        }
        Ok(new)
    }

    /// Copies `data` into RAM at `paddr`. Fails when the destination is not
    /// entirely RAM.
    pub fn write_ram(&mut self, paddr: u64, data: &[u8]) -> Result<(), ()> {
        let idx = self.find(paddr).ok_or(())?;
        match &mut self.ranges[idx] {
            MapRange::Ram { base, mem, dirty } => {
                let off = (paddr - *base) as usize;
                if off + data.len() > mem.len() {
                    return Err(());
                }
                mem[off..off + data.len()].copy_from_slice(data);
                let first = off as u64 >> PAGE_SHIFT;
                let last = (off + data.len().max(1) - 1) as u64 >> PAGE_SHIFT;
                for page in first..=last {
                    dirty[(page / 64) as usize] |= 1 << (page % 64);
                }
                Ok(())
            }
            MapRange::Mmio { .. } => Err(()),
        }
    }

    /// Reads `out.len()` bytes of RAM at `paddr`.
    pub fn read_ram(&self, paddr: u64, out: &mut [u8]) -> Result<(), ()> {
        let idx = self.find(paddr).ok_or(())?;
        match &self.ranges[idx] {
            MapRange::Ram { base, mem, .. } => {
                let off = (paddr - *base) as usize;
                if off + out.len() > mem.len() {
                    return Err(());
                }
                out.copy_from_slice(&mem[off..off + out.len()]);
                Ok(())
            }
            MapRange::Mmio { .. } => Err(()),
        }
    }

    /// Marks one page of a RAM range dirty. Exposed for DMA-capable devices.
    pub fn mark_dirty(&mut self, paddr: u64) {
        if let Some(idx) = self.find(paddr) {
            if let MapRange::Ram { base, dirty, .. } = &mut self.ranges[idx] {
                let page = (paddr - *base) >> PAGE_SHIFT;
                dirty[(page / 64) as usize] |= 1 << (page % 64);
            }
        }
    }

    /// True if the page holding `paddr` has been written since the last
    /// [`Self::clear_dirty`].
    pub fn is_dirty(&self, paddr: u64) -> bool {
        match self.find(paddr).map(|i| &self.ranges[i]) {
            Some(MapRange::Ram { base, dirty, .. }) => {
                let page = (paddr - *base) >> PAGE_SHIFT;
                dirty[(page / 64) as usize] & (1 << (page % 64)) != 0
            }
            _ => false,
        }
    }

    /// Clears every dirty bit.
    pub fn clear_dirty(&mut self) {
        for r in &mut self.ranges {
            if let MapRange::Ram { dirty, .. } = r {
                dirty.iter_mut().for_each(|w| *w = 0);
            }
        }
    }

    /// Drains the log of RAM stores performed since the previous drain.
    pub fn take_store_log(&mut self) -> Vec<(u64, u64)> {
        std::mem::take(&mut self.store_log)
    }

    /// Iterates the RAM ranges as `(base, contents)`. Used by snapshots.
    pub fn ram_ranges(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.ranges.iter().filter_map(|r| match r {
            MapRange::Ram { base, mem, .. } => Some((*base, mem.as_slice())),
            MapRange::Mmio { .. } => None,
        })
    }

    /// Restores RAM contents from a snapshot dump.
    pub fn restore_ram(&mut self, base: u64, data: &[u8]) -> Result<(), ()> {
        self.write_ram(base, data)
    }

    /// Total bytes of registered RAM.
    pub fn ram_total(&self) -> u64 {
        self.ram_ranges().map(|(_, m)| m.len() as u64).sum()
    }

    fn devices_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn MmioDevice>> {
        self.ranges.iter_mut().filter_map(|r| match r {
            MapRange::Mmio { dev, .. } => Some(dev),
            MapRange::Ram { .. } => None,
        })
    }

    /// The registered CLINT, if any. Used by the machine's interrupt glue.
    pub fn clint_mut(&mut self) -> Option<&mut crate::soc::devices::Clint> {
        self.devices_mut().find_map(|d| d.as_clint_mut())
    }

    /// The registered PLIC, if any.
    pub fn plic_mut(&mut self) -> Option<&mut crate::soc::devices::Plic> {
        self.devices_mut().find_map(|d| d.as_plic_mut())
    }

    /// The registered HTIF bridge, if any.
    pub fn htif_mut(&mut self) -> Option<&mut crate::soc::devices::Htif> {
        self.devices_mut().find_map(|d| d.as_htif_mut())
    }
}

impl std::fmt::Debug for PhysMemMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for r in &self.ranges {
            match r {
                MapRange::Ram { base, mem, .. } => {
                    let _ = list.entry(&format_args!("ram {:#x}+{:#x}", base, mem.len()));
                }
                MapRange::Mmio { base, size, dev } => {
                    let _ = list.entry(&format_args!("{} {:#x}+{:#x}", dev.name(), base, size));
                }
            }
        }
        list.finish()
    }
}
