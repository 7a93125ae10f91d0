//! Core-local interruptor.
//!
//! Per-hart `msip` and `mtimecmp`, plus the shared `mtime`. The machine
//! glue pushes the current time in before each instruction and derives
//! MTIP/MSIP from this state afterwards, so writing `mtimecmp` above the
//! current time clears the hart's MTIP exactly as architected.
//!
//! # Memory map (offsets)
//!
//! * `0x0000 + 4*hart`: MSIP
//! * `0x4000 + 8*hart`: MTIMECMP
//! * `0xBFF8`: MTIME

use crate::soc::device::MmioDevice;

const MSIP_BASE: u64 = 0x0000;
const MTIMECMP_BASE: u64 = 0x4000;
const MTIME_OFFSET: u64 = 0xBFF8;

/// CLINT device state.
pub struct Clint {
    mtimecmp: Vec<u64>,
    msip: Vec<u32>,
    mtime: u64,
    /// Harts whose `mtimecmp` was written since the last drain; each write
    /// clears that hart's MTIP.
    mtimecmp_writes: Vec<usize>,
    /// `(hart, level)` MSIP writes since the last drain.
    msip_writes: Vec<(usize, bool)>,
}

impl Clint {
    /// Creates a CLINT serving `nharts` harts.
    pub fn new(nharts: usize) -> Self {
        Self {
            mtimecmp: vec![u64::MAX; nharts],
            msip: vec![0; nharts],
            mtime: 0,
            mtimecmp_writes: Vec::new(),
            msip_writes: Vec::new(),
        }
    }

    /// Drains the register-write events the interrupt glue reacts to:
    /// `(harts with mtimecmp writes, (hart, level) msip writes)`.
    pub fn take_events(&mut self) -> (Vec<usize>, Vec<(usize, bool)>) {
        (
            std::mem::take(&mut self.mtimecmp_writes),
            std::mem::take(&mut self.msip_writes),
        )
    }

    /// Updates the time the register file exposes. Called by machine glue
    /// before each instruction.
    pub fn set_mtime(&mut self, mtime: u64) {
        self.mtime = mtime;
    }

    /// True when hart `hartid`'s timer has fired.
    pub fn mtip(&self, hartid: usize) -> bool {
        self.mtimecmp
            .get(hartid)
            .is_some_and(|&cmp| self.mtime >= cmp)
    }

    /// True when hart `hartid`'s software interrupt is raised.
    pub fn msip(&self, hartid: usize) -> bool {
        self.msip.get(hartid).is_some_and(|&v| v & 1 != 0)
    }

    /// Snapshot accessor: `(mtimecmp, msip)` per hart.
    pub fn state(&self) -> (Vec<u64>, Vec<u32>) {
        (self.mtimecmp.clone(), self.msip.clone())
    }

    /// Snapshot restore.
    pub fn restore(&mut self, mtimecmp: Vec<u64>, msip: Vec<u32>) {
        self.mtimecmp = mtimecmp;
        self.msip = msip;
    }

    fn read32(&mut self, offset: u64) -> u64 {
        if offset == MTIME_OFFSET {
            return self.mtime & 0xFFFF_FFFF;
        }
        if offset == MTIME_OFFSET + 4 {
            return self.mtime >> 32;
        }
        if let Some(idx) = Self::index(offset, MSIP_BASE, 4, self.msip.len()) {
            return u64::from(self.msip[idx]);
        }
        if offset >= MTIMECMP_BASE {
            let rel = offset - MTIMECMP_BASE;
            let idx = (rel / 8) as usize;
            if idx < self.mtimecmp.len() {
                return if rel % 8 == 0 {
                    self.mtimecmp[idx] & 0xFFFF_FFFF
                } else {
                    self.mtimecmp[idx] >> 32
                };
            }
        }
        0
    }

    fn write32(&mut self, offset: u64, val: u32) {
        if let Some(idx) = Self::index(offset, MSIP_BASE, 4, self.msip.len()) {
            self.msip[idx] = val & 1;
            self.msip_writes.push((idx, val & 1 != 0));
            return;
        }
        if offset >= MTIMECMP_BASE {
            let rel = offset - MTIMECMP_BASE;
            let idx = (rel / 8) as usize;
            if idx < self.mtimecmp.len() {
                let cur = self.mtimecmp[idx];
                self.mtimecmp[idx] = if rel % 8 == 0 {
                    (cur & 0xFFFF_FFFF_0000_0000) | u64::from(val)
                } else {
                    (cur & 0xFFFF_FFFF) | (u64::from(val) << 32)
                };
                self.mtimecmp_writes.push(idx);
            }
        }
        // mtime itself is derived state here; guest writes are ignored.
    }

    fn index(offset: u64, base: u64, stride: u64, len: usize) -> Option<usize> {
        if offset < base {
            return None;
        }
        let rel = offset - base;
        if rel % stride != 0 {
            return None;
        }
        let idx = (rel / stride) as usize;
        (idx < len).then_some(idx)
    }
}

impl MmioDevice for Clint {
    fn name(&self) -> &'static str {
        "clint"
    }

    fn as_clint_mut(&mut self) -> Option<&mut Clint> {
        Some(self)
    }

    fn read(&mut self, offset: u64, size_log2: u32) -> Result<u64, ()> {
        match size_log2 {
            2 => Ok(self.read32(offset)),
            3 => Ok(self.read32(offset) | self.read32(offset + 4) << 32),
            _ => Err(()),
        }
    }

    fn write(&mut self, offset: u64, value: u64, size_log2: u32) -> Result<(), ()> {
        match size_log2 {
            2 => {
                self.write32(offset, value as u32);
                Ok(())
            }
            3 => {
                self.write32(offset, value as u32);
                self.write32(offset + 4, (value >> 32) as u32);
                Ok(())
            }
            _ => Err(()),
        }
    }
}
