//! Platform-level interrupt controller.
//!
//! The reduced pending/served model: device source `i` (1..=31) sets bit
//! `i - 1` of `pending`; a claim read returns the lowest-numbered pending,
//! un-served source and marks it served; the completion write clears the
//! served bit. The aggregated line — `pending & !served != 0` — drives MEIP
//! and SEIP on hart 0 through the machine glue.
//!
//! Device lines arrive through [`IrqLine`](crate::soc::device::IrqLine)
//! handles over a shared source mask, synced into `pending` at instruction
//! boundaries.

use crate::soc::device::{IrqSourceMask, MmioDevice};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const PLIC_HART_BASE: u64 = 0x20_0000;

/// PLIC state.
pub struct Plic {
    pending: u32,
    served: u32,
    sources: IrqSourceMask,
    /// Set whenever pending/served changed; the glue drains it to update
    /// MEIP/SEIP without clobbering DUT-injected interrupt bits.
    line_dirty: bool,
}

impl Plic {
    /// Creates a PLIC reading device lines from `sources`.
    pub fn new(sources: IrqSourceMask) -> Self {
        Self {
            pending: 0,
            served: 0,
            sources,
            line_dirty: false,
        }
    }

    /// Shared source mask for minting [`IrqLine`](crate::soc::device::IrqLine)s.
    pub fn sources(&self) -> IrqSourceMask {
        Arc::clone(&self.sources)
    }

    /// Folds the device lines into the pending word. Level-triggered: a
    /// lowered line clears its pending bit unless it is being served.
    pub fn sync_sources(&mut self) {
        let next = self.sources.load(Ordering::Relaxed);
        if next != self.pending {
            self.pending = next;
            self.line_dirty = true;
        }
    }

    /// Returns the new aggregated line level if it changed since the last
    /// drain.
    pub fn take_line_update(&mut self) -> Option<bool> {
        if self.line_dirty {
            self.line_dirty = false;
            Some(self.has_pending())
        } else {
            None
        }
    }

    /// Directly asserts (`state`) or deasserts source `irq` (1..=31).
    pub fn set_irq(&mut self, irq: u32, state: bool) {
        if !(1..=31).contains(&irq) {
            return;
        }
        let bit = 1 << (irq - 1);
        if state {
            let _ = self.sources.fetch_or(bit, Ordering::Relaxed);
            self.pending |= bit;
        } else {
            let _ = self.sources.fetch_and(!bit, Ordering::Relaxed);
            self.pending &= !bit;
        }
        self.line_dirty = true;
    }

    /// The aggregated external-interrupt line.
    pub fn has_pending(&self) -> bool {
        self.pending & !self.served != 0
    }

    /// Snapshot accessor: `(pending, served)`.
    pub fn state(&self) -> (u32, u32) {
        (self.pending, self.served)
    }

    /// Snapshot restore.
    pub fn restore(&mut self, pending: u32, served: u32) {
        self.pending = pending;
        self.served = served;
        self.sources.store(pending, Ordering::Relaxed);
    }

    fn claim(&mut self) -> u32 {
        let mask = self.pending & !self.served;
        if mask == 0 {
            return 0;
        }
        let i = mask.trailing_zeros();
        self.served |= 1 << i;
        self.line_dirty = true;
        i + 1
    }

    fn complete(&mut self, val: u32) {
        if let Some(bit) = val.checked_sub(1) {
            if bit < 32 {
                self.served &= !(1 << bit);
                self.line_dirty = true;
            }
        }
    }
}

impl MmioDevice for Plic {
    fn name(&self) -> &'static str {
        "plic"
    }

    fn as_plic_mut(&mut self) -> Option<&mut Plic> {
        Some(self)
    }

    fn read(&mut self, offset: u64, size_log2: u32) -> Result<u64, ()> {
        if size_log2 != 2 {
            return Err(());
        }
        let val = match offset {
            o if o == PLIC_HART_BASE => 0, // priority threshold
            o if o == PLIC_HART_BASE + 4 => self.claim(),
            _ => 0,
        };
        Ok(u64::from(val))
    }

    fn write(&mut self, offset: u64, value: u64, size_log2: u32) -> Result<(), ()> {
        if size_log2 != 2 {
            return Err(());
        }
        if offset == PLIC_HART_BASE + 4 {
            self.complete(value as u32);
        }
        Ok(())
    }
}
