//! TLB-fronted loads, stores, and instruction fetches.
//!
//! Every helper returns `Result<_, Trap>`: misalignment is checked first
//! (against the virtual address), then translation, then PMP, then the
//! physical access. Stores record their pre-image in the repair shadow,
//! kill an overlapping local reservation, and drop any cached fetch
//! translation of the written physical page (the ifence-style
//! self-modifying-code hook).

use super::{Hart, StoreRepair};
use crate::common::{AccessKind, Trap, VirtAddr};
use crate::core::arch::csr::{MSTATUS_MPP_SHIFT, MSTATUS_MPRV};
use crate::core::arch::PrivilegeMode;
use crate::soc::memmap::PhysMemMap;

impl Hart {
    /// Effective privilege for data accesses: `MPRV` substitutes `MPP`.
    /// Instruction fetches always use the real privilege.
    #[inline]
    pub fn effective_data_priv(&self) -> PrivilegeMode {
        if self.csrs.mstatus & MSTATUS_MPRV != 0 {
            PrivilegeMode::from_u8(((self.csrs.mstatus >> MSTATUS_MPP_SHIFT) & 3) as u8)
        } else {
            self.privilege
        }
    }

    fn misaligned(vaddr: u64, size_log2: u32, kind: AccessKind) -> Result<(), Trap> {
        if vaddr & ((1 << size_log2) - 1) != 0 {
            return Err(match kind {
                AccessKind::Read => Trap::LoadAddressMisaligned(vaddr),
                AccessKind::Write => Trap::StoreAddressMisaligned(vaddr),
                AccessKind::Fetch => Trap::InstructionAddressMisaligned(vaddr),
            });
        }
        Ok(())
    }

    fn access_fault(vaddr: u64, kind: AccessKind) -> Trap {
        match kind {
            AccessKind::Read => Trap::LoadAccessFault(vaddr),
            AccessKind::Write => Trap::StoreAccessFault(vaddr),
            AccessKind::Fetch => Trap::InstructionAccessFault(vaddr),
        }
    }

    /// Translates a data address and checks PMP for the full access width.
    pub fn translate_data(
        &mut self,
        vaddr: u64,
        size_log2: u32,
        kind: AccessKind,
        mem: &mut PhysMemMap,
    ) -> Result<u64, Trap> {
        let priv_mode = self.effective_data_priv();
        let paddr = self.mmu.translate(
            VirtAddr::new(vaddr),
            kind,
            priv_mode,
            &self.csrs,
            &self.pmp,
            mem,
        )?;
        if !self.pmp.check(paddr, 1 << size_log2, kind, priv_mode) {
            return Err(Self::access_fault(vaddr, kind));
        }
        Ok(paddr)
    }

    /// Loads `1 << size_log2` bytes at virtual address `vaddr`.
    pub fn load(
        &mut self,
        vaddr: u64,
        size_log2: u32,
        mem: &mut PhysMemMap,
    ) -> Result<u64, Trap> {
        Self::misaligned(vaddr, size_log2, AccessKind::Read)?;
        let paddr = self.translate_data(vaddr, size_log2, AccessKind::Read, mem)?;
        mem.read(paddr, size_log2)
            .map_err(|()| Trap::LoadAccessFault(vaddr))
    }

    /// Stores `1 << size_log2` bytes at virtual address `vaddr`.
    pub fn store(
        &mut self,
        vaddr: u64,
        value: u64,
        size_log2: u32,
        mem: &mut PhysMemMap,
    ) -> Result<(), Trap> {
        Self::misaligned(vaddr, size_log2, AccessKind::Write)?;
        let paddr = self.translate_data(vaddr, size_log2, AccessKind::Write, mem)?;
        self.store_phys(paddr, vaddr, value, size_log2, mem)
    }

    /// The physical half of a store; shared with AMOs and SC which already
    /// translated.
    pub fn store_phys(
        &mut self,
        paddr: u64,
        vaddr: u64,
        value: u64,
        size_log2: u32,
        mem: &mut PhysMemMap,
    ) -> Result<(), Trap> {
        // Record the pre-image for cosim repair when the target is RAM.
        // MMIO targets are never read here: a device read has side effects.
        self.store_repair = if mem.is_ram(paddr) {
            mem.read(paddr, size_log2).ok().map(|old| StoreRepair {
                paddr,
                size_log2,
                old,
            })
        } else {
            None
        };

        mem.write(paddr, value, size_log2)
            .map_err(|()| Trap::StoreAccessFault(vaddr))?;

        self.clear_reservation_on_store(paddr, 1 << size_log2);
        // A write into a page with a live fetch translation invalidates it.
        self.mmu.fetch_tlb.flush_paddr_page(paddr);
        Ok(())
    }

    /// Fetches one 16-bit parcel at `vaddr`. The caller handles pairing the
    /// two parcels of a 32-bit instruction, so a fault on the second parcel
    /// reports the correct address.
    pub fn fetch_u16(&mut self, vaddr: u64, mem: &mut PhysMemMap) -> Result<u16, Trap> {
        if vaddr & 1 != 0 {
            return Err(Trap::InstructionAddressMisaligned(vaddr));
        }
        let paddr = self.mmu.translate(
            VirtAddr::new(vaddr),
            AccessKind::Fetch,
            self.privilege,
            &self.csrs,
            &self.pmp,
            mem,
        )?;
        if !self.pmp.check(paddr, 2, AccessKind::Fetch, self.privilege) {
            return Err(Trap::InstructionAccessFault(vaddr));
        }
        mem.read(paddr, 1)
            .map(|v| v as u16)
            .map_err(|()| Trap::InstructionAccessFault(vaddr))
    }

    /// Reads the full instruction at `vaddr`: one parcel, and a second when
    /// the low two bits say the encoding is 32-bit.
    pub fn fetch_insn(&mut self, vaddr: u64, mem: &mut PhysMemMap) -> Result<u32, Trap> {
        let lo = self.fetch_u16(vaddr, mem)?;
        if lo & 3 != 3 {
            return Ok(u32::from(lo));
        }
        let hi = self.fetch_u16(vaddr.wrapping_add(2), mem)?;
        Ok(u32::from(lo) | u32::from(hi) << 16)
    }

    /// Non-destructive instruction read for the cosim front end. Identical
    /// translation path to a real fetch.
    pub fn peek_insn(&mut self, vaddr: u64, mem: &mut PhysMemMap) -> Result<u32, Trap> {
        self.fetch_insn(vaddr, mem)
    }

    /// Translates a virtual address for a read without performing it; used
    /// by the cosim MMIO-window test. Returns `None` on any fault.
    pub fn probe_read_paddr(&mut self, vaddr: u64, mem: &mut PhysMemMap) -> Option<u64> {
        self.translate_data(vaddr, 0, AccessKind::Read, mem).ok()
    }
}
