//! Memory management unit.
//!
//! Sv39/Sv48 translation with per-access-kind TLBs and PMP. The unit holds
//! no CSR state of its own: `satp`, `mstatus.SUM/MXR`, and the privilege
//! mode are passed in per translation, already resolved for `MPRV` by the
//! caller.

/// Physical memory protection.
pub mod pmp;
/// Sv39/Sv48 page-table walker.
pub mod ptw;
/// Direct-mapped translation caches.
pub mod tlb;

use crate::common::constants::PAGE_OFFSET_MASK;
use crate::common::{AccessKind, Trap, VirtAddr};
use crate::core::arch::csr::{
    Csrs, SATP_MODE_BARE, SATP_MODE_SV39, SATP_MODE_SV48,
};
use crate::core::arch::PrivilegeMode;
use crate::soc::memmap::PhysMemMap;

use self::pmp::Pmp;
use self::tlb::Tlb;

/// How the walker maintains the A and D bits of a leaf PTE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AdUpdatePolicy {
    /// Update the PTE in memory as hardware would.
    #[default]
    Hardware,
    /// Raise a page fault and let software maintain the bits.
    Trap,
}

/// Per-hart MMU: three translation caches and the A/D policy.
pub struct Mmu {
    /// TLB serving instruction fetches.
    pub fetch_tlb: Tlb,
    /// TLB serving data loads.
    pub read_tlb: Tlb,
    /// TLB serving data stores.
    pub write_tlb: Tlb,
    /// A/D maintenance policy for the walker.
    pub ad_policy: AdUpdatePolicy,
}

impl Mmu {
    /// Creates an MMU with empty TLBs.
    pub fn new(ad_policy: AdUpdatePolicy) -> Self {
        Self {
            fetch_tlb: Tlb::new(),
            read_tlb: Tlb::new(),
            write_tlb: Tlb::new(),
            ad_policy,
        }
    }

    fn tlb_for(&self, kind: AccessKind) -> &Tlb {
        match kind {
            AccessKind::Fetch => &self.fetch_tlb,
            AccessKind::Read => &self.read_tlb,
            AccessKind::Write => &self.write_tlb,
        }
    }

    /// Translates `vaddr` for `kind` at privilege `priv_mode`.
    ///
    /// M-mode and `satp` bare mode pass the address through unchanged. A
    /// TLB hit composes the physical address directly; the containing walk
    /// already performed the permission checks for this access kind.
    pub fn translate(
        &mut self,
        vaddr: VirtAddr,
        kind: AccessKind,
        priv_mode: PrivilegeMode,
        csrs: &Csrs,
        pmp: &Pmp,
        mem: &mut PhysMemMap,
    ) -> Result<u64, Trap> {
        let mode = csrs.satp_mode();
        if priv_mode == PrivilegeMode::Machine || mode == SATP_MODE_BARE {
            return Ok(vaddr.val());
        }
        debug_assert!(mode == SATP_MODE_SV39 || mode == SATP_MODE_SV48);

        if let Some(ppn) = self.tlb_for(kind).lookup(vaddr.vpn()) {
            return Ok(ppn << 12 | (vaddr.val() & PAGE_OFFSET_MASK));
        }
        ptw::walk(self, vaddr, kind, priv_mode, csrs, pmp, mem)
    }

    /// Flushes all three TLBs.
    pub fn flush_all(&mut self) {
        self.fetch_tlb.flush();
        self.read_tlb.flush();
        self.write_tlb.flush();
    }

    /// SFENCE.VMA with optional address and ASID filters.
    pub fn sfence_vma(&mut self, vaddr: Option<u64>, asid: Option<u16>) {
        match (vaddr, asid) {
            (Some(va), _) => {
                self.fetch_tlb.flush_vaddr(va);
                self.read_tlb.flush_vaddr(va);
                self.write_tlb.flush_vaddr(va);
            }
            (None, Some(asid)) => {
                self.fetch_tlb.flush_asid(asid);
                self.read_tlb.flush_asid(asid);
                self.write_tlb.flush_asid(asid);
            }
            (None, None) => self.flush_all(),
        }
    }

    /// Invalidates any cached translation landing in the physical page of
    /// `paddr`. Driven by the machine's store log for cross-hart coherence
    /// and by the local store path for self-modifying code.
    pub fn flush_phys_page(&mut self, paddr: u64) {
        self.fetch_tlb.flush_paddr_page(paddr);
        self.read_tlb.flush_paddr_page(paddr);
        self.write_tlb.flush_paddr_page(paddr);
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new(AdUpdatePolicy::Hardware)
    }
}
