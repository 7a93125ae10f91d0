//! Sv39/Sv48 page-table walker.
//!
//! Walks the radix tree from `satp.PPN`, largest pages first. A successful
//! walk installs a 4 KiB-granular translation in the TLB serving the access
//! kind and returns the physical address. Reserved encodings, misaligned
//! superpages, and non-canonical virtual addresses all raise the page fault
//! matching the access kind.

use crate::common::constants::{PAGE_OFFSET_MASK, PAGE_SHIFT};
use crate::common::{AccessKind, Trap, VirtAddr};
use crate::core::arch::csr::{
    Csrs, MSTATUS_MXR, MSTATUS_SUM, SATP_MODE_SV48, SATP_PPN_MASK,
};
use crate::core::arch::PrivilegeMode;
use crate::soc::memmap::PhysMemMap;

use super::pmp::Pmp;
use super::{AdUpdatePolicy, Mmu};

const PTE_V: u64 = 1 << 0;
const PTE_R: u64 = 1 << 1;
const PTE_W: u64 = 1 << 2;
const PTE_X: u64 = 1 << 3;
const PTE_U: u64 = 1 << 4;
const PTE_A: u64 = 1 << 6;
const PTE_D: u64 = 1 << 7;
const PTE_PPN_SHIFT: u64 = 10;

const VPN_BITS: u64 = 9;
const VPN_MASK: u64 = 0x1FF;
const PTE_SIZE: u64 = 8;

/// A raw Sv39/Sv48 page-table entry.
#[derive(Clone, Copy)]
struct Pte(u64);

impl Pte {
    fn is_valid(self) -> bool {
        self.0 & PTE_V != 0
    }

    fn readable(self) -> bool {
        self.0 & PTE_R != 0
    }

    fn writable(self) -> bool {
        self.0 & PTE_W != 0
    }

    fn executable(self) -> bool {
        self.0 & PTE_X != 0
    }

    fn user(self) -> bool {
        self.0 & PTE_U != 0
    }

    fn accessed(self) -> bool {
        self.0 & PTE_A != 0
    }

    fn dirty(self) -> bool {
        self.0 & PTE_D != 0
    }

    fn ppn(self) -> u64 {
        (self.0 >> PTE_PPN_SHIFT) & SATP_PPN_MASK
    }

    /// A valid entry with R=W=X=0 points at the next table level.
    fn is_pointer(self) -> bool {
        !self.readable() && !self.writable() && !self.executable()
    }

    /// W without R is a reserved encoding.
    fn is_reserved(self) -> bool {
        self.writable() && !self.readable()
    }
}

fn page_fault(vaddr: u64, kind: AccessKind) -> Trap {
    match kind {
        AccessKind::Fetch => Trap::InstructionPageFault(vaddr),
        AccessKind::Read => Trap::LoadPageFault(vaddr),
        AccessKind::Write => Trap::StorePageFault(vaddr),
    }
}

fn access_fault(vaddr: u64, kind: AccessKind) -> Trap {
    match kind {
        AccessKind::Fetch => Trap::InstructionAccessFault(vaddr),
        AccessKind::Read => Trap::LoadAccessFault(vaddr),
        AccessKind::Write => Trap::StoreAccessFault(vaddr),
    }
}

/// Checks that the virtual address is canonical for the translation depth:
/// bits above the top VPN bit must replicate it.
fn is_canonical(va: u64, va_bits: u32) -> bool {
    let sign = (va >> (va_bits - 1)) & 1;
    let high = va >> va_bits;
    if sign == 1 {
        high == (1u64 << (64 - va_bits)) - 1
    } else {
        high == 0
    }
}

/// Performs a full table walk. Only called on a TLB miss.
pub fn walk(
    mmu: &mut Mmu,
    vaddr: VirtAddr,
    kind: AccessKind,
    priv_mode: PrivilegeMode,
    csrs: &Csrs,
    pmp: &Pmp,
    mem: &mut PhysMemMap,
) -> Result<u64, Trap> {
    let va = vaddr.val();
    let levels: u64 = if csrs.satp_mode() == SATP_MODE_SV48 { 4 } else { 3 };
    let va_bits = (PAGE_SHIFT + levels * VPN_BITS) as u32;

    if !is_canonical(va, va_bits) {
        return Err(page_fault(va, kind));
    }

    let mut table_ppn = csrs.satp & SATP_PPN_MASK;
    for level in (0..levels).rev() {
        let vpn_i = (va >> (PAGE_SHIFT + level * VPN_BITS)) & VPN_MASK;
        let pte_addr = (table_ppn << PAGE_SHIFT) + vpn_i * PTE_SIZE;

        if !pmp.check(pte_addr, PTE_SIZE, AccessKind::Read, priv_mode) {
            return Err(access_fault(va, kind));
        }
        let pte = Pte(mem
            .read(pte_addr, 3)
            .map_err(|()| access_fault(va, kind))?);

        if !pte.is_valid() || pte.is_reserved() {
            return Err(page_fault(va, kind));
        }

        if pte.is_pointer() {
            if level == 0 {
                return Err(page_fault(va, kind));
            }
            table_ppn = pte.ppn();
            continue;
        }

        // Leaf. Superpages must be naturally aligned.
        if level > 0 {
            let align_mask = (1u64 << (level * VPN_BITS)) - 1;
            if pte.ppn() & align_mask != 0 {
                return Err(page_fault(va, kind));
            }
        }

        check_leaf_permissions(pte, kind, priv_mode, csrs).map_err(|()| page_fault(va, kind))?;

        let needs_a = !pte.accessed();
        let needs_d = kind == AccessKind::Write && !pte.dirty();
        if needs_a || needs_d {
            match mmu.ad_policy {
                AdUpdatePolicy::Trap => return Err(page_fault(va, kind)),
                AdUpdatePolicy::Hardware => {
                    let set = PTE_A | if needs_d { PTE_D } else { 0 };
                    mem.update_ram_u64(pte_addr, |old| old | set)
                        .map_err(|()| access_fault(va, kind))?;
                }
            }
        }

        // Compose the 4 KiB-granular physical page for this vaddr; for a
        // superpage the low PPN bits come from the virtual address.
        let vpn_low = (va >> PAGE_SHIFT) & ((1u64 << (level * VPN_BITS)) - 1);
        let page_ppn = pte.ppn() | vpn_low;
        let paddr = page_ppn << PAGE_SHIFT | (va & PAGE_OFFSET_MASK);

        let asid = ((csrs.satp >> 44) & 0xFFFF) as u16;
        let tlb = match kind {
            AccessKind::Fetch => &mut mmu.fetch_tlb,
            AccessKind::Read => &mut mmu.read_tlb,
            AccessKind::Write => &mut mmu.write_tlb,
        };
        tlb.insert(vaddr.vpn(), page_ppn, asid);

        return Ok(paddr);
    }

    Err(page_fault(va, kind))
}

/// Validates a leaf PTE against the access kind and effective privilege.
fn check_leaf_permissions(
    pte: Pte,
    kind: AccessKind,
    priv_mode: PrivilegeMode,
    csrs: &Csrs,
) -> Result<(), ()> {
    match kind {
        AccessKind::Write if !pte.writable() => return Err(()),
        AccessKind::Fetch if !pte.executable() => return Err(()),
        AccessKind::Read => {
            let mxr = csrs.mstatus & MSTATUS_MXR != 0;
            if !(pte.readable() || (pte.executable() && mxr)) {
                return Err(());
            }
        }
        _ => {}
    }

    match priv_mode {
        PrivilegeMode::User if !pte.user() => Err(()),
        PrivilegeMode::Supervisor if pte.user() => {
            // S-mode touches a U page only with SUM, and never executes one.
            if kind == AccessKind::Fetch || csrs.mstatus & MSTATUS_SUM == 0 {
                Err(())
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}
