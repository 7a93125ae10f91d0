//! Translation lookaside buffers.
//!
//! Three direct-mapped tables per hart — read, write, fetch — each
//! [`TLB_SIZE`] entries, indexed by the low bits of the virtual page number.
//! Presence of an entry implies the containing walk already validated the
//! access kind the table serves, so a hit needs no permission re-check.

use crate::common::constants::TLB_SIZE;

/// One direct-mapped TLB entry.
#[derive(Clone, Copy, Default)]
struct TlbEntry {
    /// Full virtual page number (tag).
    vpn: u64,
    /// Physical page number the tag maps to.
    ppn: u64,
    /// Address-space identifier the translation was made under.
    asid: u16,
    /// Entry validity.
    valid: bool,
}

/// A single direct-mapped translation cache.
pub struct Tlb {
    entries: Box<[TlbEntry; TLB_SIZE]>,
}

impl Tlb {
    /// Creates an empty TLB.
    pub fn new() -> Self {
        Self {
            entries: Box::new([TlbEntry::default(); TLB_SIZE]),
        }
    }

    #[inline(always)]
    fn index(vpn: u64) -> usize {
        (vpn as usize) & (TLB_SIZE - 1)
    }

    /// Looks up a virtual page number; returns the physical page number on a
    /// hit.
    #[inline(always)]
    pub fn lookup(&self, vpn: u64) -> Option<u64> {
        let e = &self.entries[Self::index(vpn)];
        (e.valid && e.vpn == vpn).then_some(e.ppn)
    }

    /// Installs a translation, evicting whatever shared the index.
    pub fn insert(&mut self, vpn: u64, ppn: u64, asid: u16) {
        self.entries[Self::index(vpn)] = TlbEntry {
            vpn,
            ppn,
            asid,
            valid: true,
        };
    }

    /// Invalidates everything.
    pub fn flush(&mut self) {
        for e in self.entries.iter_mut() {
            e.valid = false;
        }
    }

    /// Invalidates the entry (if any) translating the page of `vaddr`.
    pub fn flush_vaddr(&mut self, vaddr: u64) {
        let vpn = vaddr >> 12;
        let e = &mut self.entries[Self::index(vpn)];
        if e.vpn == vpn {
            e.valid = false;
        }
    }

    /// Invalidates every entry carrying `asid`.
    pub fn flush_asid(&mut self, asid: u16) {
        for e in self.entries.iter_mut() {
            if e.asid == asid {
                e.valid = false;
            }
        }
    }

    /// Invalidates every entry whose translation lands in the physical page
    /// of `paddr`. Used when a store hits a page that may hold code or data
    /// another translation points at.
    pub fn flush_paddr_page(&mut self, paddr: u64) {
        let ppn = paddr >> 12;
        for e in self.entries.iter_mut() {
            if e.valid && e.ppn == ppn {
                e.valid = false;
            }
        }
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}
