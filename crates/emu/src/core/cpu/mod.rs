//! The hart: architectural state and retirement bookkeeping.
//!
//! A [`Hart`] owns everything per-thread in the data model — registers with
//! their cosim shadows, CSRs, privilege mode, MMU/PMP, the LR/SC
//! reservation, the store-repair shadow, and control-flow-transfer summary
//! state. The shared memory map is *not* owned here; every memory-touching
//! method borrows it from the machine.

/// CSR access, legalization, and side effects.
pub mod csr;
/// The decode-and-execute interpreter and stepping loop.
pub mod execute;
/// TLB-fronted loads, stores, and fetches.
pub mod memory;
/// Trap delivery, interrupt selection, and xRET.
pub mod trap;

use crate::common::constants::RESERVATION_GRANULE;
use crate::core::arch::csr::Csrs;
use crate::core::arch::{FpRegisterFile, PrivilegeMode, RegisterFile};
use crate::core::units::mmu::pmp::Pmp;
use crate::core::units::mmu::{AdUpdatePolicy, Mmu};

/// Control-flow-transfer summary of the last retired instruction, consumed
/// by the branch-history cosim. Indirect jumps carry return-address-stack
/// hints derived from the link-register convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CtfInfo {
    /// Not a taken control-flow transfer.
    #[default]
    Nop,
    /// Direct jump (JAL).
    TakenJump,
    /// Taken conditional branch.
    TakenBranch,
    /// Indirect jump, no RAS hint.
    TakenJalr,
    /// Indirect jump popping the RAS.
    TakenJalrPop,
    /// Indirect jump pushing the RAS.
    TakenJalrPush,
    /// Indirect jump popping then pushing the RAS.
    TakenJalrPopPush,
}

/// Pre-image of the most recent store, kept so the cosim can undo a store
/// the DUT did not actually commit. Any FENCE conservatively discards it.
#[derive(Clone, Copy, Debug)]
pub struct StoreRepair {
    /// Physical address of the store.
    pub paddr: u64,
    /// log2 of the store width in bytes.
    pub size_log2: u32,
    /// Overwritten bytes, low-justified.
    pub old: u64,
}

/// What one call to [`Hart::exec_one`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Exactly one instruction retired.
    Retired,
    /// A trap (exception or interrupt) was delivered; nothing retired.
    Trapped,
    /// The hart is in WFI power-down with no pending interrupt.
    PowerDown,
    /// The hart hit its termination condition.
    Terminated,
}

/// One hardware thread.
pub struct Hart {
    /// Hart index, readable through `mhartid`.
    pub hartid: u64,
    /// Program counter.
    pub pc: u64,
    /// Integer registers with prior/timestamp shadows.
    pub regs: RegisterFile,
    /// Floating-point registers.
    pub fregs: FpRegisterFile,
    /// Current privilege mode.
    pub privilege: PrivilegeMode,
    /// Control and status registers.
    pub csrs: Csrs,
    /// Address translation unit.
    pub mmu: Mmu,
    /// Physical memory protection unit.
    pub pmp: Pmp,

    /// Instructions fetched (advances even when the fetch faults). May run
    /// ahead of `minstret` and exists for debugging and timestamps.
    pub insn_counter: u64,
    /// Architectural retired-instruction counter.
    pub minstret: u64,

    /// Live LR reservation: granule-aligned physical address.
    pub load_res: Option<u64>,
    /// Pre-image of the last store for cosim repair.
    pub store_repair: Option<StoreRepair>,

    /// Control-flow summary of the last retired instruction.
    pub ctf_info: CtfInfo,
    /// Target of the last taken control-flow transfer.
    pub ctf_target: u64,

    /// Set by WFI until an interrupt becomes pending.
    pub power_down: bool,
    /// Set by HTIF shutdown or a recognized validation event.
    pub terminate: bool,
    /// Requests a TLB shootdown on the other harts (SFENCE.VMA broadcast);
    /// drained by the machine after each instruction.
    pub tlb_broadcast: bool,

    /// Ticks of `mtime` per retired instruction: `time = minstret / div`.
    pub timebase_div: u64,
    /// Validation-event value that terminates the run when written to the
    /// validation CSR, if one was configured.
    pub terminate_event: Option<u64>,
}

impl Hart {
    /// Creates a hart in M-mode at the given reset vector.
    pub fn new(hartid: u64, reset_pc: u64, timebase_div: u64, ad_policy: AdUpdatePolicy) -> Self {
        Self {
            hartid,
            pc: reset_pc,
            regs: RegisterFile::new(),
            fregs: FpRegisterFile::new(),
            privilege: PrivilegeMode::Machine,
            csrs: Csrs::default(),
            mmu: Mmu::new(ad_policy),
            pmp: Pmp::default(),
            insn_counter: 0,
            minstret: 0,
            load_res: None,
            store_repair: None,
            ctf_info: CtfInfo::Nop,
            ctf_target: 0,
            power_down: false,
            terminate: false,
            tlb_broadcast: false,
            timebase_div: timebase_div.max(1),
            terminate_event: None,
        }
    }

    #[inline]
    fn granule(addr: u64) -> u64 {
        addr & !(RESERVATION_GRANULE - 1)
    }

    /// Places a reservation on the granule containing `paddr`.
    #[inline]
    pub fn set_reservation(&mut self, paddr: u64) {
        self.load_res = Some(Self::granule(paddr));
    }

    /// True when a live reservation covers `paddr`.
    #[inline]
    pub fn check_reservation(&self, paddr: u64) -> bool {
        self.load_res == Some(Self::granule(paddr))
    }

    /// Kills the reservation.
    #[inline]
    pub fn clear_reservation(&mut self) {
        self.load_res = None;
    }

    /// Kills the reservation if a store of `len` bytes at `paddr` overlaps
    /// its granule. Called for every store by every hart.
    pub fn clear_reservation_on_store(&mut self, paddr: u64, len: u64) {
        if let Some(res) = self.load_res {
            let lo = Self::granule(paddr);
            let hi = Self::granule(paddr + len.max(1) - 1);
            if res == lo || res == hi {
                self.load_res = None;
            }
        }
    }

    /// Sets bits in `mip` (from the interrupt fabric or DUT injection).
    #[inline]
    pub fn set_mip(&mut self, bits: u64) {
        self.csrs.mip |= bits;
        if self.power_down && self.csrs.mip & self.csrs.mie != 0 {
            self.power_down = false;
        }
    }

    /// Clears bits in `mip`.
    #[inline]
    pub fn reset_mip(&mut self, bits: u64) {
        self.csrs.mip &= !bits;
    }

    /// Current `mtime` as this hart observes it.
    #[inline]
    pub fn time(&self) -> u64 {
        self.minstret / self.timebase_div
    }

    /// Writes back the pre-image of the last store, undoing it. Returns
    /// false when no repairable store is recorded.
    pub fn repair_store(&mut self, mem: &mut crate::soc::memmap::PhysMemMap) -> bool {
        match self.store_repair.take() {
            Some(rep) => mem.write(rep.paddr, rep.old, rep.size_log2).is_ok(),
            None => false,
        }
    }

    /// Dumps PC and the integer registers to stderr.
    pub fn dump_state(&self) {
        eprintln!("hart {} pc={:#018x}", self.hartid, self.pc);
        self.regs.dump();
    }
}
