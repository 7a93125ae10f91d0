//! CSR access: permission checks, field legalization, and side effects.
//!
//! The two privilege bits encoded in the CSR number gate every access;
//! read-only CSRs (top two bits `11`) refuse writes. Counter reads below
//! M-mode additionally consult `mcounteren`/`scounteren`. All failures
//! surface as `Err(())`, which the dispatcher converts into an illegal
//! instruction with the offending encoding as `tval`.

use super::Hart;
use crate::core::arch::csr::{self as a, Csrs};
use crate::core::arch::PrivilegeMode;

/// Side effects a CSR write can demand from the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrWriteEffect {
    /// Nothing beyond the register update.
    None,
    /// Address-space identity changed: flush this hart's TLBs.
    FlushTlb,
}

/// Recognized validation events and the values software writes to report
/// them. The CLI's `--terminate-event` names resolve against this table.
pub const VALIDATION_EVENTS: &[(&str, u64)] = &[
    ("linux-boot", (1 << 56) | 1),
    ("benchmark-start", (2 << 56) | 1),
    ("benchmark-end", (2 << 56) | 2),
];

const CSR_PRIV_SHIFT: u32 = 8;
const CSR_READ_ONLY: u32 = 0b11 << 10;

fn csr_min_priv(addr: u32) -> PrivilegeMode {
    PrivilegeMode::from_u8(((addr >> CSR_PRIV_SHIFT) & 3) as u8)
}

fn is_read_only(addr: u32) -> bool {
    addr & CSR_READ_ONLY == CSR_READ_ONLY
}

/// Legal `mstatus` writable field set.
const MSTATUS_WRITE_MASK: u64 = a::MSTATUS_UIE
    | a::MSTATUS_SIE
    | a::MSTATUS_MIE
    | a::MSTATUS_UPIE
    | a::MSTATUS_SPIE
    | a::MSTATUS_MPIE
    | a::MSTATUS_SPP
    | a::MSTATUS_MPP
    | a::MSTATUS_FS
    | a::MSTATUS_MPRV
    | a::MSTATUS_SUM
    | a::MSTATUS_MXR
    | a::MSTATUS_TVM
    | a::MSTATUS_TW
    | a::MSTATUS_TSR;

/// Fields of `mstatus` writable through `sstatus`.
const SSTATUS_WRITE_MASK: u64 = a::MSTATUS_UIE
    | a::MSTATUS_SIE
    | a::MSTATUS_UPIE
    | a::MSTATUS_SPIE
    | a::MSTATUS_SPP
    | a::MSTATUS_FS
    | a::MSTATUS_SUM
    | a::MSTATUS_MXR;

/// Applies a legalized write to `mstatus`: masked fields update, MPP is
/// clamped to an implemented mode, XLEN fields stay pinned to 64, and the
/// read-only SD summary bit tracks FS.
fn legalize_mstatus(csrs: &mut Csrs, val: u64, mask: u64) {
    let mut next = (csrs.mstatus & !mask) | (val & mask);

    let mpp = (next >> a::MSTATUS_MPP_SHIFT) & 3;
    if mpp == 2 {
        // Hypervisor encoding is unimplemented; WARL back to what was there.
        next = (next & !a::MSTATUS_MPP) | (csrs.mstatus & a::MSTATUS_MPP);
    }

    next = (next & !(a::MSTATUS_UXL | a::MSTATUS_SXL)) | a::MSTATUS_RESET;

    if (next >> a::MSTATUS_FS_SHIFT) & 3 == a::FS_DIRTY {
        next |= a::MSTATUS_SD;
    } else {
        next &= !a::MSTATUS_SD;
    }
    csrs.mstatus = next;
}

impl Hart {
    /// True when this hart may read `addr` in its current mode.
    fn check_csr_priv(&self, addr: u32) -> Result<(), ()> {
        if self.privilege < csr_min_priv(addr) {
            Err(())
        } else {
            Ok(())
        }
    }

    /// Counter-read gate for cycle/time/instret (and the hpm counters) at
    /// privileges below M.
    fn check_counter(&self, bit: u32) -> Result<(), ()> {
        let bit = 1u64 << bit;
        if self.privilege < PrivilegeMode::Machine && self.csrs.mcounteren & bit == 0 {
            return Err(());
        }
        if self.privilege == PrivilegeMode::User && self.csrs.scounteren & bit == 0 {
            return Err(());
        }
        Ok(())
    }

    fn check_fs_on(&self) -> Result<(), ()> {
        if self.csrs.fs() == a::FS_OFF {
            Err(())
        } else {
            Ok(())
        }
    }

    /// Reads a CSR, enforcing privilege and counter permissions.
    pub fn csr_read(&self, addr: u32) -> Result<u64, ()> {
        self.check_csr_priv(addr)?;

        let c = &self.csrs;
        let val = match addr {
            a::FFLAGS => {
                self.check_fs_on()?;
                c.fflags
            }
            a::FRM => {
                self.check_fs_on()?;
                c.frm
            }
            a::FCSR => {
                self.check_fs_on()?;
                c.frm << 5 | c.fflags
            }

            a::MSTATUS => c.mstatus,
            a::MISA => c.misa,
            a::MEDELEG => c.medeleg,
            a::MIDELEG => c.mideleg,
            a::MIE => c.mie,
            a::MTVEC => c.mtvec,
            a::MCOUNTEREN => c.mcounteren,
            a::MSCRATCH => c.mscratch,
            a::MEPC => c.mepc,
            a::MCAUSE => c.mcause,
            a::MTVAL => c.mtval,
            a::MIP => c.mip,

            a::SSTATUS => c.mstatus & a::SSTATUS_MASK,
            a::SIE => c.mie & a::SIP_MASK,
            a::STVEC => c.stvec,
            a::SCOUNTEREN => c.scounteren,
            a::SSCRATCH => c.sscratch,
            a::SEPC => c.sepc,
            a::SCAUSE => c.scause,
            a::STVAL => c.stval,
            a::SIP => c.mip & a::SIP_MASK,
            a::SATP => {
                if self.privilege == PrivilegeMode::Supervisor
                    && c.mstatus & a::MSTATUS_TVM != 0
                {
                    return Err(());
                }
                c.satp
            }

            a::CYCLE => {
                self.check_counter(0)?;
                self.insn_counter
            }
            a::TIME => {
                self.check_counter(1)?;
                self.time()
            }
            a::INSTRET => {
                self.check_counter(2)?;
                self.minstret
            }
            a::MCYCLE => self.insn_counter,
            a::MINSTRET => self.minstret,
            a::MHPMCOUNTER3..=a::MHPMCOUNTER31 => 0,
            a::HPMCOUNTER3..=a::HPMCOUNTER31 => {
                self.check_counter(addr - a::CYCLE)?;
                0
            }

            a::MVENDORID | a::MARCHID | a::MIMPID => 0,
            a::MHARTID => self.hartid,

            a::TSELECT => c.tselect,
            // No trigger types are implemented; tdata1 reads as zero so
            // software sees an empty trigger.
            a::TDATA1 => 0,
            a::TDATA2 => c.tdata2,
            a::TDATA3 => c.tdata3,

            a::PMPCFG0 => self.pmp.read_cfg(0),
            a::PMPCFG2 => self.pmp.read_cfg(2),
            a::PMPADDR0..=a::PMPADDR15 => self.pmp.read_addr((addr - a::PMPADDR0) as usize),

            a::VALIDATION0 => c.validation0,
            a::VALIDATION1 => 0,

            _ => return Err(()),
        };
        Ok(val)
    }

    /// Writes a CSR, enforcing privilege, read-only encoding, and field
    /// legalization. Returns the side effect the caller must apply.
    pub fn csr_write(&mut self, addr: u32, val: u64) -> Result<CsrWriteEffect, ()> {
        self.check_csr_priv(addr)?;
        if is_read_only(addr) {
            return Err(());
        }

        let mut effect = CsrWriteEffect::None;
        match addr {
            a::FFLAGS => {
                self.check_fs_on()?;
                self.csrs.fflags = val & 0x1F;
                self.csrs.set_fs_dirty();
            }
            a::FRM => {
                self.check_fs_on()?;
                self.csrs.frm = val & 7;
                self.csrs.set_fs_dirty();
            }
            a::FCSR => {
                self.check_fs_on()?;
                self.csrs.fflags = val & 0x1F;
                self.csrs.frm = (val >> 5) & 7;
                self.csrs.set_fs_dirty();
            }

            a::MSTATUS => legalize_mstatus(&mut self.csrs, val, MSTATUS_WRITE_MASK),
            a::MISA => {
                // Read-as-written within the implemented mask; MXL is fixed.
                // Dropping C while executing is legal here because the next
                // fetch is always 4-byte aligned after a CSR write; the
                // write is idempotent either way.
                self.csrs.misa = a::MISA_MXL_64 | (val & a::MISA_EXT_MASK);
            }
            a::MEDELEG => {
                // Exception causes 0..15, minus ECALL-from-M which cannot
                // be delegated.
                self.csrs.medeleg = val & 0xF7FF;
            }
            a::MIDELEG => self.csrs.mideleg = val & a::SIP_MASK,
            a::MIE => self.csrs.mie = val & 0xFFF,
            a::MTVEC => self.csrs.mtvec = legalize_tvec(val),
            a::MCOUNTEREN => self.csrs.mcounteren = val & 0x7,
            a::MSCRATCH => self.csrs.mscratch = val,
            a::MEPC => self.csrs.mepc = val & !1,
            a::MCAUSE => self.csrs.mcause = val,
            a::MTVAL => self.csrs.mtval = val,
            a::MIP => {
                // Only the software-writable pending bits respond.
                self.csrs.mip = (self.csrs.mip & !a::MIP_WRITE_MASK) | (val & a::MIP_WRITE_MASK);
            }

            a::SSTATUS => legalize_mstatus(&mut self.csrs, val, SSTATUS_WRITE_MASK),
            a::SIE => {
                self.csrs.mie = (self.csrs.mie & !a::SIP_MASK) | (val & a::SIP_MASK);
            }
            a::STVEC => self.csrs.stvec = legalize_tvec(val),
            a::SCOUNTEREN => self.csrs.scounteren = val & 0x7,
            a::SSCRATCH => self.csrs.sscratch = val,
            a::SEPC => self.csrs.sepc = val & !1,
            a::SCAUSE => self.csrs.scause = val,
            a::STVAL => self.csrs.stval = val,
            a::SIP => {
                // Through sip only SSIP (and USIP) are software-writable.
                let mask = a::MIP_WRITE_MASK & a::SIP_MASK;
                self.csrs.mip = (self.csrs.mip & !mask) | (val & mask);
            }
            a::SATP => {
                if self.privilege == PrivilegeMode::Supervisor
                    && self.csrs.mstatus & a::MSTATUS_TVM != 0
                {
                    return Err(());
                }
                let mode = (val >> a::SATP_MODE_SHIFT) & a::SATP_MODE_MASK;
                if matches!(
                    mode,
                    a::SATP_MODE_BARE | a::SATP_MODE_SV39 | a::SATP_MODE_SV48
                ) {
                    self.csrs.satp = val & (a::SATP_MODE_MASK << a::SATP_MODE_SHIFT
                        | a::SATP_ASID_MASK
                        | a::SATP_PPN_MASK);
                    effect = CsrWriteEffect::FlushTlb;
                }
                // Unsupported modes leave satp unchanged (WARL).
            }

            a::MCYCLE => self.insn_counter = val,
            a::MINSTRET => self.minstret = val,
            a::MHPMCOUNTER3..=a::MHPMCOUNTER31 => {}

            a::TSELECT => self.csrs.tselect = val,
            a::TDATA1 => {}
            a::TDATA2 => self.csrs.tdata2 = val,
            a::TDATA3 => self.csrs.tdata3 = val,

            a::PMPCFG0 => self.pmp.write_cfg(0, val),
            a::PMPCFG2 => self.pmp.write_cfg(2, val),
            a::PMPADDR0..=a::PMPADDR15 => {
                self.pmp.write_addr((addr - a::PMPADDR0) as usize, val);
            }

            a::VALIDATION0 => self.csrs.validation0 = val,
            a::VALIDATION1 => self.write_validation_event(val),

            _ => return Err(()),
        }
        Ok(effect)
    }

    /// Handles a write to the validation-event CSR: a recognized event that
    /// matches the configured terminate event ends the simulation.
    fn write_validation_event(&mut self, val: u64) {
        match VALIDATION_EVENTS.iter().find(|(_, v)| *v == val) {
            Some((name, _)) => {
                tracing::info!(event = name, hart = self.hartid, "validation event");
                if self.terminate_event == Some(val) {
                    self.terminate = true;
                }
            }
            None => {
                tracing::debug!(value = format_args!("{val:#x}"), "unrecognized validation event");
            }
        }
    }
}

/// tvec is WARL: mode 2/3 are reserved, so bit 1 reads as zero.
fn legalize_tvec(val: u64) -> u64 {
    val & !2
}
