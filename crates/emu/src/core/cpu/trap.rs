//! Trap delivery, xRET, and interrupt selection.
//!
//! Delivery writes the cause/epc/tval triple into the destination ring —
//! supervisor when the cause is delegated and the hart runs at S or below,
//! machine otherwise — pushes the interrupt-enable and privilege stacks in
//! `mstatus`, and redirects the PC to the (possibly vectored) trap vector.
//! MRET/SRET pop the same stacks. Any trap kills the LR reservation.

use super::Hart;
use crate::common::constants::CAUSE_INTERRUPT_BIT;
use crate::common::Trap;
use crate::core::arch::csr as a;
use crate::core::arch::PrivilegeMode;
use crate::isa::cause::interrupt;

/// Interrupt service order: external before software before timer, machine
/// ring before supervisor before user.
const INTERRUPT_PRIORITY: [u64; 9] = [
    interrupt::MACHINE_EXTERNAL,
    interrupt::MACHINE_SOFTWARE,
    interrupt::MACHINE_TIMER,
    interrupt::SUPERVISOR_EXTERNAL,
    interrupt::SUPERVISOR_SOFTWARE,
    interrupt::SUPERVISOR_TIMER,
    interrupt::USER_EXTERNAL,
    interrupt::USER_SOFTWARE,
    interrupt::USER_TIMER,
];

impl Hart {
    /// Delivers `trap` with `epc` as the interrupted PC.
    pub fn deliver_trap(&mut self, trap: &Trap, epc: u64) {
        self.clear_reservation();

        let (is_interrupt, code) = trap.cause();
        let tval = trap.tval();

        let deleg_mask = if is_interrupt {
            self.csrs.mideleg
        } else {
            self.csrs.medeleg
        };
        let delegate = self.privilege <= PrivilegeMode::Supervisor && (deleg_mask >> code) & 1 != 0;

        tracing::debug!(
            hart = self.hartid,
            %trap,
            epc = format_args!("{epc:#x}"),
            to = if delegate { "S" } else { "M" },
            "trap"
        );

        let cause_val = if is_interrupt {
            CAUSE_INTERRUPT_BIT | code
        } else {
            code
        };

        if delegate {
            self.csrs.scause = cause_val;
            self.csrs.sepc = epc;
            self.csrs.stval = tval;

            let mut mstatus = self.csrs.mstatus;
            // Push: SPIE <- SIE, SIE <- 0, SPP <- current privilege.
            if mstatus & a::MSTATUS_SIE != 0 {
                mstatus |= a::MSTATUS_SPIE;
            } else {
                mstatus &= !a::MSTATUS_SPIE;
            }
            if self.privilege == PrivilegeMode::Supervisor {
                mstatus |= a::MSTATUS_SPP;
            } else {
                mstatus &= !a::MSTATUS_SPP;
            }
            mstatus &= !a::MSTATUS_SIE;
            self.csrs.mstatus = mstatus;

            self.privilege = PrivilegeMode::Supervisor;
            self.pc = vectored_target(self.csrs.stvec, is_interrupt, code);
        } else {
            self.csrs.mcause = cause_val;
            self.csrs.mepc = epc;
            self.csrs.mtval = tval;

            let mut mstatus = self.csrs.mstatus;
            if mstatus & a::MSTATUS_MIE != 0 {
                mstatus |= a::MSTATUS_MPIE;
            } else {
                mstatus &= !a::MSTATUS_MPIE;
            }
            mstatus = (mstatus & !a::MSTATUS_MPP)
                | (u64::from(self.privilege.to_u8()) << a::MSTATUS_MPP_SHIFT);
            mstatus &= !a::MSTATUS_MIE;
            self.csrs.mstatus = mstatus;

            self.privilege = PrivilegeMode::Machine;
            self.pc = vectored_target(self.csrs.mtvec, is_interrupt, code);
        }
    }

    /// MRET: pop the machine stack and return.
    pub fn do_mret(&mut self) {
        let mstatus = self.csrs.mstatus;
        let mpp = PrivilegeMode::from_u8(((mstatus >> a::MSTATUS_MPP_SHIFT) & 3) as u8);

        let mut next = mstatus;
        if mstatus & a::MSTATUS_MPIE != 0 {
            next |= a::MSTATUS_MIE;
        } else {
            next &= !a::MSTATUS_MIE;
        }
        next |= a::MSTATUS_MPIE;
        next &= !a::MSTATUS_MPP; // MPP <- U
        if mpp != PrivilegeMode::Machine {
            next &= !a::MSTATUS_MPRV;
        }
        self.csrs.mstatus = next;

        self.privilege = mpp;
        self.pc = self.csrs.mepc & !1;
        self.clear_reservation();
    }

    /// SRET: pop the supervisor stack and return.
    pub fn do_sret(&mut self) {
        let mstatus = self.csrs.mstatus;
        let spp = if mstatus & a::MSTATUS_SPP != 0 {
            PrivilegeMode::Supervisor
        } else {
            PrivilegeMode::User
        };

        let mut next = mstatus;
        if mstatus & a::MSTATUS_SPIE != 0 {
            next |= a::MSTATUS_SIE;
        } else {
            next &= !a::MSTATUS_SIE;
        }
        next |= a::MSTATUS_SPIE;
        next &= !a::MSTATUS_SPP;
        next &= !a::MSTATUS_MPRV;
        self.csrs.mstatus = next;

        self.privilege = spp;
        self.pc = self.csrs.sepc & !1;
        self.clear_reservation();
    }

    /// Picks the highest-priority interrupt that is pending, enabled, and
    /// deliverable at the current privilege.
    pub fn pending_interrupt(&self) -> Option<Trap> {
        let pending = self.csrs.mip & self.csrs.mie;
        if pending == 0 {
            return None;
        }

        // Which rings may deliver right now: M-targeted interrupts when
        // below M or when MIE is set; delegated ones when below S or when
        // SIE is set at S.
        let mie_on = self.csrs.mstatus & a::MSTATUS_MIE != 0;
        let sie_on = self.csrs.mstatus & a::MSTATUS_SIE != 0;

        let mut enabled = 0u64;
        if self.privilege < PrivilegeMode::Machine || mie_on {
            enabled |= pending & !self.csrs.mideleg;
        }
        if self.privilege < PrivilegeMode::Supervisor
            || (self.privilege == PrivilegeMode::Supervisor && sie_on)
        {
            enabled |= pending & self.csrs.mideleg;
        }
        if enabled == 0 {
            return None;
        }

        INTERRUPT_PRIORITY
            .iter()
            .find(|&&bit| enabled >> bit & 1 != 0)
            .and_then(|&bit| Trap::from_interrupt_bit(bit))
    }
}

/// Applies vectored dispatch: `base + 4 * cause` for interrupts when the
/// vector mode bit is set.
fn vectored_target(tvec: u64, is_interrupt: bool, code: u64) -> u64 {
    let base = tvec & !3;
    if tvec & 1 != 0 && is_interrupt {
        base + 4 * code
    } else {
        base
    }
}
