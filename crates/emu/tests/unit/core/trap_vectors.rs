//! Trap-vector selection (delegation, cause, epc, tval, privilege).

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;
use rstest::rstest;
use rvcosim_core::core::arch::PrivilegeMode;
use rvcosim_core::core::cpu::StepOutcome;
use rvcosim_core::soc::Machine;

const MTVEC: u64 = RAM_BASE + 0x100;
const STVEC: u64 = RAM_BASE + 0x200;

/// Drops hart 0 to a lower privilege without running guest code.
fn set_privilege(machine: &mut Machine, mode: PrivilegeMode) {
    machine.harts[0].privilege = mode;
}

fn machine_with_vectors() -> Machine {
    let mut machine = common::small_machine();
    machine.harts[0].csrs.mtvec = MTVEC;
    machine.harts[0].csrs.stvec = STVEC;
    machine
}

/// Each case: provoking program, executing privilege, expected cause, and
/// the expected tval given the program counter.
#[rstest]
// Misaligned load: lw from an odd address.
#[case::misaligned_load(
    vec![common::addi(5, 0, 1), common::lw(6, 5, 0)],
    PrivilegeMode::Machine,
    4,
    1
)]
// Misaligned store.
#[case::misaligned_store(
    vec![common::addi(5, 0, 3), common::sw(6, 5, 0)],
    PrivilegeMode::Machine,
    6,
    3
)]
// Illegal instruction: an all-ones word decodes to nothing.
#[case::illegal(vec![common::addi(0, 0, 0), 0xFFFF_FFFF], PrivilegeMode::Machine, 2, 0xFFFF_FFFF)]
// Environment calls from each mode.
#[case::ecall_m(vec![common::NOP, common::ECALL], PrivilegeMode::Machine, 11, 0)]
#[case::ecall_s(vec![common::NOP, common::ECALL], PrivilegeMode::Supervisor, 9, 0)]
#[case::ecall_u(vec![common::NOP, common::ECALL], PrivilegeMode::User, 8, 0)]
fn trap_lands_at_mtvec_without_delegation(
    #[case] program: Vec<u32>,
    #[case] mode: PrivilegeMode,
    #[case] cause: u64,
    #[case] tval: u64,
) {
    let mut machine = machine_with_vectors();
    common::load_program(&mut machine, RAM_BASE, &program);
    set_privilege(&mut machine, mode);

    let fault_pc = RAM_BASE + 4 * (program.len() as u64 - 1);
    assert_eq!(machine.step(program.len() as u64 - 1), program.len() as u64 - 1);
    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);

    let hart = &machine.harts[0];
    assert_eq!(hart.pc, MTVEC, "undelegated trap goes to mtvec");
    assert_eq!(hart.csrs.mcause, cause);
    assert_eq!(hart.csrs.mepc, fault_pc);
    assert_eq!(hart.csrs.mtval, tval);
    assert_eq!(hart.privilege, PrivilegeMode::Machine);
}

#[rstest]
#[case::misaligned_load(vec![common::addi(5, 0, 1), common::lw(6, 5, 0)], PrivilegeMode::Supervisor, 4, 1)]
#[case::ecall_u(vec![common::NOP, common::ECALL], PrivilegeMode::User, 8, 0)]
fn delegated_trap_lands_at_stvec(
    #[case] program: Vec<u32>,
    #[case] mode: PrivilegeMode,
    #[case] cause: u64,
    #[case] tval: u64,
) {
    let mut machine = machine_with_vectors();
    machine.harts[0].csrs.medeleg = 1 << cause;
    common::load_program(&mut machine, RAM_BASE, &program);
    set_privilege(&mut machine, mode);

    let fault_pc = RAM_BASE + 4 * (program.len() as u64 - 1);
    let _ = machine.step(program.len() as u64 - 1);
    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);

    let hart = &machine.harts[0];
    assert_eq!(hart.pc, STVEC, "delegated trap goes to stvec");
    assert_eq!(hart.csrs.scause, cause);
    assert_eq!(hart.csrs.sepc, fault_pc);
    assert_eq!(hart.csrs.stval, tval);
    assert_eq!(hart.privilege, PrivilegeMode::Supervisor);
}

/// Delegation never applies to traps taken from M-mode.
#[test]
fn machine_mode_traps_ignore_medeleg() {
    let mut machine = machine_with_vectors();
    machine.harts[0].csrs.medeleg = 1 << 11;
    common::load_program(&mut machine, RAM_BASE, &[common::ECALL]);

    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    assert_eq!(machine.harts[0].pc, MTVEC);
    assert_eq!(machine.harts[0].csrs.mcause, 11);
}

/// Vectored mode dispatches interrupts to base + 4 * cause; exceptions
/// still land at the base.
#[test]
fn vectored_interrupt_dispatch() {
    use rvcosim_core::common::constants::CAUSE_INTERRUPT_BIT;
    use rvcosim_core::core::arch::csr::{MIP_MSIP, MSTATUS_MIE};

    let mut machine = common::small_machine();
    common::load_program(&mut machine, RAM_BASE, &[common::NOP]);
    machine.harts[0].csrs.mtvec = MTVEC | 1; // vectored
    machine.harts[0].csrs.mie = MIP_MSIP;
    machine.harts[0].csrs.mstatus |= MSTATUS_MIE;
    machine.harts[0].set_mip(MIP_MSIP);

    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    let hart = &machine.harts[0];
    assert_eq!(hart.pc, MTVEC + 4 * 3, "software interrupt is cause 3");
    assert_eq!(hart.csrs.mcause, CAUSE_INTERRUPT_BIT | 3);
}

/// MRET restores the pushed privilege and interrupt-enable state.
#[test]
fn mret_pops_the_machine_stack() {
    use rvcosim_core::core::arch::csr::{MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP_SHIFT};

    let mut machine = common::small_machine();
    common::load_program(&mut machine, RAM_BASE, &[common::MRET]);
    let hart = &mut machine.harts[0];
    hart.csrs.mepc = RAM_BASE + 0x40;
    hart.csrs.mstatus |= MSTATUS_MPIE; // MPP = U (zero), MPIE = 1
    hart.csrs.mstatus &= !(3 << MSTATUS_MPP_SHIFT);

    assert_eq!(machine.step(1), 1);
    let hart = &machine.harts[0];
    assert_eq!(hart.pc, RAM_BASE + 0x40);
    assert_eq!(hart.privilege, PrivilegeMode::User);
    assert_ne!(hart.csrs.mstatus & MSTATUS_MIE, 0, "MIE restored from MPIE");
}
