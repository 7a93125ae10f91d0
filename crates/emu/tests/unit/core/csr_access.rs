//! CSR permission checks, write masks, and side effects.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;
use rvcosim_core::core::arch::csr;
use rvcosim_core::core::arch::PrivilegeMode;
use rvcosim_core::core::cpu::StepOutcome;

#[test]
fn read_only_csr_rejects_writes() {
    let mut machine = common::small_machine();
    machine.harts[0].csrs.mtvec = RAM_BASE + 0x100;
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[common::csrrw(5, csr::MHARTID, 6)],
    );

    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    assert_eq!(machine.harts[0].csrs.mcause, 2, "illegal instruction");
    assert_eq!(
        machine.harts[0].csrs.mtval,
        u64::from(common::csrrw(5, csr::MHARTID, 6))
    );
}

#[test]
fn csr_privilege_gate() {
    let mut machine = common::small_machine();
    machine.harts[0].csrs.mtvec = RAM_BASE + 0x100;
    machine.harts[0].privilege = PrivilegeMode::Supervisor;
    common::load_program(&mut machine, RAM_BASE, &[common::csrrs(5, csr::MSTATUS, 0)]);

    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    assert_eq!(machine.harts[0].csrs.mcause, 2);
}

/// Software writes to mip only move the software-writable pending bits.
#[test]
fn mip_write_mask_is_strict() {
    use csr::{MIP_MEIP, MIP_MTIP, MIP_SSIP, MIP_STIP};

    let mut machine = common::small_machine();
    let all = MIP_MEIP | MIP_MTIP | MIP_SSIP | MIP_STIP;
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::addi(5, 0, (all & 0xFFF) as i32),
            common::csrrs(0, csr::MIP, 5),
        ],
    );

    assert_eq!(machine.step(2), 2);
    let mip = machine.harts[0].csrs.mip;
    assert_eq!(mip & MIP_SSIP, MIP_SSIP);
    assert_eq!(mip & MIP_STIP, MIP_STIP);
    assert_eq!(mip & MIP_MEIP, 0, "MEIP is fabric-driven only");
    assert_eq!(mip & MIP_MTIP, 0, "MTIP is fabric-driven only");
}

#[test]
fn counter_reads_respect_mcounteren() {
    let mut machine = common::small_machine();
    machine.harts[0].csrs.mtvec = RAM_BASE + 0x100;
    machine.harts[0].privilege = PrivilegeMode::Supervisor;
    common::load_program(&mut machine, RAM_BASE, &[common::csrrs(5, csr::CYCLE, 0)]);

    // mcounteren.CY clear: the read traps.
    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    assert_eq!(machine.harts[0].csrs.mcause, 2);

    // With the enable set it reads fine.
    let mut machine = common::small_machine();
    machine.harts[0].csrs.mcounteren = 1;
    machine.harts[0].privilege = PrivilegeMode::Supervisor;
    common::load_program(&mut machine, RAM_BASE, &[common::csrrs(5, csr::CYCLE, 0)]);
    assert_eq!(machine.exec_hart_one(0), StepOutcome::Retired);
}

/// minstret is readable as a CSR and matches the architectural counter.
#[test]
fn minstret_csr_matches_retirements() {
    let mut machine = common::small_machine();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::NOP,
            common::NOP,
            common::csrrs(5, csr::MINSTRET, 0),
        ],
    );
    assert_eq!(machine.step(3), 3);
    // The CSR read observes the count before its own retirement.
    assert_eq!(machine.harts[0].regs.read(5), 2);
}

/// A satp write flushes cached translations.
#[test]
fn satp_write_flushes_tlb() {
    use rvcosim_core::common::{AccessKind, VirtAddr};

    let mut machine = common::small_machine();
    let hart = &mut machine.harts[0];

    // Plant a bogus translation and confirm the satp write drops it.
    hart.mmu.read_tlb.insert(0x1234, 0x80000, 0);
    assert!(hart.mmu.read_tlb.lookup(0x1234).is_some());

    common::load_program(
        &mut machine,
        RAM_BASE,
        &[common::csrrw(0, csr::SATP, 0)],
    );
    assert_eq!(machine.step(1), 1);
    assert!(machine.harts[0].mmu.read_tlb.lookup(0x1234).is_none());

    // Unrelated: bare M-mode translation still passes through.
    let csrs = machine.harts[0].csrs.clone();
    let pmp = machine.harts[0].pmp.clone();
    let (harts, mem) = (&mut machine.harts, &mut machine.mem);
    let pa = harts[0]
        .mmu
        .translate(
            VirtAddr::new(RAM_BASE),
            AccessKind::Read,
            PrivilegeMode::Machine,
            &csrs,
            &pmp,
            mem,
        )
        .unwrap();
    assert_eq!(pa, RAM_BASE);
}

/// mstatus legalization: MPP never holds the hypervisor encoding and the
/// XLEN fields stay pinned.
#[test]
fn mstatus_field_legalization() {
    let mut machine = common::small_machine();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::lui(5, 0x1), // t0 = 0x1000 -> attempt MPP = 2 (bits 12:11)
            common::csrrw(0, csr::MSTATUS, 5),
            common::csrrs(6, csr::MSTATUS, 0),
        ],
    );
    assert_eq!(machine.step(3), 3);
    let readback = machine.harts[0].regs.read(6);
    let mpp = (readback >> 11) & 3;
    assert_ne!(mpp, 2, "hypervisor MPP encoding is WARL'd away");
    assert_eq!((readback >> 32) & 3, 2, "UXL pinned to 64-bit");
}
