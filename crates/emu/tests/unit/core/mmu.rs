//! Sv39 translation: walks, permission faults, superpages, and A/D policy.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;
use rvcosim_core::common::{AccessKind, Trap, VirtAddr};
use rvcosim_core::core::arch::csr::{MSTATUS_SUM, SATP_MODE_SV39};
use rvcosim_core::core::arch::PrivilegeMode;
use rvcosim_core::soc::Machine;

const PTE_V: u64 = 1;
const PTE_R: u64 = 1 << 1;
const PTE_W: u64 = 1 << 2;
const PTE_X: u64 = 1 << 3;
const PTE_U: u64 = 1 << 4;
const PTE_A: u64 = 1 << 6;
const PTE_D: u64 = 1 << 7;

const ROOT: u64 = RAM_BASE + 0x10_000;
const L1: u64 = RAM_BASE + 0x11_000;
const L0: u64 = RAM_BASE + 0x12_000;
const DATA_PAGE: u64 = RAM_BASE + 0x20_000;

/// Maps VA 0x40_0000 -> DATA_PAGE through a three-level walk with the
/// given leaf flags, sets satp, and drops to S-mode.
fn setup_sv39(machine: &mut Machine, leaf_flags: u64) {
    let pte = |pa: u64, flags: u64| (pa >> 12 << 10) | flags;

    // VA 0x0040_0000: vpn2 = 0, vpn1 = 2, vpn0 = 0.
    machine.mem.write(ROOT, pte(L1, PTE_V), 3).unwrap();
    machine.mem.write(L1 + 2 * 8, pte(L0, PTE_V), 3).unwrap();
    machine
        .mem
        .write(L0, pte(DATA_PAGE, PTE_V | leaf_flags), 3)
        .unwrap();

    let hart = &mut machine.harts[0];
    hart.csrs.satp = (SATP_MODE_SV39 << 60) | (ROOT >> 12);
    hart.privilege = PrivilegeMode::Supervisor;
}

fn translate(machine: &mut Machine, va: u64, kind: AccessKind) -> Result<u64, Trap> {
    let csrs = machine.harts[0].csrs.clone();
    let pmp = machine.harts[0].pmp.clone();
    let priv_mode = machine.harts[0].privilege;
    let (harts, mem) = (&mut machine.harts, &mut machine.mem);
    harts[0]
        .mmu
        .translate(VirtAddr::new(va), kind, priv_mode, &csrs, &pmp, mem)
}

#[test]
fn three_level_walk_translates() {
    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_W | PTE_A | PTE_D);

    let pa = translate(&mut machine, 0x40_0123, AccessKind::Read).unwrap();
    assert_eq!(pa, DATA_PAGE + 0x123);

    // Second lookup hits the TLB; same answer.
    let pa = translate(&mut machine, 0x40_0456, AccessKind::Read).unwrap();
    assert_eq!(pa, DATA_PAGE + 0x456);
}

#[test]
fn unmapped_va_page_faults() {
    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_A);

    let err = translate(&mut machine, 0x80_0000, AccessKind::Read).unwrap_err();
    assert_eq!(err, Trap::LoadPageFault(0x80_0000));
}

#[test]
fn store_to_readonly_page_faults() {
    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_A | PTE_D);

    let err = translate(&mut machine, 0x40_0000, AccessKind::Write).unwrap_err();
    assert_eq!(err, Trap::StorePageFault(0x40_0000));
}

#[test]
fn user_page_from_supervisor_needs_sum() {
    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_U | PTE_A);

    let err = translate(&mut machine, 0x40_0000, AccessKind::Read).unwrap_err();
    assert_eq!(err, Trap::LoadPageFault(0x40_0000));

    machine.harts[0].csrs.mstatus |= MSTATUS_SUM;
    assert!(translate(&mut machine, 0x40_0000, AccessKind::Read).is_ok());
}

#[test]
fn supervisor_page_from_user_faults() {
    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_A);
    machine.harts[0].privilege = PrivilegeMode::User;

    let err = translate(&mut machine, 0x40_0000, AccessKind::Read).unwrap_err();
    assert_eq!(err, Trap::LoadPageFault(0x40_0000));
}

#[test]
fn fetch_needs_execute_permission() {
    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_A);

    let err = translate(&mut machine, 0x40_0000, AccessKind::Fetch).unwrap_err();
    assert_eq!(err, Trap::InstructionPageFault(0x40_0000));
}

#[test]
fn misaligned_superpage_faults() {
    let mut machine = common::small_machine();
    // A 2 MiB leaf at L1 whose PPN has low bits set is reserved.
    let pte = |pa: u64, flags: u64| (pa >> 12 << 10) | flags;
    machine.mem.write(ROOT, pte(L1, PTE_V), 3).unwrap();
    machine
        .mem
        .write(
            L1 + 2 * 8,
            pte(DATA_PAGE | 0x1000, PTE_V | PTE_R | PTE_A),
            3,
        )
        .unwrap();
    let hart = &mut machine.harts[0];
    hart.csrs.satp = (SATP_MODE_SV39 << 60) | (ROOT >> 12);
    hart.privilege = PrivilegeMode::Supervisor;

    let err = translate(&mut machine, 0x40_0000, AccessKind::Read).unwrap_err();
    assert_eq!(err, Trap::LoadPageFault(0x40_0000));
}

/// Hardware A/D policy updates the PTE in place; a clean page becomes
/// accessed on read and dirty on write.
#[test]
fn hardware_ad_updates_pte() {
    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_W);

    let _ = translate(&mut machine, 0x40_0000, AccessKind::Read).unwrap();
    let pte = machine.mem.read(L0, 3).unwrap();
    assert_ne!(pte & PTE_A, 0, "A set by the walk");
    assert_eq!(pte & PTE_D, 0, "D untouched by a read");

    let _ = translate(&mut machine, 0x40_0000, AccessKind::Write).unwrap();
    let pte = machine.mem.read(L0, 3).unwrap();
    assert_ne!(pte & PTE_D, 0, "D set by the write walk");
}

/// The trap policy refuses to set A/D itself.
#[test]
fn trap_ad_policy_page_faults_instead() {
    use rvcosim_core::core::units::mmu::AdUpdatePolicy;

    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_W);
    machine.harts[0].mmu.ad_policy = AdUpdatePolicy::Trap;

    let err = translate(&mut machine, 0x40_0000, AccessKind::Read).unwrap_err();
    assert_eq!(err, Trap::LoadPageFault(0x40_0000));
}

/// Non-canonical Sv39 virtual addresses fault without walking.
#[test]
fn non_canonical_va_faults() {
    let mut machine = common::small_machine();
    setup_sv39(&mut machine, PTE_R | PTE_A);

    let err = translate(&mut machine, 1 << 40, AccessKind::Read).unwrap_err();
    assert_eq!(err, Trap::LoadPageFault(1 << 40));
}
