//! PLIC claim/complete through the memory map, and the MEIP/SEIP glue.

use crate::common;
use pretty_assertions::assert_eq;
use rvcosim_core::config::map;
use rvcosim_core::core::arch::csr::{MIP_MEIP, MIP_SEIP};

const CLAIM: u64 = map::PLIC_BASE + 0x20_0004;

/// After asserting IRQ i: claim returns i, a second claim returns 0, and
/// after completion the still-asserted source is claimable again.
#[test]
fn claim_complete_cycle() {
    let mut machine = common::small_machine();

    machine.mem.plic_mut().unwrap().set_irq(5, true);
    assert_eq!(machine.mem.read(CLAIM, 2).unwrap(), 5);
    assert_eq!(machine.mem.read(CLAIM, 2).unwrap(), 0, "served sources hide");

    machine.mem.write(CLAIM, 5, 2).unwrap();
    assert_eq!(
        machine.mem.read(CLAIM, 2).unwrap(),
        5,
        "still-asserted source re-claims after completion"
    );
}

#[test]
fn lowest_pending_wins() {
    let mut machine = common::small_machine();
    let plic = machine.mem.plic_mut().unwrap();
    plic.set_irq(9, true);
    plic.set_irq(2, true);

    assert_eq!(machine.mem.read(CLAIM, 2).unwrap(), 2);
    assert_eq!(machine.mem.read(CLAIM, 2).unwrap(), 9);
}

/// The aggregated line raises MEIP and SEIP on hart 0 and drops them when
/// every pending source is served.
#[test]
fn aggregated_line_drives_hart0_mip() {
    let mut machine = common::small_machine();

    machine.mem.plic_mut().unwrap().set_irq(3, true);
    let _ = machine.exec_hart_one(0); // glue runs around an (empty-RAM) step
    assert_ne!(machine.harts[0].csrs.mip & MIP_MEIP, 0);
    assert_ne!(machine.harts[0].csrs.mip & MIP_SEIP, 0);

    assert_eq!(machine.mem.read(CLAIM, 2).unwrap(), 3);
    let _ = machine.exec_hart_one(0);
    assert_eq!(
        machine.harts[0].csrs.mip & (MIP_MEIP | MIP_SEIP),
        0,
        "claiming the only source lowers the line"
    );
}
