//! Memory-map behavior reached through the machine: unmapped faults,
//! dirty tracking, and the store log.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;
use rvcosim_core::core::cpu::StepOutcome;

#[test]
fn unmapped_load_is_an_access_fault() {
    let mut machine = common::small_machine();
    machine.harts[0].csrs.mtvec = RAM_BASE + 0x100;
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::lui(6, 0x70000), // nothing is mapped at 0x7000_0000
            common::lw(5, 6, 0),
        ],
    );

    let _ = machine.step(1);
    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    assert_eq!(machine.harts[0].csrs.mcause, 5);
    assert_eq!(machine.harts[0].csrs.mtval, 0x7000_0000);
}

#[test]
fn ram_writes_mark_pages_dirty() {
    let mut machine = common::small_machine();
    machine.mem.clear_dirty();
    assert!(!machine.mem.is_dirty(RAM_BASE + 0x3000));

    machine.mem.write(RAM_BASE + 0x3000, 0xAB, 0).unwrap();
    assert!(machine.mem.is_dirty(RAM_BASE + 0x3000));
    assert!(!machine.mem.is_dirty(RAM_BASE + 0x4000));
}

#[test]
fn store_log_drains_per_drain_call() {
    let mut machine = common::small_machine();
    let _ = machine.mem.take_store_log();

    machine.mem.write(RAM_BASE + 8, 1, 3).unwrap();
    machine.mem.write(RAM_BASE + 16, 2, 2).unwrap();
    let log = machine.mem.take_store_log();
    assert_eq!(log, vec![(RAM_BASE + 8, 8), (RAM_BASE + 16, 4)]);
    assert!(machine.mem.take_store_log().is_empty());
}

/// Stores into a page with a cached fetch translation drop that entry
/// (the self-modifying-code hook).
#[test]
fn store_invalidates_fetch_translation() {
    let mut machine = common::small_machine();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::auipc(10, 0),
            common::sw(0, 10, 0x40), // store into the code page
            common::NOP,
        ],
    );

    // Fetch of the first instruction populated the fetch TLB only under
    // translation; in bare mode the hook is a no-op but must not misfire.
    assert_eq!(machine.step(3), 3);
    assert_eq!(machine.harts[0].pc, RAM_BASE + 12);
}
