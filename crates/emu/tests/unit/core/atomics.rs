//! LR/SC and AMO behavior, including cross-hart reservation kills.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;

/// SC succeeds after LR on the same hart, even with an intervening load.
#[test]
fn lr_sc_forward_progress() {
    let mut machine = common::small_machine();
    machine.mem.write(RAM_BASE + 0x100, 7, 2).unwrap();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::auipc(10, 0),             // a0 = RAM base
            common::addi(10, 10, 0x100),      // a0 = &word
            common::lr_w(5, 10),              // t0 = 7, reserve
            common::lw(6, 10, 0),             // intervening plain load
            common::addi(5, 5, 1),            // t0 = 8
            common::sc_w(7, 5, 10),           // must succeed: t2 = 0
        ],
    );

    assert_eq!(machine.step(6), 6);
    assert_eq!(machine.harts[0].regs.read(7), 0, "SC succeeded");
    assert_eq!(machine.mem.read(RAM_BASE + 0x100, 2).unwrap(), 8);
}

/// An SC with no reservation fails and does not store.
#[test]
fn sc_without_reservation_fails() {
    let mut machine = common::small_machine();
    machine.mem.write(RAM_BASE + 0x100, 7, 2).unwrap();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::auipc(10, 0),
            common::addi(10, 10, 0x100),
            common::addi(5, 0, 42),
            common::sc_w(7, 5, 10),
        ],
    );

    assert_eq!(machine.step(4), 4);
    assert_eq!(machine.harts[0].regs.read(7), 1, "SC failed");
    assert_eq!(machine.mem.read(RAM_BASE + 0x100, 2).unwrap(), 7);
}

/// A store by another hart to the reserved granule kills the reservation.
#[test]
fn foreign_store_kills_reservation() {
    let mut machine = common::machine_with(|cfg| cfg.harts = 2);
    machine.mem.write(RAM_BASE + 0x100, 7, 2).unwrap();

    // Hart 0: LR then SC. Hart 1: a plain store in between.
    let program0 = [
        common::auipc(10, 0),
        common::addi(10, 10, 0x100),
        common::lr_w(5, 10),
        common::sc_w(7, 5, 10),
    ];
    let program1 = [
        common::auipc(10, 0),
        common::addi(10, 10, 0x100 - 0x40), // program at +0x40
        common::sw(0, 10, 0),
    ];
    let mut bytes: Vec<u8> = program0.iter().flat_map(|i| i.to_le_bytes()).collect();
    machine.mem.write_ram(RAM_BASE, &bytes).unwrap();
    bytes = program1.iter().flat_map(|i| i.to_le_bytes()).collect();
    machine.mem.write_ram(RAM_BASE + 0x40, &bytes).unwrap();
    machine.harts[0].pc = RAM_BASE;
    machine.harts[1].pc = RAM_BASE + 0x40;

    // Interleave: run hart 0 up to the LR, hart 1 through its store, then
    // hart 0's SC.
    for _ in 0..3 {
        let _ = machine.exec_hart_one(0);
    }
    assert!(machine.harts[0].load_res.is_some());
    for _ in 0..3 {
        let _ = machine.exec_hart_one(1);
    }
    assert!(
        machine.harts[0].load_res.is_none(),
        "foreign store must kill the reservation"
    );
    let _ = machine.exec_hart_one(0);
    assert_eq!(machine.harts[0].regs.read(7), 1, "SC failed");
}

/// Two harts incrementing one word through LR/SC retry loops lose no
/// updates under instruction-granular interleaving.
#[test]
fn interleaved_lr_sc_increments_exactly() {
    let mut machine = common::machine_with(|cfg| cfg.harts = 2);
    let counter = RAM_BASE + 0x2000;

    // loop: lr.w t0,(a0); addi t0,t0,1; sc.w t1,t0,(a0); bnez t1, loop;
    // j loop
    let loop_body = [
        common::lr_w(5, 10),
        common::addi(5, 5, 1),
        common::sc_w(6, 5, 10),
        common::bne(6, 0, -12),
        common::jal(0, -16),
    ];
    // a0 = (program base + 0x2000) - off = RAM + 0x2000 for both harts.
    let prologue = |off: i32| vec![common::auipc(10, 2), common::addi(10, 10, -off)];

    let mut prog0 = prologue(0);
    prog0.extend_from_slice(&loop_body);
    let mut prog1 = prologue(0x80);
    prog1.extend_from_slice(&loop_body);

    let bytes: Vec<u8> = prog0.iter().flat_map(|i| i.to_le_bytes()).collect();
    machine.mem.write_ram(RAM_BASE, &bytes).unwrap();
    let bytes: Vec<u8> = prog1.iter().flat_map(|i| i.to_le_bytes()).collect();
    machine.mem.write_ram(RAM_BASE + 0x80, &bytes).unwrap();
    machine.harts[0].pc = RAM_BASE;
    machine.harts[1].pc = RAM_BASE + 0x80;

    let mut value = 0;
    for _ in 0..200_000 {
        let _ = machine.step(1);
        value = machine.mem.read(counter, 2).unwrap();
        if value >= 1000 {
            break;
        }
    }
    assert_eq!(value, 1000, "increments are lost or duplicated");
}

#[test]
fn amoadd_returns_old_value() {
    let mut machine = common::small_machine();
    machine.mem.write(RAM_BASE + 0x100, 40, 2).unwrap();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::auipc(10, 0),
            common::addi(10, 10, 0x100),
            common::addi(5, 0, 2),
            common::amoadd_w(6, 5, 10),
        ],
    );

    assert_eq!(machine.step(4), 4);
    assert_eq!(machine.harts[0].regs.read(6), 40, "rd gets the old value");
    assert_eq!(machine.mem.read(RAM_BASE + 0x100, 2).unwrap(), 42);
}

/// Misaligned AMOs raise store-address-misaligned.
#[test]
fn misaligned_amo_traps() {
    use rvcosim_core::core::cpu::StepOutcome;

    let mut machine = common::small_machine();
    machine.harts[0].csrs.mtvec = RAM_BASE + 0x100;
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::auipc(10, 0),
            common::addi(10, 10, 0x102),
            common::amoadd_w(6, 5, 10),
        ],
    );

    assert_eq!(machine.step(2), 2);
    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    assert_eq!(machine.harts[0].csrs.mcause, 6);
}
