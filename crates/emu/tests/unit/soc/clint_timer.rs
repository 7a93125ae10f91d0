//! CLINT timing: mtimecmp arms MTIP after the programmed interval.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;
use rvcosim_core::common::constants::CAUSE_INTERRUPT_BIT;
use rvcosim_core::config::map;
use rvcosim_core::core::arch::csr::{MIP_MSIP, MIP_MTIP, MSTATUS_MIE};

const MTVEC: u64 = RAM_BASE + 0x100;

/// Writing `mtimecmp = mtime + K` raises MTIP within K * divider retired
/// instructions and the timer interrupt is taken.
#[test]
fn mtimecmp_raises_mtip_after_interval() {
    let mut machine = common::small_machine();
    let clint_hi = (map::CLINT_BASE >> 12) as u32; // 0x02000

    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::lui(10, clint_hi + 4),  // a0 = CLINT + 0x4000 (mtimecmp)
            common::addi(5, 0, 2),          // t0 = 2 ticks from now
            common::sd(5, 10, 0),
            common::SPIN,
        ],
    );
    machine.harts[0].csrs.mtvec = MTVEC;
    machine.harts[0].csrs.mie = MIP_MTIP;
    machine.harts[0].csrs.mstatus |= MSTATUS_MIE;
    machine.mem.write_ram(MTVEC, &common::SPIN.to_le_bytes()).unwrap();

    // K = 2, divider = 10: the interrupt must fire within ~K*div retired
    // instructions of the write.
    let _ = machine.step(3 + 2 * 10 + 5);

    let hart = &machine.harts[0];
    assert_eq!(hart.csrs.mcause, CAUSE_INTERRUPT_BIT | 7, "machine timer");
    assert_eq!(hart.pc, MTVEC);
}

/// Writing mtimecmp clears a pending MTIP until the new deadline passes.
#[test]
fn mtimecmp_write_clears_mtip() {
    let mut machine = common::small_machine();
    let clint_hi = (map::CLINT_BASE >> 12) as u32;

    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::lui(10, clint_hi + 4),
            common::lui(5, 0x100),          // far future deadline
            common::sd(5, 10, 0),
            common::NOP,
        ],
    );
    // Pretend the timer already fired.
    machine.harts[0].set_mip(MIP_MTIP);

    let _ = machine.step(3);
    assert_eq!(
        machine.harts[0].csrs.mip & MIP_MTIP,
        0,
        "mtimecmp write acknowledges the timer"
    );
}

/// MSIP writes set and clear the software interrupt of the target hart.
#[test]
fn msip_write_drives_software_interrupt() {
    let mut machine = common::small_machine();
    let clint_hi = (map::CLINT_BASE >> 12) as u32;

    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::lui(10, clint_hi),
            common::addi(5, 0, 1),
            common::sw(5, 10, 0), // msip[0] = 1
            common::sw(0, 10, 0), // msip[0] = 0
        ],
    );

    let _ = machine.step(3);
    assert_ne!(machine.harts[0].csrs.mip & MIP_MSIP, 0);
    let _ = machine.step(1);
    assert_eq!(machine.harts[0].csrs.mip & MIP_MSIP, 0);
}
