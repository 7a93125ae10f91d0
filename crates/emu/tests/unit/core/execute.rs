//! Interpreter behavior: the boot scenario, ALU/branch basics, compressed
//! execution, and retirement counting.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;
use rvcosim_core::core::cpu::CtfInfo;

/// Boot a machine whose RAM program stores `0x01020304` to RAM+0x1000 and
/// spins. The reset ROM must deliver hartid in a0 and land at the RAM
/// base; the store must hit memory little-endian.
#[test]
fn boot_store_and_spin() {
    let mut machine = common::machine_with(|cfg| cfg.memory_size = 256);
    let program = [
        common::lui(10, 0x01020),      // a0 = 0x0102_0000
        common::addi(10, 10, 0x304),   // a0 = 0x0102_0304
        common::auipc(11, 0x1),        // a1 = pc + 0x1000
        common::sw(10, 11, -8),        // RAM+0x1000 (auipc was at +8)
        common::SPIN,
    ];
    machine
        .mem
        .write_ram(RAM_BASE, &to_bytes(&program))
        .unwrap();

    // Run through the boot ROM and the program.
    let retired = machine.step(50);
    assert!(retired >= 2);

    let mut bytes = [0u8; 4];
    machine.mem.read_ram(RAM_BASE + 0x1000, &mut bytes).unwrap();
    assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01]);

    let hart = &machine.harts[0];
    assert!(hart.minstret >= 2);
    assert_eq!(hart.regs.read(10), 0x0102_0304);
}

#[test]
fn branches_and_jumps_update_ctf_summary() {
    let mut machine = common::small_machine();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::addi(5, 0, 1),
            common::beq(5, 0, 8), // not taken
            common::bne(5, 0, 8), // taken, skips the next insn
            common::addi(6, 0, 99),
            common::jal(1, 8), // taken jump
        ],
    );

    assert_eq!(machine.step(1), 1);
    assert_eq!(machine.harts[0].ctf_info, CtfInfo::Nop);

    assert_eq!(machine.step(1), 1); // beq not taken
    assert_eq!(machine.harts[0].ctf_info, CtfInfo::Nop);

    assert_eq!(machine.step(1), 1); // bne taken
    assert_eq!(machine.harts[0].ctf_info, CtfInfo::TakenBranch);
    assert_eq!(machine.harts[0].ctf_target, RAM_BASE + 16);
    assert_eq!(machine.harts[0].pc, RAM_BASE + 16);

    assert_eq!(machine.step(1), 1); // jal
    assert_eq!(machine.harts[0].ctf_info, CtfInfo::TakenJump);
    assert_eq!(machine.harts[0].regs.read(1), RAM_BASE + 20);
}

#[test]
fn compressed_instructions_execute() {
    let mut machine = common::small_machine();
    // c.li a0, 1 ; c.addi a0, 1 ; c.mv a1, a0 ; spin (32-bit)
    let halfwords: [u16; 4] = [0x4505, 0x0505, 0x85AA, 0];
    let mut bytes = Vec::new();
    for h in &halfwords[..3] {
        bytes.extend_from_slice(&h.to_le_bytes());
    }
    bytes.extend_from_slice(&common::SPIN.to_le_bytes());
    machine.mem.write_ram(RAM_BASE, &bytes).unwrap();
    machine.harts[0].pc = RAM_BASE;

    assert_eq!(machine.step(3), 3);
    assert_eq!(machine.harts[0].regs.read(10), 2);
    assert_eq!(machine.harts[0].regs.read(11), 2);
    assert_eq!(machine.harts[0].pc, RAM_BASE + 6);
}

/// minstret advances by exactly one per retirement and not on traps.
#[test]
fn minstret_counts_retirements_only() {
    let mut machine = common::small_machine();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[common::addi(5, 0, 1), common::ECALL, common::NOP],
    );
    machine.harts[0].csrs.mtvec = RAM_BASE + 8; // handler: the NOP

    assert_eq!(machine.step(1), 1);
    let before = machine.harts[0].minstret;

    // The ECALL traps and must not retire.
    let _ = machine.exec_hart_one(0);
    assert_eq!(machine.harts[0].minstret, before);
    assert_eq!(machine.harts[0].pc, RAM_BASE + 8);

    assert_eq!(machine.step(1), 1);
    assert_eq!(machine.harts[0].minstret, before + 1);
}

#[test]
fn wfi_powers_down_until_interrupt() {
    use rvcosim_core::core::arch::csr::{MIP_MSIP, MSTATUS_MIE};
    use rvcosim_core::core::cpu::StepOutcome;

    let mut machine = common::small_machine();
    common::load_program(&mut machine, RAM_BASE, &[common::WFI, common::NOP]);
    machine.harts[0].csrs.mie = MIP_MSIP;
    machine.harts[0].csrs.mstatus |= MSTATUS_MIE;
    machine.harts[0].csrs.mtvec = RAM_BASE + 4;

    assert_eq!(machine.exec_hart_one(0), StepOutcome::Retired); // WFI
    assert!(machine.harts[0].power_down);
    assert_eq!(machine.exec_hart_one(0), StepOutcome::PowerDown);

    // A pending-and-enabled interrupt wakes the hart and is delivered.
    machine.harts[0].set_mip(MIP_MSIP);
    assert!(!machine.harts[0].power_down);
    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    assert_eq!(machine.harts[0].pc, RAM_BASE + 4);
}

fn to_bytes(program: &[u32]) -> Vec<u8> {
    program.iter().flat_map(|i| i.to_le_bytes()).collect()
}
