//! Compressed-expansion properties and disassembly spot checks.

use pretty_assertions::assert_eq;
use rvcosim_core::isa::{disasm, rvc};

/// Every expansion is either the illegal sentinel or a 32-bit encoding.
#[test]
fn expansions_are_canonical_or_illegal() {
    proptest::proptest!(|(halfword: u16)| {
        // Quadrant 3 is the 32-bit space, not a compressed encoding.
        proptest::prop_assume!(halfword & 3 != 3);
        let expanded = rvc::expand(halfword);
        proptest::prop_assert!(expanded == 0 || expanded & 3 == 3);
    });
}

#[test]
fn stack_relative_loads_scale_offsets() {
    // c.ldsp s0, 16(sp): funct3 011, rd = 8, uimm = 16.
    // uimm[5] = inst[12], uimm[4:3] = inst[6:5], uimm[8:6] = inst[4:2].
    let inst: u16 = 0b011_0_01000_10_000_10;
    let expanded = rvc::expand(inst);
    assert_eq!(disasm::disassemble(expanded), "ld s0, 16(sp)");
}

#[test]
fn store_forms_disassemble() {
    assert_eq!(disasm::disassemble(0x00B53023), "sd a1, 0(a0)");
    assert_eq!(disasm::disassemble(0xFEB52E23), "sw a1, -4(a0)");
}

#[test]
fn amo_forms_disassemble() {
    // lr.w t0, (a0) / sc.w t1, t0, (a0)
    assert_eq!(disasm::disassemble(0x100522AF), "lr.w t0, (a0)");
    assert_eq!(disasm::disassemble(0x1855232F), "sc.w t1, t0, (a0)");
}
