//! Compressed-instruction (RVC) expansion.
//!
//! Every 16-bit encoding is rewritten into its 32-bit canonical form before
//! execution, so the interpreter only ever dispatches on the uncompressed
//! encodings. Reserved or illegal compressed encodings expand to 0, which the
//! dispatcher rejects as an illegal instruction.

use crate::isa::opcodes::{
    OP_BRANCH, OP_IMM, OP_IMM_32, OP_JAL, OP_JALR, OP_LOAD, OP_LOAD_FP, OP_LUI, OP_REG, OP_REG_32,
    OP_STORE, OP_STORE_FP,
};

const F3_ADD: u32 = 0;
const F3_SLL: u32 = 1;
const F3_XOR: u32 = 4;
const F3_SRL_SRA: u32 = 5;
const F3_OR: u32 = 6;
const F3_AND: u32 = 7;
const F3_LW: u32 = 2;
const F3_LD: u32 = 3;
const F3_SW: u32 = 2;
const F3_SD: u32 = 3;
const F3_BEQ: u32 = 0;
const F3_BNE: u32 = 1;
const F7_SUB_SRA: u32 = 0b010_0000;

const EBREAK: u32 = 0x0010_0073;

/// Sign-extends the low `bits` bits of `val` to 32 bits.
#[inline]
fn sign_extend(val: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((val << shift) as i32) >> shift) as u32
}

/// Assembles an I-type instruction.
#[inline]
fn i_type(imm: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (imm & 0xFFF) << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

/// Assembles an S-type instruction from a byte offset.
#[inline]
fn s_type(imm: u32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    (imm >> 5) << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | (imm & 0x1F) << 7 | opcode
}

/// Assembles an R-type instruction.
#[inline]
fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

/// Assembles a B-type instruction from a signed byte offset.
#[inline]
fn b_type(imm: u32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    ((imm >> 12) & 1) << 31
        | ((imm >> 5) & 0x3F) << 25
        | rs2 << 20
        | rs1 << 15
        | funct3 << 12
        | ((imm >> 1) & 0xF) << 8
        | ((imm >> 11) & 1) << 7
        | opcode
}

/// Assembles a J-type instruction from a signed byte offset.
#[inline]
fn j_type(imm: u32, rd: u32, opcode: u32) -> u32 {
    ((imm >> 20) & 1) << 31
        | ((imm >> 1) & 0x3FF) << 21
        | ((imm >> 11) & 1) << 20
        | ((imm >> 12) & 0xFF) << 12
        | rd << 7
        | opcode
}

/// `x8 + rd'` for the three-bit compressed register fields.
#[inline]
fn creg(field: u16) -> u32 {
    8 + (field & 7) as u32
}

/// Expands a 16-bit RVC instruction into its 32-bit canonical equivalent.
///
/// Returns 0 (an illegal 32-bit encoding) for reserved compressed encodings,
/// including the all-zero halfword.
pub fn expand(inst: u16) -> u32 {
    let op = inst & 3;
    let funct3 = (inst >> 13) & 7;

    match (op, funct3) {
        // --- Quadrant 0 ---
        (0, 0b000) => {
            // C.ADDI4SPN: addi rd', x2, nzuimm
            let imm = u32::from((inst >> 6) & 1) << 2
                | u32::from((inst >> 5) & 1) << 3
                | u32::from((inst >> 11) & 3) << 4
                | u32::from((inst >> 7) & 0xF) << 6;
            if imm == 0 {
                return 0;
            }
            i_type(imm, 2, F3_ADD, creg(inst >> 2), OP_IMM)
        }
        (0, 0b001) => {
            // C.FLD: fld rd', uimm(rs1')
            let imm = u32::from((inst >> 10) & 7) << 3 | u32::from((inst >> 5) & 3) << 6;
            i_type(imm, creg(inst >> 7), F3_LD, creg(inst >> 2), OP_LOAD_FP)
        }
        (0, 0b010) => {
            // C.LW
            let imm = u32::from((inst >> 6) & 1) << 2
                | u32::from((inst >> 10) & 7) << 3
                | u32::from((inst >> 5) & 1) << 6;
            i_type(imm, creg(inst >> 7), F3_LW, creg(inst >> 2), OP_LOAD)
        }
        (0, 0b011) => {
            // C.LD
            let imm = u32::from((inst >> 10) & 7) << 3 | u32::from((inst >> 5) & 3) << 6;
            i_type(imm, creg(inst >> 7), F3_LD, creg(inst >> 2), OP_LOAD)
        }
        (0, 0b101) => {
            // C.FSD
            let imm = u32::from((inst >> 10) & 7) << 3 | u32::from((inst >> 5) & 3) << 6;
            s_type(imm, creg(inst >> 2), creg(inst >> 7), F3_SD, OP_STORE_FP)
        }
        (0, 0b110) => {
            // C.SW
            let imm = u32::from((inst >> 6) & 1) << 2
                | u32::from((inst >> 10) & 7) << 3
                | u32::from((inst >> 5) & 1) << 6;
            s_type(imm, creg(inst >> 2), creg(inst >> 7), F3_SW, OP_STORE)
        }
        (0, 0b111) => {
            // C.SD
            let imm = u32::from((inst >> 10) & 7) << 3 | u32::from((inst >> 5) & 3) << 6;
            s_type(imm, creg(inst >> 2), creg(inst >> 7), F3_SD, OP_STORE)
        }

        // --- Quadrant 1 ---
        (1, 0b000) => {
            // C.ADDI (C.NOP when rd = 0)
            let imm = sign_extend(
                u32::from((inst >> 2) & 0x1F) | u32::from((inst >> 12) & 1) << 5,
                6,
            );
            let rd = u32::from((inst >> 7) & 0x1F);
            i_type(imm, rd, F3_ADD, rd, OP_IMM)
        }
        (1, 0b001) => {
            // C.ADDIW (rd = 0 reserved)
            let imm = sign_extend(
                u32::from((inst >> 2) & 0x1F) | u32::from((inst >> 12) & 1) << 5,
                6,
            );
            let rd = u32::from((inst >> 7) & 0x1F);
            if rd == 0 {
                return 0;
            }
            i_type(imm, rd, F3_ADD, rd, OP_IMM_32)
        }
        (1, 0b010) => {
            // C.LI: addi rd, x0, imm
            let imm = sign_extend(
                u32::from((inst >> 2) & 0x1F) | u32::from((inst >> 12) & 1) << 5,
                6,
            );
            i_type(imm, 0, F3_ADD, u32::from((inst >> 7) & 0x1F), OP_IMM)
        }
        (1, 0b011) => {
            let rd = u32::from((inst >> 7) & 0x1F);
            if rd == 2 {
                // C.ADDI16SP
                let imm = sign_extend(
                    u32::from((inst >> 6) & 1) << 4
                        | u32::from((inst >> 2) & 1) << 5
                        | u32::from((inst >> 5) & 1) << 6
                        | u32::from((inst >> 3) & 3) << 7
                        | u32::from((inst >> 12) & 1) << 9,
                    10,
                );
                if imm == 0 {
                    return 0;
                }
                i_type(imm, 2, F3_ADD, 2, OP_IMM)
            } else {
                // C.LUI (rd != 0, nzimm != 0)
                let imm = sign_extend(
                    u32::from((inst >> 2) & 0x1F) | u32::from((inst >> 12) & 1) << 5,
                    6,
                );
                if imm == 0 {
                    return 0;
                }
                // The 6-bit value lands in LUI's imm[17:12]; sign extension
                // propagates naturally through bit 31 when shifted.
                imm << 12 | rd << 7 | OP_LUI
            }
        }
        (1, 0b100) => {
            let rd = creg(inst >> 7);
            let funct2 = (inst >> 10) & 3;
            match funct2 {
                0 | 1 => {
                    // C.SRLI / C.SRAI (6-bit shamt on RV64); SRAI sets
                    // imm[10] in the I-type immediate.
                    let shamt =
                        u32::from((inst >> 2) & 0x1F) | u32::from((inst >> 12) & 1) << 5;
                    let imm = shamt | if funct2 == 1 { 1 << 10 } else { 0 };
                    i_type(imm, rd, F3_SRL_SRA, rd, OP_IMM)
                }
                2 => {
                    // C.ANDI
                    let imm = sign_extend(
                        u32::from((inst >> 2) & 0x1F) | u32::from((inst >> 12) & 1) << 5,
                        6,
                    );
                    i_type(imm, rd, F3_AND, rd, OP_IMM)
                }
                _ => {
                    let rs2 = creg(inst >> 2);
                    match ((inst >> 12) & 1, (inst >> 5) & 3) {
                        (0, 0) => r_type(F7_SUB_SRA, rs2, rd, F3_ADD, rd, OP_REG), // C.SUB
                        (0, 1) => r_type(0, rs2, rd, F3_XOR, rd, OP_REG),          // C.XOR
                        (0, 2) => r_type(0, rs2, rd, F3_OR, rd, OP_REG),           // C.OR
                        (0, 3) => r_type(0, rs2, rd, F3_AND, rd, OP_REG),          // C.AND
                        (1, 0) => r_type(F7_SUB_SRA, rs2, rd, F3_ADD, rd, OP_REG_32), // C.SUBW
                        (1, 1) => r_type(0, rs2, rd, F3_ADD, rd, OP_REG_32),       // C.ADDW
                        _ => 0,
                    }
                }
            }
        }
        (1, 0b101) => {
            // C.J
            let imm = sign_extend(
                u32::from((inst >> 3) & 7) << 1
                    | u32::from((inst >> 11) & 1) << 4
                    | u32::from((inst >> 2) & 1) << 5
                    | u32::from((inst >> 7) & 1) << 6
                    | u32::from((inst >> 6) & 1) << 7
                    | u32::from((inst >> 9) & 3) << 8
                    | u32::from((inst >> 8) & 1) << 10
                    | u32::from((inst >> 12) & 1) << 11,
                12,
            );
            j_type(imm, 0, OP_JAL)
        }
        (1, 0b110) | (1, 0b111) => {
            // C.BEQZ / C.BNEZ
            let imm = sign_extend(
                u32::from((inst >> 3) & 3) << 1
                    | u32::from((inst >> 10) & 3) << 3
                    | u32::from((inst >> 2) & 1) << 5
                    | u32::from((inst >> 5) & 3) << 6
                    | u32::from((inst >> 12) & 1) << 8,
                9,
            );
            let f3 = if funct3 == 0b110 { F3_BEQ } else { F3_BNE };
            b_type(imm, 0, creg(inst >> 7), f3, OP_BRANCH)
        }

        // --- Quadrant 2 ---
        (2, 0b000) => {
            // C.SLLI
            let rd = u32::from((inst >> 7) & 0x1F);
            let shamt = u32::from((inst >> 2) & 0x1F) | u32::from((inst >> 12) & 1) << 5;
            i_type(shamt, rd, F3_SLL, rd, OP_IMM)
        }
        (2, 0b001) => {
            // C.FLDSP
            let imm = u32::from((inst >> 5) & 3) << 3
                | u32::from((inst >> 12) & 1) << 5
                | u32::from((inst >> 2) & 7) << 6;
            i_type(imm, 2, F3_LD, u32::from((inst >> 7) & 0x1F), OP_LOAD_FP)
        }
        (2, 0b010) => {
            // C.LWSP (rd = 0 reserved)
            let rd = u32::from((inst >> 7) & 0x1F);
            if rd == 0 {
                return 0;
            }
            let imm = u32::from((inst >> 4) & 7) << 2
                | u32::from((inst >> 12) & 1) << 5
                | u32::from((inst >> 2) & 3) << 6;
            i_type(imm, 2, F3_LW, rd, OP_LOAD)
        }
        (2, 0b011) => {
            // C.LDSP (rd = 0 reserved)
            let rd = u32::from((inst >> 7) & 0x1F);
            if rd == 0 {
                return 0;
            }
            let imm = u32::from((inst >> 5) & 3) << 3
                | u32::from((inst >> 12) & 1) << 5
                | u32::from((inst >> 2) & 7) << 6;
            i_type(imm, 2, F3_LD, rd, OP_LOAD)
        }
        (2, 0b100) => {
            let rd = u32::from((inst >> 7) & 0x1F);
            let rs2 = u32::from((inst >> 2) & 0x1F);
            if (inst >> 12) & 1 == 0 {
                if rs2 == 0 {
                    // C.JR (rd = 0 reserved)
                    if rd == 0 {
                        return 0;
                    }
                    i_type(0, rd, 0, 0, OP_JALR)
                } else {
                    // C.MV: add rd, x0, rs2
                    r_type(0, rs2, 0, F3_ADD, rd, OP_REG)
                }
            } else if rs2 == 0 {
                if rd == 0 {
                    // C.EBREAK
                    EBREAK
                } else {
                    // C.JALR: jalr x1, 0(rs1)
                    i_type(0, rd, 0, 1, OP_JALR)
                }
            } else {
                // C.ADD: add rd, rd, rs2
                r_type(0, rs2, rd, F3_ADD, rd, OP_REG)
            }
        }
        (2, 0b101) => {
            // C.FSDSP
            let imm = u32::from((inst >> 10) & 7) << 3 | u32::from((inst >> 7) & 7) << 6;
            s_type(imm, u32::from((inst >> 2) & 0x1F), 2, F3_SD, OP_STORE_FP)
        }
        (2, 0b110) => {
            // C.SWSP
            let imm = u32::from((inst >> 9) & 0xF) << 2 | u32::from((inst >> 7) & 3) << 6;
            s_type(imm, u32::from((inst >> 2) & 0x1F), 2, F3_SW, OP_STORE)
        }
        (2, 0b111) => {
            // C.SDSP
            let imm = u32::from((inst >> 10) & 7) << 3 | u32::from((inst >> 7) & 7) << 6;
            s_type(imm, u32::from((inst >> 2) & 0x1F), 2, F3_SD, OP_STORE)
        }

        _ => 0,
    }
}
