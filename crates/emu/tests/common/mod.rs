//! Shared test infrastructure: machine builders, hand-rolled instruction
//! encoders, and a capturing console/diagnostic sink.

#![allow(dead_code)]

use rvcosim_core::config::MachineConfig;
use rvcosim_core::soc::machine::MachineBuilder;
use rvcosim_core::soc::Machine;
use std::cell::RefCell;
use std::rc::Rc;

/// Default RAM base used by the test machines.
pub const RAM_BASE: u64 = 0x8000_0000;

/// Builds a small machine (4 MiB RAM, one hart, no boot image).
pub fn small_machine() -> Machine {
    machine_with(|_| {})
}

/// Builds a machine with `f` applied to the config first.
pub fn machine_with(f: impl FnOnce(&mut MachineConfig)) -> Machine {
    let mut cfg = MachineConfig::default();
    cfg.memory_size = 4;
    f(&mut cfg);
    MachineBuilder::new(cfg).build().expect("machine builds")
}

/// Writes `program` into RAM at `addr` and points hart 0 at it.
pub fn load_program(machine: &mut Machine, addr: u64, program: &[u32]) {
    let mut bytes = Vec::with_capacity(program.len() * 4);
    for insn in program {
        bytes.extend_from_slice(&insn.to_le_bytes());
    }
    machine.mem.write_ram(addr, &bytes).expect("program fits");
    machine.harts[0].pc = addr;
}

/// A `Write`/console sink tests can inspect afterwards.
#[derive(Clone, Default)]
pub struct CaptureSink(pub Rc<RefCell<Vec<u8>>>);

impl CaptureSink {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl std::io::Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl rvcosim_core::soc::device::CharacterDevice for CaptureSink {
    fn read_data(&mut self, _buf: &mut [u8]) -> usize {
        0
    }

    fn write_data(&mut self, buf: &[u8]) {
        self.0.borrow_mut().extend_from_slice(buf);
    }
}

// --- Instruction encoders -------------------------------------------------

fn r_type(f7: u32, rs2: u32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    f7 << 25 | rs2 << 20 | rs1 << 15 | f3 << 12 | rd << 7 | op
}

fn i_type(imm: i32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    ((imm as u32) & 0xFFF) << 20 | rs1 << 15 | f3 << 12 | rd << 7 | op
}

fn s_type(imm: i32, rs2: u32, rs1: u32, f3: u32, op: u32) -> u32 {
    let imm = imm as u32;
    (imm >> 5 & 0x7F) << 25 | rs2 << 20 | rs1 << 15 | f3 << 12 | (imm & 0x1F) << 7 | op
}

fn b_type(imm: i32, rs2: u32, rs1: u32, f3: u32, op: u32) -> u32 {
    let imm = imm as u32;
    (imm >> 12 & 1) << 31
        | (imm >> 5 & 0x3F) << 25
        | rs2 << 20
        | rs1 << 15
        | f3 << 12
        | (imm >> 1 & 0xF) << 8
        | (imm >> 11 & 1) << 7
        | op
}

fn u_type(imm20: u32, rd: u32, op: u32) -> u32 {
    imm20 << 12 | rd << 7 | op
}

fn j_type(imm: i32, rd: u32) -> u32 {
    let imm = imm as u32;
    (imm >> 20 & 1) << 31
        | (imm >> 1 & 0x3FF) << 21
        | (imm >> 11 & 1) << 20
        | (imm >> 12 & 0xFF) << 12
        | rd << 7
        | 0x6F
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0, rd, 0x13)
}

pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0, rd, 0x33)
}

pub fn lui(rd: u32, imm20: u32) -> u32 {
    u_type(imm20, rd, 0x37)
}

pub fn auipc(rd: u32, imm20: u32) -> u32 {
    u_type(imm20, rd, 0x17)
}

pub fn jal(rd: u32, offset: i32) -> u32 {
    j_type(offset, rd)
}

pub fn jalr(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0, rd, 0x67)
}

pub fn beq(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0, 0x63)
}

pub fn bne(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 1, 0x63)
}

pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 2, rd, 0x03)
}

pub fn ld(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 3, rd, 0x03)
}

pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 2, 0x23)
}

pub fn sd(rs2: u32, rs1: u32, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 3, 0x23)
}

pub fn csrrw(rd: u32, csr: u32, rs1: u32) -> u32 {
    csr << 20 | rs1 << 15 | 1 << 12 | rd << 7 | 0x73
}

pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
    csr << 20 | rs1 << 15 | 2 << 12 | rd << 7 | 0x73
}

pub fn csrrsi(rd: u32, csr: u32, zimm: u32) -> u32 {
    csr << 20 | zimm << 15 | 6 << 12 | rd << 7 | 0x73
}

pub const ECALL: u32 = 0x0000_0073;
pub const EBREAK: u32 = 0x0010_0073;
pub const MRET: u32 = 0x3020_0073;
pub const SRET: u32 = 0x1020_0073;
pub const WFI: u32 = 0x1050_0073;
pub const NOP: u32 = 0x0000_0013;

/// An unconditional self-loop (`jal x0, 0`).
pub const SPIN: u32 = 0x0000_006F;

pub fn lr_w(rd: u32, rs1: u32) -> u32 {
    r_type(0b00010 << 2, 0, rs1, 2, rd, 0x2F)
}

pub fn sc_w(rd: u32, rs2: u32, rs1: u32) -> u32 {
    r_type(0b00011 << 2, rs2, rs1, 2, rd, 0x2F)
}

pub fn amoadd_w(rd: u32, rs2: u32, rs1: u32) -> u32 {
    r_type(0b00000 << 2, rs2, rs1, 2, rd, 0x2F)
}
