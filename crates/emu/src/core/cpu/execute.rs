//! The decode-and-execute interpreter and the hart stepping loop.
//!
//! One instruction at a time: service pending interrupts, fetch (expanding
//! compressed encodings to their canonical 32-bit forms), dispatch on the
//! major opcode, and either retire — bumping `minstret` and the CTF summary
//! — or route the fault through trap delivery. Helpers hand faults back as
//! `Err(Trap)`; there is no hidden control flow between here and the trap
//! code.

use super::{CtfInfo, Hart, StepOutcome};
use crate::common::{AccessKind, Trap};
use crate::core::arch::csr::{FS_OFF, MSTATUS_TSR, MSTATUS_TVM, MSTATUS_TW};
use crate::core::arch::PrivilegeMode;
use crate::core::cpu::csr::CsrWriteEffect;
use crate::core::units::fpu::{self, FpOp, FpResult, RoundingMode};
use crate::isa::opcodes::{self, amo, is_link_reg, system};
use crate::isa::{funct3, funct7, imm_b, imm_i, imm_j, imm_s, imm_u, rd, rs1, rs2, rs3, rvc};
use crate::soc::memmap::PhysMemMap;

impl Hart {
    /// Runs up to `n` instructions. Returns the number retired. Stops early
    /// on power-down with nothing pending, or on termination.
    pub fn step(&mut self, n: u64, mem: &mut PhysMemMap) -> u64 {
        let mut retired = 0;
        for _ in 0..n {
            match self.exec_one(mem) {
                StepOutcome::Retired => retired += 1,
                StepOutcome::Trapped => {}
                StepOutcome::PowerDown | StepOutcome::Terminated => break,
            }
        }
        retired
    }

    /// Executes at most one instruction, servicing interrupts first.
    pub fn exec_one(&mut self, mem: &mut PhysMemMap) -> StepOutcome {
        if self.terminate {
            return StepOutcome::Terminated;
        }

        if let Some(irq) = self.pending_interrupt() {
            self.power_down = false;
            self.deliver_trap(&irq, self.pc);
            return StepOutcome::Trapped;
        }

        if self.power_down {
            if self.csrs.mip & self.csrs.mie != 0 {
                self.power_down = false;
            } else {
                return StepOutcome::PowerDown;
            }
        }

        self.insn_counter = self.insn_counter.wrapping_add(1);
        self.regs.clear_most_recent();
        self.fregs.clear_most_recent();
        self.ctf_info = CtfInfo::Nop;

        let pc = self.pc;
        match self.fetch_and_execute(pc, mem) {
            Ok(()) => {
                self.minstret = self.minstret.wrapping_add(1);
                StepOutcome::Retired
            }
            Err(trap) => {
                self.deliver_trap(&trap, pc);
                StepOutcome::Trapped
            }
        }
    }

    fn fetch_and_execute(&mut self, pc: u64, mem: &mut PhysMemMap) -> Result<(), Trap> {
        let raw = self.fetch_insn(pc, mem)?;
        if raw & 3 == 3 {
            self.execute(pc, raw, raw, 4, mem)
        } else {
            let expanded = rvc::expand(raw as u16);
            self.execute(pc, expanded, raw & 0xFFFF, 2, mem)
        }
    }

    /// Executes one instruction in canonical 32-bit form. `raw` keeps the
    /// original encoding for illegal-instruction tval.
    fn execute(
        &mut self,
        pc: u64,
        insn: u32,
        raw: u32,
        len: u64,
        mem: &mut PhysMemMap,
    ) -> Result<(), Trap> {
        let now = self.insn_counter;
        let mut next_pc = pc.wrapping_add(len);
        let opcode = insn & 0x7F;
        let (rd, rs1, rs2) = (rd(insn), rs1(insn), rs2(insn));
        let f3 = funct3(insn);

        match opcode {
            opcodes::OP_LUI => {
                self.regs.write(rd, imm_u(insn) as u64, now);
            }
            opcodes::OP_AUIPC => {
                self.regs.write(rd, pc.wrapping_add(imm_u(insn) as u64), now);
            }

            opcodes::OP_JAL => {
                let target = pc.wrapping_add(imm_j(insn) as u64);
                self.regs.write(rd, next_pc, now);
                next_pc = target;
                self.ctf_info = CtfInfo::TakenJump;
                self.ctf_target = target;
            }
            opcodes::OP_JALR if f3 == 0 => {
                // Read the base before the link write: rd may alias rs1.
                let target = self.regs.read(rs1).wrapping_add(imm_i(insn) as u64) & !1;
                self.regs.write(rd, next_pc, now);
                next_pc = target;
                self.ctf_info = jalr_ctf(rd, rs1);
                self.ctf_target = target;
            }

            opcodes::OP_BRANCH => {
                let a = self.regs.read(rs1);
                let b = self.regs.read(rs2);
                let taken = match f3 {
                    0 => a == b,
                    1 => a != b,
                    4 => (a as i64) < (b as i64),
                    5 => (a as i64) >= (b as i64),
                    6 => a < b,
                    7 => a >= b,
                    _ => return Err(Trap::IllegalInstruction(raw)),
                };
                if taken {
                    let target = pc.wrapping_add(imm_b(insn) as u64);
                    next_pc = target;
                    self.ctf_info = CtfInfo::TakenBranch;
                    self.ctf_target = target;
                }
            }

            opcodes::OP_LOAD => {
                let addr = self.regs.read(rs1).wrapping_add(imm_i(insn) as u64);
                let val = match f3 {
                    0 => self.load(addr, 0, mem)? as i8 as i64 as u64,
                    1 => self.load(addr, 1, mem)? as i16 as i64 as u64,
                    2 => self.load(addr, 2, mem)? as i32 as i64 as u64,
                    3 => self.load(addr, 3, mem)?,
                    4 => self.load(addr, 0, mem)?,
                    5 => self.load(addr, 1, mem)?,
                    6 => self.load(addr, 2, mem)?,
                    _ => return Err(Trap::IllegalInstruction(raw)),
                };
                self.regs.write(rd, val, now);
            }
            opcodes::OP_STORE => {
                let addr = self.regs.read(rs1).wrapping_add(imm_s(insn) as u64);
                let val = self.regs.read(rs2);
                match f3 {
                    0..=3 => self.store(addr, val, f3, mem)?,
                    _ => return Err(Trap::IllegalInstruction(raw)),
                }
            }

            opcodes::OP_IMM => {
                let a = self.regs.read(rs1);
                let imm = imm_i(insn) as u64;
                let val = match f3 {
                    0 => a.wrapping_add(imm),
                    1 => {
                        if imm >> 6 != 0 {
                            return Err(Trap::IllegalInstruction(raw));
                        }
                        a << (imm & 0x3F)
                    }
                    2 => ((a as i64) < imm as i64) as u64,
                    3 => (a < imm) as u64,
                    4 => a ^ imm,
                    5 => match imm >> 6 {
                        0 => a >> (imm & 0x3F),
                        0x10 => ((a as i64) >> (imm & 0x3F)) as u64,
                        _ => return Err(Trap::IllegalInstruction(raw)),
                    },
                    6 => a | imm,
                    7 => a & imm,
                    _ => unreachable!(),
                };
                self.regs.write(rd, val, now);
            }
            opcodes::OP_IMM_32 => {
                let a = self.regs.read(rs1) as u32;
                let imm = imm_i(insn) as u64;
                let val = match f3 {
                    0 => a.wrapping_add(imm as u32) as i32 as i64 as u64,
                    1 => {
                        if imm >> 5 != 0 {
                            return Err(Trap::IllegalInstruction(raw));
                        }
                        (a << (imm & 0x1F)) as i32 as i64 as u64
                    }
                    5 => match imm >> 5 {
                        0 => (a >> (imm & 0x1F)) as i32 as i64 as u64,
                        0x20 => ((a as i32) >> (imm & 0x1F)) as i64 as u64,
                        _ => return Err(Trap::IllegalInstruction(raw)),
                    },
                    _ => return Err(Trap::IllegalInstruction(raw)),
                };
                self.regs.write(rd, val, now);
            }

            opcodes::OP_REG => {
                let a = self.regs.read(rs1);
                let b = self.regs.read(rs2);
                let val = match (funct7(insn), f3) {
                    (0x00, 0) => a.wrapping_add(b),
                    (0x20, 0) => a.wrapping_sub(b),
                    (0x00, 1) => a << (b & 0x3F),
                    (0x00, 2) => ((a as i64) < b as i64) as u64,
                    (0x00, 3) => (a < b) as u64,
                    (0x00, 4) => a ^ b,
                    (0x00, 5) => a >> (b & 0x3F),
                    (0x20, 5) => ((a as i64) >> (b & 0x3F)) as u64,
                    (0x00, 6) => a | b,
                    (0x00, 7) => a & b,
                    (0x01, 0) => a.wrapping_mul(b),
                    (0x01, 1) => (((a as i64 as i128) * (b as i64 as i128)) >> 64) as u64,
                    (0x01, 2) => (((a as i64 as i128) * (b as u128 as i128)) >> 64) as u64,
                    (0x01, 3) => (((a as u128) * (b as u128)) >> 64) as u64,
                    (0x01, 4) => div64(a as i64, b as i64) as u64,
                    (0x01, 5) => divu64(a, b),
                    (0x01, 6) => rem64(a as i64, b as i64) as u64,
                    (0x01, 7) => remu64(a, b),
                    _ => return Err(Trap::IllegalInstruction(raw)),
                };
                self.regs.write(rd, val, now);
            }
            opcodes::OP_REG_32 => {
                let a = self.regs.read(rs1) as u32;
                let b = self.regs.read(rs2) as u32;
                let val32 = match (funct7(insn), f3) {
                    (0x00, 0) => a.wrapping_add(b),
                    (0x20, 0) => a.wrapping_sub(b),
                    (0x00, 1) => a << (b & 0x1F),
                    (0x00, 5) => a >> (b & 0x1F),
                    (0x20, 5) => ((a as i32) >> (b & 0x1F)) as u32,
                    (0x01, 0) => a.wrapping_mul(b),
                    (0x01, 4) => div32(a as i32, b as i32) as u32,
                    (0x01, 5) => divu32(a, b),
                    (0x01, 6) => rem32(a as i32, b as i32) as u32,
                    (0x01, 7) => remu32(a, b),
                    _ => return Err(Trap::IllegalInstruction(raw)),
                };
                self.regs.write(rd, val32 as i32 as i64 as u64, now);
            }

            opcodes::OP_MISC_MEM => match f3 {
                0 => {
                    // FENCE orders nothing in this model but conservatively
                    // drops the speculative-store repair buffer and the
                    // reservation.
                    self.store_repair = None;
                    self.clear_reservation();
                }
                1 => {
                    // FENCE.I: discard stale fetch translations.
                    self.mmu.fetch_tlb.flush();
                }
                _ => return Err(Trap::IllegalInstruction(raw)),
            },

            opcodes::OP_AMO => self.execute_amo(insn, raw, mem)?,

            opcodes::OP_SYSTEM => {
                if let Some(target) = self.execute_system(pc, insn, raw)? {
                    next_pc = target;
                }
            }

            opcodes::OP_LOAD_FP => {
                self.check_fp_on(raw)?;
                let addr = self.regs.read(rs1).wrapping_add(imm_i(insn) as u64);
                let val = match f3 {
                    2 => fpu::nan::box_f32_bits(self.load(addr, 2, mem)? as u32),
                    3 => self.load(addr, 3, mem)?,
                    _ => return Err(Trap::IllegalInstruction(raw)),
                };
                self.fregs.write(rd, val, now);
                self.csrs.set_fs_dirty();
            }
            opcodes::OP_STORE_FP => {
                self.check_fp_on(raw)?;
                let addr = self.regs.read(rs1).wrapping_add(imm_s(insn) as u64);
                match f3 {
                    2 => self.store(addr, self.fregs.read(rs2) & 0xFFFF_FFFF, 2, mem)?,
                    3 => self.store(addr, self.fregs.read(rs2), 3, mem)?,
                    _ => return Err(Trap::IllegalInstruction(raw)),
                }
            }

            opcodes::OP_FMADD
            | opcodes::OP_FMSUB
            | opcodes::OP_FNMSUB
            | opcodes::OP_FNMADD => {
                self.check_fp_on(raw)?;
                let fmt = (insn >> 25) & 3;
                let rm = self.resolve_rm(f3, raw)?;
                let op = match opcode {
                    opcodes::OP_FMADD => FpOp::MAdd,
                    opcodes::OP_FMSUB => FpOp::MSub,
                    opcodes::OP_FNMSUB => FpOp::NMSub,
                    _ => FpOp::NMAdd,
                };
                let (a, b, c) = (
                    self.fregs.read(rs1),
                    self.fregs.read(rs2),
                    self.fregs.read(rs3(insn)),
                );
                let res = match fmt {
                    0 => fpu::exec32(op, a, b, c, rm),
                    1 => fpu::exec64(op, a, b, c, rm),
                    _ => return Err(Trap::IllegalInstruction(raw)),
                };
                self.write_fp_result(rd, res);
            }
            opcodes::OP_FP => {
                self.check_fp_on(raw)?;
                self.execute_fp(insn, raw, mem)?;
            }

            _ => return Err(Trap::IllegalInstruction(raw)),
        }

        self.pc = next_pc;
        Ok(())
    }

    fn check_fp_on(&self, raw: u32) -> Result<(), Trap> {
        if self.csrs.fs() == FS_OFF {
            Err(Trap::IllegalInstruction(raw))
        } else {
            Ok(())
        }
    }

    /// Resolves an instruction's rm field, consulting `frm` for dynamic.
    fn resolve_rm(&self, field: u32, raw: u32) -> Result<RoundingMode, Trap> {
        let bits = if field == 7 {
            self.csrs.frm as u32
        } else {
            field
        };
        RoundingMode::from_bits(bits).ok_or(Trap::IllegalInstruction(raw))
    }

    fn write_fp_result(&mut self, rd: usize, res: FpResult) {
        let now = self.insn_counter;
        self.fregs.write(rd, res.value, now);
        self.csrs.fflags |= u64::from(res.flags);
        self.csrs.set_fs_dirty();
    }

    fn write_fp_to_gpr(&mut self, rd: usize, res: FpResult) {
        let now = self.insn_counter;
        self.regs.write(rd, res.value, now);
        self.csrs.fflags |= u64::from(res.flags);
        if res.flags != 0 {
            self.csrs.set_fs_dirty();
        }
    }

    /// LR/SC and the AMO family.
    fn execute_amo(&mut self, insn: u32, raw: u32, mem: &mut PhysMemMap) -> Result<(), Trap> {
        let now = self.insn_counter;
        let (rd, rs1, rs2) = (rd(insn), rs1(insn), rs2(insn));
        let f3 = funct3(insn);
        let size_log2 = match f3 {
            2 | 3 => f3,
            _ => return Err(Trap::IllegalInstruction(raw)),
        };
        let addr = self.regs.read(rs1);
        let funct5 = insn >> 27;

        // Naturally-aligned accesses only, for every AMO variant.
        if addr & ((1 << size_log2) - 1) != 0 {
            return Err(if funct5 == amo::LR {
                Trap::LoadAddressMisaligned(addr)
            } else {
                Trap::StoreAddressMisaligned(addr)
            });
        }

        let sext = |v: u64| -> u64 {
            if size_log2 == 2 {
                v as u32 as i32 as i64 as u64
            } else {
                v
            }
        };

        match funct5 {
            amo::LR => {
                if rs2 != 0 {
                    return Err(Trap::IllegalInstruction(raw));
                }
                let paddr = self.translate_data(addr, size_log2, AccessKind::Read, mem)?;
                let val = mem
                    .read(paddr, size_log2)
                    .map_err(|()| Trap::LoadAccessFault(addr))?;
                self.set_reservation(paddr);
                self.regs.write(rd, sext(val), now);
            }
            amo::SC => {
                let paddr = self.translate_data(addr, size_log2, AccessKind::Write, mem)?;
                if self.check_reservation(paddr) {
                    self.store_phys(paddr, addr, self.regs.read(rs2), size_log2, mem)?;
                    self.regs.write(rd, 0, now);
                } else {
                    self.regs.write(rd, 1, now);
                }
                self.clear_reservation();
            }
            _ => {
                // AMOs translate for write; the read half faults as a store.
                let paddr = self.translate_data(addr, size_log2, AccessKind::Write, mem)?;
                let old = mem
                    .read(paddr, size_log2)
                    .map_err(|()| Trap::StoreAccessFault(addr))?;
                let b = self.regs.read(rs2);
                let old_s = sext(old);
                let b_s = sext(b);
                let new = match funct5 {
                    amo::SWAP => b,
                    amo::ADD => old_s.wrapping_add(b_s),
                    amo::XOR => old ^ b,
                    amo::AND => old & b,
                    amo::OR => old | b,
                    amo::MIN => {
                        if (old_s as i64) < b_s as i64 { old } else { b }
                    }
                    amo::MAX => {
                        if (old_s as i64) > b_s as i64 { old } else { b }
                    }
                    amo::MINU => {
                        let (ou, bu) = if size_log2 == 2 {
                            (old & 0xFFFF_FFFF, b & 0xFFFF_FFFF)
                        } else {
                            (old, b)
                        };
                        if ou < bu { old } else { b }
                    }
                    amo::MAXU => {
                        let (ou, bu) = if size_log2 == 2 {
                            (old & 0xFFFF_FFFF, b & 0xFFFF_FFFF)
                        } else {
                            (old, b)
                        };
                        if ou > bu { old } else { b }
                    }
                    _ => return Err(Trap::IllegalInstruction(raw)),
                };
                self.store_phys(paddr, addr, new, size_log2, mem)?;
                self.regs.write(rd, old_s, now);
            }
        }
        Ok(())
    }

    /// SYSTEM opcode: CSR ops, ECALL/EBREAK, xRET, WFI, SFENCE.VMA.
    ///
    /// Returns `Some(target)` when the instruction redirects the PC.
    fn execute_system(&mut self, pc: u64, insn: u32, raw: u32) -> Result<Option<u64>, Trap> {
        let now = self.insn_counter;
        let (rd, rs1) = (rd(insn), rs1(insn));
        let f3 = funct3(insn);

        if f3 == 0 {
            match insn {
                system::ECALL => {
                    return Err(match self.privilege {
                        PrivilegeMode::User => Trap::EnvironmentCallFromUMode,
                        PrivilegeMode::Supervisor => Trap::EnvironmentCallFromSMode,
                        PrivilegeMode::Machine => Trap::EnvironmentCallFromMMode,
                    });
                }
                system::EBREAK => return Err(Trap::Breakpoint(pc)),
                system::MRET => {
                    if self.privilege != PrivilegeMode::Machine {
                        return Err(Trap::IllegalInstruction(raw));
                    }
                    self.do_mret();
                    return Ok(Some(self.pc));
                }
                system::SRET => {
                    if self.privilege < PrivilegeMode::Supervisor
                        || (self.privilege == PrivilegeMode::Supervisor
                            && self.csrs.mstatus & MSTATUS_TSR != 0)
                    {
                        return Err(Trap::IllegalInstruction(raw));
                    }
                    self.do_sret();
                    return Ok(Some(self.pc));
                }
                system::WFI => {
                    match self.privilege {
                        PrivilegeMode::User => return Err(Trap::IllegalInstruction(raw)),
                        PrivilegeMode::Supervisor
                            if self.csrs.mstatus & MSTATUS_TW != 0 =>
                        {
                            return Err(Trap::IllegalInstruction(raw));
                        }
                        _ => {}
                    }
                    if self.csrs.mip & self.csrs.mie == 0 {
                        self.power_down = true;
                    }
                    return Ok(None);
                }
                _ => {}
            }
            if funct7(insn) == system::SFENCE_VMA_FUNCT7 && rd == 0 {
                if self.privilege < PrivilegeMode::Supervisor
                    || (self.privilege == PrivilegeMode::Supervisor
                        && self.csrs.mstatus & MSTATUS_TVM != 0)
                {
                    return Err(Trap::IllegalInstruction(raw));
                }
                let vaddr = (rs1 != 0).then(|| self.regs.read(rs1));
                let asid = (rs2(insn) != 0).then(|| self.regs.read(rs2(insn)) as u16);
                self.mmu.sfence_vma(vaddr, asid);
                self.tlb_broadcast = true;
                self.clear_reservation();
                return Ok(None);
            }
            return Err(Trap::IllegalInstruction(raw));
        }

        // CSR instructions. The immediate forms use the rs1 field as a
        // 5-bit zero-extended immediate.
        let csr_addr = insn >> 20;
        let illegal = || Trap::IllegalInstruction(raw);
        let src = if f3 & 4 == 0 {
            self.regs.read(rs1)
        } else {
            rs1 as u64
        };

        // CSRRW(I) with rd = x0 must not perform the read (or its side
        // effects); the write below still validates that the CSR exists.
        let write_form = f3 & 3 == 1;
        let old = if write_form && rd == 0 {
            0
        } else {
            self.csr_read(csr_addr).map_err(|()| illegal())?
        };

        let new = match f3 & 3 {
            1 => Some(src),
            2 => (rs1 != 0).then(|| old | src),
            3 => (rs1 != 0).then(|| old & !src),
            _ => return Err(illegal()),
        };

        if let Some(val) = new {
            match self.csr_write(csr_addr, val).map_err(|()| illegal())? {
                CsrWriteEffect::None => {}
                CsrWriteEffect::FlushTlb => {
                    self.mmu.flush_all();
                    self.tlb_broadcast = true;
                }
            }
        }
        self.regs.write(rd, old, now);
        Ok(None)
    }

    /// OP-FP: computational, compare, convert, classify, and move forms.
    fn execute_fp(&mut self, insn: u32, raw: u32, _mem: &mut PhysMemMap) -> Result<(), Trap> {
        use crate::core::units::fpu::nan;

        let (rd, rs1, rs2i) = (rd(insn), rs1(insn), rs2(insn));
        let f3 = funct3(insn);
        let f7 = funct7(insn);
        let fmt = f7 & 3;
        if fmt > 1 {
            return Err(Trap::IllegalInstruction(raw));
        }
        let is32 = fmt == 0;
        let a = self.fregs.read(rs1);
        let b = self.fregs.read(rs2i);
        let illegal = || Trap::IllegalInstruction(raw);

        match f7 >> 2 {
            0x00..=0x03 => {
                let op = match f7 >> 2 {
                    0x00 => FpOp::Add,
                    0x01 => FpOp::Sub,
                    0x02 => FpOp::Mul,
                    _ => FpOp::Div,
                };
                let rm = self.resolve_rm(f3, raw)?;
                let res = if is32 {
                    fpu::exec32(op, a, b, 0, rm)
                } else {
                    fpu::exec64(op, a, b, 0, rm)
                };
                self.write_fp_result(rd, res);
            }
            0x0B => {
                if rs2i != 0 {
                    return Err(illegal());
                }
                let rm = self.resolve_rm(f3, raw)?;
                let res = if is32 {
                    fpu::exec32(FpOp::Sqrt, a, 0, 0, rm)
                } else {
                    fpu::exec64(FpOp::Sqrt, a, 0, 0, rm)
                };
                self.write_fp_result(rd, res);
            }
            0x04 => {
                // Sign injection on the raw bit patterns.
                let res = if is32 {
                    let (ab, bb) = (nan::unbox_f32_bits(a), nan::unbox_f32_bits(b));
                    let sign = 0x8000_0000u32;
                    let bits = match f3 {
                        0 => (ab & !sign) | (bb & sign),
                        1 => (ab & !sign) | (!bb & sign),
                        2 => ab ^ (bb & sign),
                        _ => return Err(illegal()),
                    };
                    nan::box_f32_bits(bits)
                } else {
                    let sign = 0x8000_0000_0000_0000u64;
                    match f3 {
                        0 => (a & !sign) | (b & sign),
                        1 => (a & !sign) | (!b & sign),
                        2 => a ^ (b & sign),
                        _ => return Err(illegal()),
                    }
                };
                self.write_fp_result(rd, FpResult { value: res, flags: 0 });
            }
            0x05 => {
                let res = match f3 {
                    0 => {
                        if is32 {
                            fpu::minmax32(a, b, false)
                        } else {
                            fpu::minmax64(a, b, false)
                        }
                    }
                    1 => {
                        if is32 {
                            fpu::minmax32(a, b, true)
                        } else {
                            fpu::minmax64(a, b, true)
                        }
                    }
                    _ => return Err(illegal()),
                };
                self.write_fp_result(rd, res);
            }
            0x08 => {
                // FCVT.S.D / FCVT.D.S
                let rm = self.resolve_rm(f3, raw)?;
                let res = match (is32, rs2i) {
                    (true, 1) => fpu::f64_to_f32(a, rm),
                    (false, 0) => fpu::f32_to_f64(a),
                    _ => return Err(illegal()),
                };
                self.write_fp_result(rd, res);
            }
            0x14 => {
                let res = if is32 {
                    fpu::compare32(a, b, f3)
                } else {
                    fpu::compare64(a, b, f3)
                };
                if f3 > 2 {
                    return Err(illegal());
                }
                self.write_fp_to_gpr(rd, res);
            }
            0x18 => {
                // FCVT.{W,WU,L,LU}.{S,D}
                let rm = self.resolve_rm(f3, raw)?;
                let v = if is32 {
                    f64::from(nan::unbox_f32(a))
                } else {
                    f64::from_bits(a)
                };
                let (signed, bits) = match rs2i {
                    0 => (true, 32),
                    1 => (false, 32),
                    2 => (true, 64),
                    3 => (false, 64),
                    _ => return Err(illegal()),
                };
                self.write_fp_to_gpr(rd, fpu::to_int(v, rm, signed, bits));
            }
            0x1A => {
                // FCVT.{S,D}.{W,WU,L,LU}
                let rm = self.resolve_rm(f3, raw)?;
                let x = self.regs.read(rs1);
                let (signed, bits) = match rs2i {
                    0 => (true, 32),
                    1 => (false, 32),
                    2 => (true, 64),
                    3 => (false, 64),
                    _ => return Err(illegal()),
                };
                let res = if is32 {
                    fpu::int_to_f32(x, signed, bits, rm)
                } else {
                    fpu::int_to_f64(x, signed, bits)
                };
                self.write_fp_result(rd, res);
            }
            0x1C => {
                if rs2i != 0 {
                    return Err(illegal());
                }
                let val = match (f3, is32) {
                    // FMV.X.W sign-extends the 32-bit pattern.
                    (0, true) => nan::unbox_f32_bits(a) as i32 as i64 as u64,
                    (0, false) => a,
                    (1, true) => fpu::classify32(a),
                    (1, false) => fpu::classify64(a),
                    _ => return Err(illegal()),
                };
                self.write_fp_to_gpr(rd, FpResult { value: val, flags: 0 });
            }
            0x1E => {
                if rs2i != 0 || f3 != 0 {
                    return Err(illegal());
                }
                let x = self.regs.read(rs1);
                let val = if is32 {
                    nan::box_f32_bits(x as u32)
                } else {
                    x
                };
                self.write_fp_result(rd, FpResult { value: val, flags: 0 });
            }
            _ => return Err(illegal()),
        }
        Ok(())
    }
}

/// RAS-hint classification for JALR per the link-register convention.
fn jalr_ctf(rd: usize, rs1: usize) -> CtfInfo {
    match (is_link_reg(rd), is_link_reg(rs1)) {
        (false, false) => CtfInfo::TakenJalr,
        (false, true) => CtfInfo::TakenJalrPop,
        (true, false) => CtfInfo::TakenJalrPush,
        (true, true) => {
            if rd == rs1 {
                CtfInfo::TakenJalrPush
            } else {
                CtfInfo::TakenJalrPopPush
            }
        }
    }
}

fn div64(a: i64, b: i64) -> i64 {
    if b == 0 {
        -1
    } else if a == i64::MIN && b == -1 {
        i64::MIN
    } else {
        a / b
    }
}

fn divu64(a: u64, b: u64) -> u64 {
    if b == 0 { u64::MAX } else { a / b }
}

fn rem64(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else if a == i64::MIN && b == -1 {
        0
    } else {
        a % b
    }
}

fn remu64(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { a % b }
}

fn div32(a: i32, b: i32) -> i32 {
    if b == 0 {
        -1
    } else if a == i32::MIN && b == -1 {
        i32::MIN
    } else {
        a / b
    }
}

fn divu32(a: u32, b: u32) -> u32 {
    if b == 0 { u32::MAX } else { a / b }
}

fn rem32(a: i32, b: i32) -> i32 {
    if b == 0 {
        a
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        a % b
    }
}

fn remu32(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { a % b }
}
