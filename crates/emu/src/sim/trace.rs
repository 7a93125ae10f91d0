//! Single-step trace harness.
//!
//! Drives the machine one instruction at a time and emits a commit record
//! per retirement:
//!
//! ```text
//! 3 0x0000000000001000 (0xf1402573) x10 0x0000000000000000 DASM(0xf1402573)
//! ```
//!
//! The first `skip` records are suppressed (the `--trace N` offset). On a
//! recognized termination the power-off banner is printed.

use crate::core::cpu::StepOutcome;
use crate::isa::disasm;
use crate::soc::Machine;
use std::io::Write;

/// Which register file the retired instruction wrote.
#[derive(Clone, Copy, Debug)]
pub enum WriteBack {
    /// No destination was written.
    None,
    /// Integer destination `(reg, value)`.
    Int(usize, u64),
    /// Floating-point destination `(reg, value)`.
    Fp(usize, u64),
}

/// Formats one commit record (without trailing newline). Shared by the
/// trace harness and the cosim oracle's verbose stream. The `DASM(...)`
/// literal carries the raw encoding for external post-processing.
pub fn commit_record(priv_level: u8, pc: u64, insn: u32, wb: WriteBack) -> String {
    format!(
        "{priv_level} {pc:#018x} ({insn:#010x}) {} DASM({insn:#010x})",
        writeback_column(wb)
    )
}

/// Like [`commit_record`] but with the mnemonic rendered inline instead of
/// the `DASM` literal (the CLI's `--dasm` mode).
pub fn commit_record_disassembled(priv_level: u8, pc: u64, insn: u32, wb: WriteBack) -> String {
    let expanded = if insn & 3 == 3 {
        insn
    } else {
        crate::isa::rvc::expand(insn as u16)
    };
    format!(
        "{priv_level} {pc:#018x} ({insn:#010x}) {} {}",
        writeback_column(wb),
        disasm::disassemble(expanded)
    )
}

fn writeback_column(wb: WriteBack) -> String {
    match wb {
        WriteBack::Int(r, v) => format!("x{r:<2} {v:#018x}"),
        WriteBack::Fp(r, v) => format!("f{r:<2} {v:#018x}"),
        WriteBack::None => " ".repeat(22),
    }
}

/// Extracts the retired instruction's writeback, if any, from a hart.
pub fn last_writeback(machine: &Machine, hartid: usize) -> WriteBack {
    let hart = &machine.harts[hartid];
    if let Some((r, _)) = hart.regs.most_recently_written() {
        WriteBack::Int(r, hart.regs.read(r))
    } else if let Some((r, _)) = hart.fregs.most_recently_written() {
        WriteBack::Fp(r, hart.fregs.read(r))
    } else {
        WriteBack::None
    }
}

/// Runs the machine to completion, writing commit records to `out`.
///
/// Returns the total number of retired instructions.
pub fn run(machine: &mut Machine, out: &mut dyn Write, skip: u64, render_dasm: bool) -> u64 {
    let mut total: u64 = 0;

    loop {
        if machine.terminated() {
            let _ = writeln!(out, "\nPower off.");
            break;
        }
        if machine.maxinsns == 0 {
            tracing::info!(retired = total, "instruction budget exhausted");
            break;
        }

        let hartid = machine.next_hart();
        let pre_pc = machine.harts[hartid].pc;
        let pre_priv = machine.harts[hartid].privilege.to_u8();
        let insn = machine.peek_insn(hartid);

        let (_, outcome) = machine.exec_round_robin_one();
        match outcome {
            StepOutcome::Retired => {
                total += 1;
                if machine.maxinsns != u64::MAX {
                    machine.maxinsns -= 1;
                }
                if total > skip {
                    let mut insn = insn.unwrap_or(0);
                    if insn & 3 != 3 {
                        insn &= 0xFFFF;
                    }
                    let wb = last_writeback(machine, hartid);
                    let record = if render_dasm {
                        commit_record_disassembled(pre_priv, pre_pc, insn, wb)
                    } else {
                        commit_record(pre_priv, pre_pc, insn, wb)
                    };
                    let _ = writeln!(out, "{record}");
                }
            }
            StepOutcome::Trapped => {}
            StepOutcome::PowerDown => {
                // Nothing runnable until the next timer deadline; model it
                // by retiring time forward is the caller's business. Here
                // we simply stop to avoid spinning.
                tracing::info!("all harts in WFI; stopping trace run");
                break;
            }
            StepOutcome::Terminated => {
                let _ = writeln!(out, "\nPower off.");
                break;
            }
        }
    }
    total
}
