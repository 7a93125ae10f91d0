//! Co-simulation oracle.
//!
//! Validates a DUT retirement stream against the emulator one instruction
//! at a time. Each [`CosimState::step`] drains any DUT-injected trap,
//! advances the model until exactly one instruction retires (traps may
//! fire first and are not counted), reconciles events the model cannot
//! predict — failed store-conditionals, counter CSR reads, MMIO loads —
//! by overriding the model's destination register with the DUT value, and
//! then compares PC, instruction bits, and write data.
//!
//! Diagnostics and the verbose commit stream go to a sink owned by this
//! state (stderr by default), so harnesses and tests can capture them.

/// The global branch-history shadow and its hash.
pub mod history;

use crate::common::MachineError;
use crate::config::{CliOverrides, MachineConfig};
use crate::core::cpu::{CtfInfo, StepOutcome};
use crate::core::arch::PrivilegeMode;
use crate::sim::trace::{commit_record, WriteBack};
use crate::soc::{machine::MachineBuilder, snapshot, Machine};
use history::GlobalHistory;
use std::io::Write;
use std::path::PathBuf;

/// Step accepted; continue.
pub const EXIT_CONTINUE: i32 = 0;
/// Run finished successfully (budget exhausted or terminated).
pub const EXIT_FINISHED: i32 = 1;
/// Divergence between DUT and model.
pub const EXIT_MISMATCH: i32 = 0x1FFF;
/// Unrecoverable harness error.
pub const EXIT_FATAL: i32 = -1;

/// Iteration cap for the advance-to-retirement loop. A hart stuck in WFI
/// with nothing injected would otherwise spin forever.
const ADVANCE_LIMIT: u32 = 100_000;

/// DUT-provided global-history words for one step.
#[derive(Clone, Copy, Debug)]
pub struct DutHistory {
    /// ghistory[63:0].
    pub lo: u64,
    /// ghistory[89:64].
    pub hi: u64,
}

/// The golden model plus per-run oracle state.
pub struct CosimState {
    /// The machine under oracle control.
    pub machine: Machine,
    /// DUT-injected asynchronous interrupt cause (`-1` = none).
    pending_interrupt: i64,
    /// DUT-injected synchronous exception cause (`-1` = none).
    pending_exception: i64,
    ghr: GlobalHistory,
    diag: Box<dyn Write>,
}

impl CosimState {
    /// Builds the oracle from harness argv: the same flags and config file
    /// the trace harness accepts.
    pub fn init(args: &[String]) -> Result<Self, MachineError> {
        let (config_path, overrides) = parse_args(args)?;
        let mut cfg = MachineConfig::from_file(&config_path)?;
        cfg.apply_overrides(&overrides);

        let mut machine = MachineBuilder::new(cfg).require_boot_image().build()?;
        if let Some(snap) = &overrides.load {
            snapshot::load(&mut machine, snap)?;
        }
        if let Some(n) = overrides.maxinsns {
            machine.maxinsns = if n == 0 { u64::MAX } else { n };
        }
        Ok(Self::from_machine(machine))
    }

    /// Wraps an already-built machine.
    pub fn from_machine(machine: Machine) -> Self {
        Self {
            machine,
            pending_interrupt: -1,
            pending_exception: -1,
            ghr: GlobalHistory::default(),
            diag: Box::new(std::io::stderr()),
        }
    }

    /// Redirects diagnostics and the commit stream.
    pub fn set_diag_sink(&mut self, sink: Box<dyn Write>) {
        self.diag = sink;
    }

    /// Queues a DUT-raised trap for the next step. Negative causes are
    /// asynchronous interrupts (the low six bits select the `mip` bit);
    /// non-negative causes are synchronous exceptions.
    pub fn raise_trap(&mut self, _hartid: usize, cause: i64) {
        if cause < 0 {
            if self.pending_interrupt != -1 {
                tracing::warn!(
                    old = self.pending_interrupt,
                    new = cause & 63,
                    "overwriting pending DUT interrupt"
                );
            }
            self.pending_interrupt = cause & 63;
            let _ = writeln!(self.diag, "DUT raised interrupt {}", self.pending_interrupt);
        } else {
            self.pending_exception = cause;
        }
    }

    /// Advances the model by exactly one DUT retirement and compares.
    ///
    /// Returns [`EXIT_CONTINUE`], [`EXIT_FINISHED`], [`EXIT_MISMATCH`], or
    /// [`EXIT_FATAL`].
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        hartid: usize,
        dut_pc: u64,
        dut_insn: u32,
        dut_wdata: u64,
        dut_ghr: Option<DutHistory>,
        check: bool,
    ) -> i32 {
        if hartid >= self.machine.harts.len() {
            let _ = writeln!(self.diag, "[error] bad hartid {hartid}");
            return EXIT_FATAL;
        }

        // Succeed after the instruction budget drains without a failure.
        if self.machine.maxinsns == 0 {
            return EXIT_FINISHED;
        }
        if self.machine.maxinsns != u64::MAX {
            self.machine.maxinsns -= 1;
        }
        if self.machine.harts[hartid].terminate {
            return EXIT_FINISHED;
        }

        let mut iregno: i32 = -1;
        let mut fregno: i32 = -1;
        let mut emu_pc;
        let mut emu_insn;
        let mut emu_priv;
        let mut spins = 0u32;

        // The model may take exceptions or interrupts before the next
        // instruction retires; loop until one does.
        loop {
            emu_priv = self.machine.harts[hartid].privilege;
            emu_pc = self.machine.harts[hartid].pc;
            emu_insn = self.machine.peek_insn(hartid).unwrap_or(0);
            if emu_insn & 3 != 3 {
                emu_insn &= 0xFFFF;
            }

            if emu_pc == dut_pc
                && emu_insn == dut_insn
                && is_store_conditional(emu_insn)
                && dut_wdata != 0
            {
                // The DUT failed this SC; mirror the failure instead of
                // performing the store.
                let rd = (emu_insn >> 7 & 0x1F) as usize;
                let hart = &mut self.machine.harts[hartid];
                if rd > 0 {
                    hart.regs.patch(rd, dut_wdata);
                }
                hart.pc = emu_pc + 4;
                hart.ctf_info = CtfInfo::Nop;
                iregno = rd as i32;
                break;
            }

            if self.pending_interrupt != -1 && self.pending_exception != -1 {
                // The DUT saw an interrupt race the exception; advance into
                // whichever trap the model takes and require the cause to
                // agree.
                let _ = writeln!(
                    self.diag,
                    "DUT also raised exception {}",
                    self.pending_exception
                );
                let _ = self.machine.exec_hart_one(hartid);

                let hart = &self.machine.harts[hartid];
                let cause = if hart.privilege == PrivilegeMode::Supervisor {
                    hart.csrs.scause
                } else {
                    hart.csrs.mcause
                } as i64;

                if self.pending_exception != cause {
                    let p = priv_letter(emu_priv);
                    let _ = write!(
                        self.diag,
                        "{} 0x{emu_pc:016x} (0x{emu_insn:08x}) ",
                        emu_priv.to_u8()
                    );
                    let _ = writeln!(
                        self.diag,
                        "[error] EMU {p}CAUSE {cause} != DUT {p}CAUSE {}",
                        self.pending_exception
                    );
                    return EXIT_MISMATCH;
                }
            }

            if self.pending_interrupt != -1 {
                self.machine.harts[hartid].set_mip(1 << (self.pending_interrupt & 63));
            }
            self.pending_interrupt = -1;
            self.pending_exception = -1;

            match self.machine.exec_hart_one(hartid) {
                StepOutcome::Retired => {
                    let hart = &self.machine.harts[hartid];
                    iregno = hart
                        .regs
                        .most_recently_written()
                        .map_or(-1, |(r, _)| r as i32);
                    fregno = hart
                        .fregs
                        .most_recently_written()
                        .map_or(-1, |(r, _)| r as i32);
                    break;
                }
                StepOutcome::Terminated => return EXIT_FINISHED,
                StepOutcome::Trapped | StepOutcome::PowerDown => {
                    spins += 1;
                    if spins >= ADVANCE_LIMIT {
                        let _ = writeln!(
                            self.diag,
                            "[error] no instruction retired after {ADVANCE_LIMIT} attempts \
                             (hart {hartid} pc 0x{emu_pc:016x})"
                        );
                        return EXIT_FATAL;
                    }
                }
            }
        }

        if check {
            self.apply_dut_overrides(hartid, emu_insn, dut_wdata);
        }

        // Verbose commit stream, in the shared record format.
        let wb = match (iregno, fregno) {
            (r, _) if r > 0 => {
                WriteBack::Int(r as usize, self.machine.harts[hartid].regs.read(r as usize))
            }
            (_, r) if r >= 0 => {
                WriteBack::Fp(r as usize, self.machine.harts[hartid].fregs.read(r as usize))
            }
            _ => WriteBack::None,
        };
        let _ = writeln!(
            self.diag,
            "{}",
            commit_record(emu_priv.to_u8(), emu_pc, emu_insn, wb)
        );

        if !check {
            return EXIT_CONTINUE;
        }

        let mut exit_code = EXIT_CONTINUE;

        if dut_pc != emu_pc {
            let _ = writeln!(
                self.diag,
                "[error] EMU PC {emu_pc:016x} != DUT PC {dut_pc:016x}"
            );
            exit_code = EXIT_MISMATCH;
        }

        // Compressed encodings are compared via their 16 bits only; the
        // DUT reports post-expansion bits for them.
        if emu_insn != dut_insn && emu_insn & 3 == 3 {
            let _ = writeln!(
                self.diag,
                "[error] EMU INSN {emu_insn:08x} != DUT INSN {dut_insn:08x}"
            );
            exit_code = EXIT_MISMATCH;
        }

        if let WriteBack::Int(_, emu_wdata) | WriteBack::Fp(_, emu_wdata) = wb {
            if dut_wdata != emu_wdata {
                let _ = writeln!(
                    self.diag,
                    "[error] EMU WDATA {emu_wdata:016x} != DUT WDATA {dut_wdata:016x}"
                );
                exit_code = EXIT_MISMATCH;
            }
        }

        if exit_code == EXIT_CONTINUE {
            // Prior registers now reflect this instruction's results, ready
            // for the next step's address reconstruction.
            self.machine.harts[hartid].regs.sync_prior();
        }

        if let Some(dut) = dut_ghr {
            self.cosim_history(hartid, dut, &mut exit_code);
        }

        exit_code
    }

    /// Compares the branch-history shadow against the DUT, then folds the
    /// just-retired CTI (if any) into the shadow.
    fn cosim_history(&mut self, hartid: usize, dut: DutHistory, exit_code: &mut i32) {
        if !self.ghr.matches(dut.lo, dut.hi) {
            let _ = writeln!(
                self.diag,
                "[error] EMU GHR {:016x}{:016x} != DUT GHR {:016x}{:016x}",
                self.ghr.hi, self.ghr.lo, dut.hi, dut.lo
            );
            *exit_code = EXIT_MISMATCH;
        }

        let hart = &self.machine.harts[hartid];
        if hart.ctf_info != CtfInfo::Nop {
            self.ghr.update(hart.ctf_target);
        }
    }

    /// Overrides the model's destination register where the DUT is the
    /// authority: unreconcilable counter/pending CSR reads, and loads or
    /// AMOs whose effective address lands in the MMIO window. The address
    /// is rebuilt from the prior register file, since the destination may
    /// have clobbered the base register.
    fn apply_dut_overrides(&mut self, hartid: usize, insn: u32, dut_wdata: u64) {
        let opcode = insn & 0x7F;
        let csrno = insn >> 20;
        let rd = (insn >> 7 & 0x1F) as usize;
        let rdc = (insn >> 2 & 7) as usize + 8;

        // CSR reads of cycle/time/instret, the hpm counters, the
        // counter-overflow pending CSRs, and mip/sip. rd = x0 means the
        // encoding is really a write.
        if opcode == 0x73
            && rd != 0
            && ((0xB00..0xB20).contains(&csrno)
                || (0xC00..0xC20).contains(&csrno)
                || csrno == 0xBD5 // machine counter-overflow pending
                || csrno == 0x9D5 // supervisor counter-overflow pending
                || csrno == 0x845 // user counter-overflow pending
                || csrno == 0x344 // mip
                || csrno == 0x144) // sip
        {
            self.machine.harts[hartid].regs.patch(rd, dut_wdata);
        }

        // Loads and AMOs from the MMIO window. Compressed c.ld/c.lw only
        // address x8..x15.
        let (reg, offset, dest);
        if (opcode == 0x03 || is_amo(insn)) && rd != 0 {
            reg = (insn >> 15 & 0x1F) as usize;
            offset = if opcode == 0x03 {
                (insn as i32 >> 20) as i64
            } else {
                0
            };
            dest = rd;
        } else if insn & 0xE003 == 0x6000 {
            // c.ld: uimm[5:3] at [12:10], uimm[7:6] at [6:5]
            reg = (insn >> 7 & 7) as usize + 8;
            offset = (get_field(insn, 10, 3, 5) | get_field(insn, 5, 6, 7)) as i64;
            dest = rdc;
        } else if insn & 0xE003 == 0x4000 {
            // c.lw: uimm[5:3] at [12:10], uimm[2] at [6], uimm[6] at [5]
            reg = (insn >> 7 & 7) as usize + 8;
            offset = (get_field(insn, 10, 3, 5)
                | get_field(insn, 6, 2, 2)
                | get_field(insn, 5, 6, 6)) as i64;
            dest = rdc;
        } else {
            return;
        }

        if self.is_mmio_load(hartid, reg, offset) {
            self.machine.harts[hartid].regs.patch(dest, dut_wdata);
        }
    }

    /// Rebuilds the effective address from the pre-instruction register
    /// file and tests whether its physical backing is the MMIO window.
    fn is_mmio_load(&mut self, hartid: usize, reg: usize, offset: i64) -> bool {
        let va = self.machine.harts[hartid]
            .regs
            .read_prior(reg)
            .wrapping_add(offset as u64);
        let (harts, mem) = (&mut self.machine.harts, &mut self.machine.mem);
        match harts[hartid].probe_read_paddr(va, mem) {
            Some(pa) => self.machine.mmio_start <= pa && pa < self.machine.mmio_end,
            None => false,
        }
    }
}

/// SC.W / SC.D detection on the canonical encoding.
fn is_store_conditional(insn: u32) -> bool {
    let opcode = insn & 0x7F;
    let funct3 = insn >> 12 & 7;
    opcode == 0x2F && insn >> 27 == 3 && (funct3 == 2 || funct3 == 3)
}

/// AMO detection, including LR but excluding SC.
fn is_amo(insn: u32) -> bool {
    if insn & 0x7F != 0x2F {
        return false;
    }
    matches!(
        insn >> 27,
        0x00 | 0x01 | 0x02 | 0x04 | 0x08 | 0x0C | 0x10 | 0x14 | 0x18 | 0x1C
    )
}

/// Moves the bit field starting at `src_pos` to `[dst_pos_max:dst_pos]`.
fn get_field(val: u32, src_pos: u32, dst_pos: u32, dst_pos_max: u32) -> u32 {
    debug_assert!(dst_pos_max >= dst_pos);
    let mask = ((1 << (dst_pos_max - dst_pos + 1)) - 1) << dst_pos;
    if dst_pos >= src_pos {
        (val << (dst_pos - src_pos)) & mask
    } else {
        (val >> (src_pos - dst_pos)) & mask
    }
}

fn priv_letter(p: PrivilegeMode) -> char {
    match p {
        PrivilegeMode::User => 'U',
        PrivilegeMode::Supervisor => 'S',
        PrivilegeMode::Machine => 'M',
    }
}

/// Parses harness argv: `[flags] config_file`.
fn parse_args(args: &[String]) -> Result<(PathBuf, CliOverrides), MachineError> {
    let mut overrides = CliOverrides::default();
    let mut config: Option<PathBuf> = None;

    let bad = |msg: String| MachineError::Args(msg);
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut take_value = |name: &str| {
            it.next()
                .cloned()
                .ok_or_else(|| bad(format!("{name} needs a value")))
        };
        match arg.as_str() {
            "--load" => overrides.load = Some(PathBuf::from(take_value("--load")?)),
            "--save" => overrides.save = Some(PathBuf::from(take_value("--save")?)),
            "--maxinsns" => {
                let v = take_value("--maxinsns")?;
                overrides.maxinsns =
                    Some(v.parse().map_err(|_| bad(format!("bad --maxinsns {v}")))?);
            }
            "--memory_size" => {
                let v = take_value("--memory_size")?;
                overrides.memory_size =
                    Some(v.parse().map_err(|_| bad(format!("bad --memory_size {v}")))?);
            }
            "--terminate-event" => {
                overrides.terminate_event = Some(take_value("--terminate-event")?);
            }
            "--trace" => {
                let v = take_value("--trace")?;
                overrides.trace = Some(v.parse().map_err(|_| bad(format!("bad --trace {v}")))?);
            }
            other if other.starts_with("--") => {
                return Err(bad(format!("unknown flag {other}")));
            }
            _ => {
                if config.replace(PathBuf::from(arg)).is_some() {
                    return Err(bad("more than one config file".into()));
                }
            }
        }
    }

    let config = config.ok_or_else(|| bad("missing config file".into()))?;
    Ok((config, overrides))
}

/// Parses harness argv for callers that build the machine themselves.
pub fn parse_harness_args(args: &[String]) -> Result<(PathBuf, CliOverrides), MachineError> {
    parse_args(args)
}
