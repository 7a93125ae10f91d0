//! Machine assembly and the multi-hart stepping glue.
//!
//! A [`Machine`] binds the harts, the physical memory map, and the
//! interrupt fabric: RAM plus a boot ROM at the reset vector, CLINT, PLIC,
//! HTIF, the SiFive UART, and reserved virtio windows at their architected
//! addresses. Stepping interleaves harts at instruction granularity; after
//! every instruction the glue drains device events into `mip`, applies
//! cross-hart reservation kills from the store log, honors SFENCE.VMA
//! broadcasts, and reacts to HTIF shutdown.

use crate::common::constants::MAX_CPUS;
use crate::common::MachineError;
use crate::config::{map, MachineConfig};
use crate::core::arch::csr::{MIP_MEIP, MIP_MSIP, MIP_MTIP, MIP_SEIP};
use crate::core::cpu::{Hart, StepOutcome};
use crate::core::units::mmu::AdUpdatePolicy;
use crate::sim::loader;
use crate::soc::device::{CharacterDevice, IrqLine, SharedConsole, StdoutConsole};
use crate::soc::devices::{Clint, Htif, Plic, Uart};
use crate::soc::memmap::PhysMemMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Instant;

/// Offset of the 64-bit jump-target slot inside the boot ROM.
const ROM_JUMP_SLOT: u64 = 24;
/// Offset of the FDT window inside the boot ROM.
const ROM_FDT_OFFSET: u64 = 32;

/// Builds a [`Machine`] from a config, with optional console override and
/// boot-image requirement.
pub struct MachineBuilder {
    cfg: MachineConfig,
    console: Option<Box<dyn CharacterDevice>>,
    require_image: bool,
}

impl MachineBuilder {
    /// Starts a builder over `cfg`.
    pub fn new(cfg: MachineConfig) -> Self {
        Self {
            cfg,
            console: None,
            require_image: false,
        }
    }

    /// Uses `console` for HTIF and the UART instead of stdout.
    pub fn console(mut self, console: Box<dyn CharacterDevice>) -> Self {
        self.console = Some(console);
        self
    }

    /// Makes `build` fail when neither a BIOS nor a kernel is configured.
    pub fn require_boot_image(mut self) -> Self {
        self.require_image = true;
        self
    }

    /// Assembles the machine, registers devices, and loads boot images.
    pub fn build(self) -> Result<Machine, MachineError> {
        let cfg = self.cfg;
        if cfg.harts == 0 || cfg.harts > MAX_CPUS {
            return Err(MachineError::TooManyHarts {
                requested: cfg.harts,
                max: MAX_CPUS,
            });
        }
        if self.require_image && cfg.bios.is_none() && cfg.kernel.is_none() {
            return Err(MachineError::NoBootImage);
        }

        let console = SharedConsole::new(self.console.unwrap_or_else(|| Box::new(StdoutConsole)));

        let ram_base = cfg.memory_base_addr;
        let ram_size = cfg.memory_bytes();
        let mut mem = PhysMemMap::new();
        mem.register_ram(ram_base, ram_size)?;
        mem.register_ram(map::ROM_BASE, map::ROM_SIZE)?;

        let sources = Arc::new(AtomicU32::new(0));
        mem.register_device(
            map::CLINT_BASE,
            map::CLINT_SIZE,
            Box::new(Clint::new(cfg.harts)),
        )?;
        mem.register_device(
            map::PLIC_BASE,
            map::PLIC_SIZE,
            Box::new(Plic::new(Arc::clone(&sources))),
        )?;
        mem.register_device(
            cfg.htif_base_addr,
            map::HTIF_SIZE,
            Box::new(Htif::new(Box::new(console.clone()))),
        )?;
        mem.register_device(
            map::UART0_BASE,
            map::UART0_SIZE,
            Box::new(Uart::new(
                Box::new(console),
                IrqLine::new(Arc::clone(&sources), map::UART0_IRQ),
            )),
        )?;
        // Virtio device models are external; they claim windows and lanes
        // through `Machine::register_virtio_window` starting at VIRTIO_BASE
        // and VIRTIO_IRQ.

        let terminate_event = cfg.terminate_event_value();
        let mut harts = Vec::with_capacity(cfg.harts);
        for hartid in 0..cfg.harts {
            let mut hart = Hart::new(
                hartid as u64,
                map::ROM_BASE,
                cfg.timebase_div,
                AdUpdatePolicy::Hardware,
            );
            hart.terminate_event = terminate_event;
            harts.push(hart);
        }

        let mut machine = Machine {
            mem,
            harts,
            maxinsns: u64::MAX,
            ram_base,
            ram_size,
            mmio_start: cfg.mmio_start,
            mmio_end: cfg.mmio_end,
            timebase_div: cfg.timebase_div.max(1),
            rtc_real_time: cfg.rtc_real_time,
            rtc_start: Instant::now(),
            next_hart: 0,
            irq_sources: sources,
            virtio_count: 0,
        };

        machine.write_boot_rom()?;
        if let Some(dtb) = &cfg.dtb {
            let blob = loader::read_image(dtb)?;
            machine
                .mem
                .write_ram(map::ROM_BASE + ROM_FDT_OFFSET, &blob)
                .map_err(|()| MachineError::RangeOverlap {
                    base: map::ROM_BASE + ROM_FDT_OFFSET,
                    size: blob.len() as u64,
                })?;
        }

        if let Some(kernel) = &cfg.kernel {
            let image = loader::read_image(kernel)?;
            loader::load_elf(&mut machine.mem, ram_base, &image, kernel)?;
        } else if let Some(bios) = &cfg.bios {
            let image = loader::read_image(bios)?;
            loader::load_raw(&mut machine.mem, ram_base, ram_size, &image)?;
        }

        Ok(machine)
    }
}

/// A multi-hart RV64 machine.
pub struct Machine {
    /// The shared physical memory map (RAM, ROM, and devices).
    pub mem: PhysMemMap,
    /// The harts, indexed by hartid.
    pub harts: Vec<Hart>,
    /// Remaining instruction budget; `u64::MAX` means unlimited.
    pub maxinsns: u64,
    /// MMIO window start the cosim overrides loads from.
    pub mmio_start: u64,
    /// MMIO window end (exclusive).
    pub mmio_end: u64,
    ram_base: u64,
    ram_size: u64,
    timebase_div: u64,
    rtc_real_time: bool,
    rtc_start: Instant,
    next_hart: usize,
    irq_sources: crate::soc::device::IrqSourceMask,
    virtio_count: u32,
}

impl Machine {
    /// Builds the default single-hart machine for `cfg`.
    pub fn new(cfg: MachineConfig) -> Result<Self, MachineError> {
        MachineBuilder::new(cfg).build()
    }

    /// RAM base address.
    pub fn ram_base(&self) -> u64 {
        self.ram_base
    }

    /// RAM size in bytes.
    pub fn ram_size(&self) -> u64 {
        self.ram_size
    }

    /// Writes the hand-coded reset ROM: hartid to `a0`, the FDT window
    /// address to `a1`, then an indirect jump to the RAM base through the
    /// 64-bit slot at [`ROM_JUMP_SLOT`].
    fn write_boot_rom(&mut self) -> Result<(), MachineError> {
        let rb = map::ROM_BASE;
        let code: [u32; 6] = [
            0xF1402573, // csrr  a0, mhartid
            0x00000597, // auipc a1, 0
            0x01C58593, // addi  a1, a1, 28      ; a1 = rom + FDT window
            0x00000297, // auipc t0, 0
            0x00C2B283, // ld    t0, 12(t0)      ; t0 = [rom + jump slot]
            0x00028067, // jr    t0
        ];
        let mut rom = Vec::with_capacity(ROM_FDT_OFFSET as usize);
        for insn in code {
            rom.extend_from_slice(&insn.to_le_bytes());
        }
        debug_assert_eq!(rom.len() as u64, ROM_JUMP_SLOT);
        rom.extend_from_slice(&self.ram_base.to_le_bytes());
        debug_assert_eq!(rom.len() as u64, ROM_FDT_OFFSET);

        self.mem
            .write_ram(rb, &rom)
            .map_err(|()| MachineError::RangeOverlap {
                base: rb,
                size: rom.len() as u64,
            })
    }

    /// Current `mtime`: retired instructions over the divider, or the host
    /// clock when `rtc_real_time` was configured (never in validation).
    pub fn mtime(&self) -> u64 {
        if self.rtc_real_time {
            let ns = self.rtc_start.elapsed().as_nanos() as u64;
            ns / 100 // 10 MHz timebase
        } else {
            self.harts[0].minstret / self.timebase_div
        }
    }

    /// True when every hart has terminated.
    pub fn terminated(&self) -> bool {
        self.harts.iter().all(|h| h.terminate)
    }

    /// Set-only MTIP poll plus drain of device events into `mip`. Set-only
    /// polling keeps DUT-injected interrupt bits alive: pending bits are
    /// cleared only by the architected register writes that clear them.
    fn sync_irqs(&mut self) {
        let mtime = self.mtime();

        let mut mtip_clear = Vec::new();
        let mut msip_writes = Vec::new();
        let mut mtip_set = Vec::new();
        if let Some(clint) = self.mem.clint_mut() {
            clint.set_mtime(mtime);
            let (cleared, msips) = clint.take_events();
            mtip_clear = cleared;
            msip_writes = msips;
            for hartid in 0..self.harts.len() {
                if clint.mtip(hartid) {
                    mtip_set.push(hartid);
                }
            }
        }
        for hartid in mtip_clear {
            if let Some(h) = self.harts.get_mut(hartid) {
                h.reset_mip(MIP_MTIP);
            }
        }
        for (hartid, level) in msip_writes {
            if let Some(h) = self.harts.get_mut(hartid) {
                if level {
                    h.set_mip(MIP_MSIP);
                } else {
                    h.reset_mip(MIP_MSIP);
                }
            }
        }
        for hartid in mtip_set {
            self.harts[hartid].set_mip(MIP_MTIP);
        }

        let line = self.mem.plic_mut().and_then(|plic| {
            plic.sync_sources();
            plic.take_line_update()
        });
        if let Some(level) = line {
            // The aggregated external line drives hart 0's M and S rings.
            if level {
                self.harts[0].set_mip(MIP_MEIP | MIP_SEIP);
            } else {
                self.harts[0].reset_mip(MIP_MEIP | MIP_SEIP);
            }
        }
    }

    /// Runs hart `hartid` for at most one instruction, with full interrupt
    /// and coherence glue around it.
    pub fn exec_hart_one(&mut self, hartid: usize) -> StepOutcome {
        self.sync_irqs();

        let outcome = {
            let (harts, mem) = (&mut self.harts, &mut self.mem);
            harts[hartid].exec_one(mem)
        };

        // Cross-hart effects of this instruction's stores: kill overlapping
        // reservations everywhere else. The executing hart handled its own
        // reservation and fetch translations inline.
        let stores = self.mem.take_store_log();
        if !stores.is_empty() {
            for (i, hart) in self.harts.iter_mut().enumerate() {
                if i == hartid {
                    continue;
                }
                for &(addr, len) in &stores {
                    hart.clear_reservation_on_store(addr, len);
                }
            }
        }

        // SFENCE.VMA broadcasts invalidate every other hart's TLBs.
        if self.harts[hartid].tlb_broadcast {
            self.harts[hartid].tlb_broadcast = false;
            for (i, hart) in self.harts.iter_mut().enumerate() {
                if i != hartid {
                    hart.mmu.flush_all();
                }
            }
        }

        if self
            .mem
            .htif_mut()
            .is_some_and(|htif| htif.shutdown_requested())
        {
            for hart in &mut self.harts {
                hart.terminate = true;
            }
        }

        // Device events raised by this instruction (mtimecmp writes, PLIC
        // claims) must land in mip before anyone executes again.
        self.sync_irqs();

        outcome
    }

    /// Reads the instruction at a hart's current PC without executing it.
    /// Fetch faults yield `None`.
    pub fn peek_insn(&mut self, hartid: usize) -> Option<u32> {
        let pc = self.harts[hartid].pc;
        let (harts, mem) = (&mut self.harts, &mut self.mem);
        harts[hartid].peek_insn(pc, mem).ok()
    }

    /// The hart the next round-robin step will run.
    pub fn next_hart(&self) -> usize {
        self.next_hart
    }

    /// Runs the next hart in round-robin order for one instruction.
    pub fn exec_round_robin_one(&mut self) -> (usize, StepOutcome) {
        let hartid = self.next_hart;
        self.next_hart = (self.next_hart + 1) % self.harts.len();
        (hartid, self.exec_hart_one(hartid))
    }

    /// Runs up to `budget` instructions, interleaving harts round-robin at
    /// instruction granularity. Returns the number retired. Stops early on
    /// termination, an exhausted `maxinsns`, or when every hart is powered
    /// down.
    pub fn step(&mut self, budget: u64) -> u64 {
        let mut retired = 0;
        let nharts = self.harts.len();
        let mut idle_streak = 0;

        for _ in 0..budget {
            if self.terminated() || self.maxinsns == 0 {
                break;
            }
            let hartid = self.next_hart;
            self.next_hart = (self.next_hart + 1) % nharts;

            match self.exec_hart_one(hartid) {
                StepOutcome::Retired => {
                    retired += 1;
                    idle_streak = 0;
                    if self.maxinsns != u64::MAX {
                        self.maxinsns -= 1;
                    }
                }
                StepOutcome::Trapped => idle_streak = 0,
                StepOutcome::PowerDown => {
                    idle_streak += 1;
                    if idle_streak >= nharts {
                        // Everyone is in WFI; the caller should sleep until
                        // the next timer deadline.
                        break;
                    }
                }
                StepOutcome::Terminated => break,
            }
        }
        retired
    }

    /// Registers an external virtio device model in the next architected
    /// window and hands back its interrupt lane. The device sees only the
    /// window offset and the lane, never the machine.
    pub fn register_virtio_window(
        &mut self,
        dev: Box<dyn crate::soc::device::MmioDevice>,
    ) -> Result<(u64, IrqLine), MachineError> {
        let base = map::VIRTIO_BASE + u64::from(self.virtio_count) * map::VIRTIO_SIZE;
        let lane = IrqLine::new(
            Arc::clone(&self.irq_sources),
            map::VIRTIO_IRQ + self.virtio_count,
        );
        self.mem.register_device(base, map::VIRTIO_SIZE, dev)?;
        self.virtio_count += 1;
        Ok((base, lane))
    }

    /// Invalidates every hart's cached translations for a physical range.
    /// External DMA-capable devices must call this after writing RAM.
    pub fn invalidate_tlbs_for_range(&mut self, addr: u64, size: u64) {
        let first = addr >> 12;
        let last = (addr + size.max(1) - 1) >> 12;
        for hart in &mut self.harts {
            for page in first..=last {
                hart.mmu.flush_phys_page(page << 12);
            }
        }
    }

    /// Milliseconds the caller may sleep before the next timer deadline,
    /// capped at `max_ms`. Zero when any hart is runnable.
    pub fn sleep_duration_ms(&mut self, max_ms: u64) -> u64 {
        let any_runnable = self
            .harts
            .iter()
            .any(|h| !h.power_down && !h.terminate);
        if any_runnable {
            return 0;
        }
        let mtime = self.mtime();
        let mut deadline = u64::MAX;
        if let Some(clint) = self.mem.clint_mut() {
            for hartid in 0..self.harts.len() {
                if clint.mtip(hartid) {
                    return 0;
                }
            }
            let (cmp, _) = clint.state();
            for c in cmp {
                deadline = deadline.min(c.saturating_sub(mtime));
            }
        }
        deadline.min(max_ms)
    }
}
