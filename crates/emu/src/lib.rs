//! RISC-V RV64GC full-system functional emulator and co-simulation golden
//! model.
//!
//! The crate is organized as:
//! 1. **Core:** per-hart architectural state, the RV64IMAFDC interpreter
//!    with precise trap semantics, CSRs, privilege modes, MMU/TLB/PMP.
//! 2. **SoC:** the physical memory map, CLINT/PLIC/HTIF/UART device
//!    models, multi-hart machine assembly, and snapshots.
//! 3. **Simulation:** boot-image loading and the single-step trace
//!    harness.
//! 4. **Cosim:** the oracle that validates a DUT retirement stream
//!    instruction-by-instruction, including the branch-history shadow.

/// Common vocabulary types (addresses, traps, host errors).
pub mod common;
/// Machine configuration (JSON file + CLI overrides).
pub mod config;
/// Architectural core: state, units, interpreter.
pub mod core;
/// Co-simulation oracle.
pub mod cosim;
/// Instruction-set tables, compressed expansion, disassembly.
pub mod isa;
/// Loading and tracing front end.
pub mod sim;
/// System-on-chip assembly.
pub mod soc;

pub use crate::config::MachineConfig;
pub use crate::core::Hart;
pub use crate::cosim::CosimState;
pub use crate::soc::{Machine, MachineBuilder};
