//! Common types shared across the emulator.
//!
//! This module collects the small vocabulary types used by every subsystem:
//! 1. **Addresses:** `VirtAddr` and `PhysAddr` newtypes.
//! 2. **Traps:** the architectural `Trap` enum and access kinds.
//! 3. **Host errors:** configuration, loader, and snapshot error types.
//! 4. **Constants:** page geometry and instruction-encoding masks.

/// Physical and virtual address newtypes.
pub mod addr;
/// System-wide constants (pages, encodings, cause bits).
pub mod constants;
/// Architectural traps and host-level error types.
pub mod error;

pub use addr::{PhysAddr, VirtAddr};
pub use error::{LoaderError, MachineError, SnapshotError, Trap};

/// Kind of memory access being performed, used for translation and
/// permission checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    /// Instruction fetch.
    Fetch,
    /// Data load (including AMO reads and LR).
    Read,
    /// Data store (including AMO writes and SC).
    Write,
}
