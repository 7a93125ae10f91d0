//! System-on-chip: memory map, devices, machine assembly, and snapshots.

/// Device-boundary traits (MMIO, character, IRQ lanes).
pub mod device;
/// Bus-attached devices.
pub mod devices;
/// Machine assembly and stepping glue.
pub mod machine;
/// The physical memory map.
pub mod memmap;
/// Snapshot save/restore.
pub mod snapshot;

pub use machine::{Machine, MachineBuilder};
pub use memmap::PhysMemMap;
