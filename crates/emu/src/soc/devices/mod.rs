//! Bus-attached devices: CLINT, PLIC, HTIF, and the SiFive UART.
//!
//! Virtio, block, and network devices are external collaborators; the
//! machine only reserves their windows and interrupt lanes.

/// Core-local interruptor (mtimecmp, MSIP).
pub mod clint;
/// Host-target interface console/shutdown bridge.
pub mod htif;
/// Platform-level interrupt controller.
pub mod plic;
/// SiFive-style UART.
pub mod uart;

pub use clint::Clint;
pub use htif::Htif;
pub use plic::Plic;
pub use uart::Uart;
