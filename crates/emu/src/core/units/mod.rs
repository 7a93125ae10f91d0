//! Hardware units consulted by the interpreter: MMU (TLBs, walker, PMP)
//! and the floating-point unit.

/// Floating-point unit.
pub mod fpu;
/// Memory management unit.
pub mod mmu;
