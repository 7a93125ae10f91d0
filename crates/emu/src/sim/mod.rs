//! Simulation front end: boot-image loading and the trace harness.

/// ELF and raw-image loading.
pub mod loader;
/// Commit-record formatting and the single-step harness.
pub mod trace;
