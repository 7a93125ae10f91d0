//! Encoding-level tests: compressed expansion properties and disassembly.

pub mod rvc_expand;
