//! Trap and host-level error definitions.
//!
//! Two unrelated failure families live here and deliberately share nothing:
//! 1. **`Trap`** — architectural exceptions and interrupts. These are values,
//!    not errors in the host sense: memory helpers return `Result<T, Trap>`
//!    and the dispatcher routes the `Err` arm into trap delivery.
//! 2. **Host errors** — configuration, loader, and snapshot failures. These
//!    are fatal at machine construction and carry human-readable context.

use std::fmt;

/// RISC-V trap causes: synchronous exceptions and asynchronous interrupts.
///
/// The associated value of each exception variant is the architectural
/// `tval` for that cause (faulting address, or the instruction bits for
/// illegal instruction).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    /// Instruction fetch from a misaligned PC. Payload: the misaligned address.
    InstructionAddressMisaligned(u64),
    /// Instruction fetch denied by PMP or targeting unmapped memory.
    InstructionAccessFault(u64),
    /// Invalid or unimplemented instruction encoding. Payload: the raw bits.
    IllegalInstruction(u32),
    /// EBREAK or hardware breakpoint. Payload: the program counter.
    Breakpoint(u64),
    /// Misaligned data load. Payload: the effective address.
    LoadAddressMisaligned(u64),
    /// Load denied by PMP, unmapped, or unsupported by a device.
    LoadAccessFault(u64),
    /// Misaligned data store or AMO. Payload: the effective address.
    StoreAddressMisaligned(u64),
    /// Store/AMO denied by PMP, unmapped, or unsupported by a device.
    StoreAccessFault(u64),
    /// ECALL from user mode.
    EnvironmentCallFromUMode,
    /// ECALL from supervisor mode.
    EnvironmentCallFromSMode,
    /// ECALL from machine mode.
    EnvironmentCallFromMMode,
    /// Instruction fetch page fault. Payload: the faulting virtual address.
    InstructionPageFault(u64),
    /// Load page fault. Payload: the faulting virtual address.
    LoadPageFault(u64),
    /// Store/AMO page fault. Payload: the faulting virtual address.
    StorePageFault(u64),

    /// User software interrupt.
    UserSoftwareInterrupt,
    /// Supervisor software interrupt.
    SupervisorSoftwareInterrupt,
    /// Machine software interrupt.
    MachineSoftwareInterrupt,
    /// User timer interrupt.
    UserTimerInterrupt,
    /// Supervisor timer interrupt.
    SupervisorTimerInterrupt,
    /// Machine timer interrupt.
    MachineTimerInterrupt,
    /// User external interrupt.
    UserExternalInterrupt,
    /// Supervisor external interrupt.
    SupervisorExternalInterrupt,
    /// Machine external interrupt.
    MachineExternalInterrupt,
}

impl Trap {
    /// Returns `(is_interrupt, cause_code)` for this trap.
    pub fn cause(&self) -> (bool, u64) {
        use crate::isa::cause::{exception, interrupt};
        match self {
            Trap::InstructionAddressMisaligned(_) => (false, exception::INSN_ADDRESS_MISALIGNED),
            Trap::InstructionAccessFault(_) => (false, exception::INSN_ACCESS_FAULT),
            Trap::IllegalInstruction(_) => (false, exception::ILLEGAL_INSTRUCTION),
            Trap::Breakpoint(_) => (false, exception::BREAKPOINT),
            Trap::LoadAddressMisaligned(_) => (false, exception::LOAD_ADDRESS_MISALIGNED),
            Trap::LoadAccessFault(_) => (false, exception::LOAD_ACCESS_FAULT),
            Trap::StoreAddressMisaligned(_) => (false, exception::STORE_ADDRESS_MISALIGNED),
            Trap::StoreAccessFault(_) => (false, exception::STORE_ACCESS_FAULT),
            Trap::EnvironmentCallFromUMode => (false, exception::ECALL_FROM_U),
            Trap::EnvironmentCallFromSMode => (false, exception::ECALL_FROM_S),
            Trap::EnvironmentCallFromMMode => (false, exception::ECALL_FROM_M),
            Trap::InstructionPageFault(_) => (false, exception::INSN_PAGE_FAULT),
            Trap::LoadPageFault(_) => (false, exception::LOAD_PAGE_FAULT),
            Trap::StorePageFault(_) => (false, exception::STORE_PAGE_FAULT),
            Trap::UserSoftwareInterrupt => (true, interrupt::USER_SOFTWARE),
            Trap::SupervisorSoftwareInterrupt => (true, interrupt::SUPERVISOR_SOFTWARE),
            Trap::MachineSoftwareInterrupt => (true, interrupt::MACHINE_SOFTWARE),
            Trap::UserTimerInterrupt => (true, interrupt::USER_TIMER),
            Trap::SupervisorTimerInterrupt => (true, interrupt::SUPERVISOR_TIMER),
            Trap::MachineTimerInterrupt => (true, interrupt::MACHINE_TIMER),
            Trap::UserExternalInterrupt => (true, interrupt::USER_EXTERNAL),
            Trap::SupervisorExternalInterrupt => (true, interrupt::SUPERVISOR_EXTERNAL),
            Trap::MachineExternalInterrupt => (true, interrupt::MACHINE_EXTERNAL),
        }
    }

    /// Architectural `tval` written on delivery of this trap.
    pub fn tval(&self) -> u64 {
        match self {
            Trap::InstructionAddressMisaligned(a)
            | Trap::InstructionAccessFault(a)
            | Trap::Breakpoint(a)
            | Trap::LoadAddressMisaligned(a)
            | Trap::LoadAccessFault(a)
            | Trap::StoreAddressMisaligned(a)
            | Trap::StoreAccessFault(a)
            | Trap::InstructionPageFault(a)
            | Trap::LoadPageFault(a)
            | Trap::StorePageFault(a) => *a,
            Trap::IllegalInstruction(insn) => u64::from(*insn),
            _ => 0,
        }
    }

    /// Builds the interrupt trap corresponding to a `mip`/`mie` bit position.
    ///
    /// Returns `None` for bit positions without a standard interrupt.
    pub fn from_interrupt_bit(bit: u64) -> Option<Self> {
        use crate::isa::cause::interrupt;
        match bit {
            interrupt::USER_SOFTWARE => Some(Trap::UserSoftwareInterrupt),
            interrupt::SUPERVISOR_SOFTWARE => Some(Trap::SupervisorSoftwareInterrupt),
            interrupt::MACHINE_SOFTWARE => Some(Trap::MachineSoftwareInterrupt),
            interrupt::USER_TIMER => Some(Trap::UserTimerInterrupt),
            interrupt::SUPERVISOR_TIMER => Some(Trap::SupervisorTimerInterrupt),
            interrupt::MACHINE_TIMER => Some(Trap::MachineTimerInterrupt),
            interrupt::USER_EXTERNAL => Some(Trap::UserExternalInterrupt),
            interrupt::SUPERVISOR_EXTERNAL => Some(Trap::SupervisorExternalInterrupt),
            interrupt::MACHINE_EXTERNAL => Some(Trap::MachineExternalInterrupt),
            _ => None,
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::InstructionAddressMisaligned(a) => {
                write!(f, "InstructionAddressMisaligned({a:#x})")
            }
            Trap::InstructionAccessFault(a) => write!(f, "InstructionAccessFault({a:#x})"),
            Trap::IllegalInstruction(i) => write!(f, "IllegalInstruction({i:#010x})"),
            Trap::Breakpoint(pc) => write!(f, "Breakpoint({pc:#x})"),
            Trap::LoadAddressMisaligned(a) => write!(f, "LoadAddressMisaligned({a:#x})"),
            Trap::LoadAccessFault(a) => write!(f, "LoadAccessFault({a:#x})"),
            Trap::StoreAddressMisaligned(a) => write!(f, "StoreAddressMisaligned({a:#x})"),
            Trap::StoreAccessFault(a) => write!(f, "StoreAccessFault({a:#x})"),
            Trap::EnvironmentCallFromUMode => write!(f, "EnvironmentCallFromUMode"),
            Trap::EnvironmentCallFromSMode => write!(f, "EnvironmentCallFromSMode"),
            Trap::EnvironmentCallFromMMode => write!(f, "EnvironmentCallFromMMode"),
            Trap::InstructionPageFault(a) => write!(f, "InstructionPageFault({a:#x})"),
            Trap::LoadPageFault(a) => write!(f, "LoadPageFault({a:#x})"),
            Trap::StorePageFault(a) => write!(f, "StorePageFault({a:#x})"),
            Trap::UserSoftwareInterrupt => write!(f, "UserSoftwareInterrupt"),
            Trap::SupervisorSoftwareInterrupt => write!(f, "SupervisorSoftwareInterrupt"),
            Trap::MachineSoftwareInterrupt => write!(f, "MachineSoftwareInterrupt"),
            Trap::UserTimerInterrupt => write!(f, "UserTimerInterrupt"),
            Trap::SupervisorTimerInterrupt => write!(f, "SupervisorTimerInterrupt"),
            Trap::MachineTimerInterrupt => write!(f, "MachineTimerInterrupt"),
            Trap::UserExternalInterrupt => write!(f, "UserExternalInterrupt"),
            Trap::SupervisorExternalInterrupt => write!(f, "SupervisorExternalInterrupt"),
            Trap::MachineExternalInterrupt => write!(f, "MachineExternalInterrupt"),
        }
    }
}

impl std::error::Error for Trap {}

/// Fatal machine-construction and configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    /// The config file could not be read.
    #[error("config: cannot read {path}: {source}")]
    ConfigRead {
        /// Path the loader attempted to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid JSON or has unknown/ill-typed keys.
    #[error("config: {path}: {source}")]
    ConfigParse {
        /// Path of the offending file.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// Neither a BIOS nor a kernel image was supplied.
    #[error("machine init: no bios or kernel image configured")]
    NoBootImage,
    /// A memory range in the config overlaps an architected device window.
    #[error("memory map: range {base:#x}+{size:#x} overlaps an existing range")]
    RangeOverlap {
        /// Base of the rejected range.
        base: u64,
        /// Size of the rejected range.
        size: u64,
    },
    /// Harness argv could not be parsed.
    #[error("args: {0}")]
    Args(String),
    /// The requested hart count exceeds the supported maximum.
    #[error("machine init: {requested} harts requested, maximum is {max}")]
    TooManyHarts {
        /// Hart count from the config.
        requested: usize,
        /// Compiled-in ceiling.
        max: usize,
    },
    /// An image or snapshot failed to load.
    #[error(transparent)]
    Loader(#[from] LoaderError),
    /// Snapshot restore failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Boot-image loading errors.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The image file could not be read.
    #[error("loader: cannot read {path}: {source}")]
    Read {
        /// Path the loader attempted to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The ELF container is malformed.
    #[error("loader: {path}: malformed ELF: {source}")]
    Elf {
        /// Path of the offending file.
        path: String,
        /// Underlying object-parse error.
        #[source]
        source: object::Error,
    },
    /// A loadable segment falls outside registered RAM.
    #[error("loader: segment {addr:#x}+{size:#x} does not fit in RAM")]
    SegmentOutOfRange {
        /// Segment physical address.
        addr: u64,
        /// Segment size in bytes.
        size: u64,
    },
    /// The image entry point is not the RAM base the boot ROM jumps to.
    #[error("loader: entry point {entry:#x} != RAM base {ram_base:#x}")]
    BadEntryPoint {
        /// Entry point from the ELF header.
        entry: u64,
        /// RAM base the reset ROM targets.
        ram_base: u64,
    },
    /// The image is larger than the configured RAM.
    #[error("loader: image of {size} bytes exceeds RAM of {ram_size} bytes")]
    ImageTooBig {
        /// Image size in bytes.
        size: usize,
        /// Configured RAM size in bytes.
        ram_size: usize,
    },
}

/// Snapshot serialization and restore errors.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Snapshot file I/O failed.
    #[error("snapshot: {path}: {source}")]
    Io {
        /// Snapshot path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The header is not valid JSON or fails to deserialize.
    #[error("snapshot: {path}: bad header: {source}")]
    Header {
        /// Snapshot path.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The snapshot was produced by an incompatible version.
    #[error("snapshot: version {found} unsupported (expected {expected})")]
    Version {
        /// Version found in the header.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },
    /// The snapshot geometry does not match this machine.
    #[error("snapshot: {what} mismatch: snapshot has {found:#x}, machine has {expected:#x}")]
    Geometry {
        /// Which field disagreed (RAM base, RAM size, hart count).
        what: &'static str,
        /// Value found in the snapshot.
        found: u64,
        /// Value this machine was built with.
        expected: u64,
    },
    /// The RAM dump is shorter than the header promised.
    #[error("snapshot: truncated RAM dump: {got} of {want} bytes")]
    Truncated {
        /// Bytes actually present.
        got: usize,
        /// Bytes the header promised.
        want: usize,
    },
}
