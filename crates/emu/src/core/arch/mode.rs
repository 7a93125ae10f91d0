//! Privilege modes.

use serde::{Deserialize, Serialize};

/// RISC-V privilege modes. Ordering follows the numeric encoding, so
/// `PrivilegeMode::User < PrivilegeMode::Supervisor < PrivilegeMode::Machine`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrivilegeMode {
    /// User mode (0).
    User = 0,
    /// Supervisor mode (1).
    Supervisor = 1,
    /// Machine mode (3).
    Machine = 3,
}

impl PrivilegeMode {
    /// Numeric encoding used in `mstatus.MPP` and trace output.
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Decodes an `MPP`/`SPP` field value. The hypervisor encoding (2) is not
    /// implemented and maps to user mode, matching a WARL read of a value
    /// this model never writes.
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            3 => PrivilegeMode::Machine,
            1 => PrivilegeMode::Supervisor,
            _ => PrivilegeMode::User,
        }
    }
}

impl std::fmt::Display for PrivilegeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            PrivilegeMode::User => 'U',
            PrivilegeMode::Supervisor => 'S',
            PrivilegeMode::Machine => 'M',
        };
        write!(f, "{c}")
    }
}
