//! Machine configuration.
//!
//! A JSON config file supplies the boot images and memory geometry; the CLI
//! folds its flag overrides in afterwards. Unknown keys are rejected so a
//! typo fails loudly at init instead of silently running a default machine.

use crate::common::MachineError;
use crate::core::cpu::csr::VALIDATION_EVENTS;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Architected memory-map defaults. All of them are overridable through the
/// config where a matching key exists.
pub mod map {
    /// Main RAM base.
    pub const RAM_BASE: u64 = 0x8000_0000;
    /// Reset vector / boot-ROM base.
    pub const ROM_BASE: u64 = 0x0000_1000;
    /// Boot-ROM size.
    pub const ROM_SIZE: u64 = 0x1000;
    /// CLINT window.
    pub const CLINT_BASE: u64 = 0x0200_0000;
    /// CLINT window size.
    pub const CLINT_SIZE: u64 = 0x000C_0000;
    /// PLIC window.
    pub const PLIC_BASE: u64 = 0x4010_0000;
    /// PLIC window size.
    pub const PLIC_SIZE: u64 = 0x0040_0000;
    /// HTIF tohost/fromhost window.
    pub const HTIF_BASE: u64 = 0x4000_8000;
    /// HTIF window size (tohost + fromhost).
    pub const HTIF_SIZE: u64 = 16;
    /// First virtio window.
    pub const VIRTIO_BASE: u64 = 0x4001_0000;
    /// Size of each virtio window.
    pub const VIRTIO_SIZE: u64 = 0x1000;
    /// SiFive UART window.
    pub const UART0_BASE: u64 = 0x5400_0000;
    /// SiFive UART window size.
    pub const UART0_SIZE: u64 = 32;
    /// PLIC source of the SiFive UART.
    pub const UART0_IRQ: u32 = 3;
    /// First PLIC source handed to virtio windows.
    pub const VIRTIO_IRQ: u32 = 1;
    /// DW-APB UART window (device model is external).
    pub const DW_UART_BASE: u64 = 0x1200_2000;
    /// DW-APB UART window size.
    pub const DW_UART_SIZE: u64 = 0x1000;
}

fn default_memory_size() -> u64 {
    256
}

fn default_memory_base() -> u64 {
    map::RAM_BASE
}

fn default_htif_base() -> u64 {
    map::HTIF_BASE
}

fn default_harts() -> usize {
    1
}

fn default_timebase_div() -> u64 {
    10
}

fn default_mmio_start() -> u64 {
    0x4000_0000
}

fn default_mmio_end() -> u64 {
    0x8000_0000
}

/// One `drive[]` entry: a block-device backend handled externally.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriveConfig {
    /// Backend file path.
    pub file: PathBuf,
}

/// One `fs[]` entry: a shared-filesystem backend handled externally.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsConfig {
    /// Mount tag exposed to the guest.
    pub tag: String,
    /// Host directory.
    pub file: PathBuf,
}

/// One `eth[]` entry: a network backend handled externally.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EthConfig {
    /// Backend driver name (e.g. "tap", "slirp").
    pub driver: String,
    /// Host interface name, when the driver needs one.
    #[serde(default)]
    pub ifname: Option<String>,
}

/// The machine configuration, deserialized from JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    /// Raw BIOS image copied to the RAM base.
    #[serde(default)]
    pub bios: Option<PathBuf>,
    /// ELF kernel image (PT_LOAD segments placed by their paddr).
    #[serde(default)]
    pub kernel: Option<PathBuf>,
    /// RAM size in MiB.
    #[serde(default = "default_memory_size")]
    pub memory_size: u64,
    /// RAM base physical address.
    #[serde(default = "default_memory_base")]
    pub memory_base_addr: u64,
    /// HTIF window base.
    #[serde(default = "default_htif_base")]
    pub htif_base_addr: u64,
    /// Kernel command line placed in the FDT window (builder is external).
    #[serde(default)]
    pub cmdline: Option<String>,
    /// Device-tree blob copied into the boot-ROM FDT window.
    #[serde(default)]
    pub dtb: Option<PathBuf>,
    /// Block-device backends.
    #[serde(default)]
    pub drive: Vec<DriveConfig>,
    /// Filesystem backends.
    #[serde(default)]
    pub fs: Vec<FsConfig>,
    /// Network backends.
    #[serde(default)]
    pub eth: Vec<EthConfig>,
    /// Hardware-acceleration request; recorded, never honored here.
    #[serde(default)]
    pub accel: bool,
    /// Validation event that ends the run when the guest reports it.
    #[serde(default)]
    pub validation_terminate_event: Option<String>,
    /// Number of harts.
    #[serde(default = "default_harts")]
    pub harts: usize,
    /// Drive `mtime` from the host clock instead of retired instructions.
    /// Must stay false for deterministic or validated runs.
    #[serde(default)]
    pub rtc_real_time: bool,
    /// Retired instructions per `mtime` tick.
    #[serde(default = "default_timebase_div")]
    pub timebase_div: u64,
    /// Start of the MMIO window the cosim oracle overrides loads from.
    #[serde(default = "default_mmio_start")]
    pub mmio_start: u64,
    /// End (exclusive) of the cosim MMIO window.
    #[serde(default = "default_mmio_end")]
    pub mmio_end: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        // An empty JSON object gives every field its default.
        serde_json::from_str("{}").expect("default config must deserialize")
    }
}

impl MachineConfig {
    /// Loads and parses a config file.
    pub fn from_file(path: &Path) -> Result<Self, MachineError> {
        let text = std::fs::read_to_string(path).map_err(|source| MachineError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| MachineError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// RAM size in bytes.
    pub fn memory_bytes(&self) -> u64 {
        self.memory_size * 1024 * 1024
    }

    /// Applies command-line overrides on top of the file config.
    pub fn apply_overrides(&mut self, ov: &CliOverrides) {
        if let Some(mib) = ov.memory_size {
            self.memory_size = mib;
        }
        if let Some(ev) = &ov.terminate_event {
            self.validation_terminate_event = Some(ev.clone());
        }
    }

    /// Resolves the configured terminate event to its CSR value.
    pub fn terminate_event_value(&self) -> Option<u64> {
        let name = self.validation_terminate_event.as_deref()?;
        validation_event_value(name)
    }
}

/// Looks up a validation event by its CLI/config name.
pub fn validation_event_value(name: &str) -> Option<u64> {
    VALIDATION_EVENTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
}

/// Names of all recognized validation events, for error messages.
pub fn validation_event_names() -> Vec<&'static str> {
    VALIDATION_EVENTS.iter().map(|(n, _)| *n).collect()
}

/// Flag overrides the CLI and the cosim init path layer over the config.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Snapshot to resume from.
    pub load: Option<PathBuf>,
    /// Snapshot to write on exit.
    pub save: Option<PathBuf>,
    /// Instruction budget; `None` is unlimited.
    pub maxinsns: Option<u64>,
    /// RAM size override in MiB.
    pub memory_size: Option<u64>,
    /// Terminate-event override.
    pub terminate_event: Option<String>,
    /// Suppress the first N trace records.
    pub trace: Option<u64>,
}
