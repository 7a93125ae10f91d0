//! Snapshot save and restore.
//!
//! The format is framed, not wire-stable: a little-endian u32 header
//! length, a serde_json header (geometry, per-hart architectural state,
//! device state), then the dense RAM dumps in the order the header lists
//! them. TLB contents are caches and are not serialized; a restored
//! machine re-walks on first touch with identical architectural results.

use crate::common::SnapshotError;
use crate::core::arch::csr::Csrs;
use crate::core::arch::{FpRegisterFile, PrivilegeMode, RegisterFile};
use crate::core::units::mmu::pmp::Pmp;
use crate::soc::machine::Machine;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// Format version written by this build.
const SNAPSHOT_VERSION: u32 = 3;
const MAGIC: &str = "rvcosim-snapshot";

/// Architectural state of one hart.
#[derive(Serialize, Deserialize)]
struct HartSnapshot {
    pc: u64,
    privilege: PrivilegeMode,
    regs: RegisterFile,
    fregs: FpRegisterFile,
    csrs: Csrs,
    pmp: Pmp,
    insn_counter: u64,
    minstret: u64,
    load_res: Option<u64>,
    power_down: bool,
}

/// Interrupt-fabric and HTIF state.
#[derive(Serialize, Deserialize)]
struct DeviceSnapshot {
    mtimecmp: Vec<u64>,
    msip: Vec<u32>,
    plic_pending: u32,
    plic_served: u32,
    htif_tohost: u64,
    htif_fromhost: u64,
}

#[derive(Serialize, Deserialize)]
struct Header {
    magic: String,
    version: u32,
    ram_base: u64,
    ram_size: u64,
    /// `(base, size)` of each RAM dump that follows, in file order.
    ram_ranges: Vec<(u64, u64)>,
    harts: Vec<HartSnapshot>,
    devices: DeviceSnapshot,
}

fn io_err(path: &Path, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Serializes `machine` to `path`.
pub fn save(machine: &mut Machine, path: &Path) -> Result<(), SnapshotError> {
    let harts = machine
        .harts
        .iter()
        .map(|h| HartSnapshot {
            pc: h.pc,
            privilege: h.privilege,
            regs: h.regs.clone(),
            fregs: h.fregs.clone(),
            csrs: h.csrs.clone(),
            pmp: h.pmp.clone(),
            insn_counter: h.insn_counter,
            minstret: h.minstret,
            load_res: h.load_res,
            power_down: h.power_down,
        })
        .collect();

    let (mtimecmp, msip) = machine
        .mem
        .clint_mut()
        .map(|c| c.state())
        .unwrap_or_default();
    let (plic_pending, plic_served) = machine
        .mem
        .plic_mut()
        .map(|p| p.state())
        .unwrap_or_default();
    let (htif_tohost, htif_fromhost) = machine
        .mem
        .htif_mut()
        .map(|h| h.state())
        .unwrap_or_default();

    let ram_ranges: Vec<(u64, u64)> = machine
        .mem
        .ram_ranges()
        .map(|(base, data)| (base, data.len() as u64))
        .collect();

    let header = Header {
        magic: MAGIC.to_string(),
        version: SNAPSHOT_VERSION,
        ram_base: machine.ram_base(),
        ram_size: machine.ram_size(),
        ram_ranges,
        harts,
        devices: DeviceSnapshot {
            mtimecmp,
            msip,
            plic_pending,
            plic_served,
            htif_tohost,
            htif_fromhost,
        },
    };

    let json = serde_json::to_vec(&header).map_err(|source| SnapshotError::Header {
        path: path.display().to_string(),
        source,
    })?;

    let mut file = std::fs::File::create(path).map_err(|e| io_err(path, e))?;
    file.write_all(&(json.len() as u32).to_le_bytes())
        .map_err(|e| io_err(path, e))?;
    file.write_all(&json).map_err(|e| io_err(path, e))?;
    for (_, data) in machine.mem.ram_ranges() {
        file.write_all(data).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

/// Restores `machine` from `path`. The machine must already be built with
/// matching geometry; mismatches fail the load and leave the caller to
/// drop the half-restored machine.
pub fn load(machine: &mut Machine, path: &Path) -> Result<(), SnapshotError> {
    let mut file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes).map_err(|e| io_err(path, e))?;
    let mut json = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
    file.read_exact(&mut json).map_err(|e| io_err(path, e))?;

    let header: Header =
        serde_json::from_slice(&json).map_err(|source| SnapshotError::Header {
            path: path.display().to_string(),
            source,
        })?;

    if header.magic != MAGIC || header.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Version {
            found: header.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    if header.ram_base != machine.ram_base() {
        return Err(SnapshotError::Geometry {
            what: "RAM base",
            found: header.ram_base,
            expected: machine.ram_base(),
        });
    }
    if header.ram_size != machine.ram_size() {
        return Err(SnapshotError::Geometry {
            what: "RAM size",
            found: header.ram_size,
            expected: machine.ram_size(),
        });
    }
    if header.harts.len() != machine.harts.len() {
        return Err(SnapshotError::Geometry {
            what: "hart count",
            found: header.harts.len() as u64,
            expected: machine.harts.len() as u64,
        });
    }

    for (hart, snap) in machine.harts.iter_mut().zip(header.harts) {
        hart.pc = snap.pc;
        hart.privilege = snap.privilege;
        hart.regs = snap.regs;
        hart.fregs = snap.fregs;
        hart.csrs = snap.csrs;
        hart.pmp = snap.pmp;
        hart.insn_counter = snap.insn_counter;
        hart.minstret = snap.minstret;
        hart.load_res = snap.load_res;
        hart.power_down = snap.power_down;
        hart.mmu.flush_all();
        hart.store_repair = None;
    }

    let dev = header.devices;
    if let Some(clint) = machine.mem.clint_mut() {
        clint.restore(dev.mtimecmp, dev.msip);
    }
    if let Some(plic) = machine.mem.plic_mut() {
        plic.restore(dev.plic_pending, dev.plic_served);
    }
    if let Some(htif) = machine.mem.htif_mut() {
        htif.restore(dev.htif_tohost, dev.htif_fromhost);
    }

    for (base, size) in header.ram_ranges {
        let mut data = vec![0u8; size as usize];
        file.read_exact(&mut data).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SnapshotError::Truncated {
                    got: 0,
                    want: size as usize,
                }
            } else {
                io_err(path, e)
            }
        })?;
        machine.mem.restore_ram(base, &data).map_err(|()| {
            SnapshotError::Geometry {
                what: "RAM range",
                found: base,
                expected: machine.ram_base(),
            }
        })?;
    }
    Ok(())
}
