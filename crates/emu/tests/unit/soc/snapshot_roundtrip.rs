//! Snapshot round-trips: saved state resumes with identical behavior.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;
use rvcosim_core::soc::snapshot;

/// A counting loop: addi; addi; jal back.
fn counting_program() -> Vec<u32> {
    vec![
        common::addi(5, 5, 1),
        common::addi(6, 6, 3),
        common::jal(0, -8),
    ]
}

/// Save at step k, restore into a fresh machine, and require the next k'
/// steps to retire the same pc/minstret stream and end in the same state.
#[test]
fn snapshot_resumes_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.snap");

    let mut machine = common::small_machine();
    common::load_program(&mut machine, RAM_BASE, &counting_program());
    let _ = machine.step(17);
    snapshot::save(&mut machine, &path).unwrap();

    let mut resumed = common::small_machine();
    snapshot::load(&mut resumed, &path).unwrap();

    assert_eq!(resumed.harts[0].pc, machine.harts[0].pc);
    assert_eq!(resumed.harts[0].minstret, machine.harts[0].minstret);

    let mut trace_a = Vec::new();
    let mut trace_b = Vec::new();
    for _ in 0..23 {
        let _ = machine.step(1);
        trace_a.push((machine.harts[0].pc, machine.harts[0].minstret));
        let _ = resumed.step(1);
        trace_b.push((resumed.harts[0].pc, resumed.harts[0].minstret));
    }
    assert_eq!(trace_a, trace_b);
    assert_eq!(
        resumed.harts[0].regs.read(5),
        machine.harts[0].regs.read(5)
    );
    assert_eq!(
        resumed.harts[0].regs.read(6),
        machine.harts[0].regs.read(6)
    );
}

/// RAM contents survive the round trip.
#[test]
fn snapshot_preserves_ram() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ram.snap");

    let mut machine = common::small_machine();
    machine
        .mem
        .write_ram(RAM_BASE + 0x1234, b"snapshot payload")
        .unwrap();
    snapshot::save(&mut machine, &path).unwrap();

    let mut resumed = common::small_machine();
    snapshot::load(&mut resumed, &path).unwrap();
    let mut buf = [0u8; 16];
    resumed.mem.read_ram(RAM_BASE + 0x1234, &mut buf).unwrap();
    assert_eq!(&buf, b"snapshot payload");
}

/// Geometry mismatches are rejected, not silently truncated.
#[test]
fn snapshot_geometry_mismatch_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geom.snap");

    let mut machine = common::small_machine();
    snapshot::save(&mut machine, &path).unwrap();

    let mut other = common::machine_with(|cfg| cfg.memory_size = 8);
    let err = snapshot::load(&mut other, &path).unwrap_err();
    assert!(err.to_string().contains("RAM size"));
}

/// Truncated dumps are detected.
#[test]
fn snapshot_truncation_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trunc.snap");

    let mut machine = common::small_machine();
    snapshot::save(&mut machine, &path).unwrap();

    let data = std::fs::read(&path).unwrap();
    std::fs::write(&path, &data[..data.len() - 4096]).unwrap();

    let mut resumed = common::small_machine();
    assert!(snapshot::load(&mut resumed, &path).is_err());
}
