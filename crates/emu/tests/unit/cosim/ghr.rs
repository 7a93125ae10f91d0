//! Branch-history cosim: the maxion hash and the non-CTI invariant.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;
use rvcosim_core::cosim::history::GlobalHistory;
use rvcosim_core::cosim::{CosimState, DutHistory, EXIT_CONTINUE, EXIT_MISMATCH};

/// Recomputes one hash step the long way, straight from the documented
/// bit-field recipe, as an independent check on the implementation.
fn reference_update(lo: u64, hi: u64, target: u64) -> (u64, u64) {
    let mask = |b: u32| (1u64 << b) - 1;
    let (sz0, szh) = (6u32, 3u32);
    let min = 2 * sz0 + szh + 13;

    let pc = target >> 1;
    let foldpc = (pc >> 17) ^ pc;
    let o0 = lo & mask(sz0);
    let o1 = (lo >> sz0) & mask(sz0);
    let o2 = (lo >> (2 * sz0)) & mask(szh + 1);

    let h0 = foldpc & mask(sz0);
    let h1 = o0;
    let h2 = (o1 ^ (o1 >> szh)) & mask(szh + 1);
    let h3 = (o2 ^ (o2 >> 2)) & mask(2);
    let h10 = ((lo >> 27) ^ (lo >> 26)) & 1;

    let new_hi = ((hi << 1) | (lo >> 63)) & mask(90 - 64);
    let mut new_lo = lo & !mask(min);
    new_lo = (new_lo << 1)
        | (h10 << min)
        | (((lo >> 16) & mask(10)) << (2 * sz0 + szh + 3))
        | (h3 << (2 * sz0 + szh + 1))
        | (h2 << (2 * sz0))
        | (h1 << sz0)
        | h0;
    (new_lo, new_hi)
}

#[test]
fn hash_matches_reference_vectors() {
    let vectors = [
        (0u64, 0u64, 0x8000_0080u64),
        (0xDEAD_BEEF_0123_4567, 0x00AB_CDEF, 0x8000_1234),
        (u64::MAX, (1 << 26) - 1, 0xFFFF_FFFE),
        (0x8000_0000_0000_0000, 0, 0x2000),
    ];
    for (lo, hi, target) in vectors {
        let mut ghr = GlobalHistory { lo, hi };
        ghr.update(target);
        let (want_lo, want_hi) = reference_update(lo, hi, target);
        assert_eq!((ghr.lo, ghr.hi), (want_lo, want_hi), "target {target:#x}");
    }
}

proptest::proptest! {
    /// The history never exceeds 90 bits, whatever is folded in.
    #[test]
    fn history_stays_within_90_bits(lo: u64, hi in 0u64..(1 << 26), target: u64) {
        let mut ghr = GlobalHistory { lo, hi };
        ghr.update(target & !1);
        proptest::prop_assert!(ghr.hi < (1 << 26));
    }
}

/// Non-CTI retirements leave the history untouched; a taken jump folds the
/// target in, observable on the following step.
#[test]
fn only_ctis_advance_the_history() {
    let mut machine = common::small_machine();
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::NOP,
            common::jal(0, 8), // CTI to RAM+12
            common::NOP,       // skipped
            common::NOP,       // jump target
            common::NOP,
        ],
    );
    machine.harts[0].regs.sync_prior();
    let mut state = CosimState::from_machine(machine);
    state.set_diag_sink(Box::new(common::CaptureSink::default()));

    let zero = DutHistory { lo: 0, hi: 0 };

    // NOP retires: history still zero.
    assert_eq!(
        state.step(0, RAM_BASE, common::NOP, 0, Some(zero), true),
        EXIT_CONTINUE
    );
    // The jump retires: compared against the pre-update (still zero)
    // history, then folded in.
    assert_eq!(
        state.step(0, RAM_BASE + 4, common::jal(0, 8), RAM_BASE + 12, Some(zero), true),
        EXIT_CONTINUE
    );

    // Next retirement must present the updated history.
    let mut expected = GlobalHistory::default();
    expected.update(RAM_BASE + 12);
    let dut = DutHistory {
        lo: expected.lo,
        hi: expected.hi,
    };
    assert_eq!(
        state.step(0, RAM_BASE + 12, common::NOP, 0, Some(dut), true),
        EXIT_CONTINUE
    );

    // A stale history now diverges.
    assert_eq!(
        state.step(0, RAM_BASE + 16, common::NOP, 0, Some(zero), true),
        EXIT_MISMATCH
    );
}
