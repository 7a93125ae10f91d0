//! C ABI for the co-simulation oracle.
//!
//! Thin `extern "C"` shims over [`rvcosim_core::CosimState`], built as a
//! cdylib/staticlib for the DUT harness to link against. All logic lives
//! in the core crate; this layer only translates argv and pointers.
//!
//! ```c
//! typedef struct cosim_state cosim_state_t;
//!
//! cosim_state_t *cosim_init(int argc, char *argv[]);
//! int  cosim_step(cosim_state_t *, int hartid,
//!                 uint64_t dut_pc, uint32_t dut_insn, uint64_t dut_wdata,
//!                 int ghr_ena, uint64_t ghr0, uint64_t ghr1,
//!                 uint64_t mstatus, bool check);
//! void cosim_raise_trap(cosim_state_t *, int hartid, int64_t cause);
//! void cosim_shutdown(cosim_state_t *);
//! ```
//!
//! Return codes from `cosim_step`: 0 continue, 1 success-terminate,
//! 0x1FFF mismatch, negative fatal.

use libc::{c_char, c_int};
use rvcosim_core::cosim::{CosimState, DutHistory, EXIT_FATAL};
use std::ffi::CStr;

/// Creates the golden model from harness argv (the element at index 0 is
/// the program name and is skipped). Returns null on configuration
/// failure.
///
/// # Safety
///
/// `argv` must point to `argc` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn cosim_init(argc: c_int, argv: *const *const c_char) -> *mut CosimState {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let mut args = Vec::new();
    for i in 1..argc.max(0) {
        let ptr = *argv.offset(i as isize);
        if ptr.is_null() {
            break;
        }
        args.push(CStr::from_ptr(ptr).to_string_lossy().into_owned());
    }

    match CosimState::init(&args) {
        Ok(state) => Box::into_raw(Box::new(state)),
        Err(err) => {
            eprintln!("cosim_init: {err}");
            std::ptr::null_mut()
        }
    }
}

/// Advances the model by one DUT retirement and compares; see the core
/// oracle for semantics. `mstatus` is accepted for interface stability and
/// is not consulted.
///
/// # Safety
///
/// `state` must be a live pointer from [`cosim_init`].
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn cosim_step(
    state: *mut CosimState,
    hartid: c_int,
    dut_pc: u64,
    dut_insn: u32,
    dut_wdata: u64,
    dut_ghr_ena: c_int,
    dut_ghr0: u64,
    dut_ghr1: u64,
    mstatus: u64,
    check: bool,
) -> c_int {
    let Some(state) = state.as_mut() else {
        return EXIT_FATAL;
    };
    let _ = mstatus;
    let ghr = (dut_ghr_ena != 0).then_some(DutHistory {
        lo: dut_ghr0,
        hi: dut_ghr1,
    });
    state.step(hartid as usize, dut_pc, dut_insn, dut_wdata, ghr, check)
}

/// Queues a DUT-raised trap: `cause < 0` is an asynchronous interrupt,
/// otherwise a synchronous exception.
///
/// # Safety
///
/// `state` must be a live pointer from [`cosim_init`].
#[no_mangle]
pub unsafe extern "C" fn cosim_raise_trap(state: *mut CosimState, hartid: c_int, cause: i64) {
    if let Some(state) = state.as_mut() {
        state.raise_trap(hartid as usize, cause);
    }
}

/// Destroys the model. Passing null is a no-op.
///
/// # Safety
///
/// `state` must be null or a live pointer from [`cosim_init`]; it is
/// consumed.
#[no_mangle]
pub unsafe extern "C" fn cosim_shutdown(state: *mut CosimState) {
    if !state.is_null() {
        drop(Box::from_raw(state));
    }
}
