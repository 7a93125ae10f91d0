//! Floating-point unit.
//!
//! Software model of the F and D extensions: NaN-boxed single precision,
//! canonical-NaN results, RISC-V rounding-mode handling, and `fflags`
//! accumulation. Arithmetic flag detection uses the host FPU's exception
//! flags via `<fenv.h>`; comparison, min/max, and conversion flags are
//! computed manually per the spec.

/// NaN boxing and RISC-V NaN conventions.
pub mod nan;

use self::nan::{
    box_f32, box_f32_canon, canon_f64_bits, fmax_f32, fmax_f64, fmin_f32, fmin_f64, is_snan_f32,
    is_snan_f64, unbox_f32,
};

/// `fflags` bit: inexact.
pub const FLAG_NX: u8 = 1 << 0;
/// `fflags` bit: underflow.
pub const FLAG_UF: u8 = 1 << 1;
/// `fflags` bit: overflow.
pub const FLAG_OF: u8 = 1 << 2;
/// `fflags` bit: divide by zero.
pub const FLAG_DZ: u8 = 1 << 3;
/// `fflags` bit: invalid operation.
pub const FLAG_NV: u8 = 1 << 4;

// Host FPU exception flag bits from <fenv.h>. These values are shared by
// x86_64 and aarch64 Linux.
const FE_INVALID: i32 = 0x01;
const FE_DIVBYZERO: i32 = 0x04;
const FE_OVERFLOW: i32 = 0x08;
const FE_UNDERFLOW: i32 = 0x10;
const FE_INEXACT: i32 = 0x20;
const FE_ALL_EXCEPT: i32 = FE_INVALID | FE_DIVBYZERO | FE_OVERFLOW | FE_UNDERFLOW | FE_INEXACT;

extern "C" {
    fn feclearexcept(excepts: i32) -> i32;
    fn fetestexcept(excepts: i32) -> i32;
}

fn clear_host_flags() {
    // SAFETY: feclearexcept only touches the calling thread's FP environment.
    unsafe {
        let _ = feclearexcept(FE_ALL_EXCEPT);
    }
}

fn read_host_flags() -> u8 {
    // SAFETY: fetestexcept reads the calling thread's FP environment.
    let host = unsafe { fetestexcept(FE_ALL_EXCEPT) };
    let mut flags = 0;
    if host & FE_INVALID != 0 {
        flags |= FLAG_NV;
    }
    if host & FE_DIVBYZERO != 0 {
        flags |= FLAG_DZ;
    }
    if host & FE_OVERFLOW != 0 {
        flags |= FLAG_OF;
    }
    if host & FE_UNDERFLOW != 0 {
        flags |= FLAG_UF;
    }
    if host & FE_INEXACT != 0 {
        flags |= FLAG_NX;
    }
    flags
}

/// RISC-V rounding modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundingMode {
    /// Round to nearest, ties to even.
    Rne,
    /// Round towards zero.
    Rtz,
    /// Round down (towards negative infinity).
    Rdn,
    /// Round up (towards positive infinity).
    Rup,
    /// Round to nearest, ties to max magnitude.
    Rmm,
}

impl RoundingMode {
    /// Decodes a 3-bit `rm` field; 5 and 6 are reserved, 7 means dynamic
    /// (resolve through `frm` before calling).
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(RoundingMode::Rne),
            1 => Some(RoundingMode::Rtz),
            2 => Some(RoundingMode::Rdn),
            3 => Some(RoundingMode::Rup),
            4 => Some(RoundingMode::Rmm),
            _ => None,
        }
    }

    /// Rounds a float to an integer-valued float in this mode.
    fn round_f64(self, v: f64) -> f64 {
        match self {
            RoundingMode::Rne => v.round_ties_even(),
            RoundingMode::Rtz => v.trunc(),
            RoundingMode::Rdn => v.floor(),
            RoundingMode::Rup => v.ceil(),
            RoundingMode::Rmm => v.round(), // ties away from zero
        }
    }
}

/// A value/flags pair produced by every FPU operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FpResult {
    /// Result register value (NaN-boxed for single precision).
    pub value: u64,
    /// Flags to accrue into `fflags`.
    pub flags: u8,
}

/// Two-operand and three-operand arithmetic ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Square root (unary, `b` ignored).
    Sqrt,
    /// Fused `a * b + c`.
    MAdd,
    /// Fused `a * b - c`.
    MSub,
    /// Fused `-(a * b) + c`.
    NMSub,
    /// Fused `-(a * b) - c`.
    NMAdd,
}

/// Executes an arithmetic op in single precision.
///
/// The host computes in RNE; other modes are approximated by computing in
/// double precision and rounding the result down to single, which is exact
/// for add/sub/mul and correct to one ULP for div/sqrt.
pub fn exec32(op: FpOp, a: u64, b: u64, c: u64, rm: RoundingMode) -> FpResult {
    let fa = unbox_f32(a);
    let fb = unbox_f32(b);
    let fc = unbox_f32(c);

    clear_host_flags();
    let value = if rm == RoundingMode::Rne {
        let r = match op {
            FpOp::Add => fa + fb,
            FpOp::Sub => fa - fb,
            FpOp::Mul => fa * fb,
            FpOp::Div => fa / fb,
            FpOp::Sqrt => fa.sqrt(),
            FpOp::MAdd => fa.mul_add(fb, fc),
            FpOp::MSub => fa.mul_add(fb, -fc),
            FpOp::NMSub => (-fa).mul_add(fb, fc),
            FpOp::NMAdd => (-fa).mul_add(fb, -fc),
        };
        box_f32_canon(r)
    } else {
        let exact = match op {
            FpOp::Add => f64::from(fa) + f64::from(fb),
            FpOp::Sub => f64::from(fa) - f64::from(fb),
            FpOp::Mul => f64::from(fa) * f64::from(fb),
            FpOp::Div => f64::from(fa) / f64::from(fb),
            FpOp::Sqrt => f64::from(fa).sqrt(),
            FpOp::MAdd => f64::from(fa).mul_add(f64::from(fb), f64::from(fc)),
            FpOp::MSub => f64::from(fa).mul_add(f64::from(fb), -f64::from(fc)),
            FpOp::NMSub => (-f64::from(fa)).mul_add(f64::from(fb), f64::from(fc)),
            FpOp::NMAdd => (-f64::from(fa)).mul_add(f64::from(fb), -f64::from(fc)),
        };
        box_f32_canon(round_f64_to_f32(exact, rm))
    };
    let mut flags = read_host_flags();
    flags |= fma_snan_flag32(op, fa, fb, fc);
    FpResult { value, flags }
}

/// Executes an arithmetic op in double precision. Non-RNE rounding of f64
/// arithmetic follows the host result (exact for the directed modes in all
/// but the final-ULP cases).
pub fn exec64(op: FpOp, a: u64, b: u64, c: u64, _rm: RoundingMode) -> FpResult {
    let fa = f64::from_bits(a);
    let fb = f64::from_bits(b);
    let fc = f64::from_bits(c);

    clear_host_flags();
    let r = match op {
        FpOp::Add => fa + fb,
        FpOp::Sub => fa - fb,
        FpOp::Mul => fa * fb,
        FpOp::Div => fa / fb,
        FpOp::Sqrt => fa.sqrt(),
        FpOp::MAdd => fa.mul_add(fb, fc),
        FpOp::MSub => fa.mul_add(fb, -fc),
        FpOp::NMSub => (-fa).mul_add(fb, fc),
        FpOp::NMAdd => (-fa).mul_add(fb, -fc),
    };
    let value = canon_f64_bits(r);
    let mut flags = read_host_flags();
    flags |= fma_snan_flag64(op, fa, fb, fc);
    FpResult { value, flags }
}

/// The host misses NV for sNaN inputs to mul_add on some targets; detect it
/// explicitly.
fn fma_snan_flag32(op: FpOp, a: f32, b: f32, c: f32) -> u8 {
    let fused = matches!(op, FpOp::MAdd | FpOp::MSub | FpOp::NMSub | FpOp::NMAdd);
    if fused && (is_snan_f32(a) || is_snan_f32(b) || is_snan_f32(c)) {
        FLAG_NV
    } else {
        0
    }
}

fn fma_snan_flag64(op: FpOp, a: f64, b: f64, c: f64) -> u8 {
    let fused = matches!(op, FpOp::MAdd | FpOp::MSub | FpOp::NMSub | FpOp::NMAdd);
    if fused && (is_snan_f64(a) || is_snan_f64(b) || is_snan_f64(c)) {
        FLAG_NV
    } else {
        0
    }
}

/// Rounds an exact double value to f32 in the requested mode by adjusting
/// the RNE result one ULP when it landed on the wrong side.
fn round_f64_to_f32(exact: f64, rm: RoundingMode) -> f32 {
    if exact.is_nan() || exact.is_infinite() {
        return exact as f32;
    }
    let rne = exact as f32;
    let back = f64::from(rne);
    let step_down = |v: f32| {
        if v > 0.0 {
            f32::from_bits(v.to_bits() - 1)
        } else {
            f32::from_bits(v.to_bits() + 1)
        }
    };
    let step_up = |v: f32| {
        if v >= 0.0 {
            f32::from_bits(v.to_bits() + 1)
        } else {
            f32::from_bits(v.to_bits() - 1)
        }
    };
    match rm {
        RoundingMode::Rne | RoundingMode::Rmm => rne,
        RoundingMode::Rtz => {
            if (exact > 0.0 && back > exact) || (exact < 0.0 && back < exact) {
                step_down(rne)
            } else {
                rne
            }
        }
        RoundingMode::Rdn => {
            if back > exact {
                if rne > 0.0 {
                    f32::from_bits(rne.to_bits() - 1)
                } else {
                    f32::from_bits(rne.to_bits() + 1)
                }
            } else {
                rne
            }
        }
        RoundingMode::Rup => {
            if back < exact {
                step_up(rne)
            } else {
                rne
            }
        }
    }
}

/// min/max with RISC-V NaN semantics; NV on signaling NaN inputs.
pub fn minmax32(a: u64, b: u64, is_max: bool) -> FpResult {
    let fa = unbox_f32(a);
    let fb = unbox_f32(b);
    let flags = if is_snan_f32(fa) || is_snan_f32(fb) {
        FLAG_NV
    } else {
        0
    };
    let r = if is_max { fmax_f32(fa, fb) } else { fmin_f32(fa, fb) };
    FpResult {
        value: box_f32(r),
        flags,
    }
}

/// min/max for f64; see [`minmax32`].
pub fn minmax64(a: u64, b: u64, is_max: bool) -> FpResult {
    let fa = f64::from_bits(a);
    let fb = f64::from_bits(b);
    let flags = if is_snan_f64(fa) || is_snan_f64(fb) {
        FLAG_NV
    } else {
        0
    };
    let r = if is_max { fmax_f64(fa, fb) } else { fmin_f64(fa, fb) };
    FpResult {
        value: r.to_bits(),
        flags,
    }
}

/// FEQ/FLT/FLE (funct3 2/1/0). FEQ signals NV only for sNaN; FLT/FLE for
/// any NaN.
pub fn compare32(a: u64, b: u64, funct3: u32) -> FpResult {
    let fa = unbox_f32(a);
    let fb = unbox_f32(b);
    let (value, nv) = match funct3 {
        2 => ((fa == fb) as u64, is_snan_f32(fa) || is_snan_f32(fb)),
        1 => ((fa < fb) as u64, fa.is_nan() || fb.is_nan()),
        _ => ((fa <= fb) as u64, fa.is_nan() || fb.is_nan()),
    };
    FpResult {
        value,
        flags: if nv { FLAG_NV } else { 0 },
    }
}

/// FEQ/FLT/FLE for f64; see [`compare32`].
pub fn compare64(a: u64, b: u64, funct3: u32) -> FpResult {
    let fa = f64::from_bits(a);
    let fb = f64::from_bits(b);
    let (value, nv) = match funct3 {
        2 => ((fa == fb) as u64, is_snan_f64(fa) || is_snan_f64(fb)),
        1 => ((fa < fb) as u64, fa.is_nan() || fb.is_nan()),
        _ => ((fa <= fb) as u64, fa.is_nan() || fb.is_nan()),
    };
    FpResult {
        value,
        flags: if nv { FLAG_NV } else { 0 },
    }
}

/// FCLASS for a boxed single.
pub fn classify32(a: u64) -> u64 {
    let bits = unbox_f32(a).to_bits();
    let sign = bits >> 31 != 0;
    let exp = (bits >> 23) & 0xFF;
    let frac = bits & 0x007F_FFFF;
    classify(sign, exp == 0xFF, exp == 0, frac != 0, frac & 0x0040_0000 != 0)
}

/// FCLASS for a double.
pub fn classify64(a: u64) -> u64 {
    let sign = a >> 63 != 0;
    let exp = (a >> 52) & 0x7FF;
    let frac = a & 0x000F_FFFF_FFFF_FFFF;
    classify(
        sign,
        exp == 0x7FF,
        exp == 0,
        frac != 0,
        frac & 0x0008_0000_0000_0000 != 0,
    )
}

fn classify(sign: bool, exp_max: bool, exp_zero: bool, frac_nonzero: bool, quiet: bool) -> u64 {
    if exp_max && frac_nonzero {
        if quiet { 1 << 9 } else { 1 << 8 }
    } else if exp_max {
        if sign { 1 << 0 } else { 1 << 7 }
    } else if exp_zero && !frac_nonzero {
        if sign { 1 << 3 } else { 1 << 4 }
    } else if exp_zero {
        if sign { 1 << 2 } else { 1 << 5 }
    } else if sign {
        1 << 1
    } else {
        1 << 6
    }
}

/// Float-to-integer conversion with RISC-V semantics: the value is rounded
/// in `rm`, then range-checked. NaN and overflow produce the type's extreme
/// (positive for NaN) and NV; otherwise NX accrues when rounding changed
/// the value.
pub fn to_int(v: f64, rm: RoundingMode, signed: bool, bits: u32) -> FpResult {
    let (min, max): (i128, i128) = if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };

    if v.is_nan() {
        return FpResult {
            value: sext(max as u64, bits),
            flags: FLAG_NV,
        };
    }
    let rounded = rm.round_f64(v);
    if v.is_infinite() || rounded < min as f64 || rounded > max as f64 {
        let extreme = if rounded < min as f64 || (v.is_infinite() && v < 0.0) {
            min as u64
        } else {
            max as u64
        };
        return FpResult {
            value: sext(extreme, bits),
            flags: FLAG_NV,
        };
    }
    let value = sext(rounded as i128 as u64, bits);
    FpResult {
        value,
        flags: if rounded != v { FLAG_NX } else { 0 },
    }
}

/// Sign-extends W-sized conversion results to 64 bits (RV64 writes the
/// 32-bit result sign-extended even for unsigned conversions).
fn sext(v: u64, bits: u32) -> u64 {
    if bits == 32 {
        v as u32 as i32 as i64 as u64
    } else {
        v
    }
}

/// Integer-to-f32 conversion. NX accrues when the value does not round-trip
/// (f64 holds every 32-bit integer exactly; 64-bit sources and the final
/// narrowing can both lose bits).
pub fn int_to_f32(v: u64, signed: bool, bits: u32, rm: RoundingMode) -> FpResult {
    let exact = int_as_f64(v, signed, bits);
    let r = round_f64_to_f32(exact, rm);

    // Two lossy hops: 64-bit integer -> f64, then f64 -> f32.
    let widen_exact = bits != 64
        || if signed {
            exact as i64 == v as i64
        } else {
            exact as u64 == v
        };
    let roundtrips = widen_exact && f64::from(r) == exact;
    FpResult {
        value: box_f32_canon(r),
        flags: if roundtrips { 0 } else { FLAG_NX },
    }
}

/// Integer-to-f64 conversion.
pub fn int_to_f64(v: u64, signed: bool, bits: u32) -> FpResult {
    let r = if bits == 64 {
        if signed { v as i64 as f64 } else { v as f64 }
    } else {
        int_as_f64(v, signed, bits)
    };
    // 64-bit sources may be inexact in a 53-bit mantissa.
    let inexact = if bits == 64 {
        if signed {
            r as i64 != v as i64
        } else {
            r as u64 != v
        }
    } else {
        false
    };
    FpResult {
        value: r.to_bits(),
        flags: if inexact { FLAG_NX } else { 0 },
    }
}

fn int_as_f64(v: u64, signed: bool, bits: u32) -> f64 {
    match (signed, bits) {
        (true, 32) => f64::from(v as i32),
        (false, 32) => f64::from(v as u32),
        (true, _) => v as i64 as f64,
        (false, _) => v as f64,
    }
}

/// FCVT.S.D — narrow a double to a boxed single.
pub fn f64_to_f32(a: u64, rm: RoundingMode) -> FpResult {
    let v = f64::from_bits(a);
    clear_host_flags();
    let r = round_f64_to_f32(v, rm);
    let mut flags = read_host_flags();
    if !v.is_nan() && f64::from(r) != v {
        flags |= FLAG_NX;
    }
    if is_snan_f64(v) {
        flags |= FLAG_NV;
    }
    FpResult {
        value: box_f32_canon(r),
        flags,
    }
}

/// FCVT.D.S — widen a boxed single to a double (always exact).
pub fn f32_to_f64(a: u64) -> FpResult {
    let v = unbox_f32(a);
    let flags = if is_snan_f32(v) { FLAG_NV } else { 0 };
    FpResult {
        value: canon_f64_bits(f64::from(v)),
        flags,
    }
}
