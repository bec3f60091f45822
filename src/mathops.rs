// mathops.rs - Integer helpers shared by the range coder, allocator and stereo stages

/// Number of bits needed to represent `v` (0 for 0).
#[inline]
pub fn ilog(v: u32) -> i32 {
    (32 - v.leading_zeros()) as i32
}

/// Base-2 logarithm of `val` with `frac` fractional bits, rounded up.
///
/// Only exact for powers of two; otherwise computed by repeated squaring of
/// the 16-bit mantissa. `val` must be non-zero.
pub fn log2_frac(val: u32, frac: i32) -> i32 {
    debug_assert!(val > 0);
    let l = ilog(val);
    if val & val.wrapping_sub(1) == 0 {
        return (l - 1) << frac;
    }
    let mut m = if l > 16 {
        ((val - 1) >> (l - 16)) + 1
    } else {
        val << (16 - l)
    };
    let mut acc = (l - 1) << frac;
    let mut shift = frac;
    loop {
        let b = (m >> 16) as i32;
        acc += b << shift;
        m = (m + b as u32) >> b;
        m = (m * m + 0x7FFF) >> 15;
        if shift <= 0 {
            break;
        }
        shift -= 1;
    }
    acc + i32::from(m > 0x8000)
}

/// Integer square root, rounded down.
pub fn isqrt(val: u64) -> u64 {
    if val < 2 {
        return val;
    }
    let mut root = 0u64;
    let mut bit = 1u64 << ((63 - val.leading_zeros()) & !1);
    let mut rem = val;
    while bit != 0 {
        if rem >= root + bit {
            rem -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }
    root
}

#[inline]
fn frac_mul16(a: i32, b: i32) -> i32 {
    (16384 + (a as i16 as i32) * (b as i16 as i32)) >> 15
}

/// Cosine of `x * pi / 32768` in Q15, identical on every platform.
///
/// Valid for `x` in `0..=16384`; the endpoints are handled by the callers.
pub fn bitexact_cos(x: i32) -> i32 {
    let tmp = (4096 + x * x) >> 13;
    let x2 = tmp;
    let inner = 8277 + frac_mul16(-626, x2);
    let inner = -7651 + frac_mul16(x2, inner);
    let x2 = (32767 - x2) + frac_mul16(x2, inner);
    1 + x2
}
