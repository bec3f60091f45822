// arith.rs - Interchangeable numeric backends for energies and band shapes
use crate::mathops::{bitexact_cos, ilog, isqrt};
use std::fmt::Debug;
use std::ops::Neg;

/// Primitive operations the energy engine and the band coder need from a
/// number format.
///
/// `Sig` holds frequency-domain samples, `Norm` unit-norm shape coefficients
/// and `Ener` per-band magnitudes on the same scale as `Sig`. `Weight` is a
/// mixing or rotation coefficient in `-1..=1`.
pub trait Arithmetic {
    type Sig: Copy + Default + Debug + PartialEq;
    type Norm: Copy + Default + Debug + PartialEq;
    type Ener: Copy + Default + Debug + PartialOrd;
    /// Prepared reciprocal of a magnitude.
    type Gain: Copy + Debug;
    type Weight: Copy + Debug + Neg<Output = Self::Weight>;

    /// Smallest magnitude a band can report.
    const EPSILON: Self::Ener;

    /// Square root of the summed squares, never below `EPSILON`.
    fn magnitude(samples: impl Iterator<Item = Self::Sig> + Clone) -> Self::Ener;
    fn reciprocal(e: Self::Ener) -> Self::Gain;
    /// `x / e` for the `e` a gain was prepared from.
    fn apply_gain(x: Self::Sig, g: Self::Gain) -> Self::Norm;
    /// `x * e`.
    fn scale(x: Self::Norm, e: Self::Ener) -> Self::Sig;
    fn widen(x: Self::Norm) -> Self::Sig;

    fn sig_from_f32(x: f32) -> Self::Sig;
    fn sig_to_f32(x: Self::Sig) -> f32;
    fn norm_to_f32(x: Self::Norm) -> f32;
    fn ener_to_f32(e: Self::Ener) -> f32;

    fn norm_add(a: Self::Norm, b: Self::Norm) -> Self::Norm;
    fn norm_sub(a: Self::Norm, b: Self::Norm) -> Self::Norm;
    fn norm_neg(x: Self::Norm) -> Self::Norm;

    fn weight_from_f32(w: f32) -> Self::Weight;
    /// Weight from a Q15 gain such as the stereo `imid`/`iside`.
    fn weight_q15(q: i32) -> Self::Weight;
    fn mul_weight(x: Self::Norm, w: Self::Weight) -> Self::Norm;

    /// Scale `x[offset + i * stride]` for `i < n` to unit norm.
    ///
    /// Returns the norm the vector had before, in the shape's own scale. An
    /// all-zero vector is left alone.
    fn renormalise(x: &mut [Self::Norm], offset: usize, stride: usize, n: usize) -> Self::Ener;
    /// Quantized angle of a (mid, side) norm pair on a `0..=16384` scale.
    fn itheta(mid: Self::Ener, side: Self::Ener) -> i32;
    /// Intensity mixing weights for a pair of channel magnitudes.
    fn intensity_weights(left: Self::Ener, right: Self::Ener) -> (Self::Weight, Self::Weight);
    /// Cosine and sine of the spreading rotation for `k` pulses over `len`
    /// bins.
    fn rotation_weights(len: usize, k: usize) -> (Self::Weight, Self::Weight);
    /// Unit-norm shape pointing along the integer codeword `iy`.
    fn resynthesise(iy: &[i32], x: &mut [Self::Norm]);
    /// Gain that puts the bins of an `n`-wide band on a common scale in the
    /// fold history.
    fn fold_weight(n: usize) -> Self::Weight;
}

/// Floor of the float shape norms.
const FLOAT_NORM_EPSILON: f32 = 1e-15;
/// Spreading strength of the pulse rotation.
pub const SPREAD_FACTOR: i32 = 10;

/// 32-bit floating point.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float;

impl Arithmetic for Float {
    type Sig = f32;
    type Norm = f32;
    type Ener = f32;
    type Gain = f32;
    type Weight = f32;

    const EPSILON: f32 = 1e-5;

    fn magnitude(samples: impl Iterator<Item = f32> + Clone) -> f32 {
        let sum: f32 = samples.map(|x| x * x).sum();
        (1e-10 + sum).sqrt().max(Self::EPSILON)
    }

    fn reciprocal(e: f32) -> f32 {
        1.0 / (1e-10 + e)
    }

    fn apply_gain(x: f32, g: f32) -> f32 {
        x * g
    }

    fn scale(x: f32, e: f32) -> f32 {
        x * e
    }

    fn widen(x: f32) -> f32 {
        x
    }

    fn sig_from_f32(x: f32) -> f32 {
        x
    }

    fn sig_to_f32(x: f32) -> f32 {
        x
    }

    fn norm_to_f32(x: f32) -> f32 {
        x
    }

    fn ener_to_f32(e: f32) -> f32 {
        e
    }

    fn norm_add(a: f32, b: f32) -> f32 {
        a + b
    }

    fn norm_sub(a: f32, b: f32) -> f32 {
        a - b
    }

    fn norm_neg(x: f32) -> f32 {
        -x
    }

    fn weight_from_f32(w: f32) -> f32 {
        w
    }

    fn weight_q15(q: i32) -> f32 {
        q as f32 / 32768.0
    }

    fn mul_weight(x: f32, w: f32) -> f32 {
        x * w
    }

    fn renormalise(x: &mut [f32], offset: usize, stride: usize, n: usize) -> f32 {
        let energy = FLOAT_NORM_EPSILON
            + (0..n)
                .map(|i| x[offset + i * stride] * x[offset + i * stride])
                .sum::<f32>();
        let norm = energy.sqrt();
        let g = 1.0 / norm;
        for i in 0..n {
            x[offset + i * stride] *= g;
        }
        norm
    }

    fn itheta(mid: f32, side: f32) -> i32 {
        (0.5 + 16384.0 * std::f32::consts::FRAC_2_PI * side.atan2(mid)).floor() as i32
    }

    fn intensity_weights(left: f32, right: f32) -> (f32, f32) {
        let norm = FLOAT_NORM_EPSILON + (FLOAT_NORM_EPSILON + left * left + right * right).sqrt();
        (left / norm, right / norm)
    }

    fn rotation_weights(len: usize, k: usize) -> (f32, f32) {
        let gain = len as f32 / (len as f32 + (SPREAD_FACTOR as usize * k) as f32);
        let theta = 0.5 * gain * gain;
        let c = (0.5 * std::f32::consts::PI * theta).cos();
        let s = (0.5 * std::f32::consts::PI * (1.0 - theta)).cos();
        (c, s)
    }

    fn resynthesise(iy: &[i32], x: &mut [f32]) {
        let yy: f32 = iy.iter().map(|&v| (v * v) as f32).sum();
        let g = 1.0 / (FLOAT_NORM_EPSILON + yy).sqrt();
        for (out, &v) in x.iter_mut().zip(iy) {
            *out = g * v as f32;
        }
    }

    fn fold_weight(n: usize) -> f32 {
        (n as f32).sqrt()
    }
}

/// Integer backend: `i32` samples, Q14 `i16` shape coefficients.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fixed;

/// Unity in the Q14 shape domain.
pub const NORM_SHIFT: u32 = 14;
const NORM_ONE: i32 = 1 << NORM_SHIFT;
/// Samples and magnitudes are Q12.
pub const SIG_SHIFT: u32 = 12;
const SIG_ONE: f32 = (1 << SIG_SHIFT) as f32;
/// 2/pi in Q15.
const TWO_OVER_PI_Q15: i32 = 20861;
/// pi/2 in Q14.
const HALF_PI_Q14: i32 = 25736;

#[inline]
fn mult16_16_p15(a: i32, b: i32) -> i32 {
    (a * b + 16384) >> 15
}

/// Polynomial arctangent of `x / 32768` for `x` in `0..=32767`, Q15 radians.
fn atan01(x: i32) -> i32 {
    const M1: i32 = 32767;
    const M2: i32 = -21;
    const M3: i32 = -11943;
    const M4: i32 = 4936;
    mult16_16_p15(x, M1 + mult16_16_p15(x, M2 + mult16_16_p15(x, M3 + mult16_16_p15(M4, x))))
}

/// `atan2(y, x)` in Q14 radians for non-negative 16-bit inputs.
pub fn atan2p(y: i32, x: i32) -> i32 {
    if y < x {
        let arg = ((y << 15) / x).min(32767);
        atan01(arg) >> 1
    } else if y == 0 {
        0
    } else {
        let arg = ((x << 15) / y).min(32767);
        HALF_PI_Q14 - (atan01(arg) >> 1)
    }
}

/// Round-half-away product of `x` and a Q-`shift` factor, symmetric in sign.
#[inline]
fn mul_round(x: i64, factor: i64, shift: u32) -> i64 {
    let p = x * factor;
    let v = (p.abs() + (1 << (shift - 1))) >> shift;
    if p < 0 {
        -v
    } else {
        v
    }
}

#[inline]
fn sat16(v: i64) -> i16 {
    v.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// Arithmetic shift right by `shift`, or left when negative.
#[inline]
fn vshr(x: i64, shift: i32) -> i64 {
    if shift >= 0 {
        x >> shift
    } else {
        x << -shift
    }
}

impl Arithmetic for Fixed {
    type Sig = i32;
    type Norm = i16;
    type Ener = i32;
    /// Q28 reciprocal of the mantissa plus the shift that produced it.
    type Gain = (i32, i32);
    /// Q15.
    type Weight = i16;

    const EPSILON: i32 = 1;

    fn magnitude(samples: impl Iterator<Item = i32> + Clone) -> i32 {
        let maxval = samples
            .clone()
            .map(|x| (x as i64).abs())
            .max()
            .unwrap_or(0);
        if maxval == 0 {
            return Self::EPSILON;
        }
        // Keep the squared terms within 22 bits
        let shift = ilog(maxval.min(u32::MAX as i64) as u32) - 1 - 10;
        let sum: i64 = samples
            .map(|x| {
                let v = vshr(x as i64, shift);
                v * v
            })
            .sum();
        let root = isqrt(sum as u64) as i64;
        (Self::EPSILON as i64 + vshr(root, -shift)).min(i32::MAX as i64) as i32
    }

    fn reciprocal(e: i32) -> (i32, i32) {
        let e = e.max(Self::EPSILON);
        let shift = ilog(e as u32) - 1 - 13;
        let mantissa = vshr(e as i64, shift).max(1);
        (((1i64 << 28) / mantissa) as i32, shift)
    }

    fn apply_gain(x: i32, (g, shift): (i32, i32)) -> i16 {
        let v = (vshr(x as i64, shift) * g as i64) >> NORM_SHIFT;
        v.clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }

    fn scale(x: i16, e: i32) -> i32 {
        ((x as i64 * e as i64) >> NORM_SHIFT) as i32
    }

    fn widen(x: i16) -> i32 {
        x as i32
    }

    fn sig_from_f32(x: f32) -> i32 {
        (x * SIG_ONE).round().clamp(i32::MIN as f32, i32::MAX as f32) as i32
    }

    fn sig_to_f32(x: i32) -> f32 {
        x as f32 / SIG_ONE
    }

    fn norm_to_f32(x: i16) -> f32 {
        x as f32 / NORM_ONE as f32
    }

    fn ener_to_f32(e: i32) -> f32 {
        e as f32 / SIG_ONE
    }

    fn norm_add(a: i16, b: i16) -> i16 {
        a.saturating_add(b)
    }

    fn norm_sub(a: i16, b: i16) -> i16 {
        a.saturating_sub(b)
    }

    fn norm_neg(x: i16) -> i16 {
        x.saturating_neg()
    }

    fn weight_from_f32(w: f32) -> i16 {
        (w * 32768.0).round().clamp(-32767.0, 32767.0) as i16
    }

    fn weight_q15(q: i32) -> i16 {
        q.clamp(-32767, 32767) as i16
    }

    fn mul_weight(x: i16, w: i16) -> i16 {
        sat16(mul_round(x as i64, w as i64, 15))
    }

    fn renormalise(x: &mut [i16], offset: usize, stride: usize, n: usize) -> i32 {
        let sum: i64 = (0..n)
            .map(|i| {
                let v = x[offset + i * stride] as i64;
                v * v
            })
            .sum();
        if sum == 0 {
            return 0;
        }
        // Q14 norm of the Q14 vector
        let norm = isqrt(sum as u64) as i64;
        for i in 0..n {
            let v = x[offset + i * stride] as i64;
            let scaled = (v.abs() * NORM_ONE as i64 + norm / 2) / norm;
            x[offset + i * stride] = sat16(if v < 0 { -scaled } else { scaled });
        }
        norm.min(i32::MAX as i64) as i32
    }

    fn itheta(mid: i32, side: i32) -> i32 {
        let (mid, side) = (mid.max(0), side.max(0));
        let shift = (ilog(mid.max(side) as u32) - 15).max(0);
        let theta = atan2p(side >> shift, mid >> shift);
        (TWO_OVER_PI_Q15 * theta) >> 15
    }

    fn intensity_weights(left: i32, right: i32) -> (i16, i16) {
        let (l, r) = (left.max(0) as i64, right.max(0) as i64);
        let norm = isqrt((l * l + r * r) as u64) as i64;
        if norm == 0 {
            return (0, 0);
        }
        let weight = |v: i64| ((v << 15) / norm).min(32767) as i16;
        (weight(l), weight(r))
    }

    fn rotation_weights(len: usize, k: usize) -> (i16, i16) {
        let len = len as i64;
        let gain = ((len << 15) / (len + (SPREAD_FACTOR as usize * k) as i64)).min(32767);
        // theta = gain^2 / 2 with 16384 standing for 1
        let theta = ((gain * gain) >> 17) as i32;
        let c = bitexact_cos(theta).min(32767);
        let s = bitexact_cos(16384 - theta).min(32767);
        (c as i16, s as i16)
    }

    fn resynthesise(iy: &[i32], x: &mut [i16]) {
        let yy: i64 = iy.iter().map(|&v| v as i64 * v as i64).sum();
        if yy == 0 {
            x.fill(0);
            return;
        }
        let norm = isqrt((yy << 28) as u64) as i64;
        for (out, &v) in x.iter_mut().zip(iy) {
            let scaled = (((v as i64).abs() << 28) + norm / 2) / norm;
            *out = sat16(if v < 0 { -scaled } else { scaled });
        }
    }

    fn fold_weight(n: usize) -> i16 {
        // sqrt(n) / 16 in Q15
        isqrt((n as u64) << 22).min(32767) as i16
    }
}
