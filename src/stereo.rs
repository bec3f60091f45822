// stereo.rs - Per-band mid/side and intensity decorrelation
use crate::arith::Arithmetic;
use crate::mathops::{bitexact_cos, log2_frac};
use crate::rate::{BITRES, QTHETA_OFFSET};

/// Full-scale quantized angle (pi / 2).
pub const THETA_MAX: i32 = 16384;
const HALF_SQRT2: f32 = 0.70711;

/// Rotate band `band` of an interleaved stereo buffer.
///
/// With `bank` the weights follow the channel magnitudes (intensity
/// stereo), otherwise a plain mid/side rotation is applied. `dir` is `1` for
/// the forward rotation and `-1` to undo it.
pub fn stereo_band_mix<A: Arithmetic>(
    e_bands: &[usize],
    x: &mut [A::Norm],
    bank: Option<(A::Ener, A::Ener)>,
    band: usize,
    dir: i32,
) {
    let (a1, a2) = match bank {
        None => {
            let w = A::weight_from_f32(HALF_SQRT2);
            (w, w)
        }
        Some((left, right)) => A::intensity_weights(left, right),
    };
    for j in e_bands[band]..e_bands[band + 1] {
        let l = x[j * 2];
        let r = x[j * 2 + 1];
        let (l1, r1) = (A::mul_weight(l, a1), A::mul_weight(r, a1));
        let (l2, r2) = (A::mul_weight(l, a2), A::mul_weight(r, a2));
        if dir < 0 {
            x[j * 2] = A::norm_sub(l1, r2);
            x[j * 2 + 1] = A::norm_add(r1, l2);
        } else {
            x[j * 2] = A::norm_add(l1, r2);
            x[j * 2 + 1] = A::norm_sub(r1, l2);
        }
    }
}

/// Split `[a0, b0, a1, b1, ..]` into `[a0, a1, .., b0, b1, ..]`.
pub fn deinterleave<T: Copy>(x: &mut [T]) {
    let half = x.len() / 2;
    let tmp = x.to_vec();
    for i in 0..half {
        x[i] = tmp[2 * i];
        x[i + half] = tmp[2 * i + 1];
    }
}

/// Inverse of [`deinterleave`].
pub fn interleave<T: Copy>(x: &mut [T]) {
    let half = x.len() / 2;
    let tmp = x.to_vec();
    for i in 0..half {
        x[2 * i] = tmp[i];
        x[2 * i + 1] = tmp[i + half];
    }
}

/// Resolution (in bits) of the angle for a band of `n` bins given `b`
/// eighth-bits.
pub fn theta_resolution(b: i32, n: usize) -> i32 {
    if n < 2 {
        return 0;
    }
    let n1 = n as i32 - 1;
    let qb = (b - 2 * n1 * (QTHETA_OFFSET - log2_frac(n as u32, BITRES as i32))) / (32 * n1);
    qb.min((b >> BITRES) - 1).clamp(0, 14)
}

/// Cost in eighth-bits of sending an angle with `qb` bits of resolution.
pub fn theta_cost(qb: i32) -> i32 {
    log2_frac((1 << qb) + 1, BITRES as i32)
}

/// Quantize `itheta` to `qb` bits; returns the level to transmit and the
/// reconstructed angle.
pub fn quantize_theta(itheta: i32, qb: i32) -> (u32, i32) {
    if qb == 0 {
        return (0, 0);
    }
    let shift = 14 - qb;
    let level = ((itheta + ((1 << shift) >> 1)) >> shift).clamp(0, 1 << qb);
    (level as u32, level << shift)
}

pub fn dequantize_theta(level: u32, qb: i32) -> i32 {
    if qb == 0 {
        0
    } else {
        (level as i32) << (14 - qb)
    }
}

/// Gains and bit skew implied by a quantized angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThetaSplit {
    pub itheta: i32,
    /// Q15 gain of the mid component.
    pub imid: i32,
    /// Q15 gain of the side component.
    pub iside: i32,
    /// How many more eighth-bits the side deserves than the mid.
    pub delta: i32,
}

impl ThetaSplit {
    pub fn new(itheta: i32, n: usize) -> Self {
        let (imid, iside, delta) = match itheta {
            0 => (32767, 0, -10000),
            THETA_MAX => (0, 32767, 10000),
            _ => {
                let imid = bitexact_cos(itheta);
                let iside = bitexact_cos(THETA_MAX - itheta);
                let delta = ((n as i32 - 1)
                    * (log2_frac(iside as u32, BITRES as i32 + 2)
                        - log2_frac(imid as u32, BITRES as i32 + 2)))
                    >> 2;
                (imid, iside, delta)
            }
        };
        Self {
            itheta,
            imid,
            iside,
            delta,
        }
    }

    pub fn is_edge(&self) -> bool {
        self.itheta == 0 || self.itheta == THETA_MAX
    }

    pub fn mid_gain<A: Arithmetic>(&self) -> A::Weight {
        A::weight_q15(self.imid)
    }

    pub fn side_gain<A: Arithmetic>(&self) -> A::Weight {
        A::weight_q15(self.iside)
    }

    /// Eighth-bits for the mid vector out of `b` after `qalloc` went to the
    /// angle; the side gets the rest.
    pub fn mid_bits(&self, b: i32, qalloc: i32) -> i32 {
        ((b - qalloc / 2 - self.delta) / 2).min(b - qalloc).max(0)
    }
}
