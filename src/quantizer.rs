// quantizer.rs - Pulse vector quantization of unit-norm band shapes
use crate::arith::Arithmetic;
use crate::cwrs::CwrsTable;
use crate::error::Result;
use crate::range_coder::{RangeDecoder, RangeEncoder};

const EPSILON: f32 = 1e-15;

fn rotation_pass<A: Arithmetic>(x: &mut [A::Norm], stride: usize, c: A::Weight, s: A::Weight) {
    let len = x.len();
    let rotate = |x: &mut [A::Norm], i: usize| {
        let (x1, x2) = (x[i], x[i + stride]);
        x[i + stride] = A::norm_add(A::mul_weight(x2, c), A::mul_weight(x1, s));
        x[i] = A::norm_sub(A::mul_weight(x1, c), A::mul_weight(x2, s));
    };
    if len > stride {
        for i in 0..len - stride {
            rotate(x, i);
        }
    }
    if len >= 2 * stride + 1 {
        for i in (0..len - 2 * stride).rev() {
            rotate(x, i);
        }
    }
}

/// Spread the energy of sparse pulse vectors across neighbouring bins.
///
/// `dir > 0` before the pulse search, `dir < 0` to undo it on resynthesis.
pub fn exp_rotation<A: Arithmetic>(x: &mut [A::Norm], dir: i32, k: usize) {
    let len = x.len();
    if 2 * k >= len {
        return;
    }
    let (c, s) = A::rotation_weights(len, k);
    let mut stride2 = 0;
    if len >= 8 {
        stride2 = 1;
        while stride2 * stride2 + stride2 < len {
            stride2 += 1;
        }
    }
    if dir < 0 {
        if stride2 != 0 {
            rotation_pass::<A>(x, stride2, s, c);
        }
        rotation_pass::<A>(x, 1, c, s);
    } else {
        rotation_pass::<A>(x, 1, c, -s);
        if stride2 != 0 {
            rotation_pass::<A>(x, stride2, s, -c);
        }
    }
}

/// Greedy search for the codeword with `k` pulses closest in angle to `x`.
///
/// Returns the codeword and its squared norm.
pub fn pvq_search(x: &[f32], k: usize) -> (Vec<i32>, f32) {
    let n = x.len();
    let mut ax: Vec<f32> = x.iter().map(|v| v.abs()).collect();
    let mut iy = vec![0i32; n];
    let mut y = vec![0f32; n];
    let mut xy = 0f32;
    let mut yy = 0f32;
    let mut left = k as i32;

    if k > n >> 1 {
        let mut sum: f32 = ax.iter().sum();
        if !(sum > EPSILON && sum < 64.0) {
            ax.iter_mut().for_each(|v| *v = 0.0);
            ax[0] = 1.0;
            sum = 1.0;
        }
        let rcp = (k as f32 + 0.8) / sum;
        for j in 0..n {
            iy[j] = (rcp * ax[j]).floor() as i32;
            y[j] = iy[j] as f32;
            yy += y[j] * y[j];
            xy += ax[j] * y[j];
            y[j] *= 2.0;
            left -= iy[j];
        }
    }
    if left > n as i32 + 3 {
        let t = left as f32;
        yy += t * t + t * y[0];
        iy[0] += left;
        left = 0;
    }
    for _ in 0..left {
        yy += 1.0;
        let mut best = 0;
        let mut best_num = (xy + ax[0]) * (xy + ax[0]);
        let mut best_den = yy + y[0];
        for j in 1..n {
            let rxy = xy + ax[j];
            let ryy = yy + y[j];
            if best_den * rxy * rxy > ryy * best_num {
                best = j;
                best_num = rxy * rxy;
                best_den = ryy;
            }
        }
        xy += ax[best];
        yy += y[best];
        y[best] += 2.0;
        iy[best] += 1;
    }
    for (v, &orig) in iy.iter_mut().zip(x) {
        if orig < 0.0 {
            *v = -*v;
        }
    }
    (iy, yy)
}

/// Quantize `x` with `k` pulses and replace it with the decoder's view.
///
/// The search itself runs in floating point on either backend; only the
/// codeword reaches the bitstream.
pub fn alg_quant<A: Arithmetic>(
    x: &mut [A::Norm],
    k: usize,
    spread: bool,
    table: &CwrsTable,
    enc: &mut RangeEncoder,
) -> Result<()> {
    debug_assert!(k > 0);
    if spread {
        exp_rotation::<A>(x, 1, k);
    }
    let target: Vec<f32> = x.iter().map(|&v| A::norm_to_f32(v)).collect();
    let (iy, _) = pvq_search(&target, k);
    let index = table.index(&iy)?;
    let size = table.count(x.len(), k);
    enc.encode_uint(index as u32, size as u32);
    A::resynthesise(&iy, x);
    if spread {
        exp_rotation::<A>(x, -1, k);
    }
    Ok(())
}

/// Decode a `k`-pulse shape into `x`.
pub fn alg_unquant<A: Arithmetic>(
    x: &mut [A::Norm],
    k: usize,
    spread: bool,
    table: &CwrsTable,
    dec: &mut RangeDecoder<'_>,
) -> Result<()> {
    debug_assert!(k > 0);
    let size = table.count(x.len(), k);
    let index = dec.decode_uint(size as u32);
    let mut iy = vec![0i32; x.len()];
    table.codeword(index as u64, k, &mut iy)?;
    A::resynthesise(&iy, x);
    if spread {
        exp_rotation::<A>(x, -1, k);
    }
    Ok(())
}
