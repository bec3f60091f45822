// fold.rs - Spectral folding for bands that receive no pulses
use crate::arith::Arithmetic;
use crate::mode::Mode;

/// Fill `out` with a unit-norm copy of the start of the fold history.
///
/// `history` holds the normalised bins coded so far in this frame. Bands that
/// start before `out.len()` bins have been coded get zeros instead.
pub fn intra_fold<A: Arithmetic>(history: &[A::Norm], band_start: usize, out: &mut [A::Norm]) {
    let n = out.len();
    if band_start >= n && history.len() >= n {
        out.copy_from_slice(&history[..n]);
    } else {
        out.fill(A::Norm::default());
    }
    A::renormalise(out, 0, 1, n);
}

/// Record a coded band in the fold history, scaled so every bin is on the
/// same footing regardless of the band width.
pub fn record_history<A: Arithmetic>(
    history: &mut [A::Norm],
    band_start: usize,
    shape: impl Iterator<Item = A::Norm>,
    n: usize,
) {
    let scale = A::fold_weight(n);
    for (slot, v) in history[band_start..band_start + n].iter_mut().zip(shape) {
        *slot = A::mul_weight(v, scale);
    }
}

/// Hysteresis carried between frames by [`folding_decision`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoldState {
    /// Smoothed peak-to-floor ratio.
    pub average: f32,
    pub last_decision: bool,
}

impl Default for FoldState {
    fn default() -> Self {
        Self {
            average: 1.0,
            last_decision: true,
        }
    }
}

/// Turn folding on with a hysteresis band of 1.8..3.0.
const FOLD_ON_BELOW: f32 = 1.8;
const FOLD_OFF_ABOVE: f32 = 3.0;
const FLOOR_MIN: f32 = 0.02;

/// Decide whether the coming frame may fold, from how peaky the normalised
/// residual `x` is above the pitch end.
///
/// Tonal frames, whose wide bands are dominated by one bin, turn folding
/// off. Runs on the encoder only; the result travels in the bitstream.
pub fn folding_decision<A: Arithmetic>(mode: &Mode, x: &[A::Norm], state: &mut FoldState) -> bool {
    let c_total = mode.channels();
    let e = mode.e_bands();
    let mut ratio = 0.0f32;
    let mut counted = 0;
    for band in 0..mode.nb_bands() {
        let n = mode.band_width(band);
        if n <= 7 || e[band] < mode.pitch_end() {
            continue;
        }
        for c in 0..c_total {
            let bin = |j: usize| A::norm_to_f32(x[(e[band] + j) * c_total + c]);
            let (mut max_i, mut max_val) = (0, 0.0f32);
            for j in 0..n {
                if bin(j).abs() > max_val {
                    max_val = bin(j).abs();
                    max_i = j;
                }
            }
            // Energy outside the peak and its two neighbours on each side
            let mut floor = 1.0 - max_val * max_val;
            for j in max_i.saturating_sub(2)..(max_i + 3).min(n) {
                if j != max_i {
                    floor -= bin(j) * bin(j);
                }
            }
            let floor = floor.max(f32::EPSILON);
            ratio += max_val / floor.sqrt().max(FLOOR_MIN);
            counted += 1;
        }
    }
    if counted > 0 {
        ratio /= counted as f32;
    }
    let ratio = 0.5 * ratio + 0.5 * state.average;
    state.last_decision = if state.last_decision {
        ratio < FOLD_OFF_ABOVE
    } else {
        ratio < FOLD_ON_BELOW
    };
    state.average = ratio;
    log::trace!("folding ratio {ratio:.2} over {counted} bands: {}", state.last_decision);
    state.last_decision
}
