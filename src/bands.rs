// bands.rs - Per-band residual quantization driven by the shared bit budget
//
// Encode and decode run the same loop; the `BandCoder` implementation decides
// whether symbols are written or read. Both sides therefore derive identical
// budgets from identical `tell_frac()` values.
use crate::arith::Arithmetic;
use crate::cwrs::CwrsTable;
use crate::error::{check_len, CodecError, Result};
use crate::fold::{intra_fold, record_history};
use crate::mode::Mode;
use crate::quantizer::{alg_quant, alg_unquant};
use crate::range_coder::{RangeDecoder, RangeEncoder, Tell};
use crate::rate::{BalanceTracker, BandBudget, BITRES, SYMBOL_SLACK};
use crate::stereo::{
    deinterleave, dequantize_theta, interleave, quantize_theta, stereo_band_mix, theta_cost,
    theta_resolution, ThetaSplit,
};

/// Direction-agnostic access to the range coder.
///
/// On the encode side every call writes its argument and returns it; on the
/// decode side the argument is ignored and the decoded value is returned.
pub trait BandCoder: Tell {
    const ENCODE: bool;

    fn code_uint(&mut self, value: u32, ft: u32) -> u32;
    fn code_bit(&mut self, bit: bool) -> bool;
    /// Quantize (or decode) the unit-norm shape `x` with exactly `k` pulses,
    /// leaving the decoder's view of it in `x`.
    fn code_pulses<A: Arithmetic>(
        &mut self,
        x: &mut [A::Norm],
        k: usize,
        spread: bool,
        table: &CwrsTable,
    ) -> Result<()>;
}

impl BandCoder for RangeEncoder {
    const ENCODE: bool = true;

    fn code_uint(&mut self, value: u32, ft: u32) -> u32 {
        self.encode_uint(value, ft);
        value
    }

    fn code_bit(&mut self, bit: bool) -> bool {
        self.encode_raw_bits(bit as u32, 1);
        bit
    }

    fn code_pulses<A: Arithmetic>(
        &mut self,
        x: &mut [A::Norm],
        k: usize,
        spread: bool,
        table: &CwrsTable,
    ) -> Result<()> {
        alg_quant::<A>(x, k, spread, table, self)
    }
}

impl BandCoder for RangeDecoder<'_> {
    const ENCODE: bool = false;

    fn code_uint(&mut self, _value: u32, ft: u32) -> u32 {
        self.decode_uint(ft)
    }

    fn code_bit(&mut self, _bit: bool) -> bool {
        self.decode_raw_bits(1) != 0
    }

    fn code_pulses<A: Arithmetic>(
        &mut self,
        x: &mut [A::Norm],
        k: usize,
        spread: bool,
        table: &CwrsTable,
    ) -> Result<()> {
        alg_unquant::<A>(x, k, spread, table, self)
    }
}

/// How a band's shape was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandOutcome {
    /// At least one pulse was transmitted.
    Coded,
    /// No pulses; the shape was folded from lower bands.
    Folded,
    /// No pulses and folding was not allowed.
    Silent,
}

/// What the allocator decided for one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandReport {
    /// `tell_frac()` before the band.
    pub tell: i32,
    /// Eighth-bits the band was allowed after balance correction.
    pub bits: i32,
    /// Pulses for the mono shape or the stereo mid.
    pub q1: usize,
    /// Pulses for the stereo side (always 0 in mono).
    pub q2: usize,
    /// Quantized stereo angle (0 in mono).
    pub itheta: i32,
    pub outcome: BandOutcome,
}

/// Per-band decisions of a whole frame.
///
/// Encoder and decoder reports of the same frame compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub bands: Vec<BandReport>,
    /// Balance left after the last band.
    pub final_balance: i32,
    /// `tell_frac()` after the last band.
    pub tell: i32,
}

impl FrameReport {
    pub fn coded_bands(&self) -> usize {
        self.count(BandOutcome::Coded)
    }

    pub fn folded_bands(&self) -> usize {
        self.count(BandOutcome::Folded)
    }

    fn count(&self, outcome: BandOutcome) -> usize {
        self.bands.iter().filter(|b| b.outcome == outcome).count()
    }

    /// Bits each band actually consumed, derived from the `tell` trajectory.
    pub fn spent_bits(&self) -> Vec<i32> {
        let mut ends: Vec<i32> = self.bands.iter().skip(1).map(|b| b.tell).collect();
        ends.push(self.tell);
        self.bands.iter().zip(ends).map(|(b, end)| end - b.tell).collect()
    }
}

fn check_buffers<T>(mode: &Mode, channels: usize, x: &[T], requests: &[i32]) -> Result<()> {
    if mode.channels() != channels {
        return Err(CodecError::UnsupportedChannels(mode.channels()));
    }
    check_len(mode.frame_size() * channels, x.len())?;
    check_len(mode.nb_bands(), requests.len())
}

/// Bits allowed for a band: the request plus its balance share, capped by
/// what is left of the frame.
fn band_bits(request: i32, budget: &BandBudget) -> i32 {
    (request + budget.balance_share).min(budget.remaining + 1).max(0)
}

fn code_bands_mono<A: Arithmetic, C: BandCoder>(
    mode: &Mode,
    x: &mut [A::Norm],
    requests: &[i32],
    fold: bool,
    total_bits: i32,
    coder: &mut C,
) -> Result<FrameReport> {
    check_buffers(mode, 1, x, requests)?;
    if !C::ENCODE {
        x.fill(A::Norm::default());
    }
    let e = mode.e_bands();
    let nb = mode.nb_bands();
    let mut history = vec![A::Norm::default(); mode.frame_size()];
    let mut tracker = BalanceTracker::new(total_bits, nb);
    let mut bands = Vec::with_capacity(nb);

    for band in 0..nb {
        let (start, n) = (e[band], mode.band_width(band));
        let budget = tracker.begin_band(band, coder.tell_frac());
        let b = band_bits(requests[band], &budget);
        let cache = mode.pulse_cache(band);
        let q = cache.fit(cache.bits_to_pulses(b), SYMBOL_SLACK, budget.remaining);

        let can_fold = fold && start >= mode.pitch_end();
        let shape = &mut x[start..start + n];
        let outcome = if q > 0 {
            coder.code_pulses::<A>(shape, q, can_fold, mode.cwrs())?;
            BandOutcome::Coded
        } else if can_fold {
            intra_fold::<A>(&history, start, shape);
            BandOutcome::Folded
        } else {
            shape.fill(A::Norm::default());
            BandOutcome::Silent
        };
        record_history::<A>(&mut history, start, shape.iter().copied(), n);
        tracker.end_band(requests[band], &budget);

        log::trace!("band {band}: tell {} bits {b} q {q} {outcome:?}", budget.tell);
        bands.push(BandReport {
            tell: budget.tell,
            bits: b,
            q1: q,
            q2: 0,
            itheta: 0,
            outcome,
        });
    }
    Ok(FrameReport {
        bands,
        final_balance: tracker.balance() - coder.tell_frac(),
        tell: coder.tell_frac(),
    })
}

/// Mid and side pulse counts that fit in `remaining` along with `overhead`.
///
/// The larger count gives way first.
fn fit_pair(mode: &Mode, band: usize, mut q1: usize, mut q2: usize, overhead: i32, remaining: i32) -> (usize, usize) {
    let cache = mode.pulse_cache(band);
    let cost = |q1, q2| cache.pulses_to_bits(q1) + cache.pulses_to_bits(q2) + overhead;
    while cost(q1, q2) > remaining && (q1 > 0 || q2 > 0) {
        if q1 > q2 {
            q1 -= 1;
        } else {
            q2 -= 1;
        }
    }
    (q1, q2)
}

fn code_bands_stereo<A: Arithmetic, C: BandCoder>(
    mode: &Mode,
    x: &mut [A::Norm],
    bank: Option<&[A::Ener]>,
    requests: &[i32],
    fold: bool,
    total_bits: i32,
    coder: &mut C,
) -> Result<FrameReport> {
    check_buffers(mode, 2, x, requests)?;
    let e = mode.e_bands();
    let nb = mode.nb_bands();
    if let Some(bank) = bank {
        check_len(nb * 2, bank.len())?;
    }
    if !C::ENCODE {
        x.fill(A::Norm::default());
    }
    let mut history = vec![A::Norm::default(); mode.frame_size()];
    let mut tracker = BalanceTracker::new(total_bits, nb);
    let mut bands = Vec::with_capacity(nb);

    for band in 0..nb {
        let (start, n) = (e[band], mode.band_width(band));
        let budget = tracker.begin_band(band, coder.tell_frac());
        let b = band_bits(requests[band], &budget);
        let qb = theta_resolution(b, n);
        let qalloc = theta_cost(qb);
        let can_fold = fold && start >= mode.pitch_end();

        let mut itheta = 0;
        if C::ENCODE {
            let weights = match (qb, bank) {
                (0, Some(bank)) => Some((bank[band], bank[band + nb])),
                _ => None,
            };
            stereo_band_mix::<A>(e, x, weights, band, 1);
            let mid = A::renormalise(x, 2 * start, 2, n);
            let side = A::renormalise(x, 2 * start + 1, 2, n);
            itheta = A::itheta(mid, side);
        }
        if qb > 0 {
            let (level, _) = quantize_theta(itheta, qb);
            let level = coder.code_uint(level, (1 << qb) + 1);
            itheta = dequantize_theta(level, qb);
        } else {
            itheta = 0;
        }
        let split = ThetaSplit::new(itheta, n);

        let slice = &mut x[2 * start..2 * (start + n)];
        let (q1, q2, outcome) = if n == 2 {
            let pair = PairBand {
                band,
                start,
                b,
                qalloc,
                remaining: budget.remaining,
                spread: can_fold,
            };
            let (q1, outcome) = code_pair::<A, C>(mode, &pair, slice, &split, &history, coder)?;
            (q1, 0, outcome)
        } else {
            let mbits = split.mid_bits(b, qalloc);
            let sbits = b - qalloc - mbits;
            let cache = mode.pulse_cache(band);
            let (q1, q2) = fit_pair(
                mode,
                band,
                cache.bits_to_pulses(mbits),
                cache.bits_to_pulses(sbits),
                qalloc + 3 * SYMBOL_SLACK,
                budget.remaining,
            );

            deinterleave(slice);
            let (mid, side) = slice.split_at_mut(n);
            let outcome = if q1 > 0 {
                coder.code_pulses::<A>(mid, q1, can_fold, mode.cwrs())?;
                BandOutcome::Coded
            } else if can_fold {
                intra_fold::<A>(&history, start, mid);
                BandOutcome::Folded
            } else {
                mid.fill(A::Norm::default());
                BandOutcome::Silent
            };
            let outcome = if q2 > 0 {
                coder.code_pulses::<A>(side, q2, can_fold, mode.cwrs())?;
                BandOutcome::Coded
            } else {
                side.fill(A::Norm::default());
                outcome
            };
            interleave(slice);
            (q1, q2, outcome)
        };
        record_history::<A>(&mut history, start, slice.iter().step_by(2).copied(), n);
        tracker.end_band(requests[band], &budget);

        let (mid_gain, side_gain) = (split.mid_gain::<A>(), split.side_gain::<A>());
        for pair in slice.chunks_exact_mut(2) {
            pair[0] = A::mul_weight(pair[0], mid_gain);
            pair[1] = A::mul_weight(pair[1], side_gain);
        }
        stereo_band_mix::<A>(e, x, None, band, -1);
        A::renormalise(x, 2 * start, 2, n);
        A::renormalise(x, 2 * start + 1, 2, n);

        log::trace!(
            "band {band}: tell {} bits {b} qb {qb} itheta {itheta} q {q1}/{q2} {outcome:?}",
            budget.tell
        );
        bands.push(BandReport {
            tell: budget.tell,
            bits: b,
            q1,
            q2,
            itheta,
            outcome,
        });
    }
    Ok(FrameReport {
        bands,
        final_balance: tracker.balance() - coder.tell_frac(),
        tell: coder.tell_frac(),
    })
}

/// Budget and position of a two-bin stereo band.
struct PairBand {
    band: usize,
    start: usize,
    b: i32,
    qalloc: i32,
    remaining: i32,
    spread: bool,
}

/// Two-bin stereo band: one unit vector plus the sign of its orthogonal
/// partner. Returns the pulse count used for the vector.
///
/// Without pulses the vector is folded when `spread` allows it; otherwise the
/// whole band is silent and no sign is sent.
fn code_pair<A: Arithmetic, C: BandCoder>(
    mode: &Mode,
    pair: &PairBand,
    slice: &mut [A::Norm],
    split: &ThetaSplit,
    history: &[A::Norm],
    coder: &mut C,
) -> Result<(usize, BandOutcome)> {
    let sbits = if split.is_edge() { 0 } else { 1 << BITRES };
    let mbits = pair.b - pair.qalloc - sbits;
    // The stronger of mid and side carries the pulses
    let c = usize::from(split.itheta > 8192);
    let c2 = 1 - c;
    let cache = mode.pulse_cache(pair.band);
    let q1 = cache.fit(
        cache.bits_to_pulses(mbits),
        pair.qalloc + sbits + 2 * SYMBOL_SLACK,
        pair.remaining,
    );

    let mut v = [slice[c], slice[c + 2]];
    let w = [slice[c2], slice[c2 + 2]];
    let outcome = if q1 > 0 {
        coder.code_pulses::<A>(&mut v, q1, pair.spread, mode.cwrs())?;
        BandOutcome::Coded
    } else if pair.spread {
        intra_fold::<A>(history, pair.start, &mut v);
        BandOutcome::Folded
    } else {
        slice.fill(A::Norm::default());
        return Ok((0, BandOutcome::Silent));
    };
    let positive = if sbits > 0 {
        let [v0, v1] = v.map(A::norm_to_f32);
        let [w0, w1] = w.map(A::norm_to_f32);
        coder.code_bit(v0 * w1 - v1 * w0 > 0.0)
    } else {
        true
    };
    let signed = |x: A::Norm| if positive { x } else { A::norm_neg(x) };
    slice[c] = v[0];
    slice[c + 2] = v[1];
    slice[c2] = A::norm_neg(signed(v[1]));
    slice[c2 + 2] = signed(v[0]);
    Ok((q1, outcome))
}

/// Quantize the unit-norm residual of a mono frame in place.
///
/// `requests` holds the per-band bit requests in eighth-bits and
/// `total_bits` the frame budget in whole bits. On return `x` holds what the
/// decoder will reconstruct.
pub fn quant_bands<A: Arithmetic>(
    mode: &Mode,
    x: &mut [A::Norm],
    requests: &[i32],
    fold: bool,
    total_bits: i32,
    enc: &mut RangeEncoder,
) -> Result<FrameReport> {
    code_bands_mono::<A, _>(mode, x, requests, fold, total_bits, enc)
}

/// Quantize a stereo frame. `x` holds the normalised left/right residual
/// interleaved per bin; `bank` the band magnitudes (channel-blocked) used for
/// intensity stereo.
pub fn quant_bands_stereo<A: Arithmetic>(
    mode: &Mode,
    x: &mut [A::Norm],
    bank: &[A::Ener],
    requests: &[i32],
    fold: bool,
    total_bits: i32,
    enc: &mut RangeEncoder,
) -> Result<FrameReport> {
    code_bands_stereo::<A, _>(mode, x, Some(bank), requests, fold, total_bits, enc)
}

/// Decode a mono frame into `x`.
pub fn unquant_bands<A: Arithmetic>(
    mode: &Mode,
    x: &mut [A::Norm],
    requests: &[i32],
    fold: bool,
    total_bits: i32,
    dec: &mut RangeDecoder<'_>,
) -> Result<FrameReport> {
    code_bands_mono::<A, _>(mode, x, requests, fold, total_bits, dec)
}

/// Decode a stereo frame into `x` (left/right interleaved).
pub fn unquant_bands_stereo<A: Arithmetic>(
    mode: &Mode,
    x: &mut [A::Norm],
    requests: &[i32],
    fold: bool,
    total_bits: i32,
    dec: &mut RangeDecoder<'_>,
) -> Result<FrameReport> {
    code_bands_stereo::<A, _>(mode, x, None, requests, fold, total_bits, dec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::{Fixed, Float};
    use crate::utils::NoiseSource;

    fn unit_bands(mode: &Mode, channels: usize, seed: u64) -> Vec<f32> {
        let mut noise = NoiseSource::new(seed);
        let mut x: Vec<f32> = (0..mode.frame_size() * channels).map(|_| noise.next_f32()).collect();
        let e = mode.e_bands();
        for band in 0..mode.nb_bands() {
            for c in 0..channels {
                Float::renormalise(&mut x, e[band] * channels + c, channels, mode.band_width(band));
            }
        }
        x
    }

    #[test]
    fn mono_round_trip_matches_encoder_view() {
        let mode = Mode::new(vec![0, 4, 8, 16, 24, 32], 1, 40, 8, vec![vec![0; 5]]).unwrap();
        let mut x = unit_bands(&mode, 1, 1);
        // A negative request keeps the last band from getting any pulses
        let requests = vec![80, 80, 120, 60, -64];
        let mut enc = RangeEncoder::new(60);
        let report = quant_bands::<Float>(&mode, &mut x, &requests, true, 480, &mut enc).unwrap();
        let bytes = enc.finish().unwrap();

        let mut y = vec![0.0f32; 40];
        let mut dec = RangeDecoder::new(&bytes);
        let decoded = unquant_bands::<Float>(&mode, &mut y, &requests, true, 480, &mut dec).unwrap();
        assert_eq!(report, decoded);
        for (a, b) in x.iter().zip(&y) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(report.bands[4].bits, 0);
        assert_eq!(report.bands[4].outcome, BandOutcome::Folded);
        assert!(report.bands[..4].iter().all(|b| b.outcome == BandOutcome::Coded));
    }

    #[test]
    fn fixed_mono_round_trip_matches_encoder_view() {
        let mode = Mode::new(vec![0, 4, 8, 16, 24, 32], 1, 40, 8, vec![vec![0; 5]]).unwrap();
        let mut x: Vec<i16> = unit_bands(&mode, 1, 1).iter().map(|&v| (v * 16384.0) as i16).collect();
        let requests = vec![80, 80, 120, 60, -64];
        let mut enc = RangeEncoder::new(60);
        let report = quant_bands::<Fixed>(&mode, &mut x, &requests, true, 480, &mut enc).unwrap();
        let bytes = enc.finish().unwrap();

        let mut y = vec![0i16; 40];
        let mut dec = RangeDecoder::new(&bytes);
        let decoded = unquant_bands::<Fixed>(&mode, &mut y, &requests, true, 480, &mut dec).unwrap();
        assert_eq!(report, decoded);
        assert_eq!(x, y);
        assert_eq!(report.bands[4].outcome, BandOutcome::Folded);
        assert!(y[32..].iter().any(|&v| v != 0));
    }

    #[test]
    fn pair_band_sends_one_sign_bit() {
        let mode = Mode::new(vec![0, 2], 2, 2, 0, vec![vec![0]]).unwrap();
        // Left and right far from equal so the angle is not an edge
        let mut x = vec![0.8, 0.1, -0.6, 0.99];
        let requests = vec![120];
        let mut enc = RangeEncoder::new(20);
        let report =
            quant_bands_stereo::<Float>(&mode, &mut x, &[1.0, 1.0], &requests, false, 160, &mut enc).unwrap();
        let band = report.bands[0];
        assert!(band.itheta != 0 && band.itheta != 16384, "{band:?}");
        assert_eq!(band.q2, 0);
        let bytes = enc.finish().unwrap();

        let mut y = vec![0.0f32; 4];
        let mut dec = RangeDecoder::new(&bytes);
        let decoded = unquant_bands_stereo::<Float>(&mode, &mut y, &requests, false, 160, &mut dec).unwrap();
        assert_eq!(report, decoded);
        for (a, b) in x.iter().zip(&y) {
            assert!((a - b).abs() < 1e-6);
            assert_eq!(a.signum(), b.signum());
        }
    }

    fn pair_bands_without_pulses<A: Arithmetic>(x: &mut [A::Norm], bank: &[A::Ener]) {
        let mode = Mode::new(vec![0, 2, 4, 8], 2, 8, 8, vec![vec![0, 0, 0]]).unwrap();
        let requests = [0, 0, 0];
        for fold in [true, false] {
            let mut enc = RangeEncoder::new(8);
            let report = quant_bands_stereo::<A>(&mode, x, bank, &requests, fold, 64, &mut enc).unwrap();
            assert!(report.bands.iter().all(|b| b.outcome == BandOutcome::Silent), "{report:?}");
            assert!(x.iter().all(|&v| v == A::Norm::default()));
            let bytes = enc.finish().unwrap();

            let mut y = vec![A::Norm::default(); 16];
            let mut dec = RangeDecoder::new(&bytes);
            let decoded = unquant_bands_stereo::<A>(&mode, &mut y, &requests, fold, 64, &mut dec).unwrap();
            assert_eq!(report, decoded);
            assert!(y.iter().all(|&v| v == A::Norm::default()), "{y:?}");
        }
    }

    #[test]
    fn pair_band_without_pulses_below_pitch_end_is_silent() {
        let source = unit_bands(&Mode::new(vec![0, 2, 4, 8], 2, 8, 8, vec![vec![0; 3]]).unwrap(), 2, 3);
        pair_bands_without_pulses::<Float>(&mut source.clone(), &[1.0; 6]);
        let mut fixed: Vec<i16> = source.iter().map(|&v| (v * 16384.0) as i16).collect();
        pair_bands_without_pulses::<Fixed>(&mut fixed, &[1 << 12; 6]);
    }

    #[test]
    fn channel_mismatch_is_rejected() {
        let mode = Mode::new(vec![0, 4], 2, 4, 0, vec![vec![0]]).unwrap();
        let mut x = vec![0.5f32; 8];
        let mut enc = RangeEncoder::new(8);
        assert_eq!(
            quant_bands::<Float>(&mode, &mut x, &[8], true, 64, &mut enc),
            Err(CodecError::UnsupportedChannels(2))
        );
        assert!(matches!(
            quant_bands_stereo::<Float>(&mode, &mut x, &[1.0], &[8], true, 64, &mut enc),
            Err(CodecError::BufferSizeMismatch { expected: 2, actual: 1 })
        ));
    }
}
