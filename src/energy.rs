// energy.rs - Per-band magnitude extraction and restoration
//
// Spectral buffers are bin-interleaved (`x[j * C + c]`); the energy bank is
// channel-blocked (`bank[band + c * nb_bands]`).
use crate::arith::Arithmetic;
use crate::error::{check_len, CodecError, Result};
use crate::mode::Mode;

fn check_channels(mode: &Mode) -> Result<usize> {
    let c = mode.channels();
    if c == 0 || c > 2 {
        return Err(CodecError::UnsupportedChannels(c));
    }
    Ok(c)
}

/// Magnitude of every (band, channel), floored at the backend epsilon.
pub fn compute_band_energies<A: Arithmetic>(
    mode: &Mode,
    freq: &[A::Sig],
    bank: &mut [A::Ener],
) -> Result<()> {
    let c_total = check_channels(mode)?;
    let nb = mode.nb_bands();
    check_len(mode.frame_size() * c_total, freq.len())?;
    check_len(nb * c_total, bank.len())?;
    let e = mode.e_bands();
    for c in 0..c_total {
        for band in 0..nb {
            let samples = (e[band]..e[band + 1]).map(|j| freq[j * c_total + c]);
            bank[band + c * nb] = A::magnitude(samples);
        }
    }
    Ok(())
}

/// Divide every band by its magnitude so its shape has unit norm.
pub fn normalise_bands<A: Arithmetic>(
    mode: &Mode,
    freq: &[A::Sig],
    x: &mut [A::Norm],
    bank: &[A::Ener],
) -> Result<()> {
    let c_total = check_channels(mode)?;
    let nb = mode.nb_bands();
    check_len(mode.frame_size() * c_total, freq.len())?;
    check_len(mode.frame_size() * c_total, x.len())?;
    check_len(nb * c_total, bank.len())?;
    let e = mode.e_bands();
    for c in 0..c_total {
        for band in 0..nb {
            let g = A::reciprocal(bank[band + c * nb]);
            for j in e[band]..e[band + 1] {
                x[j * c_total + c] = A::apply_gain(freq[j * c_total + c], g);
            }
        }
    }
    for v in &mut x[mode.coded_bins() * c_total..] {
        *v = A::Norm::default();
    }
    Ok(())
}

/// Scale unit-norm shapes back up by their band magnitudes; bins above the
/// last band are cleared.
pub fn denormalise_bands<A: Arithmetic>(
    mode: &Mode,
    x: &[A::Norm],
    freq: &mut [A::Sig],
    bank: &[A::Ener],
) -> Result<()> {
    let c_total = check_channels(mode)?;
    let nb = mode.nb_bands();
    check_len(mode.frame_size() * c_total, x.len())?;
    check_len(mode.frame_size() * c_total, freq.len())?;
    check_len(nb * c_total, bank.len())?;
    let e = mode.e_bands();
    for c in 0..c_total {
        for band in 0..nb {
            let g = bank[band + c * nb];
            for j in e[band]..e[band + 1] {
                freq[j * c_total + c] = A::scale(x[j * c_total + c], g);
            }
        }
    }
    for v in &mut freq[mode.coded_bins() * c_total..] {
        *v = A::Sig::default();
    }
    Ok(())
}

/// Pull every band of every channel back to unit norm.
pub fn renormalise_bands<A: Arithmetic>(mode: &Mode, x: &mut [A::Norm]) -> Result<()> {
    let c_total = check_channels(mode)?;
    check_len(mode.frame_size() * c_total, x.len())?;
    let e = mode.e_bands();
    for c in 0..c_total {
        for band in 0..mode.nb_bands() {
            let range = e[band]..e[band + 1];
            let norm = A::magnitude(range.clone().map(|j| A::widen(x[j * c_total + c])));
            let g = A::reciprocal(norm);
            for j in range {
                x[j * c_total + c] = A::apply_gain(A::widen(x[j * c_total + c]), g);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::{Fixed, Float};
    use crate::utils::NoiseSource;

    fn mode(channels: usize) -> Mode {
        let bands = vec![0, 2, 4, 8, 12, 20, 28, 40];
        Mode::new(bands, channels, 48, 8, vec![vec![64; 7]]).unwrap()
    }

    fn band_norms<A: Arithmetic>(mode: &Mode, x: &[A::Norm]) -> Vec<f32> {
        let c_total = mode.channels();
        let e = mode.e_bands();
        let mut out = Vec::new();
        for c in 0..c_total {
            for band in 0..mode.nb_bands() {
                let sum: f32 = (e[band]..e[band + 1])
                    .map(|j| A::norm_to_f32(x[j * c_total + c]).powi(2))
                    .sum();
                out.push(sum.sqrt());
            }
        }
        out
    }

    fn energy_properties<A: Arithmetic>(tolerance: f32) {
        for channels in [1, 2] {
            let mode = mode(channels);
            let len = mode.frame_size() * channels;
            let mut noise = NoiseSource::new(11 + channels as u64);
            let input: Vec<f32> = (0..len).map(|_| noise.next_f32() * 40.0).collect();
            let freq: Vec<A::Sig> = input.iter().map(|&v| A::sig_from_f32(v)).collect();

            let mut bank = vec![A::Ener::default(); mode.nb_bands() * channels];
            compute_band_energies::<A>(&mode, &freq, &mut bank).unwrap();
            assert!(bank.iter().all(|&e| e >= A::EPSILON));

            let mut x = vec![A::Norm::default(); len];
            normalise_bands::<A>(&mode, &freq, &mut x, &bank).unwrap();
            for norm in band_norms::<A>(&mode, &x) {
                assert!((norm - 1.0).abs() < tolerance, "norm {norm}");
            }

            let mut restored = vec![A::Sig::default(); len];
            denormalise_bands::<A>(&mode, &x, &mut restored, &bank).unwrap();
            for (j, (&a, &b)) in input.iter().zip(&restored).enumerate() {
                if j < mode.coded_bins() * channels {
                    assert!((a - A::sig_to_f32(b)).abs() < 40.0 * tolerance * 4.0, "bin {j}");
                } else {
                    assert_eq!(b, A::Sig::default());
                }
            }

            // normalise(denormalise(normalise(X))) is unit norm again
            let mut again = vec![A::Norm::default(); len];
            compute_band_energies::<A>(&mode, &restored, &mut bank).unwrap();
            normalise_bands::<A>(&mode, &restored, &mut again, &bank).unwrap();
            for norm in band_norms::<A>(&mode, &again) {
                assert!((norm - 1.0).abs() < tolerance);
            }
        }
    }

    fn renormalise_restores_unit_norm<A: Arithmetic>(tolerance: f32) {
        let mode = mode(2);
        let len = mode.frame_size() * 2;
        let mut noise = NoiseSource::new(5);
        let input: Vec<f32> = (0..len).map(|_| noise.next_f32() * 3.0).collect();
        let freq: Vec<A::Sig> = input.iter().map(|&v| A::sig_from_f32(v)).collect();
        let mut bank = vec![A::Ener::default(); mode.nb_bands() * 2];
        compute_band_energies::<A>(&mode, &freq, &mut bank).unwrap();
        // Shrinking some bins after the magnitudes were taken leaves the
        // bands short of unit norm
        let skewed: Vec<A::Sig> = input
            .iter()
            .enumerate()
            .map(|(i, &v)| A::sig_from_f32(v * (1.0 - 0.3 * (i % 3) as f32)))
            .collect();
        let mut x = vec![A::Norm::default(); len];
        normalise_bands::<A>(&mode, &skewed, &mut x, &bank).unwrap();
        renormalise_bands::<A>(&mode, &mut x).unwrap();
        for norm in band_norms::<A>(&mode, &x) {
            assert!((norm - 1.0).abs() < tolerance, "norm {norm}");
        }
    }

    #[test]
    fn float_backend_properties() {
        energy_properties::<Float>(1e-4);
        renormalise_restores_unit_norm::<Float>(1e-4);
    }

    #[test]
    fn fixed_backend_properties() {
        energy_properties::<Fixed>(0.02);
        renormalise_restores_unit_norm::<Fixed>(0.02);
    }

    #[test]
    fn silent_band_stays_silent() {
        let mode = mode(1);
        let freq = vec![0.0f32; 48];
        let mut bank = vec![0.0; mode.nb_bands()];
        compute_band_energies::<Float>(&mode, &freq, &mut bank).unwrap();
        let mut x = vec![1.0f32; 48];
        normalise_bands::<Float>(&mode, &freq, &mut x, &bank).unwrap();
        assert!(x.iter().all(|&v| v == 0.0));
        renormalise_bands::<Float>(&mode, &mut x).unwrap();
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        let mode = mode(2);
        let freq = vec![0.0f32; 48];
        let mut bank = vec![0.0; 14];
        assert_eq!(
            compute_band_energies::<Float>(&mode, &freq, &mut bank),
            Err(CodecError::BufferSizeMismatch { expected: 96, actual: 48 })
        );
    }
}
