// tests.rs - Crate-level behaviour tests
#[cfg(test)]
mod tests {
    use crate::rate::BITRES;
    use crate::*;
    use std::sync::Arc;

    const PITCH_END: usize = 16;

    /// 20 bands: 4-bin bands up to bin 32, then 8-bin bands up to 128.
    fn twenty_band_mode(channels: usize) -> Result<Mode> {
        let mut edges: Vec<usize> = (0..=32).step_by(4).collect();
        edges.extend((40..=128).step_by(8));
        Mode::new(edges, channels, 128, PITCH_END, vec![vec![0; 20]])
    }

    /// Unit-norm residual per band and channel, right channel partly
    /// correlated with the left.
    fn residual(mode: &Mode, seed: u64) -> Vec<f32> {
        let c_total = mode.channels();
        let mut noise = NoiseSource::new(seed);
        let mut x = vec![0.0f32; mode.frame_size() * c_total];
        for j in 0..mode.frame_size() {
            let left = noise.next_f32();
            x[j * c_total] = left;
            if c_total == 2 {
                x[j * c_total + 1] = 0.5 * left + 0.2 * noise.next_f32();
            }
        }
        let e = mode.e_bands();
        for band in 0..mode.nb_bands() {
            for c in 0..c_total {
                Float::renormalise(&mut x, e[band] * c_total + c, c_total, mode.band_width(band));
            }
        }
        x
    }

    fn band_slice(mode: &Mode, x: &[f32], band: usize) -> Vec<f32> {
        let c = mode.channels();
        x[mode.e_bands()[band] * c..mode.e_bands()[band + 1] * c].to_vec()
    }

    fn round_trip_stereo(
        mode: &Mode,
        x: &mut [f32],
        bank: &[f32],
        requests: &[i32],
        fold: bool,
        total_bits: i32,
    ) -> Result<(FrameReport, Vec<f32>, Vec<u8>)> {
        let mut enc = RangeEncoder::new((total_bits / 8) as usize);
        let report = quant_bands_stereo::<Float>(mode, x, bank, requests, fold, total_bits, &mut enc)?;
        let bytes = enc.finish()?;
        let mut y = vec![0.0f32; x.len()];
        let mut dec = RangeDecoder::new(&bytes);
        let decoded = unquant_bands_stereo::<Float>(mode, &mut y, requests, fold, total_bits, &mut dec)?;
        assert_eq!(report, decoded);
        Ok((report, y, bytes))
    }

    #[test]
    fn test_folding_only_above_pitch_end() -> Result<()> {
        let mode = twenty_band_mode(2)?;
        let original = residual(&mode, 7);
        let mut x = original.clone();
        let bank = vec![1.0f32; 40];
        let mut requests = vec![0; 20];
        requests[0] = 10_000;
        requests[1] = 10_000;

        let (report, y, _) = round_trip_stereo(&mode, &mut x, &bank, &requests, true, 40)?;
        assert_eq!(report.bands[0].outcome, BandOutcome::Coded);
        assert_eq!(report.bands[2].outcome, BandOutcome::Silent);
        assert_eq!(report.bands[3].outcome, BandOutcome::Silent);

        for (band, info) in report.bands.iter().enumerate() {
            let start = mode.e_bands()[band];
            if start < PITCH_END {
                assert_ne!(info.outcome, BandOutcome::Folded, "band {band}");
                if info.outcome == BandOutcome::Silent {
                    assert!(band_slice(&mode, &y, band).iter().all(|&v| v == 0.0));
                }
            }
        }

        let band5 = report.bands[5];
        assert_eq!((band5.q1, band5.q2), (0, 0));
        assert_eq!(band5.outcome, BandOutcome::Folded);
        let decoded = band_slice(&mode, &y, 5);
        assert!(decoded.iter().any(|&v| v != 0.0));
        let source = band_slice(&mode, &original, 5);
        assert!(decoded.iter().zip(&source).any(|(a, b)| (a - b).abs() > 1e-3));
        Ok(())
    }

    #[test]
    fn test_folding_disabled_gives_silence() -> Result<()> {
        let mode = twenty_band_mode(2)?;
        let mut x = residual(&mode, 8);
        let mut requests = vec![0; 20];
        requests[0] = 10_000;
        let (report, y, _) = round_trip_stereo(&mode, &mut x, &[1.0; 40], &requests, false, 40)?;
        assert_eq!(report.folded_bands(), 0);
        for (band, info) in report.bands.iter().enumerate() {
            if info.outcome == BandOutcome::Silent {
                assert!(band_slice(&mode, &y, band).iter().all(|&v| v == 0.0));
            }
        }
        Ok(())
    }

    #[test]
    fn test_pair_band_sign_bit() -> Result<()> {
        let mode = Mode::new(vec![0, 2], 2, 2, 0, vec![vec![0]])?;
        let original = vec![0.8, 0.1, -0.6, 0.99];
        let mut x = original.clone();
        // Small enough that the pulse index needs no raw bits
        let requests = [90];
        let (report, y, bytes) = round_trip_stereo(&mode, &mut x, &[1.0, 1.0], &requests, false, 160)?;
        let band = report.bands[0];
        assert!(band.itheta > 0 && band.itheta < 16384, "{band:?}");
        for (a, b) in x.iter().zip(&y) {
            assert_eq!(a.to_bits(), b.to_bits());
        }

        // The sign is the only raw bit, stored in the lowest bit of the last byte
        let last = bytes.len() - 1;
        let mut flipped = bytes.clone();
        flipped[last] ^= 1;
        let mut z = vec![0.0f32; 4];
        let mut dec = RangeDecoder::new(&flipped);
        let decoded = unquant_bands_stereo::<Float>(&mode, &mut z, &requests, false, 160, &mut dec)?;
        assert_eq!(decoded, report);
        // The side carries the pulses here, so the flip negates the mid: the
        // channels swap places with their signs inverted
        for (flip, kept) in z.chunks_exact(2).zip(y.chunks_exact(2)) {
            assert!((flip[0] + kept[1]).abs() < 1e-4, "{z:?} vs {y:?}");
            assert!((flip[1] + kept[0]).abs() < 1e-4, "{z:?} vs {y:?}");
        }

        let mut unused = bytes.clone();
        unused[last] ^= 2;
        let mut w = vec![0.0f32; 4];
        let mut dec = RangeDecoder::new(&unused);
        unquant_bands_stereo::<Float>(&mode, &mut w, &requests, false, 160, &mut dec)?;
        assert_eq!(w, y);
        Ok(())
    }

    #[test]
    fn test_intensity_bands_decode_equal_channels() -> Result<()> {
        let mode = twenty_band_mode(2)?;
        let mut x = residual(&mode, 9);
        let mut noise = NoiseSource::new(1);
        let bank: Vec<f32> = (0..40).map(|_| 1.0 + noise.next_f32().abs()).collect();
        // Too few bits per band for any angle resolution
        let requests = vec![40; 20];
        let (report, y, _) = round_trip_stereo(&mode, &mut x, &bank, &requests, true, 120)?;
        for (band, info) in report.bands.iter().enumerate() {
            assert_eq!(info.itheta, 0);
            for pair in band_slice(&mode, &y, band).chunks_exact(2) {
                assert_eq!(pair[0], pair[1]);
            }
        }
        Ok(())
    }

    /// Unit-norm stereo bands whose right channel copies the left, negated
    /// when `opposite` is set.
    fn stereo_shape<A: Arithmetic>(mode: &Mode, opposite: bool, seed: u64) -> Vec<A::Norm> {
        let freq: Vec<A::Sig> = generate_noise_spectrum(mode.frame_size(), 1, 4.0, seed)
            .into_iter()
            .flat_map(|v| [A::sig_from_f32(v); 2])
            .collect();
        let mut bank = vec![A::Ener::default(); mode.nb_bands() * 2];
        let mut x = vec![A::Norm::default(); freq.len()];
        compute_band_energies::<A>(mode, &freq, &mut bank).expect("energies");
        normalise_bands::<A>(mode, &freq, &mut x, &bank).expect("normalise");
        for pair in x.chunks_exact_mut(2) {
            pair[1] = if opposite { A::norm_neg(pair[0]) } else { pair[0] };
        }
        x
    }

    fn edges_for_backend<A: Arithmetic>(unit_bank: A::Ener) -> Result<()> {
        let mode = Mode::new(vec![0, 8, 16], 2, 16, 0, vec![vec![0, 0]])?;
        let requests = [400, 400];
        let bank = [unit_bank; 4];
        let code = |x: &mut Vec<A::Norm>| -> Result<(FrameReport, Vec<A::Norm>)> {
            let mut enc = RangeEncoder::new(25);
            let report = quant_bands_stereo::<A>(&mode, x, &bank, &requests, true, 200, &mut enc)?;
            let bytes = enc.finish()?;
            let mut y = vec![A::Norm::default(); x.len()];
            let mut dec = RangeDecoder::new(&bytes);
            let decoded = unquant_bands_stereo::<A>(&mode, &mut y, &requests, true, 200, &mut dec)?;
            assert_eq!(report, decoded);
            assert_eq!(*x, y);
            Ok((report, y))
        };

        // Identical channels: everything is mid
        let mut same = stereo_shape::<A>(&mode, false, 4);
        let (report, y) = code(&mut same)?;
        for info in &report.bands {
            assert_eq!(info.itheta, 0);
            assert_eq!(info.q2, 0);
        }
        for pair in y.chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
        assert!(y.iter().any(|&v| v != A::Norm::default()));

        // Opposite channels: everything is side
        let mut opposite = stereo_shape::<A>(&mode, true, 4);
        let (report, y) = code(&mut opposite)?;
        for info in &report.bands {
            assert_eq!(info.itheta, 16384);
            assert_eq!(info.q1, 0);
        }
        for pair in y.chunks_exact(2) {
            assert_eq!(pair[0], A::norm_neg(pair[1]));
        }
        Ok(())
    }

    #[test]
    fn test_pure_mid_and_pure_side_edges() -> Result<()> {
        edges_for_backend::<Float>(1.0)?;
        edges_for_backend::<Fixed>(1 << 12)
    }

    fn tell_trajectories_for_backend<A: Arithmetic>() -> Result<()> {
        for (seed, total_bits) in [(1u64, 64), (2, 200), (3, 480), (4, 1200)] {
            for channels in [1, 2] {
                let mode = Mode::from_config(&ModeConfig::new(48000, 120, channels)?)?;
                let freq: Vec<A::Sig> = generate_noise_spectrum(120, channels, 3.0, seed)
                    .into_iter()
                    .map(A::sig_from_f32)
                    .collect();
                let mut bank = vec![A::Ener::default(); mode.nb_bands() * channels];
                compute_band_energies::<A>(&mode, &freq, &mut bank)?;
                let mut x = vec![A::Norm::default(); freq.len()];
                normalise_bands::<A>(&mode, &freq, &mut x, &bank)?;
                let requests = compute_allocation(&mode, total_bits);

                let mut enc = RangeEncoder::new((total_bits / 8) as usize);
                let report = if channels == 1 {
                    quant_bands::<A>(&mode, &mut x, &requests, true, total_bits, &mut enc)?
                } else {
                    quant_bands_stereo::<A>(&mode, &mut x, &bank, &requests, true, total_bits, &mut enc)?
                };
                let bytes = enc.finish()?;
                let mut y = vec![A::Norm::default(); x.len()];
                let mut dec = RangeDecoder::new(&bytes);
                let decoded = if channels == 1 {
                    unquant_bands::<A>(&mode, &mut y, &requests, true, total_bits, &mut dec)?
                } else {
                    unquant_bands_stereo::<A>(&mode, &mut y, &requests, true, total_bits, &mut dec)?
                };
                assert_eq!(report, decoded, "seed {seed}, {channels} channel(s)");
                assert!(!dec.is_corrupt());
                assert_eq!(x, y);

                // Never more than the frame holds, never a negative grant
                assert!(report.tell <= total_bits << 3);
                assert!(report.bands.iter().all(|b| b.bits >= 0));
                assert!(report.spent_bits().iter().all(|&s| s >= 0));
            }
        }
        Ok(())
    }

    #[test]
    fn test_tell_trajectories_agree() -> Result<()> {
        tell_trajectories_for_backend::<Float>()
    }

    #[test]
    fn test_tell_trajectories_agree_in_fixed_point() -> Result<()> {
        tell_trajectories_for_backend::<Fixed>()
    }

    #[test]
    fn test_pair_band_folds_above_pitch_end() -> Result<()> {
        let mode = Mode::new(vec![0, 2, 4, 8], 2, 8, 0, vec![vec![0, 0, 0]])?;
        let mut x = residual(&mode, 5);
        // Only the first band gets bits; the rest must fold from it
        let requests = [200, -1000, -1000];
        let (report, y, _) = round_trip_stereo(&mode, &mut x, &[1.0; 6], &requests, true, 64)?;
        assert_eq!(report.bands[0].outcome, BandOutcome::Coded);
        assert_eq!(report.bands[1].outcome, BandOutcome::Folded);
        assert_eq!(report.bands[2].outcome, BandOutcome::Folded);
        for band in 1..3 {
            assert!(band_slice(&mode, &y, band).iter().any(|&v| v != 0.0), "band {band}");
        }
        assert_eq!(x, y);

        // Same budget with folding off leaves those bands empty
        let mut x = residual(&mode, 5);
        let (report, y, _) = round_trip_stereo(&mode, &mut x, &[1.0; 6], &requests, false, 64)?;
        assert_eq!(report.bands[1].outcome, BandOutcome::Silent);
        assert_eq!(report.bands[2].outcome, BandOutcome::Silent);
        assert!(y[4..].iter().all(|&v| v == 0.0));
        Ok(())
    }

    fn final_balance_for_backend<A: Arithmetic>() -> Result<()> {
        // Eight equal bands, each asking for about 90% of its even share
        let mode = Mode::new((0..=64).step_by(8).collect(), 1, 64, 0, vec![vec![0; 8]])?;
        let cache = mode.pulse_cache(7);
        let step = (1..=cache.max_pulses())
            .map(|k| cache.pulses_to_bits(k) - cache.pulses_to_bits(k - 1))
            .max()
            .unwrap_or(0);
        for (seed, total_bits) in [(1u64, 100), (2, 140), (3, 180), (4, 200)] {
            let request = (total_bits << BITRES) * 9 / 80;
            let requests = vec![request; 8];
            let freq: Vec<A::Sig> = generate_noise_spectrum(64, 1, 2.0, seed)
                .into_iter()
                .map(A::sig_from_f32)
                .collect();
            let mut bank = vec![A::Ener::default(); 8];
            compute_band_energies::<A>(&mode, &freq, &mut bank)?;
            let mut x = vec![A::Norm::default(); 64];
            normalise_bands::<A>(&mode, &freq, &mut x, &bank)?;

            let mut enc = RangeEncoder::new((total_bits / 8) as usize);
            let report = quant_bands::<A>(&mode, &mut x, &requests, true, total_bits, &mut enc)?;
            enc.finish()?;
            assert!(
                report.final_balance.abs() <= step,
                "{total_bits} bits: balance {} against a step of {step}",
                report.final_balance
            );
        }
        Ok(())
    }

    #[test]
    fn test_final_balance_within_one_band_step() -> Result<()> {
        final_balance_for_backend::<Float>()?;
        final_balance_for_backend::<Fixed>()
    }

    #[test]
    fn test_coded_bands_are_unit_norm() -> Result<()> {
        let mode = twenty_band_mode(2)?;
        let mut x = residual(&mode, 12);
        let requests = vec![120; 20];
        let (report, y, _) = round_trip_stereo(&mode, &mut x, &[1.0; 40], &requests, true, 400)?;
        for (band, info) in report.bands.iter().enumerate() {
            if info.outcome == BandOutcome::Silent {
                continue;
            }
            let slice = band_slice(&mode, &y, band);
            for c in 0..2 {
                let norm: f32 = slice.iter().skip(c).step_by(2).map(|v| v * v).sum::<f32>().sqrt();
                assert!((norm - 1.0).abs() < 1e-3, "band {band} channel {c}: {norm}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_energy_round_trip_both_backends() -> Result<()> {
        let mode = Mode::from_config(&ModeConfig::new(48000, 120, 2)?)?;
        // Every bin well above the fixed-point resolution
        let freq: Vec<f32> = (0..240)
            .map(|i| {
                let mag = 1.0 + (i % 7) as f32;
                if i % 3 == 0 {
                    -mag
                } else {
                    mag
                }
            })
            .collect();

        let mut bank = vec![0.0f32; 42];
        compute_band_energies::<Float>(&mode, &freq, &mut bank)?;
        let mut x = vec![0.0f32; 240];
        normalise_bands::<Float>(&mode, &freq, &mut x, &bank)?;
        let mut back = vec![0.0f32; 240];
        denormalise_bands::<Float>(&mode, &x, &mut back, &bank)?;
        for (a, b) in freq.iter().zip(&back).take(mode.coded_bins() * 2) {
            assert!((a - b).abs() < 1e-4);
        }

        let fixed_freq: Vec<i32> = freq.iter().map(|&v| Fixed::sig_from_f32(v)).collect();
        let mut fixed_bank = vec![0i32; 42];
        compute_band_energies::<Fixed>(&mode, &fixed_freq, &mut fixed_bank)?;
        for (&f, &q) in bank.iter().zip(&fixed_bank) {
            assert!((f - Fixed::ener_to_f32(q)).abs() <= 0.01 * f + 0.01);
        }
        let mut fixed_x = vec![0i16; 240];
        normalise_bands::<Fixed>(&mode, &fixed_freq, &mut fixed_x, &fixed_bank)?;
        renormalise_bands::<Fixed>(&mode, &mut fixed_x)?;
        for (&a, &b) in x.iter().zip(&fixed_x) {
            assert!((a - Fixed::norm_to_f32(b)).abs() < 0.02);
        }
        Ok(())
    }

    #[test]
    fn test_shared_mode_across_threads() -> Result<()> {
        let mode = Arc::new(Mode::from_config(&ModeConfig::default())?);
        let settings = EncoderSettings::new(80)?;
        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let mode = Arc::clone(&mode);
                let settings = settings.clone();
                std::thread::spawn(move || -> Result<bool> {
                    let mut encoder = FrameEncoder::new(mode.clone(), settings.clone())?;
                    let mut decoder = FrameDecoder::new(mode, settings)?;
                    let freq = generate_noise_spectrum(120, 2, 1.0, i);
                    let frame = encoder.encode_frame(&freq)?;
                    let decoded = decoder.decode_frame(&frame.bytes, &frame.bank)?;
                    Ok(decoded.report == frame.report)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().expect("worker panicked")?);
        }
        Ok(())
    }

    #[test]
    fn test_version_info() {
        assert!(version_info().starts_with(LIBRARY_NAME));
        assert!(version_info().ends_with(VERSION));
    }
}
