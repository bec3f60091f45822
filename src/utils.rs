// utils.rs - Test spectra, channel layout helpers and quality measures

/// Deterministic uniform noise (64-bit LCG), reproducible across platforms.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    state: u64,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 32) as u32
    }

    /// Uniform value in `[-1, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 23) as f32 - 1.0
    }
}

/// Interleaved spectrum of uniform noise with the given amplitude.
pub fn generate_noise_spectrum(bins: usize, channels: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut noise = NoiseSource::new(seed);
    (0..bins * channels).map(|_| noise.next_f32() * amplitude).collect()
}

/// Interleaved spectrum with a few strong peaks over a low noise floor.
///
/// `peaks` holds `(bin, amplitude)` pairs; every channel gets the same peaks,
/// scaled by `1 / (c + 1)` so the channels are correlated but not equal.
pub fn generate_tonal_spectrum(
    bins: usize,
    channels: usize,
    peaks: &[(usize, f32)],
    seed: u64,
) -> Vec<f32> {
    let mut spectrum = generate_noise_spectrum(bins, channels, 0.01, seed);
    for &(bin, amplitude) in peaks {
        if bin >= bins {
            continue;
        }
        for c in 0..channels {
            spectrum[bin * channels + c] += amplitude / (c + 1) as f32;
        }
    }
    spectrum
}

/// Quality assessment utilities
pub mod quality_utils {
    /// Signal-to-noise ratio in dB; 100 for a perfect match.
    pub fn calculate_snr(original: &[f32], processed: &[f32]) -> f32 {
        if original.len() != processed.len() {
            return 0.0;
        }
        let mut signal_power = 0.0;
        let mut noise_power = 0.0;
        for (orig, proc) in original.iter().zip(processed) {
            signal_power += orig * orig;
            let error = orig - proc;
            noise_power += error * error;
        }
        if noise_power > 0.0 {
            10.0 * (signal_power / noise_power).log10()
        } else {
            100.0
        }
    }

    /// Cosine similarity of two vectors; 0 when either is silent.
    pub fn correlation(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }
}
