// encoder.rs - Frame-level encoder: energies, allocation and band quantization
use std::sync::Arc;
use std::time::Instant;

use crate::arith::Float;
use crate::bands::{quant_bands, quant_bands_stereo, BandOutcome, FrameReport};
use crate::config::{EncoderSettings, ModeConfig};
use crate::energy::{compute_band_energies, normalise_bands};
use crate::error::{check_len, CodecError, Result};
use crate::fold::{folding_decision, FoldState};
use crate::mode::Mode;
use crate::range_coder::RangeEncoder;
use crate::rate::compute_allocation;
use crate::utils::quality_utils::calculate_snr;

/// Running totals over every frame coded (or decoded) so far.
#[derive(Debug, Default, Clone)]
pub struct CodingStats {
    pub frames: u64,
    pub total_bytes: u64,
    /// Bits actually consumed by the range coder, summed over frames.
    pub bits_used: u64,
    pub coded_bands: u64,
    pub folded_bands: u64,
    pub silent_bands: u64,
    /// Frames coded with folding enabled.
    pub folding_frames: u64,
    /// Mean SNR (dB) of the quantized unit-norm residual.
    pub avg_snr: f32,
    pub coding_time_us: u64,
}

impl CodingStats {
    pub(crate) fn record(
        &mut self,
        bytes: usize,
        report: &FrameReport,
        fold: bool,
        snr: Option<f32>,
        elapsed_us: u64,
    ) {
        self.frames += 1;
        self.folding_frames += u64::from(fold);
        self.total_bytes += bytes as u64;
        self.bits_used += ((report.tell + 7) >> 3).max(0) as u64;
        for band in &report.bands {
            match band.outcome {
                BandOutcome::Coded => self.coded_bands += 1,
                BandOutcome::Folded => self.folded_bands += 1,
                BandOutcome::Silent => self.silent_bands += 1,
            }
        }
        if let Some(snr) = snr {
            self.avg_snr = (self.avg_snr * (self.frames - 1) as f32 + snr) / self.frames as f32;
        }
        self.coding_time_us += elapsed_us;
    }

    /// Share of the frame budget the range coder actually used.
    pub fn fill_ratio(&self) -> f32 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bits_used as f32 / (self.total_bytes * 8) as f32
        }
    }
}

/// One coded frame. The band magnitudes are not part of the bitstream and
/// must reach the decoder separately.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    /// Channel-blocked band magnitudes.
    pub bank: Vec<f32>,
    /// Whether bands without pulses were allowed to fold.
    pub fold: bool,
    pub report: FrameReport,
}

/// Writes the per-frame fold flag as an even-odds binary symbol.
pub(crate) const FOLD_FLAG_BITS: u32 = 1;

pub struct FrameEncoder {
    mode: Arc<Mode>,
    settings: EncoderSettings,
    fold_state: FoldState,
    stats: CodingStats,
}

impl FrameEncoder {
    pub fn new(mode: Arc<Mode>, settings: EncoderSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            mode,
            settings,
            fold_state: FoldState::default(),
            stats: CodingStats::default(),
        })
    }

    pub fn from_config(config: &ModeConfig, settings: EncoderSettings) -> Result<Self> {
        Self::new(Arc::new(Mode::from_config(config)?), settings)
    }

    /// Code one frame of interleaved frequency-domain coefficients.
    pub fn encode_frame(&mut self, freq: &[f32]) -> Result<EncodedFrame> {
        let start_time = Instant::now();
        let mode = &*self.mode;
        let channels = mode.channels();
        check_len(mode.frame_size() * channels, freq.len())?;

        let mut bank = vec![0.0f32; mode.nb_bands() * channels];
        compute_band_energies::<Float>(mode, freq, &mut bank)?;
        let mut x = vec![0.0f32; freq.len()];
        normalise_bands::<Float>(mode, freq, &mut x, &bank)?;
        let original = x.clone();

        let total_bits = self.settings.total_bits();
        let requests = compute_allocation(mode, total_bits);
        let mut enc = RangeEncoder::new(self.settings.bytes_per_frame);
        let fold = self.settings.fold && folding_decision::<Float>(mode, &x, &mut self.fold_state);
        enc.encode_bin(u32::from(fold), u32::from(fold) + 1, FOLD_FLAG_BITS);
        let report = match channels {
            1 => quant_bands::<Float>(mode, &mut x, &requests, fold, total_bits, &mut enc)?,
            2 => quant_bands_stereo::<Float>(mode, &mut x, &bank, &requests, fold, total_bits, &mut enc)?,
            c => return Err(CodecError::UnsupportedChannels(c)),
        };
        let bytes = enc.finish()?;

        let snr = calculate_snr(&original, &x);
        self.stats.record(
            bytes.len(),
            &report,
            fold,
            Some(snr),
            start_time.elapsed().as_micros() as u64,
        );
        log::debug!(
            "encoded frame {}: {} bytes, {} of {} bits, {} coded / {} folded bands, fold {}, residual SNR {:.1} dB",
            self.stats.frames,
            bytes.len(),
            (report.tell + 7) >> 3,
            total_bits,
            report.coded_bands(),
            report.folded_bands(),
            fold,
            snr
        );
        Ok(EncodedFrame {
            bytes,
            bank,
            fold,
            report,
        })
    }

    /// Code a run of consecutive frames.
    pub fn encode_buffer(&mut self, freq: &[f32]) -> Result<Vec<EncodedFrame>> {
        let frame_len = self.mode.frame_size() * self.mode.channels();
        if freq.len() % frame_len != 0 {
            return Err(CodecError::BufferSizeMismatch {
                expected: freq.len() - freq.len() % frame_len,
                actual: freq.len(),
            });
        }
        freq.chunks(frame_len).map(|chunk| self.encode_frame(chunk)).collect()
    }

    pub fn mode(&self) -> &Arc<Mode> {
        &self.mode
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    pub fn stats(&self) -> &CodingStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CodingStats::default();
    }

    /// Forget the folding history, as at the start of a new stream.
    pub fn reset_folding(&mut self) {
        self.fold_state = FoldState::default();
    }

    /// Bitrate implied by the frame budget when one frame covers
    /// `frame_size` samples at `sample_rate`.
    pub fn bitrate_kbps(&self, sample_rate: u32) -> f32 {
        let frames_per_second = sample_rate as f32 / self.mode.frame_size() as f32;
        self.settings.total_bits() as f32 * frames_per_second / 1000.0
    }
}
