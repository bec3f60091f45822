// decoder.rs - Frame-level decoder mirroring FrameEncoder
use std::sync::Arc;
use std::time::Instant;

use crate::arith::Float;
use crate::bands::{unquant_bands, unquant_bands_stereo, FrameReport};
use crate::config::{EncoderSettings, ModeConfig};
use crate::encoder::{CodingStats, FOLD_FLAG_BITS};
use crate::energy::denormalise_bands;
use crate::error::{check_len, CodecError, Result};
use crate::mode::Mode;
use crate::range_coder::RangeDecoder;
use crate::rate::compute_allocation;

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Interleaved frequency-domain coefficients.
    pub freq: Vec<f32>,
    /// Unit-norm residual before the band magnitudes were applied.
    pub residual: Vec<f32>,
    /// Fold flag read from the frame.
    pub fold: bool,
    pub report: FrameReport,
}

/// Decodes frames produced by a [`crate::FrameEncoder`] sharing the same mode
/// and settings.
pub struct FrameDecoder {
    mode: Arc<Mode>,
    settings: EncoderSettings,
    stats: CodingStats,
}

impl FrameDecoder {
    pub fn new(mode: Arc<Mode>, settings: EncoderSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            mode,
            settings,
            stats: CodingStats::default(),
        })
    }

    pub fn from_config(config: &ModeConfig, settings: EncoderSettings) -> Result<Self> {
        Self::new(Arc::new(Mode::from_config(config)?), settings)
    }

    /// Decode one frame given its bytes and the band magnitudes sent
    /// alongside it.
    pub fn decode_frame(&mut self, bytes: &[u8], bank: &[f32]) -> Result<DecodedFrame> {
        let start_time = Instant::now();
        let mode = &*self.mode;
        let channels = mode.channels();
        check_len(self.settings.bytes_per_frame, bytes.len())?;
        check_len(mode.nb_bands() * channels, bank.len())?;

        let total_bits = self.settings.total_bits();
        let requests = compute_allocation(mode, total_bits);
        let mut residual = vec![0.0f32; mode.frame_size() * channels];
        let mut dec = RangeDecoder::new(bytes);
        let flag = dec.decode_bin(FOLD_FLAG_BITS);
        dec.update(flag, flag + 1, 1 << FOLD_FLAG_BITS);
        let fold = flag != 0;
        let report = match channels {
            1 => unquant_bands::<Float>(mode, &mut residual, &requests, fold, total_bits, &mut dec)?,
            2 => unquant_bands_stereo::<Float>(mode, &mut residual, &requests, fold, total_bits, &mut dec)?,
            c => return Err(CodecError::UnsupportedChannels(c)),
        };
        if dec.is_corrupt() {
            log::warn!("frame {} decoded an out-of-range symbol", self.stats.frames + 1);
        }

        let mut freq = vec![0.0f32; residual.len()];
        denormalise_bands::<Float>(mode, &residual, &mut freq, bank)?;

        self.stats.record(
            bytes.len(),
            &report,
            fold,
            None,
            start_time.elapsed().as_micros() as u64,
        );
        log::debug!(
            "decoded frame {}: {} of {} bits, {} coded / {} folded bands",
            self.stats.frames,
            (report.tell + 7) >> 3,
            total_bits,
            report.coded_bands(),
            report.folded_bands()
        );
        Ok(DecodedFrame {
            freq,
            residual,
            fold,
            report,
        })
    }

    pub fn mode(&self) -> &Arc<Mode> {
        &self.mode
    }

    pub fn stats(&self) -> &CodingStats {
        &self.stats
    }
}
