// config.rs - Mode and encoder configuration
use crate::error::{CodecError, Result};

/// Parameters from which a [`crate::Mode`] is derived.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub channels: usize,
    /// Frequency below which spectral folding is never used.
    pub pitch_end_hz: u32,
}

impl ModeConfig {
    pub fn new(sample_rate: u32, frame_size: usize, channels: usize) -> Result<Self> {
        let config = Self {
            sample_rate,
            frame_size,
            channels,
            pitch_end_hz: 4000.min(sample_rate / 4),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_pitch_end(mut self, pitch_end_hz: u32) -> Result<Self> {
        self.pitch_end_hz = pitch_end_hz;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(8000..=96000).contains(&self.sample_rate) {
            return Err(CodecError::InvalidConfig(format!(
                "Unsupported sample rate: {}",
                self.sample_rate
            )));
        }
        if !(40..=1024).contains(&self.frame_size) || self.frame_size % 2 != 0 {
            return Err(CodecError::InvalidConfig(format!(
                "Frame size must be even and within 40..=1024, got {}",
                self.frame_size
            )));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(CodecError::UnsupportedChannels(self.channels));
        }
        if self.pitch_end_hz >= self.sample_rate / 2 {
            return Err(CodecError::InvalidConfig(
                "Pitch end must lie below Nyquist".to_string(),
            ));
        }
        Ok(())
    }

    /// First bin at or above the pitch end frequency.
    pub fn pitch_end_bin(&self) -> usize {
        (self.pitch_end_hz as u64 * 2 * self.frame_size as u64 / self.sample_rate as u64) as usize
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_size: 120,
            channels: 2,
            pitch_end_hz: 4000,
        }
    }
}

/// Frame-level encoder settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub bytes_per_frame: usize,
    /// Allow spectral folding for bands that receive no pulses. When set,
    /// each frame still decides from its own spectrum; the decoder reads the
    /// decision from the bitstream.
    pub fold: bool,
}

impl EncoderSettings {
    pub fn new(bytes_per_frame: usize) -> Result<Self> {
        let settings = Self {
            bytes_per_frame,
            fold: true,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=1275).contains(&self.bytes_per_frame) {
            return Err(CodecError::InvalidConfig(format!(
                "Bytes per frame must be within 2..=1275, got {}",
                self.bytes_per_frame
            )));
        }
        Ok(())
    }

    pub fn total_bits(&self) -> i32 {
        (self.bytes_per_frame * 8) as i32
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bytes_per_frame: 100,
            fold: true,
        }
    }
}
