// lib.rs - Spectral band coding library
//! Band energy normalisation, stereo decorrelation, bit allocation and range
//! coding for transform audio codecs.
//!
//! The crate takes frequency-domain coefficients that are already split into
//! bands, removes the per-band energy, rotates stereo bands onto a mid/side
//! basis and spends a fixed per-frame bit budget on pulse-vector quantized
//! band shapes. Encoder and decoder run the same allocation loop, so the
//! bitstream carries no allocation side information.

pub mod arith;
pub mod bands;
pub mod config;
pub mod cwrs;
pub mod decoder;
pub mod encoder;
pub mod energy;
pub mod error;
pub mod fold;
pub mod mathops;
pub mod mode;
pub mod quantizer;
pub mod range_coder;
pub mod rate;
pub mod stereo;
pub mod utils;

#[cfg(test)]
pub mod tests;

// Re-export main public API
pub use arith::{Arithmetic, Fixed, Float};
pub use bands::{
    quant_bands, quant_bands_stereo, unquant_bands, unquant_bands_stereo, BandCoder, BandOutcome,
    BandReport, FrameReport,
};
pub use config::{EncoderSettings, ModeConfig};
pub use decoder::{DecodedFrame, FrameDecoder};
pub use encoder::{CodingStats, EncodedFrame, FrameEncoder};
pub use energy::{compute_band_energies, denormalise_bands, normalise_bands, renormalise_bands};
pub use error::{CodecError, Result};
pub use fold::{folding_decision, FoldState};
pub use mode::Mode;
pub use range_coder::{RangeDecoder, RangeEncoder, Tell};
pub use rate::compute_allocation;
pub use utils::{generate_noise_spectrum, generate_tonal_spectrum, NoiseSource};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LIBRARY_NAME: &str = "Spectral Band Coder";

/// Get library version and build information
pub fn version_info() -> String {
    format!("{} v{}", LIBRARY_NAME, VERSION)
}
